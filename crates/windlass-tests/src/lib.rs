//! Windlass integration and property tests.
//!
//! The harness wires a real fetcher and processor against in-memory fakes of
//! every external collaborator (history engine, remote admin, persistence,
//! frontend, domain cache), so cross-component behaviour is exercised
//! end-to-end in-process.

pub mod harness;

#[cfg(test)]
mod dlq_integration;
#[cfg(test)]
mod fetcher_integration;
#[cfg(test)]
mod processor_integration;
#[cfg(test)]
mod proptest_replication;
