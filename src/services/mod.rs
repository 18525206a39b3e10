//! Ingestion pipeline services, leaf-first: store access, checkpoint, filter,
//! line reader and sink feed the archival policy and the ingestion cycle,
//! which the scheduler drives. Startup checks gate the first cycle.

pub mod archive;
pub mod checkpoint;
pub mod filter;
pub mod ingest;
pub mod line_reader;
pub mod scheduler;
pub mod sink;
pub mod startup;
pub mod store_service;

#[cfg(test)]
pub mod testing;
