//! Core data models for the ingestion pipeline.
//!
//! `CandidateObject` is what a bucket listing yields; `Record` is what the
//! pipeline forwards downstream. Both serialize naturally via `serde`.

pub mod object;
pub mod record;
