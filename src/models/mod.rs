//! Core data models for sagaweave.
//!
//! - `config`: runtime configuration (TOML)
//! - `document`: documents, chunks, store records and per-document results
//! - `error`: the crate error taxonomy

mod config;
mod document;
mod error;

pub use config::*;
pub use document::*;
pub use error::*;
