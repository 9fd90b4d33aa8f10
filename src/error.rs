//! # Error
//!
//! Error kinds for the simulation pipeline. Configuration and input errors
//! are fatal at startup; numeric and sampler errors indicate an inconsistent
//! simulation state and terminate the run after the report is flushed.

use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    /// Malformed mixture string, out-of-range parameter, unknown method name.
    #[error("configuration error: {0}")]
    Config(String),

    /// Unusable input: nonexistent file, bad primer length, empty stream.
    #[error("input error: {0}")]
    Input(String),

    /// Integer overflow in cumulative sums or PCR counts, negative missing
    /// counts. These point at a bug or pathological parameters.
    #[error("numeric inconsistency: {0}")]
    Numeric(String),

    /// Spill directory or spill/re-hydrate I/O failure.
    #[error("resource error: {0}")]
    Resource(String),

    /// A transcript ran out of fragments it had promised during sampling.
    #[error("sampler inconsistency: {0}")]
    Sampler(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type SimResult<T> = Result<T, SimError>;
