//! Centralized error type for the cadence umbrella crate.
//!
//! Wraps the pipeline's error so `?` propagates naturally across crate boundaries.

use crate::project::ClipId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] cadence_core::Error),

    #[error("Encoding: {0}")]
    Encoding(#[from] hound::Error),

    #[error("No clip {0} in the project")]
    ClipNotFound(ClipId),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// The pipeline error underneath, if this is one.
    pub fn core(&self) -> Option<&cadence_core::Error> {
        match self {
            Error::Core(e) => Some(e),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
