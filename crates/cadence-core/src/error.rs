//! Error types for cadence-core.

use thiserror::Error;

/// Error type shared by every pipeline operation.
///
/// The set is closed: backends and built-in nodes map their own failures onto one of
/// these variants so callers can match on the kind without downcasting.
#[derive(Error, Debug)]
pub enum Error {
    #[error("out of memory")]
    NoMem,

    #[error("max channels exceeded")]
    MaxChannelsExceeded,

    #[error("incompatible ports")]
    IncompatiblePorts,

    #[error("invalid port direction")]
    InvalidPortDirection,

    #[error("incompatible sample rates")]
    IncompatibleSampleRates,

    #[error("incompatible channel layouts")]
    IncompatibleChannelLayouts,

    #[error("opening audio hardware: {0}")]
    OpeningAudioHardware(String),

    #[error("opening MIDI hardware: {0}")]
    OpeningMidiHardware(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("insufficient system resources: {0}")]
    SystemResources(String),

    #[error("decoding audio: {0}")]
    DecodingAudio(String),

    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    #[error("aborted")]
    Aborted,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias.
pub type Result<T> = core::result::Result<T, Error>;

impl From<hound::Error> for Error {
    fn from(e: hound::Error) -> Self {
        match e {
            hound::Error::IoError(io) => Error::Io(io),
            other => Error::DecodingAudio(other.to_string()),
        }
    }
}

impl Error {
    /// True for the two negotiation failures a resampler can bridge.
    pub fn is_format_mismatch(&self) -> bool {
        matches!(
            self,
            Error::IncompatibleSampleRates | Error::IncompatibleChannelLayouts
        )
    }
}
