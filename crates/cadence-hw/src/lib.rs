//! Hardware backends for the cadence pipeline.
//!
//! - [`DummyBackend`]: clock-driven virtual devices, always available
//! - `CpalBackend` (`"cpal"` feature): system audio
//! - [`DummyMidiBackend`] and `MidirBackend` (`"midi-io"` feature): MIDI input
//!
//! # Example
//!
//! ```ignore
//! let pipeline = Pipeline::builder()
//!     .audio_backend(cadence_hw::default_audio_backend())
//!     .midi_backend(cadence_hw::default_midi_backend())
//!     .build()?;
//! ```

mod dummy;
pub use dummy::{
    DummyBackend, DummyPlayback, DummyRecording, PLAYBACK_DEVICE_ID, RECORDING_DEVICE_ID,
};

#[cfg(feature = "cpal")]
mod cpal_backend;
#[cfg(feature = "cpal")]
pub use cpal_backend::CpalBackend;

mod midi;
pub use midi::{parse_midi_message, DummyMidiBackend};
#[cfg(feature = "midi-io")]
pub use midi::MidirBackend;

mod stream;

use cadence_core::{AudioBackend, MidiBackend};
use std::sync::Arc;

/// System audio when built with `cpal`, otherwise the dummy backend.
pub fn default_audio_backend() -> Arc<dyn AudioBackend> {
    #[cfg(feature = "cpal")]
    {
        Arc::new(CpalBackend::new())
    }
    #[cfg(not(feature = "cpal"))]
    {
        Arc::new(DummyBackend::new())
    }
}

/// Hardware MIDI when built with `midi-io`, otherwise the dummy backend.
pub fn default_midi_backend() -> Arc<dyn MidiBackend> {
    #[cfg(feature = "midi-io")]
    {
        Arc::new(MidirBackend::new())
    }
    #[cfg(not(feature = "midi-io"))]
    {
        Arc::new(DummyMidiBackend::new())
    }
}
