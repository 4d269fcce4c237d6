//! Built-in node types for the cadence pipeline.
//!
//! Every node type is exposed as a function returning an `Arc<NodeDescriptor>`; the
//! ones that need nothing but the pipeline configuration and hardware lists are
//! registered in one go by [`register_builtin_nodes`].
//!
//! - [`device`]: playback sinks and recording sources over hardware streams
//! - [`midi_input`]: events from a MIDI device
//! - [`resample`]: sample-rate and channel-layout conversion
//! - [`mixer`], [`delay`], [`synth`]: small processors
//! - [`audio_clip`], [`clip_events`]: clip playback driven by a published event list
//! - [`render_sink`]: offline rendering to a WAV file

pub mod audio_clip;
pub mod channel_matrix;
pub mod clip_events;
pub mod delay;
pub mod device;
pub mod midi_input;
pub mod mixer;
pub mod render_sink;
pub mod resample;
pub mod synth;

pub use audio_clip::{audio_clip_descriptor, AudioClip, MAX_VOICES};
pub use channel_matrix::ChannelMatrix;
pub use clip_events::{clip_events_descriptor, ClipEvents};
pub use delay::{delay_descriptor, Delay};
pub use device::{device_format, playback_descriptor, recording_descriptor};
pub use midi_input::midi_input_descriptor;
pub use mixer::{mixer_descriptor, Mixer};
pub use render_sink::{render_sink_descriptor, RenderProgress, SampleFormat};
pub use resample::{resample_descriptor, Resample};
pub use synth::{synth_descriptor, Synth};

use cadence_core::{DevicePurpose, Pipeline, Result};
use std::sync::Arc;

/// Inputs on the registered "mixer-2" descriptor.
const DEFAULT_MIXER_INPUTS: usize = 2;

/// Registers the delay, synth and a two-input mixer, plus one descriptor per audio
/// and MIDI device the pipeline's backends currently list.
///
/// Device descriptors are named `playback:<id>`, `recording:<id>` and `midi:<id>`.
pub fn register_builtin_nodes(pipeline: &mut Pipeline) -> Result<()> {
    let config = pipeline.config().clone();

    pipeline.register_descriptor(delay_descriptor(config.sample_rate)?);
    pipeline.register_descriptor(synth_descriptor(config.sample_rate)?);
    pipeline.register_descriptor(mixer_descriptor(
        DEFAULT_MIXER_INPUTS,
        config.channel_layout.clone(),
        config.sample_rate,
    )?);

    let backend = Arc::clone(pipeline.audio_backend());
    for device in pipeline.audio_devices().devices {
        let descriptor = match device.purpose {
            DevicePurpose::Playback => playback_descriptor(Arc::clone(&backend), device, &config)?,
            DevicePurpose::Recording => recording_descriptor(Arc::clone(&backend), device, &config)?,
        };
        pipeline.register_descriptor(descriptor);
    }

    if let Some(midi) = pipeline.midi_backend().cloned() {
        for device in midi.devices() {
            pipeline.register_descriptor(midi_input_descriptor(Arc::clone(&midi), device)?);
        }
    }

    tracing::debug!("Registered {} node descriptors", pipeline.descriptors().len());
    Ok(())
}
