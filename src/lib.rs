//! # Cadence - Real-time Audio Pipeline
//!
//! Plays and renders projects of audio clips through a pull-driven node graph.
//!
//! ## Architecture
//!
//! Cadence is an umbrella crate that coordinates:
//! - **cadence-core** - Pipeline kernel (ring buffers, node/port model, scheduler)
//! - **cadence-hw** - Hardware backends (dummy devices, cpal, MIDI)
//! - **cadence-nodes** - Built-in nodes (devices, resampler, mixer, clips, render sink)
//!
//! On top of those it adds the application layer: a [`Project`] of clips, the
//! [`AudioGraph`] that realizes it on a pipeline, and [`RenderJob`] for offline export.
//!
//! ## Quick Start
//!
//! ```ignore
//! use cadence::prelude::*;
//!
//! let pipeline = Pipeline::builder()
//!     .audio_backend(cadence::hw::default_audio_backend())
//!     .build()?;
//!
//! let project = Arc::new(Mutex::new(Project::new()));
//! let mut graph = AudioGraph::playback(pipeline, Arc::clone(&project), GraphSettings::default())?;
//!
//! let clip = graph.add_clip("loop", Arc::new(AudioFile::load_wav("loop.wav")?))?;
//! project.lock().clip_mut(clip)?.add_segment(ClipSegment::new(0.0, 0, 96000))?;
//! graph.play()?;
//! ```
//!
//! ## Feature Flags
//!
//! - `default` - Dummy audio and MIDI backends only
//! - `cpal` - System audio
//! - `midi-io` - Hardware MIDI input
//! - `hardware` - Both of the above

/// Re-export of cadence-core for direct access
pub use cadence_core as core;

/// Re-export of cadence-hw
pub use cadence_hw as hw;

/// Re-export of cadence-nodes
pub use cadence_nodes as nodes;

pub use cadence_core::{
    AudioBackend, AudioDevice, AudioFile, AudioFormat, ChannelLayout, Event, EventKind,
    EventWakeup, HardwareEvent, MidiBackend, NodeDescriptor, NodeId, NodeProcessor, Pipeline,
    PipelineBuilder, PipelineConfig, PipelineState, RunContext, TimeBase,
};

pub use cadence_nodes::{register_builtin_nodes, RenderProgress, SampleFormat};

mod error;
pub use error::{Error, Result};

pub mod audio_graph;
pub mod project;
pub mod render_job;
pub mod settings;

pub use audio_graph::{AudioGraph, GraphState};
pub use project::{AudioClip, ClipId, ClipSegment, Project};
pub use render_job::{RenderJob, RenderSummary};
pub use settings::{ExportFormat, GraphSettings};

/// Convenience prelude for common imports
pub mod prelude {
    // Application layer
    pub use crate::{
        AudioClip, AudioGraph, ClipId, ClipSegment, ExportFormat, GraphSettings, GraphState,
        Project, RenderJob,
    };

    // Pipeline
    pub use crate::core::{
        AudioFile, ChannelLayout, Event, NodeId, Pipeline, PipelineConfig, TimeBase,
    };

    // Shared ownership
    pub use parking_lot::Mutex;
    pub use std::sync::Arc;
}
