//! Real-time audio pipeline kernel: ring buffers, node graph, scheduler.
//!
//! # Primary API
//!
//! - [`Pipeline`] / [`PipelineBuilder`]: node arena, connections, start/stop/seek
//! - [`NodeDescriptor`], [`NodeProcessor`]: defining node types
//! - [`RunContext`]: what a node sees while it runs
//! - [`RingBuffer`], [`atomic_value`]: the two lock-free primitives everything rests on
//! - [`AudioBackend`], [`MidiBackend`]: the hardware interface
//!
//! # Example
//!
//! ```ignore
//! use cadence_core::*;
//!
//! struct Silence;
//!
//! impl NodeProcessor for Silence {
//!     fn run(&mut self, ctx: &mut RunContext<'_>) {
//!         if let Some(mut out) = ctx.audio_out(0) {
//!             let frames = out.free_frames();
//!             out.samples_mut().fill(0.0);
//!             out.advance(frames);
//!         }
//!     }
//! }
//!
//! let silence = NodeDescriptor::builder("silence", "Writes zeros")
//!     .port(PortDescriptor::audio_out(
//!         "audio_out",
//!         AudioPortDescriptor::flexible(ChannelLayout::stereo(), 48000),
//!     ))
//!     .build(|_: &NodeCreateContext<'_>| Ok(Box::new(Silence) as Box<dyn NodeProcessor>))?;
//! ```

pub mod error;
pub use error::{Error, Result};

mod lockfree;
pub use lockfree::{AtomicDouble, AtomicFlag};

pub mod ring_buffer;
pub use ring_buffer::{RingBuffer, RingConsumer, RingProducer};

mod atomic_value;
pub use atomic_value::{atomic_value, AtomicValueReader, AtomicValueWriter};

pub mod channel_layout;
pub use channel_layout::{ChannelId, ChannelLayout, MAX_CHANNELS};

mod time;
pub use time::TimeBase;

pub mod event;
pub use event::{midi_note_to_pitch, Event, EventKind, NOTES_COUNT};

mod audio_file;
pub use audio_file::{AudioFile, AudioFileIterator};

mod config;
pub use config::PipelineConfig;

pub mod backend;
pub use backend::{
    AudioBackend, AudioDevice, DevicePurpose, DevicesInfo, HardwareEvent, HardwareEventSender,
    MidiBackend, MidiDevice, MidiInput, PlaybackStream, RecordingStream, StreamParams,
};

pub mod node;
pub use node::{
    AudioFormat, AudioInput, AudioOutput, AudioPortDescriptor, EventsInput, EventsOutput,
    FormatConstraint, NodeCreateContext, NodeDescriptor, NodeDescriptorBuilder, NodeFactory,
    NodeId, NodeProcessor, PortDescriptor, PortType, RunContext,
};

mod pipeline;
pub use pipeline::{EventCallback, EventWakeup, NodeWaker, Pipeline, PipelineBuilder, PipelineState};
