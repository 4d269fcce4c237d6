//! Hardware backend interface.
//!
//! Backends live in their own crate; the pipeline only sees these traits. Device and
//! stream callbacks run on backend-owned threads, so everything they touch is either
//! a [`NodeWaker`] or a channel.

use crate::channel_layout::ChannelLayout;
use crate::event::EventKind;
use crate::pipeline::NodeWaker;
use crate::Result;
use crossbeam_channel::Sender;

/// Something the hardware side wants the application to know about.
///
/// Queued from any thread and delivered to callbacks only from
/// [`Pipeline::flush_events`](crate::Pipeline::flush_events) and
/// [`Pipeline::wait_events`](crate::Pipeline::wait_events).
#[derive(Debug, Clone, PartialEq)]
pub enum HardwareEvent {
    /// A playback stream ran dry.
    Underrun { device: String },
    /// A recording stream dropped input.
    Overrun { device: String },
    /// The audio device list changed.
    DevicesChanged,
    /// An open device went away.
    DeviceLost { device: String },
    /// The MIDI device list changed.
    MidiDevicesChanged,
    /// Posted by [`EventWakeup`](crate::EventWakeup) to interrupt a blocking wait.
    Wakeup,
}

pub type HardwareEventSender = Sender<HardwareEvent>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DevicePurpose {
    Playback,
    Recording,
}

/// An audio endpoint as reported by a backend.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioDevice {
    pub id: String,
    pub name: String,
    pub purpose: DevicePurpose,
    pub channel_layouts: Vec<ChannelLayout>,
    pub default_channel_layout: ChannelLayout,
    pub sample_rate_min: u32,
    pub sample_rate_max: u32,
    pub sample_rate_default: u32,
    /// Seconds
    pub latency_min: f64,
    pub latency_max: f64,
    pub latency_default: f64,
}

impl AudioDevice {
    pub fn supports_sample_rate(&self, rate: u32) -> bool {
        (self.sample_rate_min..=self.sample_rate_max).contains(&rate)
    }
}

/// Snapshot of the devices a backend currently sees.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DevicesInfo {
    pub devices: Vec<AudioDevice>,
    pub default_playback: Option<usize>,
    pub default_recording: Option<usize>,
}

impl DevicesInfo {
    pub fn playback_devices(&self) -> impl Iterator<Item = &AudioDevice> {
        self.devices
            .iter()
            .filter(|d| d.purpose == DevicePurpose::Playback)
    }

    pub fn recording_devices(&self) -> impl Iterator<Item = &AudioDevice> {
        self.devices
            .iter()
            .filter(|d| d.purpose == DevicePurpose::Recording)
    }

    pub fn default_playback_device(&self) -> Option<&AudioDevice> {
        self.default_playback.and_then(|i| self.devices.get(i))
    }

    pub fn default_recording_device(&self) -> Option<&AudioDevice> {
        self.default_recording.and_then(|i| self.devices.get(i))
    }

    pub fn find(&self, id: &str) -> Option<&AudioDevice> {
        self.devices.iter().find(|d| d.id == id)
    }
}

/// Negotiated stream format.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamParams {
    pub channel_layout: ChannelLayout,
    pub sample_rate: u32,
    /// Seconds of audio the stream buffers.
    pub latency: f64,
}

/// Output stream. Samples are interleaved f32.
pub trait PlaybackStream: Send {
    /// Begins consuming. The buffer is primed with silence first.
    fn start(&mut self) -> Result<()>;

    fn stop(&mut self);

    /// Frames that can be written without blocking.
    fn free_count(&self) -> usize;

    /// Writable region for up to `frame_count` frames; may be shorter.
    fn begin_write(&mut self, frame_count: usize) -> &mut [f32];

    /// Commits `frame_count` frames written through [`Self::begin_write`].
    fn write(&mut self, frame_count: usize);

    /// Drops everything queued but not yet played.
    fn clear_buffer(&mut self);
}

/// Input stream. Samples are interleaved f32.
pub trait RecordingStream: Send {
    fn start(&mut self) -> Result<()>;

    fn stop(&mut self);

    /// Frames captured and not yet consumed.
    fn fill_count(&self) -> usize;

    /// Captured samples, `fill_count() * channels` long.
    fn peek(&self) -> &[f32];

    fn drop_frames(&mut self, frame_count: usize);

    fn clear_buffer(&mut self);
}

/// Audio hardware access.
pub trait AudioBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Called once by the pipeline with the channel for device and stream events.
    fn init(&self, events: HardwareEventSender) -> Result<()>;

    /// Rescans devices; posts [`HardwareEvent::DevicesChanged`] if the list changed.
    fn refresh(&self) -> Result<()>;

    fn devices(&self) -> DevicesInfo;

    /// Opens an output stream. `waker` fires whenever the stream frees space.
    fn open_playback(
        &self,
        device: &AudioDevice,
        params: &StreamParams,
        waker: NodeWaker,
    ) -> Result<Box<dyn PlaybackStream>>;

    /// Opens an input stream. `waker` fires whenever captured audio arrives.
    fn open_recording(
        &self,
        device: &AudioDevice,
        params: &StreamParams,
        waker: NodeWaker,
    ) -> Result<Box<dyn RecordingStream>>;
}

/// A MIDI input endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MidiDevice {
    pub id: String,
    pub name: String,
}

/// An open MIDI input. Messages arrive on a backend thread and queue here.
pub trait MidiInput: Send {
    fn device(&self) -> &MidiDevice;

    /// Takes the oldest queued message.
    fn pop(&mut self) -> Option<EventKind>;
}

/// MIDI hardware access.
pub trait MidiBackend: Send + Sync {
    fn name(&self) -> &str;

    fn init(&self, events: HardwareEventSender) -> Result<()>;

    fn refresh(&self) -> Result<()>;

    fn devices(&self) -> Vec<MidiDevice>;

    fn default_device(&self) -> Option<MidiDevice> {
        self.devices().into_iter().next()
    }

    /// Opens an input. `waker` fires whenever a message arrives.
    fn open_input(&self, device: &MidiDevice, waker: NodeWaker) -> Result<Box<dyn MidiInput>>;
}
