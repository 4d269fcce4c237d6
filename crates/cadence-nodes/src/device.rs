//! Nodes that move audio to and from hardware streams.
//!
//! A stream is opened when the node's port connects, once the format is known, and
//! runs between `activate(true)` and `activate(false)`. The stream wakes the node
//! whenever it frees space (playback) or captures audio (recording).

use cadence_core::{
    AudioBackend, AudioDevice, AudioFormat, AudioPortDescriptor, DevicePurpose,
    Error, NodeCreateContext, NodeDescriptor, NodeProcessor, NodeWaker, PipelineConfig,
    PlaybackStream, PortDescriptor, RecordingStream, Result, RunContext, StreamParams, TimeBase,
};
use std::sync::Arc;

pub const PORT: usize = 0;

/// The format a device node offers: the pipeline's preference where the device can do
/// it, the device's own default otherwise.
pub fn device_format(device: &AudioDevice, config: &PipelineConfig) -> AudioFormat {
    let channel_layout = if device.channel_layouts.contains(&config.channel_layout) {
        config.channel_layout.clone()
    } else {
        device.default_channel_layout.clone()
    };
    let sample_rate = if device.supports_sample_rate(config.sample_rate) {
        config.sample_rate
    } else {
        device.sample_rate_default
    };
    AudioFormat::new(channel_layout, sample_rate)
}

fn stream_params(device: &AudioDevice, format: &AudioFormat, latency: f64) -> StreamParams {
    StreamParams {
        channel_layout: format.channel_layout.clone(),
        sample_rate: format.sample_rate,
        latency: latency.clamp(device.latency_min, device.latency_max),
    }
}

/// Hands frames from its input to a playback stream.
pub struct PlaybackNode {
    backend: Arc<dyn AudioBackend>,
    device: AudioDevice,
    latency: f64,
    waker: NodeWaker,
    stream: Option<Box<dyn PlaybackStream>>,
    active: bool,
}

impl PlaybackNode {
    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}

impl NodeProcessor for PlaybackNode {
    fn run(&mut self, ctx: &mut RunContext<'_>) {
        let start = ctx.timestamp();
        let bpm = ctx.bpm();
        let Some(stream) = self.stream.as_mut() else {
            return;
        };
        let Some(mut input) = ctx.audio_in(PORT) else {
            return;
        };
        let channels = input.channel_count();
        let time_base = TimeBase::new(bpm, input.sample_rate());
        let frames = input.frames().min(stream.free_count());
        if frames == 0 {
            return;
        }
        let samples = frames * channels;
        stream.begin_write(frames)[..samples].copy_from_slice(&input.samples()[..samples]);
        stream.write(frames);
        input.advance(frames);
        ctx.set_timestamp(start + time_base.frames_to_whole_notes(frames as f64));
    }

    fn seek(&mut self, _time: f64) {
        if let Some(stream) = self.stream.as_mut() {
            stream.clear_buffer();
        }
    }

    fn activate(&mut self, active: bool) -> Result<()> {
        self.active = active;
        match (self.stream.as_mut(), active) {
            (Some(stream), true) => stream.start(),
            (Some(stream), false) => {
                stream.stop();
                Ok(())
            }
            (None, _) => Ok(()),
        }
    }

    fn port_connected(&mut self, _port: usize, format: Option<&AudioFormat>) -> Result<()> {
        let format = format.ok_or(Error::IncompatiblePorts)?;
        let params = stream_params(&self.device, format, self.latency);
        let mut stream = self
            .backend
            .open_playback(&self.device, &params, self.waker.clone())?;
        if self.active {
            stream.start()?;
        }
        tracing::info!(
            "Opened playback on {} ({} Hz, {}, {:.3} s)",
            self.device.name,
            params.sample_rate,
            params.channel_layout,
            params.latency
        );
        self.stream = Some(stream);
        Ok(())
    }

    fn port_disconnected(&mut self, _port: usize) {
        if self.stream.take().is_some() {
            tracing::debug!("Closed playback on {}", self.device.name);
        }
    }
}

/// Hands frames from a recording stream to its output.
pub struct RecordingNode {
    backend: Arc<dyn AudioBackend>,
    device: AudioDevice,
    latency: f64,
    waker: NodeWaker,
    stream: Option<Box<dyn RecordingStream>>,
    active: bool,
}

impl NodeProcessor for RecordingNode {
    fn run(&mut self, ctx: &mut RunContext<'_>) {
        let start = ctx.timestamp();
        let bpm = ctx.bpm();
        let Some(stream) = self.stream.as_mut() else {
            return;
        };
        let Some(mut out) = ctx.audio_out(PORT) else {
            return;
        };
        let channels = out.channel_count();
        let time_base = TimeBase::new(bpm, out.sample_rate());
        let frames = stream.fill_count().min(out.free_frames());
        if frames == 0 {
            return;
        }
        let samples = frames * channels;
        out.samples_mut()[..samples].copy_from_slice(&stream.peek()[..samples]);
        stream.drop_frames(frames);
        out.advance(frames);
        ctx.set_timestamp(start + time_base.frames_to_whole_notes(frames as f64));
    }

    fn seek(&mut self, _time: f64) {
        if let Some(stream) = self.stream.as_mut() {
            stream.clear_buffer();
        }
    }

    fn activate(&mut self, active: bool) -> Result<()> {
        self.active = active;
        match (self.stream.as_mut(), active) {
            (Some(stream), true) => stream.start(),
            (Some(stream), false) => {
                stream.stop();
                Ok(())
            }
            (None, _) => Ok(()),
        }
    }

    fn port_connected(&mut self, _port: usize, format: Option<&AudioFormat>) -> Result<()> {
        let format = format.ok_or(Error::IncompatiblePorts)?;
        let params = stream_params(&self.device, format, self.latency);
        let mut stream = self
            .backend
            .open_recording(&self.device, &params, self.waker.clone())?;
        if self.active {
            stream.start()?;
        }
        tracing::info!(
            "Opened recording on {} ({} Hz, {})",
            self.device.name,
            params.sample_rate,
            params.channel_layout
        );
        self.stream = Some(stream);
        Ok(())
    }

    fn port_disconnected(&mut self, _port: usize) {
        self.stream = None;
    }
}

fn device_port(device: &AudioDevice, config: &PipelineConfig) -> AudioPortDescriptor {
    let format = device_format(device, config);
    AudioPortDescriptor::fixed(format.channel_layout, format.sample_rate)
}

/// A sink node for a playback device.
pub fn playback_descriptor(
    backend: Arc<dyn AudioBackend>,
    device: AudioDevice,
    config: &PipelineConfig,
) -> Result<Arc<NodeDescriptor>> {
    if device.purpose != DevicePurpose::Playback {
        return Err(Error::InvalidParam(format!("{} is not a playback device", device.id)));
    }
    NodeDescriptor::builder(format!("playback:{}", device.id), device.name.clone())
        .port(PortDescriptor::audio_in("audio_in", device_port(&device, config)))
        .min_software_latency(device.latency_min)
        .build(move |ctx: &NodeCreateContext<'_>| {
            Ok(Box::new(PlaybackNode {
                backend: Arc::clone(&backend),
                device: device.clone(),
                latency: ctx.config.latency,
                waker: ctx.waker.clone(),
                stream: None,
                active: false,
            }) as Box<dyn NodeProcessor>)
        })
}

/// A source node for a recording device.
pub fn recording_descriptor(
    backend: Arc<dyn AudioBackend>,
    device: AudioDevice,
    config: &PipelineConfig,
) -> Result<Arc<NodeDescriptor>> {
    if device.purpose != DevicePurpose::Recording {
        return Err(Error::InvalidParam(format!("{} is not a recording device", device.id)));
    }
    NodeDescriptor::builder(format!("recording:{}", device.id), device.name.clone())
        .port(PortDescriptor::audio_out("audio_out", device_port(&device, config)))
        .min_software_latency(device.latency_min)
        .build(move |ctx: &NodeCreateContext<'_>| {
            Ok(Box::new(RecordingNode {
                backend: Arc::clone(&backend),
                device: device.clone(),
                latency: ctx.config.latency,
                waker: ctx.waker.clone(),
                stream: None,
                active: false,
            }) as Box<dyn NodeProcessor>)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::ChannelLayout;

    fn device(layouts: Vec<ChannelLayout>, rates: (u32, u32, u32)) -> AudioDevice {
        AudioDevice {
            id: "test".to_string(),
            name: "Test".to_string(),
            purpose: DevicePurpose::Playback,
            default_channel_layout: layouts[0].clone(),
            channel_layouts: layouts,
            sample_rate_min: rates.0,
            sample_rate_max: rates.1,
            sample_rate_default: rates.2,
            latency_min: 0.005,
            latency_max: 0.5,
            latency_default: 0.02,
        }
    }

    #[test]
    fn test_format_prefers_config() {
        let device = device(
            vec![ChannelLayout::mono(), ChannelLayout::stereo()],
            (44100, 96000, 44100),
        );
        let format = device_format(&device, &PipelineConfig::default());
        assert_eq!(format, AudioFormat::new(ChannelLayout::stereo(), 48000));
    }

    #[test]
    fn test_format_falls_back_to_device() {
        let device = device(vec![ChannelLayout::mono()], (44100, 44100, 44100));
        let format = device_format(&device, &PipelineConfig::default());
        assert_eq!(format, AudioFormat::new(ChannelLayout::mono(), 44100));
    }

    #[test]
    fn test_latency_clamped() {
        let device = device(vec![ChannelLayout::stereo()], (48000, 48000, 48000));
        let format = AudioFormat::new(ChannelLayout::stereo(), 48000);
        assert_eq!(stream_params(&device, &format, 0.001).latency, 0.005);
        assert_eq!(stream_params(&device, &format, 2.0).latency, 0.5);
        assert_eq!(stream_params(&device, &format, 0.1).latency, 0.1);
    }
}
