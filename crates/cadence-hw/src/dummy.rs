//! Virtual devices driven by the wall clock.
//!
//! Playback consumes and recording produces silence at the stream's sample rate, one
//! period (half the latency) at a time, from a dedicated thread per stream. Useful
//! wherever a sound card is not: tests, CI, headless machines.

use crate::stream::{drain, prime_with_silence, stream_ring, ClockThread};
use cadence_core::{
    AudioBackend, AudioDevice, ChannelLayout, DevicePurpose, DevicesInfo, Error,
    HardwareEvent, HardwareEventSender, NodeWaker, PlaybackStream, RecordingStream, Result,
    RingConsumer, RingProducer, StreamParams,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const SAMPLE_RATE: u32 = 48000;
const LATENCY: f64 = 0.01;

pub const PLAYBACK_DEVICE_ID: &str = "dummy-out";
pub const RECORDING_DEVICE_ID: &str = "dummy-in";

fn dummy_device(id: &str, name: &str, purpose: DevicePurpose) -> AudioDevice {
    AudioDevice {
        id: id.to_string(),
        name: name.to_string(),
        purpose,
        channel_layouts: vec![ChannelLayout::mono(), ChannelLayout::stereo()],
        default_channel_layout: ChannelLayout::mono(),
        sample_rate_min: SAMPLE_RATE,
        sample_rate_max: SAMPLE_RATE,
        sample_rate_default: SAMPLE_RATE,
        latency_min: LATENCY,
        latency_max: 1.0,
        latency_default: LATENCY,
    }
}

/// Frames due between two ticks, keeping the fractional remainder.
struct FrameClock {
    rate: f64,
    counted: u64,
}

impl FrameClock {
    fn new(rate: u32) -> Self {
        Self {
            rate: rate as f64,
            counted: 0,
        }
    }

    fn due(&mut self, elapsed: Duration) -> usize {
        let total = (elapsed.as_secs_f64() * self.rate) as u64;
        let due = total.saturating_sub(self.counted);
        self.counted = total.max(self.counted);
        due as usize
    }
}

/// Backend with one virtual output and one virtual input, both 48 kHz.
pub struct DummyBackend {
    events: Mutex<Option<HardwareEventSender>>,
    devices: DevicesInfo,
}

impl DummyBackend {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(None),
            devices: DevicesInfo {
                devices: vec![
                    dummy_device(PLAYBACK_DEVICE_ID, "Dummy Output", DevicePurpose::Playback),
                    dummy_device(RECORDING_DEVICE_ID, "Dummy Input", DevicePurpose::Recording),
                ],
                default_playback: Some(0),
                default_recording: Some(1),
            },
        }
    }

    fn check_params(device: &AudioDevice, params: &StreamParams) -> Result<()> {
        if !device.supports_sample_rate(params.sample_rate) {
            return Err(Error::OpeningAudioHardware(format!(
                "{} runs at {} Hz, not {} Hz",
                device.id, SAMPLE_RATE, params.sample_rate
            )));
        }
        if !device.channel_layouts.contains(&params.channel_layout) {
            return Err(Error::OpeningAudioHardware(format!(
                "{} does not support {}",
                device.id, params.channel_layout
            )));
        }
        Ok(())
    }
}

impl Default for DummyBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for DummyBackend {
    fn name(&self) -> &str {
        "dummy"
    }

    fn init(&self, events: HardwareEventSender) -> Result<()> {
        *self.events.lock() = Some(events);
        Ok(())
    }

    fn refresh(&self) -> Result<()> {
        Ok(())
    }

    fn devices(&self) -> DevicesInfo {
        self.devices.clone()
    }

    fn open_playback(
        &self,
        device: &AudioDevice,
        params: &StreamParams,
        waker: NodeWaker,
    ) -> Result<Box<dyn PlaybackStream>> {
        if device.purpose != DevicePurpose::Playback || self.devices.find(&device.id).is_none() {
            return Err(Error::DeviceNotFound(device.id.clone()));
        }
        Self::check_params(device, params)?;
        let stream = DummyPlayback::new(device.id.clone(), params, waker, self.events.lock().clone())?;
        tracing::debug!("Opened dummy playback {} ({})", device.id, params.channel_layout);
        Ok(Box::new(stream))
    }

    fn open_recording(
        &self,
        device: &AudioDevice,
        params: &StreamParams,
        waker: NodeWaker,
    ) -> Result<Box<dyn RecordingStream>> {
        if device.purpose != DevicePurpose::Recording || self.devices.find(&device.id).is_none() {
            return Err(Error::DeviceNotFound(device.id.clone()));
        }
        Self::check_params(device, params)?;
        let stream = DummyRecording::new(device.id.clone(), params, waker, self.events.lock().clone())?;
        tracing::debug!("Opened dummy recording {} ({})", device.id, params.channel_layout);
        Ok(Box::new(stream))
    }
}

/// Output stream that discards frames in real time.
pub struct DummyPlayback {
    device: String,
    producer: RingProducer,
    /// Held here while stopped; owned by the clock thread while started.
    consumer: Option<RingConsumer>,
    clock: Option<ClockThread<RingConsumer>>,
    bytes_per_frame: usize,
    sample_rate: u32,
    period: Duration,
    clear_requested: Arc<AtomicBool>,
    waker: NodeWaker,
    events: Option<HardwareEventSender>,
}

impl DummyPlayback {
    fn new(
        device: String,
        params: &StreamParams,
        waker: NodeWaker,
        events: Option<HardwareEventSender>,
    ) -> Result<Self> {
        let (producer, consumer) = stream_ring(params)?;
        Ok(Self {
            device,
            producer,
            consumer: Some(consumer),
            clock: None,
            bytes_per_frame: params.channel_layout.bytes_per_frame(),
            sample_rate: params.sample_rate,
            period: Duration::from_secs_f64(params.latency * 0.5),
            clear_requested: Arc::new(AtomicBool::new(false)),
            waker,
            events,
        })
    }

    pub fn is_started(&self) -> bool {
        self.clock.is_some()
    }
}

impl PlaybackStream for DummyPlayback {
    fn start(&mut self) -> Result<()> {
        if self.clock.is_some() {
            return Ok(());
        }
        let consumer = self
            .consumer
            .take()
            .ok_or_else(|| Error::InvalidState(format!("{} lost its stream", self.device)))?;
        prime_with_silence(&mut self.producer, self.bytes_per_frame);

        let bytes_per_frame = self.bytes_per_frame;
        let clear_requested = Arc::clone(&self.clear_requested);
        let waker = self.waker.clone();
        let events = self.events.clone();
        let device = self.device.clone();
        let mut frames = FrameClock::new(self.sample_rate);
        let mut starved = false;

        self.clock = Some(ClockThread::spawn(
            format!("cadence-{}", self.device),
            self.period,
            consumer,
            move |consumer, elapsed| {
                if clear_requested.swap(false, Ordering::AcqRel) {
                    drain(consumer, bytes_per_frame);
                }
                let due = frames.due(elapsed);
                let available = consumer.fill_count() / bytes_per_frame;
                let played = due.min(available);
                consumer.advance_read_ptr(played * bytes_per_frame);

                let underrun = played < due;
                if underrun && !starved {
                    if let Some(events) = &events {
                        let _ = events.try_send(HardwareEvent::Underrun {
                            device: device.clone(),
                        });
                    }
                }
                starved = underrun;
                waker.wake();
            },
        )?);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(clock) = self.clock.take() {
            self.consumer = clock.stop();
            if self.consumer.is_none() {
                tracing::error!("Clock thread of {} panicked", self.device);
            }
        }
    }

    fn free_count(&self) -> usize {
        self.producer.free_count() / self.bytes_per_frame
    }

    fn begin_write(&mut self, frame_count: usize) -> &mut [f32] {
        let frames = frame_count.min(self.free_count());
        let samples = frames * self.bytes_per_frame / std::mem::size_of::<f32>();
        &mut self.producer.write_ptr_f32()[..samples]
    }

    fn write(&mut self, frame_count: usize) {
        self.producer
            .advance_write_ptr(frame_count * self.bytes_per_frame);
    }

    fn clear_buffer(&mut self) {
        match self.consumer.as_mut() {
            Some(consumer) => drain(consumer, self.bytes_per_frame),
            None => self.clear_requested.store(true, Ordering::Release),
        }
    }
}

impl Drop for DummyPlayback {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Input stream that captures silence in real time.
pub struct DummyRecording {
    device: String,
    consumer: RingConsumer,
    producer: Option<RingProducer>,
    clock: Option<ClockThread<RingProducer>>,
    bytes_per_frame: usize,
    sample_rate: u32,
    period: Duration,
    waker: NodeWaker,
    events: Option<HardwareEventSender>,
}

impl DummyRecording {
    fn new(
        device: String,
        params: &StreamParams,
        waker: NodeWaker,
        events: Option<HardwareEventSender>,
    ) -> Result<Self> {
        let (producer, consumer) = stream_ring(params)?;
        Ok(Self {
            device,
            consumer,
            producer: Some(producer),
            clock: None,
            bytes_per_frame: params.channel_layout.bytes_per_frame(),
            sample_rate: params.sample_rate,
            period: Duration::from_secs_f64(params.latency * 0.5),
            waker,
            events,
        })
    }
}

impl RecordingStream for DummyRecording {
    fn start(&mut self) -> Result<()> {
        if self.clock.is_some() {
            return Ok(());
        }
        let producer = self
            .producer
            .take()
            .ok_or_else(|| Error::InvalidState(format!("{} lost its stream", self.device)))?;

        let bytes_per_frame = self.bytes_per_frame;
        let samples_per_frame = bytes_per_frame / std::mem::size_of::<f32>();
        let waker = self.waker.clone();
        let events = self.events.clone();
        let device = self.device.clone();
        let mut frames = FrameClock::new(self.sample_rate);
        let mut overflowing = false;

        self.clock = Some(ClockThread::spawn(
            format!("cadence-{}", self.device),
            self.period,
            producer,
            move |producer, elapsed| {
                let due = frames.due(elapsed);
                let free = producer.free_count() / bytes_per_frame;
                let captured = due.min(free);
                producer.write_ptr_f32()[..captured * samples_per_frame].fill(0.0);
                producer.advance_write_ptr(captured * bytes_per_frame);

                let overrun = captured < due;
                if overrun && !overflowing {
                    if let Some(events) = &events {
                        let _ = events.try_send(HardwareEvent::Overrun {
                            device: device.clone(),
                        });
                    }
                }
                overflowing = overrun;
                waker.wake();
            },
        )?);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(clock) = self.clock.take() {
            self.producer = clock.stop();
            if self.producer.is_none() {
                tracing::error!("Clock thread of {} panicked", self.device);
            }
        }
    }

    fn fill_count(&self) -> usize {
        self.consumer.fill_count() / self.bytes_per_frame
    }

    fn peek(&self) -> &[f32] {
        let samples = self.fill_count() * self.bytes_per_frame / std::mem::size_of::<f32>();
        &self.consumer.read_ptr_f32()[..samples]
    }

    fn drop_frames(&mut self, frame_count: usize) {
        self.consumer
            .advance_read_ptr(frame_count * self.bytes_per_frame);
    }

    fn clear_buffer(&mut self) {
        drain(&mut self.consumer, self.bytes_per_frame);
    }
}

impl Drop for DummyRecording {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn params(latency: f64) -> StreamParams {
        StreamParams {
            channel_layout: ChannelLayout::stereo(),
            sample_rate: SAMPLE_RATE,
            latency,
        }
    }

    #[test]
    fn test_devices() {
        let backend = DummyBackend::new();
        let info = backend.devices();
        assert_eq!(info.default_playback_device().unwrap().id, PLAYBACK_DEVICE_ID);
        assert_eq!(info.default_recording_device().unwrap().id, RECORDING_DEVICE_ID);
        assert_eq!(info.playback_devices().count(), 1);
        assert_eq!(info.recording_devices().count(), 1);
    }

    #[test]
    fn test_rejects_other_rates() {
        let backend = DummyBackend::new();
        let device = backend.devices().default_playback_device().unwrap().clone();
        let mut wrong = params(0.01);
        wrong.sample_rate = 44100;
        let result = backend.open_playback(&device, &wrong, NodeWaker::noop());
        assert!(matches!(result, Err(Error::OpeningAudioHardware(_))));
    }

    #[test]
    fn test_rejects_wrong_purpose() {
        let backend = DummyBackend::new();
        let device = backend.devices().default_recording_device().unwrap().clone();
        let result = backend.open_playback(&device, &params(0.01), NodeWaker::noop());
        assert!(matches!(result, Err(Error::DeviceNotFound(_))));
    }

    #[test]
    fn test_frame_clock() {
        let mut clock = FrameClock::new(48000);
        assert_eq!(clock.due(Duration::from_millis(10)), 480);
        assert_eq!(clock.due(Duration::from_millis(10)), 0);
        assert_eq!(clock.due(Duration::from_millis(25)), 720);
    }

    #[test]
    fn test_playback_primed_then_consumed() {
        let backend = DummyBackend::new();
        let (tx, rx) = crossbeam_channel::unbounded();
        backend.init(tx).unwrap();
        let device = backend.devices().default_playback_device().unwrap().clone();
        let mut stream = backend
            .open_playback(&device, &params(0.02), NodeWaker::noop())
            .unwrap();

        let free_before = stream.free_count();
        assert!(free_before >= 960);
        stream.start().unwrap();
        assert_eq!(stream.free_count(), 0);

        thread::sleep(Duration::from_millis(60));
        assert!(stream.free_count() > 0);
        stream.stop();

        // Nothing was written after priming, so the stream ran dry.
        let underruns = rx
            .try_iter()
            .filter(|e| matches!(e, HardwareEvent::Underrun { .. }))
            .count();
        assert!(underruns >= 1);
    }

    #[test]
    fn test_playback_write_and_clear() {
        let backend = DummyBackend::new();
        let device = backend.devices().default_playback_device().unwrap().clone();
        let mut stream = backend
            .open_playback(&device, &params(0.02), NodeWaker::noop())
            .unwrap();

        let free = stream.free_count();
        let region = stream.begin_write(100);
        assert_eq!(region.len(), 200);
        region.fill(0.5);
        stream.write(100);
        assert_eq!(stream.free_count(), free - 100);

        stream.clear_buffer();
        assert_eq!(stream.free_count(), free);
    }

    #[test]
    fn test_recording_captures_silence() {
        let backend = DummyBackend::new();
        let device = backend.devices().default_recording_device().unwrap().clone();
        let mut stream = backend
            .open_recording(&device, &params(0.05), NodeWaker::noop())
            .unwrap();
        assert_eq!(stream.fill_count(), 0);
        stream.start().unwrap();
        thread::sleep(Duration::from_millis(50));
        stream.stop();

        let frames = stream.fill_count();
        assert!(frames > 0);
        assert_eq!(stream.peek().len(), frames * 2);
        assert!(stream.peek().iter().all(|&s| s == 0.0));
        stream.drop_frames(1);
        assert_eq!(stream.fill_count(), frames - 1);
        stream.clear_buffer();
        assert_eq!(stream.fill_count(), 0);
    }
}
