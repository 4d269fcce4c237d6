//! System audio through cpal (PulseAudio/ALSA on Linux).
//!
//! Each stream keeps a mirrored ring between the device node and the cpal callback.
//! The callback converts to the device's sample format, fills gaps with silence and
//! wakes the node after every period.

use crate::stream::{drain, prime_with_silence, stream_ring};
use cadence_core::{
    AudioBackend, AudioDevice, ChannelLayout, DevicePurpose, DevicesInfo, Error, HardwareEvent,
    HardwareEventSender, NodeWaker, PlaybackStream, RecordingStream, Result, RingConsumer,
    RingProducer, StreamParams,
};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// How often the device list is rescanned for hot-plug changes.
const POLL_INTERVAL: Duration = Duration::from_secs(2);

const LATENCY_MIN: f64 = 0.005;
const LATENCY_MAX: f64 = 1.0;
const LATENCY_DEFAULT: f64 = 0.02;

fn hardware_error(context: &str, e: impl std::fmt::Display) -> Error {
    Error::OpeningAudioHardware(format!("{}: {}", context, e))
}

fn device_id(purpose: DevicePurpose, name: &str) -> String {
    match purpose {
        DevicePurpose::Playback => format!("out:{}", name),
        DevicePurpose::Recording => format!("in:{}", name),
    }
}

/// Wrapper to hold a `cpal::Stream` in a `Send` context.
///
/// `cpal::Stream` is `!Send` due to platform internals. The stream is owned by exactly
/// one device node, which only touches it from the control thread (start/stop happen
/// in `activate`, which the pipeline calls while no worker runs the node).
struct StreamHandle(cpal::Stream);

// SAFETY: see above; the handle is never used from two threads at once.
unsafe impl Send for StreamHandle {}

struct Inner {
    events: Mutex<Option<HardwareEventSender>>,
    devices: Mutex<DevicesInfo>,
}

impl Inner {
    fn send(&self, event: HardwareEvent) {
        if let Some(events) = self.events.lock().as_ref() {
            let _ = events.try_send(event);
        }
    }

    fn rescan(&self) -> Result<()> {
        let scanned = scan_devices()?;
        let mut devices = self.devices.lock();
        if *devices != scanned {
            tracing::debug!("Audio devices changed: {} endpoints", scanned.devices.len());
            *devices = scanned;
            drop(devices);
            self.send(HardwareEvent::DevicesChanged);
        }
        Ok(())
    }
}

fn describe(device: &cpal::Device, purpose: DevicePurpose) -> Option<AudioDevice> {
    let name = device.name().ok()?;
    let (configs, default) = match purpose {
        DevicePurpose::Playback => (
            device.supported_output_configs().ok()?.collect::<Vec<_>>(),
            device.default_output_config().ok()?,
        ),
        DevicePurpose::Recording => (
            device.supported_input_configs().ok()?.collect::<Vec<_>>(),
            device.default_input_config().ok()?,
        ),
    };

    let mut channel_layouts: Vec<ChannelLayout> = Vec::new();
    for config in &configs {
        if let Ok(layout) = ChannelLayout::default_for_count(config.channels() as usize) {
            if !channel_layouts.contains(&layout) {
                channel_layouts.push(layout);
            }
        }
    }
    let default_channel_layout = ChannelLayout::default_for_count(default.channels() as usize)
        .ok()
        .or_else(|| channel_layouts.first().cloned())?;

    let sample_rate_min = configs.iter().map(|c| c.min_sample_rate().0).min()?;
    let sample_rate_max = configs.iter().map(|c| c.max_sample_rate().0).max()?;

    Some(AudioDevice {
        id: device_id(purpose, &name),
        name,
        purpose,
        channel_layouts,
        default_channel_layout,
        sample_rate_min,
        sample_rate_max,
        sample_rate_default: default.sample_rate().0,
        latency_min: LATENCY_MIN,
        latency_max: LATENCY_MAX,
        latency_default: LATENCY_DEFAULT,
    })
}

fn scan_devices() -> Result<DevicesInfo> {
    let host = cpal::default_host();
    let default_out = host.default_output_device().and_then(|d| d.name().ok());
    let default_in = host.default_input_device().and_then(|d| d.name().ok());

    let mut info = DevicesInfo::default();
    let outputs = host
        .output_devices()
        .map_err(|e| hardware_error("listing output devices", e))?;
    for device in outputs {
        if let Some(described) = describe(&device, DevicePurpose::Playback) {
            if default_out.as_deref() == Some(described.name.as_str()) {
                info.default_playback = Some(info.devices.len());
            }
            info.devices.push(described);
        }
    }
    let inputs = host
        .input_devices()
        .map_err(|e| hardware_error("listing input devices", e))?;
    for device in inputs {
        if let Some(described) = describe(&device, DevicePurpose::Recording) {
            if default_in.as_deref() == Some(described.name.as_str()) {
                info.default_recording = Some(info.devices.len());
            }
            info.devices.push(described);
        }
    }
    Ok(info)
}

fn find_cpal_device(device: &AudioDevice) -> Result<cpal::Device> {
    let host = cpal::default_host();
    let mut devices = match device.purpose {
        DevicePurpose::Playback => host.output_devices(),
        DevicePurpose::Recording => host.input_devices(),
    }
    .map_err(|e| hardware_error("listing devices", e))?;
    devices
        .find(|d| d.name().map(|n| n == device.name).unwrap_or(false))
        .ok_or_else(|| Error::DeviceNotFound(device.id.clone()))
}

fn stream_config(
    device: &cpal::Device,
    purpose: DevicePurpose,
    params: &StreamParams,
) -> Result<cpal::SupportedStreamConfig> {
    let channels = params.channel_layout.channel_count() as u16;
    let rate = cpal::SampleRate(params.sample_rate);
    let configs: Vec<_> = match purpose {
        DevicePurpose::Playback => device
            .supported_output_configs()
            .map_err(|e| hardware_error("querying output configs", e))?
            .collect(),
        DevicePurpose::Recording => device
            .supported_input_configs()
            .map_err(|e| hardware_error("querying input configs", e))?
            .collect(),
    };
    configs
        .into_iter()
        .filter(|c| c.channels() == channels)
        .filter(|c| c.min_sample_rate() <= rate && rate <= c.max_sample_rate())
        .max_by_key(|c| c.sample_format() == cpal::SampleFormat::F32)
        .map(|c| c.with_sample_rate(rate))
        .ok_or_else(|| {
            Error::OpeningAudioHardware(format!(
                "no {} Hz {} configuration",
                params.sample_rate, params.channel_layout
            ))
        })
}

fn error_callback(inner: Weak<Inner>, device: String) -> impl FnMut(cpal::StreamError) + Send + 'static {
    move |err| {
        tracing::warn!("Stream error on {}: {}", device, err);
        if let (cpal::StreamError::DeviceNotAvailable, Some(inner)) = (&err, inner.upgrade()) {
            inner.send(HardwareEvent::DeviceLost {
                device: device.clone(),
            });
        }
    }
}

/// Backend on the platform's default cpal host.
pub struct CpalBackend {
    inner: Arc<Inner>,
    poller: Mutex<Option<(Arc<AtomicBool>, JoinHandle<()>)>>,
}

impl CpalBackend {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                events: Mutex::new(None),
                devices: Mutex::new(DevicesInfo::default()),
            }),
            poller: Mutex::new(None),
        }
    }

    fn spawn_poller(&self) -> Result<()> {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let inner = Arc::downgrade(&self.inner);
        let handle = thread::Builder::new()
            .name("cadence-device-poll".to_string())
            .spawn(move || {
                while !thread_stop.load(Ordering::Acquire) {
                    thread::park_timeout(POLL_INTERVAL);
                    if thread_stop.load(Ordering::Acquire) {
                        break;
                    }
                    let Some(inner) = inner.upgrade() else { break };
                    if let Err(e) = inner.rescan() {
                        tracing::debug!("Device rescan failed: {}", e);
                    }
                }
            })
            .map_err(|e| Error::SystemResources(format!("spawning device poller: {}", e)))?;
        *self.poller.lock() = Some((stop, handle));
        Ok(())
    }
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CpalBackend {
    fn drop(&mut self) {
        if let Some((stop, handle)) = self.poller.lock().take() {
            stop.store(true, Ordering::Release);
            handle.thread().unpark();
            let _ = handle.join();
        }
    }
}

impl AudioBackend for CpalBackend {
    fn name(&self) -> &str {
        "cpal"
    }

    fn init(&self, events: HardwareEventSender) -> Result<()> {
        *self.inner.events.lock() = Some(events);
        *self.inner.devices.lock() = scan_devices()?;
        if self.poller.lock().is_none() {
            self.spawn_poller()?;
        }
        tracing::info!("cpal host: {}", cpal::default_host().id().name());
        Ok(())
    }

    fn refresh(&self) -> Result<()> {
        self.inner.rescan()
    }

    fn devices(&self) -> DevicesInfo {
        self.inner.devices.lock().clone()
    }

    fn open_playback(
        &self,
        device: &AudioDevice,
        params: &StreamParams,
        waker: NodeWaker,
    ) -> Result<Box<dyn PlaybackStream>> {
        let cpal_device = find_cpal_device(device)?;
        let supported = stream_config(&cpal_device, DevicePurpose::Playback, params)?;
        let (producer, consumer) = stream_ring(params)?;
        let shared = PlaybackShared {
            consumer,
            bytes_per_frame: params.channel_layout.bytes_per_frame(),
            clear_requested: Arc::new(AtomicBool::new(false)),
            waker,
            inner: Arc::downgrade(&self.inner),
            device: device.id.clone(),
        };
        let clear_requested = Arc::clone(&shared.clear_requested);

        let config: cpal::StreamConfig = supported.config();
        let stream = match supported.sample_format() {
            cpal::SampleFormat::F32 => build_output::<f32>(&cpal_device, &config, shared)?,
            cpal::SampleFormat::I16 => build_output::<i16>(&cpal_device, &config, shared)?,
            cpal::SampleFormat::U16 => build_output::<u16>(&cpal_device, &config, shared)?,
            format => {
                return Err(Error::OpeningAudioHardware(format!(
                    "unsupported sample format {:?}",
                    format
                )))
            }
        };
        let _ = stream.pause();

        tracing::debug!(
            "Opened playback {} ({} Hz, {})",
            device.name,
            params.sample_rate,
            params.channel_layout
        );
        Ok(Box::new(CpalPlayback {
            stream: StreamHandle(stream),
            producer,
            bytes_per_frame: params.channel_layout.bytes_per_frame(),
            clear_requested,
        }))
    }

    fn open_recording(
        &self,
        device: &AudioDevice,
        params: &StreamParams,
        waker: NodeWaker,
    ) -> Result<Box<dyn RecordingStream>> {
        let cpal_device = find_cpal_device(device)?;
        let supported = stream_config(&cpal_device, DevicePurpose::Recording, params)?;
        let (producer, consumer) = stream_ring(params)?;
        let shared = RecordingShared {
            producer,
            bytes_per_frame: params.channel_layout.bytes_per_frame(),
            waker,
            inner: Arc::downgrade(&self.inner),
            device: device.id.clone(),
        };

        let config: cpal::StreamConfig = supported.config();
        let stream = match supported.sample_format() {
            cpal::SampleFormat::F32 => build_input::<f32>(&cpal_device, &config, shared)?,
            cpal::SampleFormat::I16 => build_input::<i16>(&cpal_device, &config, shared)?,
            cpal::SampleFormat::U16 => build_input::<u16>(&cpal_device, &config, shared)?,
            format => {
                return Err(Error::OpeningAudioHardware(format!(
                    "unsupported sample format {:?}",
                    format
                )))
            }
        };
        let _ = stream.pause();

        tracing::debug!(
            "Opened recording {} ({} Hz, {})",
            device.name,
            params.sample_rate,
            params.channel_layout
        );
        Ok(Box::new(CpalRecording {
            stream: StreamHandle(stream),
            consumer,
            bytes_per_frame: params.channel_layout.bytes_per_frame(),
        }))
    }
}

/// State moved into an output callback.
struct PlaybackShared {
    consumer: RingConsumer,
    bytes_per_frame: usize,
    clear_requested: Arc<AtomicBool>,
    waker: NodeWaker,
    inner: Weak<Inner>,
    device: String,
}

fn build_output<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut shared: PlaybackShared,
) -> Result<cpal::Stream>
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels = config.channels as usize;
    let errors = error_callback(shared.inner.clone(), shared.device.clone());
    let mut starved = false;

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    let bpf = shared.bytes_per_frame;
                    if shared.clear_requested.swap(false, Ordering::AcqRel) {
                        drain(&mut shared.consumer, bpf);
                    }
                    let wanted = data.len() / channels;
                    let frames = wanted.min(shared.consumer.fill_count() / bpf);
                    let samples = frames * channels;
                    {
                        let source = &shared.consumer.read_ptr_f32()[..samples];
                        for (out, &sample) in data.iter_mut().zip(source) {
                            *out = T::from_sample(sample);
                        }
                    }
                    for out in &mut data[samples..] {
                        *out = T::from_sample(0.0f32);
                    }
                    shared.consumer.advance_read_ptr(frames * bpf);
                    frames < wanted
                }));

                let underrun = match result {
                    Ok(underrun) => underrun,
                    Err(_) => {
                        for sample in data.iter_mut() {
                            *sample = T::from_sample(0.0f32);
                        }
                        true
                    }
                };
                if underrun && !starved {
                    if let Some(inner) = shared.inner.upgrade() {
                        inner.send(HardwareEvent::Underrun {
                            device: shared.device.clone(),
                        });
                    }
                }
                starved = underrun;
                shared.waker.wake();
            },
            errors,
            None,
        )
        .map_err(|e| hardware_error("building output stream", e))
}

/// State moved into an input callback.
struct RecordingShared {
    producer: RingProducer,
    bytes_per_frame: usize,
    waker: NodeWaker,
    inner: Weak<Inner>,
    device: String,
}

fn build_input<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut shared: RecordingShared,
) -> Result<cpal::Stream>
where
    T: cpal::SizedSample,
    f32: cpal::FromSample<T>,
{
    let channels = config.channels as usize;
    let errors = error_callback(shared.inner.clone(), shared.device.clone());
    let mut overflowing = false;

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    let bpf = shared.bytes_per_frame;
                    let captured = data.len() / channels;
                    let frames = captured.min(shared.producer.free_count() / bpf);
                    let samples = frames * channels;
                    let target = &mut shared.producer.write_ptr_f32()[..samples];
                    for (slot, &sample) in target.iter_mut().zip(data) {
                        *slot = sample.to_sample::<f32>();
                    }
                    shared.producer.advance_write_ptr(frames * bpf);
                    frames < captured
                }));

                let overrun = result.unwrap_or(true);
                if overrun && !overflowing {
                    if let Some(inner) = shared.inner.upgrade() {
                        inner.send(HardwareEvent::Overrun {
                            device: shared.device.clone(),
                        });
                    }
                }
                overflowing = overrun;
                shared.waker.wake();
            },
            errors,
            None,
        )
        .map_err(|e| hardware_error("building input stream", e))
}

struct CpalPlayback {
    stream: StreamHandle,
    producer: RingProducer,
    bytes_per_frame: usize,
    clear_requested: Arc<AtomicBool>,
}

impl PlaybackStream for CpalPlayback {
    fn start(&mut self) -> Result<()> {
        prime_with_silence(&mut self.producer, self.bytes_per_frame);
        self.stream
            .0
            .play()
            .map_err(|e| hardware_error("starting playback", e))
    }

    fn stop(&mut self) {
        if let Err(e) = self.stream.0.pause() {
            tracing::debug!("Pausing playback failed: {}", e);
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
        self.clear_requested.store(true, Ordering::Release);
    }
}

struct CpalRecording {
    stream: StreamHandle,
    consumer: RingConsumer,
    bytes_per_frame: usize,
}

impl RecordingStream for CpalRecording {
    fn start(&mut self) -> Result<()> {
        self.stream
            .0
            .play()
            .map_err(|e| hardware_error("starting recording", e))
    }

    fn stop(&mut self) {
        if let Err(e) = self.stream.0.pause() {
            tracing::debug!("Pausing recording failed: {}", e);
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
