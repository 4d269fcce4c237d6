//! Test helpers and fixtures for cadence integration tests
//!
//! Everything runs on the dummy backend: its devices consume and produce audio in
//! real time at 48 kHz, so no sound card is needed.
//!
//! ## Tolerance Levels
//!
//! Use the appropriate tolerance from [`tolerances`] module:
//! - `FLOAT_EPSILON` (1e-6): Exact operations (passthrough, summing)
//! - `RESAMPLE_EPSILON` (0.02): Level after sample-rate conversion
//! - `SILENCE_THRESHOLD` (0.0001): Silence detection (-80dB)

#![allow(dead_code)]

pub mod tolerances;

use cadence::core::{
    AudioBackend, AudioDevice, DevicesInfo, HardwareEvent, HardwareEventSender, NodeWaker,
    PlaybackStream, RecordingStream, StreamParams,
};
use cadence::hw::DummyBackend;
use cadence::prelude::*;
use std::path::Path;
use std::time::{Duration, Instant};

/// Default test sample rate (the dummy devices' rate)
pub const TEST_SAMPLE_RATE: u32 = 48000;

/// Create a pipeline on the dummy backend with small buffers.
pub fn test_pipeline() -> Pipeline {
    test_pipeline_with(Arc::new(DummyBackend::new()))
}

pub fn test_pipeline_with(backend: Arc<dyn AudioBackend>) -> Pipeline {
    Pipeline::builder()
        .audio_backend(backend)
        .worker_count(2)
        .latency(0.01)
        .build()
        .expect("Failed to create test pipeline")
}

/// Shared empty project.
pub fn test_project() -> Arc<Mutex<Project>> {
    Arc::new(Mutex::new(Project::new()))
}

/// A playback graph for `project` on a fresh dummy pipeline.
pub fn test_graph(project: &Arc<Mutex<Project>>) -> AudioGraph {
    AudioGraph::playback(test_pipeline(), Arc::clone(project), GraphSettings::default())
        .expect("Failed to create test graph")
}

/// Generate a test signal: sine wave at given frequency for specified samples.
pub fn generate_sine(frequency: f64, sample_rate: u32, num_samples: usize) -> Vec<f32> {
    (0..num_samples)
        .map(|i| {
            let t = i as f64 / sample_rate as f64;
            (2.0 * std::f64::consts::PI * frequency * t).sin() as f32
        })
        .collect()
}

/// A file with the same constant on every channel.
pub fn constant_file(value: f32, frames: usize, layout: ChannelLayout, rate: u32) -> Arc<AudioFile> {
    let channels = vec![vec![value; frames]; layout.channel_count()];
    Arc::new(AudioFile::from_channels(channels, layout, rate).expect("Failed to build file"))
}

/// A file with a half-amplitude sine on every channel.
pub fn sine_file(frequency: f64, frames: usize, layout: ChannelLayout, rate: u32) -> Arc<AudioFile> {
    let sine: Vec<f32> = generate_sine(frequency, rate, frames)
        .into_iter()
        .map(|s| s * 0.5)
        .collect();
    let channels = vec![sine; layout.channel_count()];
    Arc::new(AudioFile::from_channels(channels, layout, rate).expect("Failed to build file"))
}

/// Adds `file` to the project with one segment covering all of it at `position`.
pub fn add_whole_clip(project: &Arc<Mutex<Project>>, file: Arc<AudioFile>, position: f64) -> ClipId {
    let mut project = project.lock();
    let frames = file.frame_count();
    let id = project.add_clip("test", file);
    project
        .clip_mut(id)
        .unwrap()
        .add_segment(ClipSegment::new(position, 0, frames))
        .unwrap();
    id
}

/// Read back an interleaved float WAV file.
pub fn read_wav_f32(path: &Path) -> (hound::WavSpec, Vec<f32>) {
    let mut reader = hound::WavReader::open(path).expect("Failed to open WAV");
    let spec = reader.spec();
    let samples = reader
        .samples::<f32>()
        .map(|s| s.expect("Failed to read sample"))
        .collect();
    (spec, samples)
}

/// Calculate RMS of a signal.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

/// Calculate peak amplitude of a signal.
pub fn peak(samples: &[f32]) -> f32 {
    samples
        .iter()
        .map(|s| s.abs())
        .fold(0.0_f32, |a, b| a.max(b))
}

/// Assert that a signal is approximately silent (all values near zero).
pub fn assert_silence(samples: &[f32], tolerance: f32) {
    let max = peak(samples);
    assert!(
        max <= tolerance,
        "Expected silence, but peak amplitude was {}",
        max
    );
}

/// Poll `done` until it holds or `max_wait_ms` passes.
pub fn wait_for(max_wait_ms: u64, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_millis(max_wait_ms);
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    done()
}

/// Wait until the graph's play head passes `position`.
pub fn wait_for_play_head(graph: &AudioGraph, position: f64, max_wait_ms: u64) -> bool {
    wait_for(max_wait_ms, || graph.play_head() > position)
}

// =============================================================================
// Backend that can lose its devices
// =============================================================================

/// Dummy backend whose test can post device events, as if hardware went away.
pub struct UnreliableBackend {
    inner: DummyBackend,
    events: Mutex<Option<HardwareEventSender>>,
}

impl UnreliableBackend {
    pub fn new() -> Self {
        Self {
            inner: DummyBackend::new(),
            events: Mutex::new(None),
        }
    }

    pub fn post(&self, event: HardwareEvent) {
        if let Some(events) = self.events.lock().as_ref() {
            events.try_send(event).expect("Event queue full");
        }
    }
}

impl AudioBackend for UnreliableBackend {
    fn name(&self) -> &str {
        "unreliable"
    }

    fn init(&self, events: HardwareEventSender) -> cadence::core::Result<()> {
        *self.events.lock() = Some(events.clone());
        self.inner.init(events)
    }

    fn refresh(&self) -> cadence::core::Result<()> {
        self.inner.refresh()
    }

    fn devices(&self) -> DevicesInfo {
        self.inner.devices()
    }

    fn open_playback(
        &self,
        device: &AudioDevice,
        params: &StreamParams,
        waker: NodeWaker,
    ) -> cadence::core::Result<Box<dyn PlaybackStream>> {
        self.inner.open_playback(device, params, waker)
    }

    fn open_recording(
        &self,
        device: &AudioDevice,
        params: &StreamParams,
        waker: NodeWaker,
    ) -> cadence::core::Result<Box<dyn RecordingStream>> {
        self.inner.open_recording(device, params, waker)
    }
}
