//! Non-realtime sink that writes its input to a WAV file.

use cadence_core::{
    AudioPortDescriptor, ChannelLayout, Error, NodeCreateContext, NodeDescriptor, NodeProcessor,
    PortDescriptor, Result, RunContext, TimeBase,
};
use hound::{WavSpec, WavWriter};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const IN_PORT: usize = 0;

/// Frames of silence written per call when the input is unconnected.
const SILENCE_BLOCK: usize = 4096;

/// Sample encoding of the rendered file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SampleFormat {
    Int16,
    #[default]
    Int24,
    Int32,
    Float32,
}

impl SampleFormat {
    /// Bits per sample.
    pub fn bits(&self) -> u16 {
        match self {
            SampleFormat::Int16 => 16,
            SampleFormat::Int24 => 24,
            SampleFormat::Int32 | SampleFormat::Float32 => 32,
        }
    }

    fn wav_spec(&self, channels: u16, sample_rate: u32) -> WavSpec {
        WavSpec {
            channels,
            sample_rate,
            bits_per_sample: self.bits(),
            sample_format: match self {
                SampleFormat::Float32 => hound::SampleFormat::Float,
                _ => hound::SampleFormat::Int,
            },
        }
    }
}

/// Shared view of a render in progress.
///
/// Counters are atomics so the application can poll them while the render runs on the
/// pipeline's workers; [`Self::wait`] blocks until the sink has written every frame or
/// failed.
#[derive(Debug)]
pub struct RenderProgress {
    target_frames: u64,
    frames_rendered: AtomicU64,
    complete: AtomicBool,
    error: Mutex<Option<String>>,
    done: Mutex<bool>,
    done_cond: Condvar,
}

impl RenderProgress {
    fn new(target_frames: u64) -> Self {
        Self {
            target_frames,
            frames_rendered: AtomicU64::new(0),
            complete: AtomicBool::new(false),
            error: Mutex::new(None),
            done: Mutex::new(false),
            done_cond: Condvar::new(),
        }
    }

    pub fn target_frames(&self) -> u64 {
        self.target_frames
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered.load(Ordering::Acquire)
    }

    /// Fraction done, 0.0 to 1.0.
    pub fn fraction(&self) -> f32 {
        if self.target_frames == 0 {
            return 1.0;
        }
        (self.frames_rendered() as f64 / self.target_frames as f64) as f32
    }

    /// True once the file is finalized or the render failed.
    pub fn is_complete(&self) -> bool {
        self.complete.load(Ordering::Acquire)
    }

    pub fn error(&self) -> Option<String> {
        self.error.lock().clone()
    }

    /// Blocks until the render finishes.
    pub fn wait(&self) -> Result<()> {
        let mut done = self.done.lock();
        while !*done {
            self.done_cond.wait(&mut done);
        }
        drop(done);
        self.result()
    }

    /// Like [`Self::wait`], giving up after `timeout`. `Ok(false)` means still running.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<bool> {
        let mut done = self.done.lock();
        if !*done {
            self.done_cond.wait_for(&mut done, timeout);
        }
        let finished = *done;
        drop(done);
        if finished {
            self.result()?;
        }
        Ok(finished)
    }

    fn result(&self) -> Result<()> {
        match self.error() {
            Some(message) => Err(Error::Io(std::io::Error::other(message))),
            None => Ok(()),
        }
    }

    fn finish(&self, error: Option<String>) {
        if let Some(message) = &error {
            tracing::error!("Render failed: {}", message);
        }
        *self.error.lock() = error;
        self.complete.store(true, Ordering::Release);
        let mut done = self.done.lock();
        *done = true;
        self.done_cond.notify_all();
    }
}

type Writer = WavWriter<BufWriter<File>>;

/// Writes incoming frames until the target count is reached, then finalizes the file.
pub struct RenderSink {
    writer: Option<Writer>,
    format: SampleFormat,
    channels: usize,
    sample_rate: u32,
    progress: Arc<RenderProgress>,
}

impl RenderSink {
    fn write_frames(writer: &mut Writer, format: SampleFormat, samples: &[f32]) -> hound::Result<()> {
        match format {
            SampleFormat::Float32 => {
                for &s in samples {
                    writer.write_sample(s)?;
                }
            }
            SampleFormat::Int16 => {
                for &s in samples {
                    writer.write_sample((s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)?;
                }
            }
            SampleFormat::Int24 => {
                for &s in samples {
                    writer.write_sample((s.clamp(-1.0, 1.0) * 8_388_607.0) as i32)?;
                }
            }
            SampleFormat::Int32 => {
                for &s in samples {
                    writer.write_sample((s.clamp(-1.0, 1.0) as f64 * i32::MAX as f64) as i32)?;
                }
            }
        }
        Ok(())
    }
}

impl NodeProcessor for RenderSink {
    fn run(&mut self, ctx: &mut RunContext<'_>) {
        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        let remaining = self.progress.target_frames - self.progress.frames_rendered();

        let Some(mut input) = ctx.audio_in(IN_PORT) else {
            // Nothing feeds the sink: the whole render is silence, written in one run.
            let silence = vec![0.0; SILENCE_BLOCK * self.channels];
            let mut left = remaining;
            while left > 0 {
                let frames = left.min(SILENCE_BLOCK as u64) as usize;
                if let Err(e) = Self::write_frames(writer, self.format, &silence[..frames * self.channels]) {
                    self.fail(e);
                    return;
                }
                left -= frames as u64;
            }
            self.rendered(ctx, remaining, self.sample_rate);
            return;
        };

        let channels = input.channel_count();
        let sample_rate = input.sample_rate();
        let frames = (input.frames() as u64).min(remaining) as usize;
        if frames == 0 {
            return;
        }

        if let Err(e) = Self::write_frames(writer, self.format, &input.samples()[..frames * channels]) {
            self.fail(e);
            return;
        }
        input.advance(frames);
        drop(input);
        self.rendered(ctx, frames as u64, sample_rate);
    }
}

impl RenderSink {
    fn fail(&mut self, e: hound::Error) {
        self.writer = None;
        self.progress.finish(Some(e.to_string()));
    }

    /// Counts `frames` as written, moves the timestamp on and finalizes at the target.
    fn rendered(&mut self, ctx: &mut RunContext<'_>, frames: u64, sample_rate: u32) {
        let time_base = TimeBase::new(ctx.bpm(), sample_rate);
        let rendered = self
            .progress
            .frames_rendered
            .fetch_add(frames, Ordering::AcqRel)
            + frames;
        ctx.set_timestamp(ctx.timestamp() + time_base.frames_to_whole_notes(frames as f64));

        if rendered >= self.progress.target_frames {
            let result = self.writer.take().map(Writer::finalize);
            self.progress
                .finish(result.and_then(|r| r.err()).map(|e| e.to_string()));
            tracing::info!("Render finished: {} frames", rendered);
        }
    }
}

fn create_writer(path: &Path, spec: WavSpec) -> Result<Writer> {
    Ok(WavWriter::create(path, spec)?)
}

/// A render sink writing `target_frames` frames of `channel_layout` at `sample_rate`
/// to `path`. The file is created when the node is.
pub fn render_sink_descriptor(
    path: impl Into<PathBuf>,
    channel_layout: ChannelLayout,
    sample_rate: u32,
    format: SampleFormat,
    target_frames: u64,
) -> Result<(Arc<NodeDescriptor>, Arc<RenderProgress>)> {
    let path = path.into();
    let channels = u16::try_from(channel_layout.channel_count())
        .map_err(|_| Error::MaxChannelsExceeded)?;
    let spec = format.wav_spec(channels, sample_rate);
    let progress = Arc::new(RenderProgress::new(target_frames));
    let shared = Arc::clone(&progress);

    let descriptor = NodeDescriptor::builder("render_sink", "Writes its input to a WAV file")
        .port(PortDescriptor::audio_in(
            "audio_in",
            AudioPortDescriptor::fixed(channel_layout, sample_rate),
        ))
        .build(move |_: &NodeCreateContext<'_>| {
            let writer = create_writer(&path, spec)?;
            tracing::debug!("Rendering {} frames to {}", target_frames, path.display());
            let writer = if target_frames == 0 {
                writer.finalize()?;
                shared.finish(None);
                None
            } else {
                Some(writer)
            };
            Ok(Box::new(RenderSink {
                writer,
                format,
                channels: usize::from(channels),
                sample_rate,
                progress: Arc::clone(&shared),
            }) as Box<dyn NodeProcessor>)
        })?;
    Ok((descriptor, progress))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_format_bits() {
        assert_eq!(SampleFormat::Int16.bits(), 16);
        assert_eq!(SampleFormat::Int24.bits(), 24);
        assert_eq!(SampleFormat::Float32.bits(), 32);
        let spec = SampleFormat::Float32.wav_spec(2, 48000);
        assert_eq!(spec.sample_format, hound::SampleFormat::Float);
    }

    #[test]
    fn test_progress_wait_returns_after_finish() {
        let progress = Arc::new(RenderProgress::new(100));
        assert!(!progress.wait_timeout(Duration::from_millis(1)).unwrap());

        let shared = Arc::clone(&progress);
        let handle = std::thread::spawn(move || {
            shared.frames_rendered.store(100, Ordering::Release);
            shared.finish(None);
        });
        progress.wait().unwrap();
        handle.join().unwrap();
        assert!(progress.is_complete());
        assert_eq!(progress.fraction(), 1.0);
    }

    #[test]
    fn test_progress_reports_failure() {
        let progress = RenderProgress::new(10);
        progress.finish(Some("disk full".to_string()));
        assert!(progress.wait().is_err());
        assert_eq!(progress.error().as_deref(), Some("disk full"));
    }

    #[test]
    fn test_write_int16_clamps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clamp.wav");
        let mut writer = create_writer(&path, SampleFormat::Int16.wav_spec(1, 48000)).unwrap();
        RenderSink::write_frames(&mut writer, SampleFormat::Int16, &[2.0, -2.0, 0.5]).unwrap();
        writer.finalize().unwrap();

        let samples: Vec<i16> = hound::WavReader::open(&path)
            .unwrap()
            .samples::<i16>()
            .map(|s| s.unwrap())
            .collect();
        assert_eq!(samples, [i16::MAX, -i16::MAX, 16383]);
    }
}
