//! Offline rendering of a project to a WAV file.

use crate::audio_graph::AudioGraph;
use crate::project::Project;
use crate::settings::ExportFormat;
use crate::Result;
use cadence_core::{Pipeline, TimeBase};
use cadence_nodes::RenderProgress;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// What a finished render wrote, read back from the file header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderSummary {
    pub path: PathBuf,
    pub frames: u64,
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
}

/// A render running on its own pipeline.
///
/// The render graph is driven by the same scheduler as playback, only with a file
/// sink where the device would be, so it runs as fast as the workers allow.
///
/// # Example
///
/// ```ignore
/// let mut job = RenderJob::start(pipeline, project, &ExportFormat::default(), "mix.wav")?;
/// while !job.is_complete() {
///     println!("{:.0}%", job.progress() * 100.0);
///     std::thread::sleep(Duration::from_millis(100));
/// }
/// let summary = job.wait()?;
/// ```
pub struct RenderJob {
    graph: AudioGraph,
    progress: Arc<RenderProgress>,
    path: PathBuf,
}

impl RenderJob {
    /// Renders the whole project, up to the end of its last segment.
    pub fn start(
        pipeline: Pipeline,
        project: Arc<Mutex<Project>>,
        export: &ExportFormat,
        path: impl Into<PathBuf>,
    ) -> Result<Self> {
        let end = project.lock().end(pipeline.config().bpm);
        let time_base = TimeBase::new(pipeline.config().bpm, export.sample_rate);
        let frames = time_base.whole_notes_to_frames(end).round() as u64;
        Self::start_frames(pipeline, project, export, path, frames)
    }

    /// Renders the first `frame_count` frames of the project.
    pub fn start_frames(
        pipeline: Pipeline,
        project: Arc<Mutex<Project>>,
        export: &ExportFormat,
        path: impl Into<PathBuf>,
        frame_count: u64,
    ) -> Result<Self> {
        let path = path.into();
        let mut graph = AudioGraph::render(pipeline, project, export, path.clone(), frame_count)?;
        let progress = graph
            .render_progress()
            .map(Arc::clone)
            .ok_or_else(|| cadence_core::Error::InvalidState("not a render graph".to_string()))?;
        graph.play()?;
        tracing::info!(
            "Rendering {} frames ({} Hz, {}) to {}",
            frame_count,
            export.sample_rate,
            export.channel_layout,
            path.display()
        );
        Ok(Self {
            graph,
            progress,
            path,
        })
    }

    /// Fraction done, 0.0 to 1.0.
    pub fn progress(&self) -> f32 {
        self.progress.fraction()
    }

    pub fn frames_rendered(&self) -> u64 {
        self.progress.frames_rendered()
    }

    pub fn target_frames(&self) -> u64 {
        self.progress.target_frames()
    }

    pub fn is_complete(&self) -> bool {
        self.progress.is_complete()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn graph(&self) -> &AudioGraph {
        &self.graph
    }

    /// Blocks until the file is finalized, then stops the pipeline.
    pub fn wait(&mut self) -> Result<RenderSummary> {
        let result = self.progress.wait();
        self.graph.stop();
        result?;
        self.summary()
    }

    /// Like [`Self::wait`], giving up after `timeout`. `Ok(None)` means still running.
    pub fn wait_timeout(&mut self, timeout: Duration) -> Result<Option<RenderSummary>> {
        let finished = self.progress.wait_timeout(timeout);
        if !matches!(finished, Ok(false)) {
            self.graph.stop();
        }
        if !finished? {
            return Ok(None);
        }
        self.summary().map(Some)
    }

    /// Abandons the render. Whatever was written is finalized when the job is dropped.
    pub fn stop(&mut self) {
        self.graph.stop();
        tracing::info!(
            "Render stopped at {} of {} frames",
            self.frames_rendered(),
            self.target_frames()
        );
    }

    fn summary(&self) -> Result<RenderSummary> {
        let reader = hound::WavReader::open(&self.path)?;
        let spec = reader.spec();
        Ok(RenderSummary {
            path: self.path.clone(),
            frames: u64::from(reader.duration()),
            channels: spec.channels,
            sample_rate: spec.sample_rate,
            bits_per_sample: spec.bits_per_sample,
        })
    }
}
