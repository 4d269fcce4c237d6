//! The node graph that realizes a project.
//!
//! Every clip becomes a `clip_events -> audio_clip` pair feeding one input of a mixer;
//! the mixer feeds the output node, which is either a playback device or a render
//! sink. Wherever a clip's format differs from the output's, a resampler is inserted.
//!
//! Topology is never edited while audio runs. Anything that changes it (the clip set,
//! the sample rate, the playback device, a lost device) rebuilds the whole graph:
//! capture the play head, stop, destroy every node, build again, and restart at the
//! captured position if the graph was playing.

use crate::project::{ClipId, Project};
use crate::settings::{ExportFormat, GraphSettings};
use crate::Result;
use cadence_core::{
    atomic_value, AudioDevice, AudioFile, AudioFormat, DevicePurpose, Event, EventWakeup,
    HardwareEvent, NodeDescriptor, NodeId, Pipeline, PipelineConfig,
};
use cadence_nodes::{
    audio_clip, audio_clip_descriptor, clip_events, clip_events_descriptor, device,
    device_format, mixer_descriptor, playback_descriptor, render_sink, render_sink_descriptor,
    resample, resample_descriptor, RenderProgress,
};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Transport state of a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphState {
    Stopped,
    Playing,
    Paused,
}

enum Output {
    Playback,
    Render {
        sink: Arc<NodeDescriptor>,
        progress: Arc<RenderProgress>,
    },
}

/// A file auditioned in place of the project.
struct Preview {
    file: Arc<AudioFile>,
    /// The project's play head when the audition began.
    return_to: f64,
}

/// Owns a [`Pipeline`] and keeps its nodes in step with a shared [`Project`].
///
/// # Example
///
/// ```ignore
/// let project = Arc::new(Mutex::new(Project::new()));
/// let mut graph = AudioGraph::playback(pipeline, Arc::clone(&project), GraphSettings::default())?;
///
/// let clip = graph.add_clip("drums", Arc::new(AudioFile::load_wav("drums.wav")?))?;
/// project.lock().clip_mut(clip)?.add_segment(ClipSegment::new(0.0, 0, 48000))?;
///
/// graph.play()?;
/// loop {
///     graph.wait_events(None)?;
/// }
/// ```
pub struct AudioGraph {
    pipeline: Pipeline,
    project: Arc<Mutex<Project>>,
    settings: GraphSettings,
    sample_rate: u32,
    output: Output,
    device: Option<AudioDevice>,

    /// Key under which this graph subscribes to clip events.
    subscriber: u64,
    nodes: Vec<NodeId>,
    output_node: Option<NodeId>,
    topology_version: u64,

    state: GraphState,
    play_head: f64,
    preview: Option<Preview>,

    hardware_events: Arc<Mutex<Vec<HardwareEvent>>>,
    rebuilds: u64,
}

impl AudioGraph {
    /// A graph playing `project` through a hardware device.
    ///
    /// The device is `settings.playback_device` when the backend lists it, the default
    /// playback device otherwise.
    pub fn playback(
        mut pipeline: Pipeline,
        project: Arc<Mutex<Project>>,
        settings: GraphSettings,
    ) -> Result<Self> {
        let hardware_events = Arc::new(Mutex::new(Vec::new()));
        let queue = Arc::clone(&hardware_events);
        pipeline.on_event(move |event| {
            if matches!(
                event,
                HardwareEvent::DeviceLost { .. } | HardwareEvent::DevicesChanged
            ) {
                queue.lock().push(event.clone());
            }
        });
        pipeline.refresh_audio_devices()?;

        let subscriber = project.lock().new_subscriber();
        let sample_rate = pipeline.config().sample_rate;
        let mut graph = Self {
            pipeline,
            project,
            settings,
            sample_rate,
            output: Output::Playback,
            device: None,
            subscriber,
            nodes: Vec::new(),
            output_node: None,
            topology_version: 0,
            state: GraphState::Stopped,
            play_head: 0.0,
            preview: None,
            hardware_events,
            rebuilds: 0,
        };
        graph.build()?;
        Ok(graph)
    }

    /// A graph rendering the first `frame_count` frames of `project` to a WAV file.
    ///
    /// The file is created here. Render graphs are built once: later changes to the
    /// project's clip set do not affect them.
    pub fn render(
        pipeline: Pipeline,
        project: Arc<Mutex<Project>>,
        export: &ExportFormat,
        path: impl Into<PathBuf>,
        frame_count: u64,
    ) -> Result<Self> {
        export.validate()?;
        let (sink, progress) = render_sink_descriptor(
            path,
            export.channel_layout.clone(),
            export.sample_rate,
            export.sample_format,
            frame_count,
        )?;

        let subscriber = project.lock().new_subscriber();
        let mut graph = Self {
            pipeline,
            project,
            settings: GraphSettings {
                playback_device: None,
                export: export.clone(),
            },
            sample_rate: export.sample_rate,
            output: Output::Render { sink, progress },
            device: None,
            subscriber,
            nodes: Vec::new(),
            output_node: None,
            topology_version: 0,
            state: GraphState::Stopped,
            play_head: 0.0,
            preview: None,
            hardware_events: Arc::new(Mutex::new(Vec::new())),
            rebuilds: 0,
        };
        graph.build()?;
        Ok(graph)
    }

    pub fn state(&self) -> GraphState {
        self.state
    }

    pub fn is_render(&self) -> bool {
        matches!(self.output, Output::Render { .. })
    }

    pub fn settings(&self) -> &GraphSettings {
        &self.settings
    }

    /// Sample rate the output runs at when the device supports it.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// The device being played through.
    pub fn playback_device(&self) -> Option<&AudioDevice> {
        self.device.as_ref()
    }

    pub fn project(&self) -> &Arc<Mutex<Project>> {
        &self.project
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn render_progress(&self) -> Option<&Arc<RenderProgress>> {
        match &self.output {
            Output::Render { progress, .. } => Some(progress),
            Output::Playback => None,
        }
    }

    /// Nodes the graph currently owns.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Whether a file from [`Self::play_file`] is playing instead of the project.
    pub fn is_previewing(&self) -> bool {
        self.preview.is_some()
    }

    /// How many times the graph has been torn down and built again.
    pub fn rebuild_count(&self) -> u64 {
        self.rebuilds
    }

    /// Interrupts [`Self::wait_events`] from another thread.
    pub fn event_wakeup(&self) -> EventWakeup {
        self.pipeline.event_wakeup()
    }

    // =========================================================================
    // Transport
    // =========================================================================

    /// Starts from the play head, or resumes after a pause.
    pub fn play(&mut self) -> Result<()> {
        match self.state {
            GraphState::Playing => Ok(()),
            GraphState::Paused => {
                self.pipeline.resume()?;
                self.state = GraphState::Playing;
                Ok(())
            }
            GraphState::Stopped => self.start(self.play_head),
        }
    }

    /// Suspends playback, keeping buffered audio and open devices.
    pub fn pause(&mut self) -> Result<()> {
        if self.state != GraphState::Playing {
            return Ok(());
        }
        self.pipeline.pause()?;
        self.play_head = self.output_position();
        self.state = GraphState::Paused;
        Ok(())
    }

    /// Stops playback. The play head stays where playback stopped.
    pub fn stop(&mut self) {
        if self.state == GraphState::Stopped {
            return;
        }
        self.play_head = self.output_position();
        self.pipeline.stop_pipeline();
        self.state = GraphState::Stopped;
    }

    /// Moves the play head to `position` (whole notes). Playback continues from there.
    pub fn seek(&mut self, position: f64) -> Result<()> {
        if !position.is_finite() || position < 0.0 {
            return Err(cadence_core::Error::InvalidParam(format!(
                "cannot seek to {}",
                position
            ))
            .into());
        }
        match self.state {
            GraphState::Playing => {
                self.pipeline.stop_pipeline();
                self.start(position)?;
            }
            GraphState::Paused => {
                self.pipeline.seek(position)?;
                self.play_head = position;
            }
            GraphState::Stopped => self.play_head = position,
        }
        tracing::debug!("Seeked to {:.3}", position);
        Ok(())
    }

    /// Current position in whole notes, as far as the output has consumed audio.
    pub fn play_head(&self) -> f64 {
        match self.state {
            GraphState::Stopped => self.play_head,
            GraphState::Playing | GraphState::Paused => self.output_position(),
        }
    }

    /// Plays `file` from its start through the playback device instead of the
    /// project. A file in a foreign format goes through a resampler like a clip would.
    pub fn play_file(&mut self, file: Arc<AudioFile>) -> Result<()> {
        if self.is_render() {
            return Err(cadence_core::Error::InvalidState(
                "a render graph cannot preview files".to_string(),
            )
            .into());
        }
        let return_to = match self.preview.take() {
            Some(preview) => preview.return_to,
            None => self.play_head(),
        };
        self.teardown()?;
        self.preview = Some(Preview { file, return_to });
        self.build()?;
        self.start(0.0)
    }

    /// Ends a [`Self::play_file`] audition. The project's graph comes back stopped,
    /// at the play head it had before the audition.
    pub fn stop_preview(&mut self) -> Result<()> {
        let Some(preview) = self.preview.take() else {
            return Ok(());
        };
        self.teardown()?;
        self.play_head = preview.return_to;
        self.build()
    }

    fn output_position(&self) -> f64 {
        self.output_node
            .and_then(|id| self.pipeline.node_timestamp(id).ok())
            .unwrap_or(self.play_head)
    }

    fn start(&mut self, position: f64) -> Result<()> {
        self.play_head = position;
        if let Err(e) = self.pipeline.start_pipeline(position) {
            self.state = GraphState::Stopped;
            return Err(e.into());
        }
        self.state = GraphState::Playing;
        Ok(())
    }

    // =========================================================================
    // Topology
    // =========================================================================

    /// Adds a clip to the project and rebuilds.
    pub fn add_clip(&mut self, name: impl Into<String>, file: Arc<AudioFile>) -> Result<ClipId> {
        let id = self.project.lock().add_clip(name, file);
        self.rebuild()?;
        Ok(id)
    }

    /// Removes a clip from the project and rebuilds.
    pub fn remove_clip(&mut self, id: ClipId) -> Result<()> {
        self.project.lock().remove_clip(id)?;
        self.rebuild()
    }

    pub fn set_sample_rate(&mut self, sample_rate: u32) -> Result<()> {
        PipelineConfig {
            sample_rate,
            ..self.pipeline.config().clone()
        }
        .validate()?;
        self.sample_rate = sample_rate;
        self.rebuild()
    }

    /// Switches to another playback device; `None` follows the default device.
    pub fn set_playback_device(&mut self, device: Option<String>) -> Result<()> {
        self.settings.playback_device = device;
        self.rebuild()
    }

    /// Tears the graph down and builds it again from the project, keeping the play
    /// head. Playback restarts only if the graph was playing.
    pub fn rebuild(&mut self) -> Result<()> {
        if self.is_render() {
            return Err(cadence_core::Error::InvalidState(
                "a render graph cannot be rebuilt".to_string(),
            )
            .into());
        }
        let was_playing = self.state == GraphState::Playing;
        let position = self.play_head();

        self.teardown()?;
        self.play_head = position;
        self.rebuilds += 1;
        self.build()?;

        if was_playing {
            self.start(position)?;
        }
        tracing::info!(
            "Rebuilt audio graph at {:.3} ({} nodes)",
            position,
            self.nodes.len()
        );
        Ok(())
    }

    fn teardown(&mut self) -> Result<()> {
        self.pipeline.stop_pipeline();
        self.state = GraphState::Stopped;
        for id in self.nodes.drain(..) {
            self.pipeline.destroy_node(id)?;
        }
        self.output_node = None;
        self.project.lock().unsubscribe_all(self.subscriber);
        Ok(())
    }

    fn build(&mut self) -> Result<()> {
        let render_sink = match &self.output {
            Output::Render { sink, .. } => Some(Arc::clone(sink)),
            Output::Playback => None,
        };

        let (output, port, format) = match render_sink {
            Some(sink) => {
                let format = AudioFormat::new(
                    self.settings.export.channel_layout.clone(),
                    self.settings.export.sample_rate,
                );
                (self.create_node(&sink)?, render_sink::IN_PORT, format)
            }
            None => {
                let playback = self.select_playback_device()?;
                let config = PipelineConfig {
                    sample_rate: self.sample_rate,
                    ..self.pipeline.config().clone()
                };
                let format = device_format(&playback, &config);
                let descriptor = playback_descriptor(
                    Arc::clone(self.pipeline.audio_backend()),
                    playback.clone(),
                    &config,
                )?;
                let node = self.create_node(&descriptor)?;
                tracing::info!(
                    "Playing through {} ({} Hz, {})",
                    playback.name,
                    format.sample_rate,
                    format.channel_layout
                );
                self.device = Some(playback);
                (node, device::PORT, format)
            }
        };
        self.output_node = Some(output);
        match self.preview.as_ref().map(|p| Arc::clone(&p.file)) {
            Some(file) => self.build_preview(file, output, port, &format)?,
            None => self.build_clips(output, port, &format)?,
        }

        tracing::debug!("Audio graph built: {} nodes", self.nodes.len());
        Ok(())
    }

    fn build_clips(&mut self, output: NodeId, output_port: usize, format: &AudioFormat) -> Result<()> {
        let project = Arc::clone(&self.project);
        let mut project = project.lock();
        self.topology_version = project.topology_version();

        let clip_count = project.clips().len();
        if clip_count == 0 {
            return Ok(());
        }

        // Connected first, so the mixer's ports settle on the output format.
        let mixer = self.create_node(&mixer_descriptor(
            clip_count,
            format.channel_layout.clone(),
            format.sample_rate,
        )?)?;
        self.pipeline.connect(mixer, clip_count, output, output_port)?;

        for (input, clip) in project.clips_mut().iter_mut().enumerate() {
            let file = Arc::clone(clip.file());
            let clip_format = AudioFormat::new(file.channel_layout().clone(), file.sample_rate());

            let events = self.create_node(&clip_events_descriptor(
                clip.subscribe(self.subscriber),
                file.sample_rate(),
            )?)?;
            let player = self.create_node(&audio_clip_descriptor(file)?)?;
            self.pipeline
                .connect(events, clip_events::OUT_PORT, player, audio_clip::EVENTS_PORT)?;
            self.connect_audio(player, audio_clip::OUT_PORT, &clip_format, mixer, input, format)?;
        }
        Ok(())
    }

    /// A single segment covering `file`, wired straight into the output.
    fn build_preview(
        &mut self,
        file: Arc<AudioFile>,
        output: NodeId,
        output_port: usize,
        format: &AudioFormat,
    ) -> Result<()> {
        self.topology_version = self.project.lock().topology_version();
        let file_format = AudioFormat::new(file.channel_layout().clone(), file.sample_rate());

        let (_, reader) = atomic_value(vec![Event::segment(0.0, 0, file.frame_count())]);
        let events = self.create_node(&clip_events_descriptor(reader, file.sample_rate())?)?;
        let player = self.create_node(&audio_clip_descriptor(file)?)?;
        self.pipeline
            .connect(events, clip_events::OUT_PORT, player, audio_clip::EVENTS_PORT)?;
        self.connect_audio(player, audio_clip::OUT_PORT, &file_format, output, output_port, format)
    }

    /// Connects two audio ports, going through a resampler when their formats differ.
    fn connect_audio(
        &mut self,
        source: NodeId,
        source_port: usize,
        source_format: &AudioFormat,
        dest: NodeId,
        dest_port: usize,
        dest_format: &AudioFormat,
    ) -> Result<()> {
        match self.pipeline.connect(source, source_port, dest, dest_port) {
            Ok(()) => Ok(()),
            Err(e) if e.is_format_mismatch() => {
                tracing::debug!(
                    "{}: converting {} Hz {} to {} Hz {}",
                    e,
                    source_format.sample_rate,
                    source_format.channel_layout,
                    dest_format.sample_rate,
                    dest_format.channel_layout
                );
                let resampler = self.create_node(&resample_descriptor(
                    source_format.clone(),
                    dest_format.clone(),
                )?)?;
                self.pipeline
                    .connect(source, source_port, resampler, resample::IN_PORT)?;
                self.pipeline
                    .connect(resampler, resample::OUT_PORT, dest, dest_port)?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn create_node(&mut self, descriptor: &Arc<NodeDescriptor>) -> Result<NodeId> {
        let id = self.pipeline.create_node(descriptor)?;
        self.nodes.push(id);
        Ok(id)
    }

    fn select_playback_device(&self) -> Result<AudioDevice> {
        let devices = self.pipeline.audio_devices();
        if let Some(id) = &self.settings.playback_device {
            match devices.find(id) {
                Some(device) if device.purpose == DevicePurpose::Playback => {
                    return Ok(device.clone())
                }
                _ => tracing::warn!("Playback device {} not available, using the default", id),
            }
        }
        devices.default_playback_device().cloned().ok_or_else(|| {
            cadence_core::Error::DeviceNotFound("no playback device".to_string()).into()
        })
    }

    // =========================================================================
    // Events
    // =========================================================================

    /// Delivers queued hardware events and applies what they imply: a lost device or a
    /// changed clip set rebuilds the graph. Returns how many events were delivered.
    pub fn flush_events(&mut self) -> Result<usize> {
        let delivered = self.pipeline.flush_events();
        self.apply_pending()?;
        Ok(delivered)
    }

    /// Like [`Self::flush_events`], blocking until an event arrives or `timeout`
    /// passes.
    pub fn wait_events(&mut self, timeout: Option<Duration>) -> Result<usize> {
        let delivered = self.pipeline.wait_events(timeout);
        self.apply_pending()?;
        Ok(delivered)
    }

    fn apply_pending(&mut self) -> Result<()> {
        let events = std::mem::take(&mut *self.hardware_events.lock());
        if self.is_render() {
            return Ok(());
        }

        let mut rebuild = self.project.lock().topology_version() != self.topology_version;
        for event in &events {
            match event {
                HardwareEvent::DeviceLost { device }
                    if self.device.as_ref().is_some_and(|d| &d.id == device) =>
                {
                    tracing::warn!("Lost playback device {}, rebuilding", device);
                    rebuild = true;
                }
                HardwareEvent::DevicesChanged if self.device_outdated() => {
                    tracing::info!("Audio devices changed, rebuilding");
                    rebuild = true;
                }
                _ => {}
            }
        }

        if rebuild {
            self.rebuild()?;
        }
        Ok(())
    }

    /// Whether the device list no longer matches the device in use: it disappeared,
    /// or the preferred one came back.
    fn device_outdated(&self) -> bool {
        let devices = self.pipeline.audio_devices();
        let Some(current) = &self.device else {
            return true;
        };
        if devices.find(&current.id).is_none() {
            return true;
        }
        match &self.settings.playback_device {
            Some(preferred) if preferred != &current.id => devices
                .find(preferred)
                .is_some_and(|d| d.purpose == DevicePurpose::Playback),
            _ => false,
        }
    }
}

impl Drop for AudioGraph {
    fn drop(&mut self) {
        self.pipeline.stop_pipeline();
        self.project.lock().unsubscribe_all(self.subscriber);
    }
}
