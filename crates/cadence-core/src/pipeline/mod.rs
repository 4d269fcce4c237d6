//! The pipeline: node arena, graph editing, lifecycle and hardware event delivery.

mod scheduler;

pub use scheduler::NodeWaker;

use crate::backend::{
    AudioBackend, AudioDevice, DevicesInfo, HardwareEvent, MidiBackend, MidiDevice,
};
use crate::config::PipelineConfig;
use crate::event::{EventFlow, EVENT_SIZE};
use crate::node::cell::{NodeCell, SchedState};
use crate::node::port::{negotiate_audio, PortEnd, PortLink};
use crate::node::{NodeCreateContext, NodeDescriptor, NodeId, NodeProcessor, PortType, RunContext};
use crate::ring_buffer::RingBuffer;
use crate::{Error, Result};
use crossbeam_channel::{Receiver, Sender};
use scheduler::{SchedulerShared, WorkerPool};
use std::sync::Arc;
use std::time::Duration;

/// Events ring capacity, in records.
const EVENTS_RING_LEN: usize = 1024;

/// Bound on queued hardware events; further events are dropped until flushed.
const HARDWARE_EVENT_QUEUE: usize = 1024;

/// Lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Stopped,
    Running,
    Paused,
}

/// Callback for hardware events, invoked on the thread that flushes events.
pub type EventCallback = Box<dyn FnMut(&HardwareEvent) + Send>;

/// Interrupts a [`Pipeline::wait_events`] from any thread, e.g. a signal handler.
#[derive(Clone)]
pub struct EventWakeup {
    sender: Sender<HardwareEvent>,
}

impl EventWakeup {
    pub fn wakeup(&self) {
        let _ = self.sender.try_send(HardwareEvent::Wakeup);
    }
}

struct Slot {
    generation: u32,
    cell: Option<Arc<NodeCell>>,
}

/// Owner of nodes, the worker pool and the hardware backends.
///
/// Graph edits (creating, destroying, connecting and disconnecting nodes) are only
/// allowed while the pipeline is stopped or paused.
///
/// # Example
///
/// ```ignore
/// let mut pipeline = Pipeline::builder()
///     .audio_backend(Arc::new(DummyBackend::new()))
///     .build()?;
///
/// let synth = pipeline.create_node(&synth_descriptor)?;
/// let sink = pipeline.create_node(&playback_descriptor)?;
/// pipeline.connect_audio_nodes(synth, sink)?;
/// pipeline.start_pipeline(0.0)?;
/// ```
pub struct Pipeline {
    config: PipelineConfig,
    shared: Arc<SchedulerShared>,
    workers: WorkerPool,
    slots: Vec<Slot>,
    free_slots: Vec<u32>,
    state: PipelineState,
    descriptors: Vec<Arc<NodeDescriptor>>,
    audio_backend: Arc<dyn AudioBackend>,
    midi_backend: Option<Arc<dyn MidiBackend>>,
    events_tx: Sender<HardwareEvent>,
    events_rx: Receiver<HardwareEvent>,
    callbacks: Vec<EventCallback>,
    underruns: u64,
    overruns: u64,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == PipelineState::Running
    }

    /// Makes a descriptor findable by name.
    pub fn register_descriptor(&mut self, descriptor: Arc<NodeDescriptor>) {
        self.descriptors
            .retain(|d| d.name() != descriptor.name());
        tracing::debug!("Registered node type {}", descriptor.name());
        self.descriptors.push(descriptor);
    }

    pub fn find_descriptor(&self, name: &str) -> Option<Arc<NodeDescriptor>> {
        self.descriptors.iter().find(|d| d.name() == name).cloned()
    }

    pub fn descriptors(&self) -> &[Arc<NodeDescriptor>] {
        &self.descriptors
    }

    pub fn audio_backend(&self) -> &Arc<dyn AudioBackend> {
        &self.audio_backend
    }

    pub fn midi_backend(&self) -> Option<&Arc<dyn MidiBackend>> {
        self.midi_backend.as_ref()
    }

    pub fn refresh_audio_devices(&self) -> Result<()> {
        self.audio_backend.refresh()
    }

    pub fn audio_devices(&self) -> DevicesInfo {
        self.audio_backend.devices()
    }

    pub fn default_playback_device(&self) -> Option<AudioDevice> {
        self.audio_devices().default_playback_device().cloned()
    }

    pub fn default_recording_device(&self) -> Option<AudioDevice> {
        self.audio_devices().default_recording_device().cloned()
    }

    pub fn refresh_midi_devices(&self) -> Result<()> {
        match &self.midi_backend {
            Some(backend) => backend.refresh(),
            None => Ok(()),
        }
    }

    pub fn midi_devices(&self) -> Vec<MidiDevice> {
        self.midi_backend
            .as_ref()
            .map(|b| b.devices())
            .unwrap_or_default()
    }

    /// Registers a callback for hardware events.
    pub fn on_event(&mut self, callback: impl FnMut(&HardwareEvent) + Send + 'static) {
        self.callbacks.push(Box::new(callback));
    }

    /// Delivers every queued hardware event to the callbacks. Returns how many.
    pub fn flush_events(&mut self) -> usize {
        let mut delivered = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            self.deliver(&event);
            delivered += 1;
        }
        delivered
    }

    /// Blocks until an event arrives (or `timeout` passes), then flushes.
    pub fn wait_events(&mut self, timeout: Option<Duration>) -> usize {
        let first = match timeout {
            Some(timeout) => self.events_rx.recv_timeout(timeout).ok(),
            None => self.events_rx.recv().ok(),
        };
        match first {
            Some(event) => {
                self.deliver(&event);
                1 + self.flush_events()
            }
            None => 0,
        }
    }

    pub fn event_wakeup(&self) -> EventWakeup {
        EventWakeup {
            sender: self.events_tx.clone(),
        }
    }

    fn deliver(&mut self, event: &HardwareEvent) {
        match event {
            HardwareEvent::Underrun { .. } => self.underruns += 1,
            HardwareEvent::Overrun { .. } => self.overruns += 1,
            _ => {}
        }
        for callback in &mut self.callbacks {
            callback(event);
        }
    }

    /// Underruns delivered so far.
    pub fn underrun_count(&self) -> u64 {
        self.underruns
    }

    pub fn overrun_count(&self) -> u64 {
        self.overruns
    }

    fn require_editable(&self, what: &str) -> Result<()> {
        if self.state == PipelineState::Running {
            return Err(Error::InvalidState(format!(
                "cannot {} while the pipeline is running",
                what
            )));
        }
        Ok(())
    }

    fn cell(&self, id: NodeId) -> Result<&Arc<NodeCell>> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.cell.as_ref())
            .ok_or_else(|| Error::InvalidParam(format!("no node {}", id)))
    }

    fn cells(&self) -> impl Iterator<Item = &Arc<NodeCell>> {
        self.slots.iter().filter_map(|slot| slot.cell.as_ref())
    }

    /// Instantiates a node of `descriptor`.
    pub fn create_node(&mut self, descriptor: &Arc<NodeDescriptor>) -> Result<NodeId> {
        self.require_editable("create nodes")?;

        let index = match self.free_slots.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    cell: None,
                });
                (self.slots.len() - 1) as u32
            }
        };
        let id = NodeId {
            index,
            generation: self.slots[index as usize].generation,
        };

        let mut failure = None;
        let shared = Arc::downgrade(&self.shared);
        let config = &self.config;
        let cell = Arc::new_cyclic(|weak| {
            let ctx = NodeCreateContext {
                config,
                descriptor: descriptor.as_ref(),
                waker: NodeWaker::new(weak.clone(), shared),
            };
            let processor = match descriptor.factory().create(&ctx) {
                Ok(processor) => processor,
                Err(e) => {
                    failure = Some(e);
                    Box::new(Inert)
                }
            };
            NodeCell::new(id, Arc::clone(descriptor), processor)
        });

        if let Some(e) = failure {
            self.free_slots.push(index);
            return Err(e);
        }

        self.slots[index as usize].cell = Some(cell);
        tracing::debug!("Created node {} ({})", id, descriptor.name());
        Ok(id)
    }

    /// Disconnects and drops a node. Its id stops resolving.
    pub fn destroy_node(&mut self, id: NodeId) -> Result<()> {
        self.require_editable("destroy nodes")?;
        self.disconnect_all_ports(id)?;
        let slot = &mut self.slots[id.index as usize];
        slot.cell = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free_slots.push(id.index);
        tracing::debug!("Destroyed node {}", id);
        Ok(())
    }

    pub fn node_count(&self) -> usize {
        self.cells().count()
    }

    pub fn contains_node(&self, id: NodeId) -> bool {
        self.cell(id).is_ok()
    }

    pub fn node_descriptor(&self, id: NodeId) -> Result<Arc<NodeDescriptor>> {
        Ok(Arc::clone(&self.cell(id)?.descriptor))
    }

    /// Play position of a node, in whole notes.
    pub fn node_timestamp(&self, id: NodeId) -> Result<f64> {
        Ok(self.cell(id)?.timestamp.get())
    }

    /// True while a worker is inside the node's run.
    pub fn node_is_being_processed(&self, id: NodeId) -> Result<bool> {
        Ok(self.cell(id)?.being_processed.get())
    }

    pub fn port_is_connected(&self, id: NodeId, port: usize) -> Result<bool> {
        Ok(self.cell(id)?.link(port).is_some())
    }

    /// Peer of a connected port.
    pub fn port_peer(&self, id: NodeId, port: usize) -> Result<Option<(NodeId, usize)>> {
        Ok(self
            .cell(id)?
            .link(port)
            .and_then(|link| link.peer.upgrade().map(|peer| (peer.id, link.peer_port))))
    }

    /// Negotiated format of a connected audio port.
    pub fn port_format(&self, id: NodeId, port: usize) -> Result<Option<crate::AudioFormat>> {
        Ok(self.cell(id)?.link(port).and_then(|link| link.format))
    }

    /// Connects an output port to an input port.
    ///
    /// Audio connections negotiate their format and buffer the configured latency.
    /// On failure nothing changes on either node.
    pub fn connect(
        &mut self,
        source: NodeId,
        source_port: usize,
        dest: NodeId,
        dest_port: usize,
    ) -> Result<()> {
        self.require_editable("connect ports")?;
        if source == dest {
            return Err(Error::InvalidParam("cannot connect a node to itself".to_string()));
        }
        let source_cell = Arc::clone(self.cell(source)?);
        let dest_cell = Arc::clone(self.cell(dest)?);

        let source_desc = source_cell
            .descriptor
            .port(source_port)
            .ok_or_else(|| Error::InvalidParam(format!("node {} has no port {}", source, source_port)))?;
        let dest_desc = dest_cell
            .descriptor
            .port(dest_port)
            .ok_or_else(|| Error::InvalidParam(format!("node {} has no port {}", dest, dest_port)))?;

        if source_desc.port_type.is_input() || !dest_desc.port_type.is_input() {
            return Err(Error::InvalidPortDirection);
        }
        if source_desc.port_type.peer() != dest_desc.port_type {
            return Err(Error::IncompatiblePorts);
        }
        if source_cell.link(source_port).is_some() || dest_cell.link(dest_port).is_some() {
            return Err(Error::InvalidState("port already connected".to_string()));
        }

        let is_audio = source_desc.port_type == PortType::AudioOut;
        let format = if is_audio {
            Some(negotiate_audio(
                source_desc,
                &source_cell.links.load(),
                dest_desc,
                &dest_cell.links.load(),
            )?)
        } else {
            None
        };

        let ring_bytes = match &format {
            Some(format) => {
                let latency = self
                    .config
                    .latency
                    .max(source_cell.descriptor.min_software_latency())
                    .max(dest_cell.descriptor.min_software_latency());
                let frames = (latency * format.sample_rate as f64).ceil() as usize;
                frames.max(1) * format.bytes_per_frame()
            }
            None => EVENTS_RING_LEN * EVENT_SIZE,
        };
        let ring = RingBuffer::new(ring_bytes)?;
        let (producer, consumer) = ring.split();
        let shared_ring = Arc::clone(producer.ring());
        let flow = (!is_audio).then(|| Arc::new(EventFlow::new(source_cell.timestamp.get())));

        {
            let mut source_body = source_cell.body.lock();
            let mut dest_body = dest_cell.body.lock();

            source_body
                .processor
                .port_connected(source_port, format.as_ref())?;
            if let Err(e) = dest_body.processor.port_connected(dest_port, format.as_ref()) {
                source_body.processor.port_disconnected(source_port);
                return Err(e);
            }

            if is_audio {
                source_body.ends[source_port] = PortEnd::AudioOut(producer);
                dest_body.ends[dest_port] = PortEnd::AudioIn(consumer);
            } else {
                source_body.ends[source_port] = PortEnd::EventsOut(producer);
                dest_body.ends[dest_port] = PortEnd::EventsIn(consumer);
            }
        }

        source_cell.set_link(
            source_port,
            Some(PortLink {
                peer: Arc::downgrade(&dest_cell),
                peer_port: dest_port,
                ring: Arc::clone(&shared_ring),
                flow: flow.clone(),
                format: format.clone(),
            }),
        );
        dest_cell.set_link(
            dest_port,
            Some(PortLink {
                peer: Arc::downgrade(&source_cell),
                peer_port: source_port,
                ring: shared_ring,
                flow,
                format: format.clone(),
            }),
        );

        match &format {
            Some(format) => tracing::debug!(
                "Connected {}:{} -> {}:{} ({} Hz, {})",
                source,
                source_desc.name,
                dest,
                dest_desc.name,
                format.sample_rate,
                format.channel_layout
            ),
            None => tracing::debug!(
                "Connected {}:{} -> {}:{} (events)",
                source,
                source_desc.name,
                dest,
                dest_desc.name
            ),
        }
        Ok(())
    }

    /// Connects the first audio output of `source` to the first free audio input of
    /// `dest`.
    pub fn connect_audio_nodes(&mut self, source: NodeId, dest: NodeId) -> Result<()> {
        let (out_port, in_port) = self.first_ports(source, dest, PortType::AudioOut)?;
        self.connect(source, out_port, dest, in_port)
    }

    /// Connects the first events output of `source` to the first free events input of
    /// `dest`.
    pub fn connect_event_nodes(&mut self, source: NodeId, dest: NodeId) -> Result<()> {
        let (out_port, in_port) = self.first_ports(source, dest, PortType::EventsOut)?;
        self.connect(source, out_port, dest, in_port)
    }

    fn first_ports(&self, source: NodeId, dest: NodeId, out_type: PortType) -> Result<(usize, usize)> {
        let source_cell = self.cell(source)?;
        let dest_cell = self.cell(dest)?;
        let out_port = source_cell
            .descriptor
            .ports()
            .iter()
            .position(|p| p.port_type == out_type)
            .ok_or(Error::IncompatiblePorts)?;
        let in_type = out_type.peer();
        let mut inputs = dest_cell
            .descriptor
            .ports()
            .iter()
            .enumerate()
            .filter(|(_, p)| p.port_type == in_type)
            .map(|(i, _)| i)
            .peekable();
        if inputs.peek().is_none() {
            return Err(Error::IncompatiblePorts);
        }
        let in_port = inputs
            .find(|&i| dest_cell.link(i).is_none())
            .ok_or_else(|| Error::InvalidState("no free input port".to_string()))?;
        Ok((out_port, in_port))
    }

    /// Breaks the connection on `port`, if any, on both ends.
    pub fn disconnect(&mut self, id: NodeId, port: usize) -> Result<()> {
        self.require_editable("disconnect ports")?;
        let cell = Arc::clone(self.cell(id)?);
        let Some(link) = cell.link(port) else {
            return Ok(());
        };

        {
            let mut body = cell.body.lock();
            body.processor.port_disconnected(port);
            body.ends[port] = PortEnd::Disconnected;
        }
        cell.set_link(port, None);

        if let Some(peer) = link.peer.upgrade() {
            {
                let mut body = peer.body.lock();
                body.processor.port_disconnected(link.peer_port);
                body.ends[link.peer_port] = PortEnd::Disconnected;
            }
            peer.set_link(link.peer_port, None);
        }
        tracing::debug!("Disconnected {} port {}", id, port);
        Ok(())
    }

    pub fn disconnect_all_ports(&mut self, id: NodeId) -> Result<()> {
        let port_count = self.cell(id)?.descriptor.ports().len();
        for port in 0..port_count {
            self.disconnect(id, port)?;
        }
        Ok(())
    }

    /// Seeks to `time`, activates every node and starts dispatching.
    pub fn start_pipeline(&mut self, time: f64) -> Result<()> {
        if self.state == PipelineState::Running {
            return Err(Error::InvalidState("pipeline already running".to_string()));
        }
        if self.state == PipelineState::Paused {
            self.halt();
        }
        self.seek_nodes(time);

        let cells: Vec<_> = self.cells().cloned().collect();
        for (activated, cell) in cells.iter().enumerate() {
            if let Err(e) = cell.body.lock().processor.activate(true) {
                tracing::warn!("Activating node {} failed: {}", cell.id, e);
                for cell in &cells[..activated] {
                    let _ = cell.body.lock().processor.activate(false);
                }
                self.state = PipelineState::Stopped;
                return Err(e);
            }
        }

        self.shared.set_running(true);
        self.state = PipelineState::Running;
        tracing::info!("Pipeline started at {} with {} nodes", time, cells.len());
        self.seed();
        Ok(())
    }

    /// Stops dispatching, waits for every run in flight and deactivates all nodes.
    pub fn stop_pipeline(&mut self) {
        if self.state == PipelineState::Stopped {
            return;
        }
        self.shared.set_running(false);
        self.shared.wait_idle();
        self.halt();
        tracing::info!("Pipeline stopped");
    }

    fn halt(&mut self) {
        for cell in self.cells() {
            cell.set_state(SchedState::Idle);
            cell.being_processed.set(false);
            if let Err(e) = cell.body.lock().processor.activate(false) {
                tracing::warn!("Deactivating node {} failed: {}", cell.id, e);
            }
        }
        self.state = PipelineState::Stopped;
    }

    /// Suspends dispatch without touching buffers or devices.
    pub fn pause(&mut self) -> Result<()> {
        if self.state != PipelineState::Running {
            return Err(Error::InvalidState("pipeline is not running".to_string()));
        }
        self.shared.set_running(false);
        self.shared.wait_idle();
        self.state = PipelineState::Paused;
        tracing::info!("Pipeline paused");
        Ok(())
    }

    pub fn resume(&mut self) -> Result<()> {
        if self.state != PipelineState::Paused {
            return Err(Error::InvalidState("pipeline is not paused".to_string()));
        }
        self.shared.set_running(true);
        self.state = PipelineState::Running;
        tracing::info!("Pipeline resumed");
        self.seed();
        Ok(())
    }

    /// Moves every node to `time` (whole notes). Only while stopped or paused.
    pub fn seek(&mut self, time: f64) -> Result<()> {
        self.require_editable("seek")?;
        self.seek_nodes(time);
        Ok(())
    }

    fn seek_nodes(&self, time: f64) {
        for cell in self.cells() {
            cell.timestamp.set(time);
            let mut body = cell.body.lock();
            for end in body.ends.iter_mut() {
                end.clear_output();
            }
            for link in cell.links.load().iter().flatten() {
                if let Some(flow) = &link.flow {
                    flow.reset(time);
                }
            }
            body.processor.seek(time);
        }
    }

    fn seed(&self) {
        for cell in self.cells() {
            self.shared.schedule_if_runnable(cell);
        }
    }

    /// Runs one node on the calling thread, as a worker would. Only while stopped or
    /// paused; intended for tests and offline tools.
    pub fn run_node_once(&mut self, id: NodeId) -> Result<bool> {
        self.require_editable("run nodes by hand")?;
        let cell = self.cell(id)?;
        let links = cell.links.load_full();
        let mut body = cell.body.lock();
        let body = &mut *body;
        let mut ctx = RunContext::new(
            &cell.timestamp,
            &mut body.ends,
            &links,
            self.config.bpm,
            &self.events_tx,
            cell.descriptor.name(),
        );
        body.processor.run(&mut ctx);
        Ok(ctx.made_progress())
    }

    /// Whether the scheduler would consider the node runnable right now.
    pub fn node_is_runnable(&self, id: NodeId) -> Result<bool> {
        Ok(self.cell(id)?.is_runnable())
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.stop_pipeline();
        self.workers.shutdown();
    }
}

/// Placeholder processor for a node whose factory failed.
struct Inert;

impl NodeProcessor for Inert {
    fn run(&mut self, _ctx: &mut RunContext<'_>) {}
}

/// Builder for [`Pipeline`].
#[derive(Default)]
pub struct PipelineBuilder {
    config: PipelineConfig,
    audio_backend: Option<Arc<dyn AudioBackend>>,
    midi_backend: Option<Arc<dyn MidiBackend>>,
}

impl PipelineBuilder {
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn sample_rate(mut self, rate: u32) -> Self {
        self.config.sample_rate = rate;
        self
    }

    pub fn channel_layout(mut self, layout: crate::ChannelLayout) -> Self {
        self.config.channel_layout = layout;
        self
    }

    /// Seconds of audio buffered on each connection.
    pub fn latency(mut self, seconds: f64) -> Self {
        self.config.latency = seconds;
        self
    }

    pub fn bpm(mut self, bpm: f64) -> Self {
        self.config.bpm = bpm;
        self
    }

    pub fn worker_count(mut self, count: usize) -> Self {
        self.config.worker_count = Some(count);
        self
    }

    pub fn audio_backend(mut self, backend: Arc<dyn AudioBackend>) -> Self {
        self.audio_backend = Some(backend);
        self
    }

    pub fn midi_backend(mut self, backend: Arc<dyn MidiBackend>) -> Self {
        self.midi_backend = Some(backend);
        self
    }

    pub fn build(self) -> Result<Pipeline> {
        self.config.validate()?;
        let audio_backend = self
            .audio_backend
            .ok_or_else(|| Error::InvalidConfig("no audio backend".to_string()))?;

        let (events_tx, events_rx) = crossbeam_channel::bounded(HARDWARE_EVENT_QUEUE);
        audio_backend.init(events_tx.clone())?;
        if let Some(midi) = &self.midi_backend {
            midi.init(events_tx.clone())?;
        }

        let (queue_tx, queue_rx) = crossbeam_channel::unbounded();
        let shared = Arc::new(SchedulerShared::new(
            queue_tx.clone(),
            events_tx.clone(),
            self.config.bpm,
        ));
        let workers = WorkerPool::spawn(self.config.worker_count(), &shared, queue_tx, queue_rx)?;

        tracing::info!(
            "Pipeline ready: {} Hz, {}, {:.3} s latency, {} workers, {} backend",
            self.config.sample_rate,
            self.config.channel_layout,
            self.config.latency,
            self.config.worker_count(),
            audio_backend.name()
        );

        Ok(Pipeline {
            config: self.config,
            shared,
            workers,
            slots: Vec::new(),
            free_slots: Vec::new(),
            state: PipelineState::Stopped,
            descriptors: Vec::new(),
            audio_backend,
            midi_backend: self.midi_backend,
            events_tx,
            events_rx,
            callbacks: Vec::new(),
            underruns: 0,
            overruns: 0,
        })
    }
}
