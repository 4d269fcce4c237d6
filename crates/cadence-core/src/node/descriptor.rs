//! Node and port descriptors: what a node type looks like and how to make one.

use super::context::RunContext;
use super::port::AudioFormat;
use crate::channel_layout::ChannelLayout;
use crate::config::PipelineConfig;
use crate::pipeline::NodeWaker;
use crate::{Error, Result};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortType {
    AudioIn,
    AudioOut,
    EventsIn,
    EventsOut,
}

impl PortType {
    #[inline]
    pub fn is_input(self) -> bool {
        matches!(self, PortType::AudioIn | PortType::EventsIn)
    }

    #[inline]
    pub fn is_audio(self) -> bool {
        matches!(self, PortType::AudioIn | PortType::AudioOut)
    }

    /// The port type a connection from `self` must end at.
    pub fn peer(self) -> PortType {
        match self {
            PortType::AudioIn => PortType::AudioOut,
            PortType::AudioOut => PortType::AudioIn,
            PortType::EventsIn => PortType::EventsOut,
            PortType::EventsOut => PortType::EventsIn,
        }
    }
}

/// How a port's channel layout or sample rate is decided when it connects.
///
/// `same_as` names another audio port on the same node: once that port is connected,
/// its resolved value is taken as a fixed constraint for this one. Otherwise `value`
/// applies, either as a hard requirement (`fixed`) or a preference.
#[derive(Debug, Clone, PartialEq)]
pub struct FormatConstraint<T> {
    pub value: T,
    pub fixed: bool,
    pub same_as: Option<usize>,
}

impl<T> FormatConstraint<T> {
    pub fn fixed(value: T) -> Self {
        Self {
            value,
            fixed: true,
            same_as: None,
        }
    }

    pub fn flexible(value: T) -> Self {
        Self {
            value,
            fixed: false,
            same_as: None,
        }
    }

    pub fn same_as(mut self, port: usize) -> Self {
        self.same_as = Some(port);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AudioPortDescriptor {
    pub channel_layout: FormatConstraint<ChannelLayout>,
    pub sample_rate: FormatConstraint<u32>,
}

impl AudioPortDescriptor {
    pub fn fixed(channel_layout: ChannelLayout, sample_rate: u32) -> Self {
        Self {
            channel_layout: FormatConstraint::fixed(channel_layout),
            sample_rate: FormatConstraint::fixed(sample_rate),
        }
    }

    pub fn flexible(channel_layout: ChannelLayout, sample_rate: u32) -> Self {
        Self {
            channel_layout: FormatConstraint::flexible(channel_layout),
            sample_rate: FormatConstraint::flexible(sample_rate),
        }
    }

    /// Follows `port` for both layout and rate.
    pub fn same_as(mut self, port: usize) -> Self {
        self.channel_layout.same_as = Some(port);
        self.sample_rate.same_as = Some(port);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PortDescriptor {
    pub name: String,
    pub port_type: PortType,
    /// Present exactly for audio ports.
    pub audio: Option<AudioPortDescriptor>,
}

impl PortDescriptor {
    pub fn audio_in(name: impl Into<String>, audio: AudioPortDescriptor) -> Self {
        Self {
            name: name.into(),
            port_type: PortType::AudioIn,
            audio: Some(audio),
        }
    }

    pub fn audio_out(name: impl Into<String>, audio: AudioPortDescriptor) -> Self {
        Self {
            name: name.into(),
            port_type: PortType::AudioOut,
            audio: Some(audio),
        }
    }

    pub fn events_in(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            port_type: PortType::EventsIn,
            audio: None,
        }
    }

    pub fn events_out(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            port_type: PortType::EventsOut,
            audio: None,
        }
    }
}

/// Handed to a [`NodeFactory`] when a node is created.
pub struct NodeCreateContext<'a> {
    pub config: &'a PipelineConfig,
    pub descriptor: &'a NodeDescriptor,
    /// Marks the new node runnable; hand it to hardware callbacks.
    pub waker: NodeWaker,
}

/// Per-node behaviour. Dropping the processor is the node's destroy hook.
///
/// `run` is called on a worker thread with the node's ports; every other method is
/// called from the control thread while the pipeline is stopped or paused.
pub trait NodeProcessor: Send {
    fn run(&mut self, ctx: &mut RunContext<'_>);

    /// The play head moved to `time` (whole notes). Ring buffers are already empty.
    fn seek(&mut self, _time: f64) {}

    /// Called with `true` before the pipeline starts and `false` after it stops.
    fn activate(&mut self, _active: bool) -> Result<()> {
        Ok(())
    }

    /// A port got a peer. `format` is the negotiated format for audio ports.
    /// Returning an error cancels the connection.
    fn port_connected(&mut self, _port: usize, _format: Option<&AudioFormat>) -> Result<()> {
        Ok(())
    }

    fn port_disconnected(&mut self, _port: usize) {}
}

/// Creates the processor for each new node of a descriptor.
pub trait NodeFactory: Send + Sync {
    fn create(&self, ctx: &NodeCreateContext<'_>) -> Result<Box<dyn NodeProcessor>>;
}

impl<F> NodeFactory for F
where
    F: Fn(&NodeCreateContext<'_>) -> Result<Box<dyn NodeProcessor>> + Send + Sync,
{
    fn create(&self, ctx: &NodeCreateContext<'_>) -> Result<Box<dyn NodeProcessor>> {
        self(ctx)
    }
}

/// A node type. One descriptor creates any number of nodes.
pub struct NodeDescriptor {
    name: String,
    description: String,
    ports: Vec<PortDescriptor>,
    min_software_latency: f64,
    factory: Box<dyn NodeFactory>,
}

impl NodeDescriptor {
    pub fn builder(name: impl Into<String>, description: impl Into<String>) -> NodeDescriptorBuilder {
        NodeDescriptorBuilder {
            name: name.into(),
            description: description.into(),
            ports: Vec::new(),
            min_software_latency: 0.0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn ports(&self) -> &[PortDescriptor] {
        &self.ports
    }

    pub fn port(&self, index: usize) -> Option<&PortDescriptor> {
        self.ports.get(index)
    }

    /// Index of the port called `name`.
    pub fn find_port(&self, name: &str) -> Option<usize> {
        self.ports.iter().position(|p| p.name == name)
    }

    /// Seconds of buffering this node needs on its connections.
    pub fn min_software_latency(&self) -> f64 {
        self.min_software_latency
    }

    pub(crate) fn factory(&self) -> &dyn NodeFactory {
        self.factory.as_ref()
    }
}

impl std::fmt::Debug for NodeDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeDescriptor")
            .field("name", &self.name)
            .field("ports", &self.ports)
            .finish()
    }
}

pub struct NodeDescriptorBuilder {
    name: String,
    description: String,
    ports: Vec<PortDescriptor>,
    min_software_latency: f64,
}

impl NodeDescriptorBuilder {
    pub fn port(mut self, port: PortDescriptor) -> Self {
        self.ports.push(port);
        self
    }

    pub fn min_software_latency(mut self, seconds: f64) -> Self {
        self.min_software_latency = seconds;
        self
    }

    /// Checks port links and wraps the descriptor for sharing.
    pub fn build(self, factory: impl NodeFactory + 'static) -> Result<Arc<NodeDescriptor>> {
        for (index, port) in self.ports.iter().enumerate() {
            match (&port.audio, port.port_type.is_audio()) {
                (Some(audio), true) => {
                    for link in [audio.channel_layout.same_as, audio.sample_rate.same_as]
                        .into_iter()
                        .flatten()
                    {
                        let valid = link != index
                            && self
                                .ports
                                .get(link)
                                .is_some_and(|p| p.port_type.is_audio());
                        if !valid {
                            return Err(Error::InvalidParam(format!(
                                "{}: port {} links to invalid port {}",
                                self.name, port.name, link
                            )));
                        }
                    }
                }
                (None, false) => {}
                _ => {
                    return Err(Error::InvalidParam(format!(
                        "{}: port {} audio settings do not match its type",
                        self.name, port.name
                    )));
                }
            }
        }
        if !(self.min_software_latency >= 0.0) {
            return Err(Error::InvalidParam(format!(
                "{}: negative latency",
                self.name
            )));
        }

        Ok(Arc::new(NodeDescriptor {
            name: self.name,
            description: self.description,
            ports: self.ports,
            min_software_latency: self.min_software_latency,
            factory: Box::new(factory),
        }))
    }
}
