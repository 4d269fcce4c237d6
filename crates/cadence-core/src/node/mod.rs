//! Node/port graph model.

pub(crate) mod cell;
mod context;
mod descriptor;
pub(crate) mod port;

pub use cell::NodeId;
pub use context::{AudioInput, AudioOutput, EventsInput, EventsOutput, RunContext};
pub use descriptor::{
    AudioPortDescriptor, FormatConstraint, NodeCreateContext, NodeDescriptor,
    NodeDescriptorBuilder, NodeFactory, NodeProcessor, PortDescriptor, PortType,
};
pub use port::AudioFormat;
