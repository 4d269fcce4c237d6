//! A node instance as the pipeline stores it.

use super::descriptor::{NodeDescriptor, NodeProcessor, PortType};
use super::port::{PortEnd, PortLink};
use crate::event::EVENT_SIZE;
use crate::lockfree::{AtomicDouble, AtomicFlag};
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Handle to a node owned by a [`Pipeline`](crate::Pipeline).
///
/// Ids are generation-checked: an id of a destroyed node never resolves again, even
/// after its slot is reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

/// Scheduling state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum SchedState {
    Idle = 0,
    Queued = 1,
    Running = 2,
    /// Running, and something asked for another run meanwhile.
    RunningWoken = 3,
}

impl SchedState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => SchedState::Queued,
            2 => SchedState::Running,
            3 => SchedState::RunningWoken,
            _ => SchedState::Idle,
        }
    }
}

pub(crate) struct NodeBody {
    pub(crate) processor: Box<dyn NodeProcessor>,
    pub(crate) ends: Vec<PortEnd>,
}

pub(crate) struct NodeCell {
    pub(crate) id: NodeId,
    pub(crate) descriptor: Arc<NodeDescriptor>,
    pub(crate) timestamp: AtomicDouble,
    pub(crate) being_processed: AtomicFlag,
    state: AtomicU8,
    pub(crate) links: ArcSwap<Vec<Option<PortLink>>>,
    pub(crate) body: Mutex<NodeBody>,
}

impl NodeCell {
    pub(crate) fn new(
        id: NodeId,
        descriptor: Arc<NodeDescriptor>,
        processor: Box<dyn NodeProcessor>,
    ) -> Self {
        let port_count = descriptor.ports().len();
        Self {
            id,
            descriptor,
            timestamp: AtomicDouble::new(0.0),
            being_processed: AtomicFlag::new(false),
            state: AtomicU8::new(SchedState::Idle as u8),
            links: ArcSwap::from_pointee(vec![None; port_count]),
            body: Mutex::new(NodeBody {
                processor,
                ends: (0..port_count).map(|_| PortEnd::Disconnected).collect(),
            }),
        }
    }

    #[inline]
    pub(crate) fn state(&self) -> SchedState {
        SchedState::from_u8(self.state.load(Ordering::SeqCst))
    }

    #[inline]
    pub(crate) fn set_state(&self, state: SchedState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    #[inline]
    pub(crate) fn swap_state(&self, state: SchedState) -> SchedState {
        SchedState::from_u8(self.state.swap(state as u8, Ordering::SeqCst))
    }

    #[inline]
    pub(crate) fn transition(&self, from: SchedState, to: SchedState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Replaces the link of one port.
    pub(crate) fn set_link(&self, port: usize, link: Option<PortLink>) {
        let mut links = Vec::clone(&self.links.load());
        links[port] = link;
        self.links.store(Arc::new(links));
    }

    pub(crate) fn link(&self, port: usize) -> Option<PortLink> {
        self.links.load().get(port).cloned().flatten()
    }

    /// Whether a run could move data right now.
    ///
    /// Demand: no connected outputs, or room in some audio output, or an events output
    /// whose consumer asked for more than was published. Supply: no connected inputs,
    /// or frames in some audio input, or any connected events input (an events
    /// producer that has nothing to say still publishes the time window).
    pub(crate) fn is_runnable(&self) -> bool {
        let links = self.links.load();
        let mut has_outputs = false;
        let mut has_inputs = false;
        let mut demand = false;
        let mut supply = false;

        for (port, link) in self.descriptor.ports().iter().zip(links.iter()) {
            let Some(link) = link else { continue };
            match port.port_type {
                PortType::AudioOut => {
                    has_outputs = true;
                    let frame = link.format.as_ref().map_or(1, |f| f.bytes_per_frame());
                    demand |= link.ring.free_count() >= frame;
                }
                PortType::EventsOut => {
                    has_outputs = true;
                    demand |= link.flow.as_ref().is_some_and(|flow| flow.wants_more())
                        && link.ring.free_count() >= EVENT_SIZE;
                }
                PortType::AudioIn => {
                    has_inputs = true;
                    let frame = link.format.as_ref().map_or(1, |f| f.bytes_per_frame());
                    supply |= link.ring.fill_count() >= frame;
                }
                PortType::EventsIn => {
                    has_inputs = true;
                    supply = true;
                }
            }
        }

        (!has_outputs || demand) && (!has_inputs || supply)
    }

    /// Live peers, for re-evaluation after a run.
    pub(crate) fn peers(&self) -> impl Iterator<Item = Arc<NodeCell>> {
        let links = self.links.load_full();
        (0..links.len()).filter_map(move |i| links[i].as_ref().and_then(|l| l.peer.upgrade()))
    }
}
