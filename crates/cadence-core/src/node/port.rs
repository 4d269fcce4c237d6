//! Live port state and connect-time format negotiation.

use super::cell::NodeCell;
use super::descriptor::{FormatConstraint, PortDescriptor};
use crate::channel_layout::ChannelLayout;
use crate::event::EventFlow;
use crate::ring_buffer::{RingBuffer, RingConsumer, RingProducer};
use crate::{Error, Result};
use std::sync::{Arc, Weak};

/// Resolved format of an audio connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFormat {
    pub channel_layout: ChannelLayout,
    pub sample_rate: u32,
}

impl AudioFormat {
    pub fn new(channel_layout: ChannelLayout, sample_rate: u32) -> Self {
        Self {
            channel_layout,
            sample_rate,
        }
    }

    #[inline]
    pub fn channel_count(&self) -> usize {
        self.channel_layout.channel_count()
    }

    #[inline]
    pub fn bytes_per_frame(&self) -> usize {
        self.channel_layout.bytes_per_frame()
    }
}

/// The ring end a node owns for one of its ports.
pub(crate) enum PortEnd {
    Disconnected,
    AudioOut(RingProducer),
    AudioIn(RingConsumer),
    EventsOut(RingProducer),
    EventsIn(RingConsumer),
}

impl PortEnd {
    pub(crate) fn clear_output(&mut self) {
        if let PortEnd::AudioOut(producer) | PortEnd::EventsOut(producer) = self {
            producer.clear();
        }
    }
}

/// What the scheduler needs to know about a connected port, readable without the
/// node's lock.
#[derive(Clone)]
pub(crate) struct PortLink {
    pub(crate) peer: Weak<NodeCell>,
    pub(crate) peer_port: usize,
    pub(crate) ring: Arc<RingBuffer>,
    pub(crate) flow: Option<Arc<EventFlow>>,
    pub(crate) format: Option<AudioFormat>,
}

/// One side's constraint once port links are taken into account.
struct Resolved<'a, T> {
    value: &'a T,
    fixed: bool,
}

fn resolve<'a, T>(
    constraint: &'a FormatConstraint<T>,
    links: &'a [Option<PortLink>],
    select: impl Fn(&'a AudioFormat) -> &'a T,
) -> Resolved<'a, T> {
    let linked = constraint
        .same_as
        .and_then(|port| links.get(port))
        .and_then(Option::as_ref)
        .and_then(|link| link.format.as_ref());
    match linked {
        Some(format) => Resolved {
            value: select(format),
            fixed: true,
        },
        None => Resolved {
            value: &constraint.value,
            fixed: constraint.fixed,
        },
    }
}

fn unify<T: PartialEq + Clone>(source: Resolved<'_, T>, dest: Resolved<'_, T>, err: Error) -> Result<T> {
    match (source.fixed, dest.fixed) {
        (true, true) if source.value != dest.value => Err(err),
        (true, _) => Ok(source.value.clone()),
        (false, true) => Ok(dest.value.clone()),
        (false, false) => Ok(source.value.clone()),
    }
}

/// Agrees on the format of an audio connection.
///
/// Both fixed and different fails; one fixed wins; otherwise the source's preference
/// is used. A port linked to an already-connected sibling counts as fixed at the
/// sibling's value.
pub(crate) fn negotiate_audio(
    source: &PortDescriptor,
    source_links: &[Option<PortLink>],
    dest: &PortDescriptor,
    dest_links: &[Option<PortLink>],
) -> Result<AudioFormat> {
    let (Some(src), Some(dst)) = (&source.audio, &dest.audio) else {
        return Err(Error::IncompatiblePorts);
    };

    let channel_layout = unify(
        resolve(&src.channel_layout, source_links, |f| &f.channel_layout),
        resolve(&dst.channel_layout, dest_links, |f| &f.channel_layout),
        Error::IncompatibleChannelLayouts,
    )?;
    let sample_rate = unify(
        resolve(&src.sample_rate, source_links, |f| &f.sample_rate),
        resolve(&dst.sample_rate, dest_links, |f| &f.sample_rate),
        Error::IncompatibleSampleRates,
    )?;

    Ok(AudioFormat::new(channel_layout, sample_rate))
}
