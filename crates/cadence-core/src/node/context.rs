//! What a node sees while it runs.
//!
//! Port handles borrow the node's ring ends for the duration of the call. Moving a
//! ring offset, raising an event request or publishing event time marks the run as
//! having made progress, which is what tells the scheduler to look at the node's
//! neighbours again.

use super::port::{AudioFormat, PortEnd, PortLink};
use crate::backend::{HardwareEvent, HardwareEventSender};
use crate::event::{Event, EventFlow, EVENT_SIZE};
use crate::lockfree::AtomicDouble;
use crate::ring_buffer::{RingConsumer, RingProducer};
use crate::time::TimeBase;
use std::cell::Cell;

/// Per-run view of a node.
pub struct RunContext<'a> {
    timestamp: &'a AtomicDouble,
    ends: &'a mut [PortEnd],
    links: &'a [Option<PortLink>],
    progress: Cell<bool>,
    bpm: f64,
    events: &'a HardwareEventSender,
    node_name: &'a str,
}

impl<'a> RunContext<'a> {
    pub(crate) fn new(
        timestamp: &'a AtomicDouble,
        ends: &'a mut [PortEnd],
        links: &'a [Option<PortLink>],
        bpm: f64,
        events: &'a HardwareEventSender,
        node_name: &'a str,
    ) -> Self {
        Self {
            timestamp,
            ends,
            links,
            progress: Cell::new(false),
            bpm,
            events,
            node_name,
        }
    }

    pub(crate) fn made_progress(&self) -> bool {
        self.progress.get()
    }

    /// Play position of this node, in whole notes.
    #[inline]
    pub fn timestamp(&self) -> f64 {
        self.timestamp.get()
    }

    #[inline]
    pub fn set_timestamp(&self, time: f64) {
        self.timestamp.set(time);
    }

    #[inline]
    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    pub fn time_base(&self, sample_rate: u32) -> TimeBase {
        TimeBase::new(self.bpm, sample_rate)
    }

    /// Flags progress made outside of the port handles, e.g. frames handed to hardware.
    pub fn mark_progress(&self) {
        self.progress.set(true);
    }

    pub fn is_connected(&self, port: usize) -> bool {
        matches!(self.links.get(port), Some(Some(_)))
    }

    /// Negotiated format of a connected audio port.
    pub fn format(&self, port: usize) -> Option<&AudioFormat> {
        self.links.get(port)?.as_ref()?.format.as_ref()
    }

    pub fn report_underrun(&self) {
        tracing::warn!("Underrun in node {}", self.node_name);
        let _ = self.events.try_send(HardwareEvent::Underrun {
            device: self.node_name.to_string(),
        });
    }

    pub fn report_overrun(&self) {
        tracing::warn!("Overrun in node {}", self.node_name);
        let _ = self.events.try_send(HardwareEvent::Overrun {
            device: self.node_name.to_string(),
        });
    }

    pub fn audio_in(&mut self, port: usize) -> Option<AudioInput<'_>> {
        let format = self.links.get(port)?.as_ref()?.format.as_ref()?;
        match self.ends.get_mut(port)? {
            PortEnd::AudioIn(consumer) => Some(AudioInput {
                consumer,
                format,
                progress: &self.progress,
            }),
            _ => None,
        }
    }

    pub fn audio_out(&mut self, port: usize) -> Option<AudioOutput<'_>> {
        let format = self.links.get(port)?.as_ref()?.format.as_ref()?;
        match self.ends.get_mut(port)? {
            PortEnd::AudioOut(producer) => Some(AudioOutput {
                producer,
                format,
                progress: &self.progress,
            }),
            _ => None,
        }
    }

    /// An audio input and an audio output at once.
    pub fn audio_pair(
        &mut self,
        in_port: usize,
        out_port: usize,
    ) -> Option<(AudioInput<'_>, AudioOutput<'_>)> {
        let in_format = self.links.get(in_port)?.as_ref()?.format.as_ref()?;
        let out_format = self.links.get(out_port)?.as_ref()?.format.as_ref()?;
        match two_mut(self.ends, in_port, out_port)? {
            (PortEnd::AudioIn(consumer), PortEnd::AudioOut(producer)) => Some((
                AudioInput {
                    consumer,
                    format: in_format,
                    progress: &self.progress,
                },
                AudioOutput {
                    producer,
                    format: out_format,
                    progress: &self.progress,
                },
            )),
            _ => None,
        }
    }

    pub fn events_in(&mut self, port: usize) -> Option<EventsInput<'_>> {
        let flow = self.links.get(port)?.as_ref()?.flow.as_deref()?;
        match self.ends.get_mut(port)? {
            PortEnd::EventsIn(consumer) => Some(EventsInput {
                consumer,
                flow,
                progress: &self.progress,
            }),
            _ => None,
        }
    }

    pub fn events_out(&mut self, port: usize) -> Option<EventsOutput<'_>> {
        let flow = self.links.get(port)?.as_ref()?.flow.as_deref()?;
        match self.ends.get_mut(port)? {
            PortEnd::EventsOut(producer) => Some(EventsOutput {
                producer,
                flow,
                progress: &self.progress,
            }),
            _ => None,
        }
    }

    /// An events input and an audio output at once. The events side is `None` when
    /// that port is not connected.
    pub fn events_and_audio_out(
        &mut self,
        events_port: usize,
        out_port: usize,
    ) -> Option<(Option<EventsInput<'_>>, AudioOutput<'_>)> {
        let out_format = self.links.get(out_port)?.as_ref()?.format.as_ref()?;
        let flow = self
            .links
            .get(events_port)
            .and_then(Option::as_ref)
            .and_then(|link| link.flow.as_deref());
        match two_mut(self.ends, events_port, out_port)? {
            (events_end, PortEnd::AudioOut(producer)) => {
                let events = match (events_end, flow) {
                    (PortEnd::EventsIn(consumer), Some(flow)) => Some(EventsInput {
                        consumer,
                        flow,
                        progress: &self.progress,
                    }),
                    _ => None,
                };
                Some((
                    events,
                    AudioOutput {
                        producer,
                        format: out_format,
                        progress: &self.progress,
                    },
                ))
            }
            _ => None,
        }
    }
}

fn two_mut<T>(slice: &mut [T], a: usize, b: usize) -> Option<(&mut T, &mut T)> {
    if a == b || a >= slice.len() || b >= slice.len() {
        return None;
    }
    if a < b {
        let (left, right) = slice.split_at_mut(b);
        Some((&mut left[a], &mut right[0]))
    } else {
        let (left, right) = slice.split_at_mut(a);
        Some((&mut right[0], &mut left[b]))
    }
}

/// Connected audio input: interleaved f32 frames waiting to be consumed.
pub struct AudioInput<'a> {
    consumer: &'a mut RingConsumer,
    format: &'a AudioFormat,
    progress: &'a Cell<bool>,
}

impl AudioInput<'_> {
    pub fn format(&self) -> &AudioFormat {
        self.format
    }

    #[inline]
    pub fn channel_count(&self) -> usize {
        self.format.channel_count()
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.format.sample_rate
    }

    /// Whole frames buffered.
    #[inline]
    pub fn frames(&self) -> usize {
        self.consumer.fill_count() / self.format.bytes_per_frame()
    }

    /// Every buffered frame, interleaved.
    pub fn samples(&self) -> &[f32] {
        let len = self.frames() * self.channel_count();
        &self.consumer.read_ptr_f32()[..len]
    }

    pub fn advance(&mut self, frames: usize) {
        if frames > 0 {
            self.consumer
                .advance_read_ptr(frames * self.format.bytes_per_frame());
            self.progress.set(true);
        }
    }
}

/// Connected audio output: free space for interleaved f32 frames.
pub struct AudioOutput<'a> {
    producer: &'a mut RingProducer,
    format: &'a AudioFormat,
    progress: &'a Cell<bool>,
}

impl AudioOutput<'_> {
    pub fn format(&self) -> &AudioFormat {
        self.format
    }

    #[inline]
    pub fn channel_count(&self) -> usize {
        self.format.channel_count()
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.format.sample_rate
    }

    /// Whole frames that fit.
    #[inline]
    pub fn free_frames(&self) -> usize {
        self.producer.free_count() / self.format.bytes_per_frame()
    }

    /// Space for every free frame, interleaved. Contents are stale until written.
    pub fn samples_mut(&mut self) -> &mut [f32] {
        let len = self.free_frames() * self.channel_count();
        &mut self.producer.write_ptr_f32()[..len]
    }

    pub fn advance(&mut self, frames: usize) {
        if frames > 0 {
            self.producer
                .advance_write_ptr(frames * self.format.bytes_per_frame());
            self.progress.set(true);
        }
    }
}

/// Connected events input.
pub struct EventsInput<'a> {
    consumer: &'a mut RingConsumer,
    flow: &'a EventFlow,
    progress: &'a Cell<bool>,
}

impl EventsInput<'_> {
    /// Asks the producer for every event starting before `time`.
    pub fn request(&mut self, time: f64) {
        if self.flow.request(time) {
            self.progress.set(true);
        }
    }

    #[inline]
    pub fn time_requested(&self) -> f64 {
        self.flow.time_requested()
    }

    /// Events starting before this time are all in the buffer.
    #[inline]
    pub fn time_available(&self) -> f64 {
        self.flow.time_available()
    }

    #[inline]
    pub fn event_count(&self) -> usize {
        self.consumer.fill_count() / EVENT_SIZE
    }

    pub fn peek(&self) -> Option<Event> {
        let bytes = self.consumer.read_ptr();
        (bytes.len() >= EVENT_SIZE).then(|| Event::read_from(bytes))
    }

    pub fn pop(&mut self) -> Option<Event> {
        let event = self.peek()?;
        self.consumer.advance_read_ptr(EVENT_SIZE);
        self.progress.set(true);
        Some(event)
    }

    /// Pops the next event if it starts before `time`.
    pub fn pop_before(&mut self, time: f64) -> Option<Event> {
        match self.peek() {
            Some(event) if event.start < time => self.pop(),
            _ => None,
        }
    }
}

/// Connected events output.
pub struct EventsOutput<'a> {
    producer: &'a mut RingProducer,
    flow: &'a EventFlow,
    progress: &'a Cell<bool>,
}

impl EventsOutput<'_> {
    #[inline]
    pub fn time_requested(&self) -> f64 {
        self.flow.time_requested()
    }

    #[inline]
    pub fn time_available(&self) -> f64 {
        self.flow.time_available()
    }

    #[inline]
    pub fn free_events(&self) -> usize {
        self.producer.free_count() / EVENT_SIZE
    }

    /// Queues `event`; false if the buffer is full.
    pub fn write(&mut self, event: &Event) -> bool {
        let slot = self.producer.write_ptr();
        if slot.len() < EVENT_SIZE {
            return false;
        }
        event.write_to(slot);
        self.producer.advance_write_ptr(EVENT_SIZE);
        self.progress.set(true);
        true
    }

    /// Declares every event starting before `time` written.
    pub fn publish(&mut self, time: f64) {
        if self.flow.publish(time) {
            self.progress.set(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::two_mut;

    #[test]
    fn test_two_mut() {
        let mut values = [1, 2, 3, 4];
        let (a, b) = two_mut(&mut values, 3, 1).unwrap();
        std::mem::swap(a, b);
        assert_eq!(values, [1, 4, 3, 2]);
        assert!(two_mut(&mut values, 2, 2).is_none());
        assert!(two_mut(&mut values, 0, 9).is_none());
    }
}
