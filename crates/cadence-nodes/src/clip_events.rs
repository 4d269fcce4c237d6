//! Feeds a clip's event list to an audio-clip node.
//!
//! The list is published from the control thread through an atomic value; this node
//! reads the newest version each run and writes the events that fall inside the
//! window its consumer asked for.

use cadence_core::{
    AtomicValueReader, Error, Event, EventKind, NodeCreateContext, NodeDescriptor, NodeProcessor,
    PortDescriptor, Result, RunContext, TimeBase,
};
use parking_lot::Mutex;
use std::sync::Arc;

pub const OUT_PORT: usize = 0;

/// Event source for one clip. Events in the published list are sorted by start.
pub struct ClipEvents {
    reader: AtomicValueReader<Vec<Event>>,
    sample_rate: u32,
    /// Set initially and after a seek: segments already sounding at the window start
    /// still need to be sent.
    detect_ongoing: bool,
    /// When the buffer filled up mid-timestamp: that timestamp and how many events
    /// starting at it already went out.
    resume: Option<(f64, usize)>,
}

/// The part of a segment still sounding at `time`, moved to start there.
fn ongoing_at(event: &Event, time: f64, time_base: &TimeBase) -> Option<Event> {
    let EventKind::Segment {
        start_frame,
        end_frame,
    } = event.kind
    else {
        return None;
    };
    if event.start >= time || end_frame <= start_frame {
        return None;
    }
    let elapsed = time_base.whole_notes_to_frames(time - event.start).round() as u64;
    let resume = start_frame.saturating_add(elapsed);
    (resume < end_frame).then(|| Event::segment(time, resume, end_frame))
}

impl ClipEvents {
    pub fn new(reader: AtomicValueReader<Vec<Event>>, sample_rate: u32) -> Self {
        Self {
            reader,
            sample_rate,
            detect_ongoing: true,
            resume: None,
        }
    }
}

impl NodeProcessor for ClipEvents {
    fn run(&mut self, ctx: &mut RunContext<'_>) {
        let time_base = ctx.time_base(self.sample_rate);
        let Some(mut out) = ctx.events_out(OUT_PORT) else {
            return;
        };
        let available = out.time_available();
        let requested = out.time_requested();
        if requested <= available {
            return;
        }
        let events = self.reader.get_read_ptr();

        if self.detect_ongoing {
            let ongoing: Vec<Event> = events
                .iter()
                .filter_map(|e| ongoing_at(e, available, &time_base))
                .collect();
            if ongoing.len() > out.free_events() {
                return;
            }
            for event in &ongoing {
                out.write(event);
            }
            self.detect_ongoing = false;
        }

        let mut skip = match self.resume.take() {
            Some((time, sent)) if time == available => sent,
            _ => 0,
        };
        let mut published = requested;
        // Start of the last event handled, and how many in a row share it.
        let mut run_start = None;
        let mut run_len = 0;
        for event in events
            .iter()
            .filter(|e| e.start >= available && e.start < requested)
        {
            if skip > 0 && event.start == available {
                skip -= 1;
            } else if !out.write(event) {
                // Everything before this event went out; the rest waits for room.
                published = event.start;
                let sent = if run_start == Some(event.start) { run_len } else { 0 };
                self.resume = Some((event.start, sent));
                break;
            }
            if run_start == Some(event.start) {
                run_len += 1;
            } else {
                run_start = Some(event.start);
                run_len = 1;
            }
        }
        out.publish(published);
        ctx.set_timestamp(published);
    }

    fn seek(&mut self, _time: f64) {
        self.detect_ongoing = true;
        self.resume = None;
    }
}

/// Descriptor for a clip's event source. The reader goes to the first node created;
/// creating a second one fails.
pub fn clip_events_descriptor(
    reader: AtomicValueReader<Vec<Event>>,
    sample_rate: u32,
) -> Result<Arc<NodeDescriptor>> {
    let reader = Mutex::new(Some(reader));
    NodeDescriptor::builder("clip_events", "Emits a clip's events")
        .port(PortDescriptor::events_out("events_out"))
        .build(move |_: &NodeCreateContext<'_>| {
            let reader = reader
                .lock()
                .take()
                .ok_or_else(|| Error::InvalidState("clip event reader already in use".to_string()))?;
            Ok(Box::new(ClipEvents::new(reader, sample_rate)) as Box<dyn NodeProcessor>)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn time_base() -> TimeBase {
        // 96000 frames per whole note.
        TimeBase::new(120.0, 48000)
    }

    #[test]
    fn test_ongoing_trimmed_to_window() {
        let event = Event::segment(0.0, 1000, 100_000);
        let trimmed = ongoing_at(&event, 0.5, &time_base()).unwrap();
        assert_eq!(trimmed, Event::segment(0.5, 49000, 100_000));
    }

    #[test]
    fn test_finished_segment_not_ongoing() {
        let event = Event::segment(0.0, 0, 1000);
        assert!(ongoing_at(&event, 0.5, &time_base()).is_none());
    }

    #[test]
    fn test_future_and_other_events_not_ongoing() {
        let tb = time_base();
        assert!(ongoing_at(&Event::segment(1.0, 0, 96000), 0.5, &tb).is_none());
        assert!(ongoing_at(&Event::note_on(0.0, 60, 1.0), 0.5, &tb).is_none());
    }

    #[test]
    fn test_descriptor_has_one_events_out() {
        let (_writer, reader) = cadence_core::atomic_value(Vec::<Event>::new());
        let descriptor = clip_events_descriptor(reader, 48000).unwrap();
        assert_eq!(descriptor.name(), "clip_events");
        assert_eq!(descriptor.ports().len(), 1);
    }
}
