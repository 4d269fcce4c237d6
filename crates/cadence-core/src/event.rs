//! Timestamped events carried on events ports.

use crate::lockfree::AtomicDouble;

/// Number of MIDI notes.
pub const NOTES_COUNT: usize = 128;

/// What an event does.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EventKind {
    NoteOn { note: u8, velocity: f32 },
    NoteOff { note: u8 },
    /// Pitch bend in semitone-octaves (`1.0` = one octave up).
    Pitch { pitch: f32 },
    /// Play clip frames `[start_frame, end_frame)` starting at the event time.
    Segment { start_frame: u64, end_frame: u64 },
}

/// An event at a musical position, in whole notes.
#[derive(Debug, Clone, Copy, PartialEq)]
#[repr(C)]
pub struct Event {
    pub start: f64,
    pub kind: EventKind,
}

/// Size of one event record in an events ring.
pub const EVENT_SIZE: usize = std::mem::size_of::<Event>();

impl Event {
    pub fn new(start: f64, kind: EventKind) -> Self {
        Self { start, kind }
    }

    pub fn note_on(start: f64, note: u8, velocity: f32) -> Self {
        Self::new(start, EventKind::NoteOn { note, velocity })
    }

    pub fn note_off(start: f64, note: u8) -> Self {
        Self::new(start, EventKind::NoteOff { note })
    }

    pub fn segment(start: f64, start_frame: u64, end_frame: u64) -> Self {
        Self::new(
            start,
            EventKind::Segment {
                start_frame,
                end_frame,
            },
        )
    }

    /// Stores the record at the front of `bytes`, which need not be aligned.
    ///
    /// # Panics
    /// If `bytes` is shorter than [`EVENT_SIZE`].
    #[inline]
    pub(crate) fn write_to(&self, bytes: &mut [u8]) {
        assert!(bytes.len() >= EVENT_SIZE);
        // SAFETY: length checked above; Event is Copy with no drop glue.
        unsafe { std::ptr::write_unaligned(bytes.as_mut_ptr() as *mut Event, *self) }
    }

    /// Loads a record previously stored with [`Self::write_to`].
    #[inline]
    pub(crate) fn read_from(bytes: &[u8]) -> Self {
        assert!(bytes.len() >= EVENT_SIZE);
        // SAFETY: events rings only ever contain whole records written by write_to.
        unsafe { std::ptr::read_unaligned(bytes.as_ptr() as *const Event) }
    }
}

/// Frequency of a MIDI note, A4 = 440 Hz.
pub fn midi_note_to_pitch(note: u8) -> f32 {
    440.0 * 2f32.powf((note as f32 - 69.0) / 12.0)
}

/// Time window bookkeeping shared by the two ends of an events connection.
///
/// The consumer raises `time_requested`; the producer writes every event that starts
/// before the new mark and then raises `time_available` to match. Both only grow
/// between seeks.
#[derive(Debug, Default)]
pub struct EventFlow {
    time_requested: AtomicDouble,
    time_available: AtomicDouble,
}

impl EventFlow {
    pub fn new(time: f64) -> Self {
        Self {
            time_requested: AtomicDouble::new(time),
            time_available: AtomicDouble::new(time),
        }
    }

    #[inline]
    pub fn time_requested(&self) -> f64 {
        self.time_requested.get()
    }

    #[inline]
    pub fn time_available(&self) -> f64 {
        self.time_available.get()
    }

    /// True when the consumer wants events the producer has not covered yet.
    #[inline]
    pub fn wants_more(&self) -> bool {
        self.time_requested() > self.time_available()
    }

    pub(crate) fn request(&self, time: f64) -> bool {
        self.time_requested.raise_to(time)
    }

    pub(crate) fn publish(&self, time: f64) -> bool {
        self.time_available.raise_to(time)
    }

    pub(crate) fn reset(&self, time: f64) {
        self.time_requested.set(time);
        self.time_available.set(time);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unaligned_round_trip() {
        let mut bytes = vec![0u8; EVENT_SIZE + 3];
        let event = Event::segment(1.5, 10, 200);
        event.write_to(&mut bytes[3..]);
        assert_eq!(Event::read_from(&bytes[3..]), event);
    }

    #[test]
    fn test_flow_marks_only_grow() {
        let flow = EventFlow::new(0.0);
        assert!(!flow.wants_more());
        assert!(flow.request(1.0));
        assert!(flow.wants_more());
        assert!(!flow.request(0.5));
        assert!(flow.publish(1.0));
        assert!(!flow.wants_more());
        flow.reset(4.0);
        assert_eq!(flow.time_requested(), 4.0);
        assert_eq!(flow.time_available(), 4.0);
    }

    #[test]
    fn test_note_pitch() {
        assert_eq!(midi_note_to_pitch(69), 440.0);
        assert!((midi_note_to_pitch(81) - 880.0).abs() < 1e-3);
    }
}
