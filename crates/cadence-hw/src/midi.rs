//! MIDI input backends.
//!
//! Messages arrive on a backend thread, are parsed with midly and pushed into an SPSC
//! ring. The node side pops them from its worker thread.

use cadence_core::{
    Error, EventKind, HardwareEventSender, MidiBackend, MidiDevice, MidiInput, NodeWaker, Result,
};
use midly::live::LiveEvent;
use midly::MidiMessage;
use parking_lot::Mutex;
use ringbuf::{
    traits::{Consumer, Producer, Split},
    HeapCons, HeapProd, HeapRb,
};

/// Messages buffered per open input before new ones are dropped.
const INPUT_QUEUE: usize = 1024;

/// Pitch-bend range at full deflection, in octaves.
const PITCH_BEND_RANGE: f32 = 2.0 / 12.0;

/// Parses one raw MIDI message into an event kind. Channel is ignored; messages with no
/// event counterpart give `None`.
pub fn parse_midi_message(bytes: &[u8]) -> Option<EventKind> {
    let LiveEvent::Midi { message, .. } = LiveEvent::parse(bytes).ok()? else {
        return None;
    };
    match message {
        // Velocity 0 is note off.
        MidiMessage::NoteOn { key, vel } if vel.as_int() == 0 => Some(EventKind::NoteOff {
            note: key.as_int(),
        }),
        MidiMessage::NoteOn { key, vel } => Some(EventKind::NoteOn {
            note: key.as_int(),
            velocity: vel.as_int() as f32 / 127.0,
        }),
        MidiMessage::NoteOff { key, .. } => Some(EventKind::NoteOff {
            note: key.as_int(),
        }),
        MidiMessage::PitchBend { bend } => {
            let centered = bend.0.as_int() as f32 - 8192.0;
            Some(EventKind::Pitch {
                pitch: centered / 8192.0 * PITCH_BEND_RANGE,
            })
        }
        _ => None,
    }
}

/// Producer side of an open input, owned by whoever delivers messages.
struct InputFeed {
    producer: HeapProd<EventKind>,
    waker: NodeWaker,
}

impl InputFeed {
    fn push(&mut self, kind: EventKind) {
        if self.producer.try_push(kind).is_err() {
            tracing::trace!("MIDI input queue full, dropping message");
        }
        self.waker.wake();
    }
}

fn input_queue(waker: NodeWaker) -> (InputFeed, HeapCons<EventKind>) {
    let (producer, consumer) = HeapRb::<EventKind>::new(INPUT_QUEUE).split();
    (InputFeed { producer, waker }, consumer)
}

/// Backend with a single virtual device whose messages come from [`Self::send`].
pub struct DummyMidiBackend {
    device: MidiDevice,
    feeds: Mutex<Vec<InputFeed>>,
}

impl DummyMidiBackend {
    pub fn new() -> Self {
        Self {
            device: MidiDevice {
                id: "dummy-midi".to_string(),
                name: "Dummy MIDI Input".to_string(),
            },
            feeds: Mutex::new(Vec::new()),
        }
    }

    /// Delivers a raw message to every open input.
    pub fn send(&self, bytes: &[u8]) {
        let Some(kind) = parse_midi_message(bytes) else {
            return;
        };
        for feed in self.feeds.lock().iter_mut() {
            feed.push(kind);
        }
    }
}

impl Default for DummyMidiBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MidiBackend for DummyMidiBackend {
    fn name(&self) -> &str {
        "dummy"
    }

    fn init(&self, _events: HardwareEventSender) -> Result<()> {
        Ok(())
    }

    fn refresh(&self) -> Result<()> {
        Ok(())
    }

    fn devices(&self) -> Vec<MidiDevice> {
        vec![self.device.clone()]
    }

    fn open_input(&self, device: &MidiDevice, waker: NodeWaker) -> Result<Box<dyn MidiInput>> {
        if device.id != self.device.id {
            return Err(Error::DeviceNotFound(device.id.clone()));
        }
        let (feed, consumer) = input_queue(waker);
        self.feeds.lock().push(feed);
        Ok(Box::new(QueuedInput {
            device: device.clone(),
            consumer,
            _connection: None,
        }))
    }
}

/// An open input reading from an SPSC queue. Keeps the hardware connection, if any,
/// alive for as long as it exists.
struct QueuedInput {
    device: MidiDevice,
    consumer: HeapCons<EventKind>,
    _connection: Option<Box<dyn Send>>,
}

impl MidiInput for QueuedInput {
    fn device(&self) -> &MidiDevice {
        &self.device
    }

    fn pop(&mut self) -> Option<EventKind> {
        self.consumer.try_pop()
    }
}

#[cfg(feature = "midi-io")]
pub use hardware::MidirBackend;

#[cfg(feature = "midi-io")]
mod hardware {
    use super::*;
    use cadence_core::HardwareEvent;

    const CLIENT_NAME: &str = "cadence";

    fn midi_error(context: &str, e: impl std::fmt::Display) -> Error {
        Error::OpeningMidiHardware(format!("{}: {}", context, e))
    }

    /// Hardware MIDI input through midir (ALSA sequencer on Linux).
    pub struct MidirBackend {
        events: Mutex<Option<HardwareEventSender>>,
        devices: Mutex<Vec<MidiDevice>>,
    }

    impl MidirBackend {
        pub fn new() -> Self {
            Self {
                events: Mutex::new(None),
                devices: Mutex::new(Vec::new()),
            }
        }

        fn scan() -> Result<Vec<MidiDevice>> {
            let input = midir::MidiInput::new(CLIENT_NAME)
                .map_err(|e| midi_error("creating MIDI client", e))?;
            Ok(input
                .ports()
                .iter()
                .filter_map(|port| {
                    let name = input.port_name(port).ok()?;
                    Some(MidiDevice {
                        id: port.id(),
                        name,
                    })
                })
                .collect())
        }
    }

    impl Default for MidirBackend {
        fn default() -> Self {
            Self::new()
        }
    }

    impl MidiBackend for MidirBackend {
        fn name(&self) -> &str {
            "midir"
        }

        fn init(&self, events: HardwareEventSender) -> Result<()> {
            *self.events.lock() = Some(events);
            *self.devices.lock() = Self::scan()?;
            Ok(())
        }

        fn refresh(&self) -> Result<()> {
            let scanned = Self::scan()?;
            let mut devices = self.devices.lock();
            if *devices != scanned {
                tracing::debug!("MIDI devices changed: {} inputs", scanned.len());
                *devices = scanned;
                if let Some(events) = self.events.lock().as_ref() {
                    let _ = events.try_send(HardwareEvent::MidiDevicesChanged);
                }
            }
            Ok(())
        }

        fn devices(&self) -> Vec<MidiDevice> {
            self.devices.lock().clone()
        }

        fn open_input(&self, device: &MidiDevice, waker: NodeWaker) -> Result<Box<dyn MidiInput>> {
            let input = midir::MidiInput::new(CLIENT_NAME)
                .map_err(|e| midi_error("creating MIDI client", e))?;
            let port = input
                .find_port_by_id(device.id.clone())
                .ok_or_else(|| Error::DeviceNotFound(device.id.clone()))?;

            let (mut feed, consumer) = input_queue(waker);
            let connection = input
                .connect(
                    &port,
                    "cadence-in",
                    move |_stamp, bytes, _| {
                        if let Some(kind) = parse_midi_message(bytes) {
                            feed.push(kind);
                        }
                    },
                    (),
                )
                .map_err(|e| midi_error(&device.name, e))?;

            tracing::debug!("Opened MIDI input {}", device.name);
            Ok(Box::new(QueuedInput {
                device: device.clone(),
                consumer,
                _connection: Some(Box::new(connection)),
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_parse_note_on() {
        match parse_midi_message(&[0x90, 60, 127]) {
            Some(EventKind::NoteOn { note, velocity }) => {
                assert_eq!(note, 60);
                assert_relative_eq!(velocity, 1.0);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_zero_velocity_is_note_off() {
        assert_eq!(
            parse_midi_message(&[0x91, 64, 0]),
            Some(EventKind::NoteOff { note: 64 })
        );
        assert_eq!(
            parse_midi_message(&[0x80, 64, 20]),
            Some(EventKind::NoteOff { note: 64 })
        );
    }

    #[test]
    fn test_parse_pitch_bend() {
        match parse_midi_message(&[0xE0, 0x00, 0x40]) {
            Some(EventKind::Pitch { pitch }) => assert_relative_eq!(pitch, 0.0),
            other => panic!("unexpected {:?}", other),
        }
        match parse_midi_message(&[0xE0, 0x00, 0x00]) {
            Some(EventKind::Pitch { pitch }) => assert_relative_eq!(pitch, -PITCH_BEND_RANGE),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_ignores_others() {
        assert_eq!(parse_midi_message(&[0xB0, 7, 100]), None);
        assert_eq!(parse_midi_message(&[0xF8]), None);
        assert_eq!(parse_midi_message(&[]), None);
    }

    #[test]
    fn test_dummy_input_receives_sent_messages() {
        let backend = DummyMidiBackend::new();
        let device = backend.default_device().unwrap();
        let mut input = backend.open_input(&device, NodeWaker::noop()).unwrap();
        assert_eq!(input.pop(), None);

        backend.send(&[0x90, 69, 64]);
        backend.send(&[0x80, 69, 0]);
        assert!(matches!(input.pop(), Some(EventKind::NoteOn { note: 69, .. })));
        assert_eq!(input.pop(), Some(EventKind::NoteOff { note: 69 }));
        assert_eq!(input.pop(), None);
    }

    #[test]
    fn test_dummy_rejects_unknown_device() {
        let backend = DummyMidiBackend::new();
        let device = MidiDevice {
            id: "nope".to_string(),
            name: "nope".to_string(),
        };
        assert!(matches!(
            backend.open_input(&device, NodeWaker::noop()),
            Err(Error::DeviceNotFound(_))
        ));
    }
}
