//! Sine-voice synthesizer driven by note events.

use cadence_core::{
    midi_note_to_pitch, AudioPortDescriptor, ChannelLayout, EventKind, NodeCreateContext,
    NodeDescriptor, NodeProcessor, PortDescriptor, Result, RunContext, TimeBase, NOTES_COUNT,
};
use std::f32::consts::TAU;
use std::sync::Arc;

pub const EVENTS_PORT: usize = 0;
pub const OUT_PORT: usize = 1;

#[derive(Debug, Clone, Copy, Default)]
struct Voice {
    velocity: f32,
    phase: f32,
}

/// One sine voice per MIDI note. The output is the mean of the sounding voices.
pub struct Synth {
    voices: Box<[Voice; NOTES_COUNT]>,
    /// Bend applied to every voice, in octaves.
    pitch: f32,
}

impl Default for Synth {
    fn default() -> Self {
        Self::new()
    }
}

impl Synth {
    pub fn new() -> Self {
        Self {
            voices: Box::new([Voice::default(); NOTES_COUNT]),
            pitch: 0.0,
        }
    }

    pub fn active_voices(&self) -> usize {
        self.voices.iter().filter(|v| v.velocity > 0.0).count()
    }

    pub fn apply(&mut self, kind: &EventKind) {
        match *kind {
            EventKind::NoteOn { note, velocity } => {
                if let Some(voice) = self.voices.get_mut(note as usize) {
                    voice.velocity = velocity;
                    voice.phase = 0.0;
                }
            }
            EventKind::NoteOff { note } => {
                if let Some(voice) = self.voices.get_mut(note as usize) {
                    voice.velocity = 0.0;
                }
            }
            EventKind::Pitch { pitch } => self.pitch = pitch,
            EventKind::Segment { .. } => {}
        }
    }

    fn next_sample(&mut self, sample_rate: u32) -> f32 {
        let bend = 2f32.powf(self.pitch);
        let mut sum = 0.0;
        let mut active = 0;
        for (note, voice) in self.voices.iter_mut().enumerate() {
            if voice.velocity <= 0.0 {
                continue;
            }
            sum += voice.velocity * voice.phase.sin();
            let freq = midi_note_to_pitch(note as u8) * bend;
            voice.phase = (voice.phase + TAU * freq / sample_rate as f32) % TAU;
            active += 1;
        }
        if active == 0 {
            0.0
        } else {
            sum / active as f32
        }
    }
}

impl NodeProcessor for Synth {
    fn run(&mut self, ctx: &mut RunContext<'_>) {
        let start = ctx.timestamp();
        let bpm = ctx.bpm();
        let Some((events, mut out)) = ctx.events_and_audio_out(EVENTS_PORT, OUT_PORT) else {
            return;
        };
        let channels = out.channel_count();
        let rate = out.sample_rate();
        let time_base = TimeBase::new(bpm, rate);
        let free = out.free_frames();

        let frames = match events {
            Some(mut events) => {
                events.request(start + time_base.frames_to_whole_notes(free as f64));
                let available = time_base
                    .whole_notes_to_frames(events.time_available() - start)
                    .floor()
                    .max(0.0) as usize;
                let frames = free.min(available);
                let target = &mut out.samples_mut()[..frames * channels];
                for (i, frame) in target.chunks_exact_mut(channels).enumerate() {
                    let frame_end = start + time_base.frames_to_whole_notes((i + 1) as f64);
                    while let Some(event) = events.pop_before(frame_end) {
                        self.apply(&event.kind);
                    }
                    frame.fill(self.next_sample(rate));
                }
                frames
            }
            None => {
                let target = &mut out.samples_mut()[..free * channels];
                for frame in target.chunks_exact_mut(channels) {
                    frame.fill(self.next_sample(rate));
                }
                free
            }
        };
        out.advance(frames);
        ctx.set_timestamp(start + time_base.frames_to_whole_notes(frames as f64));
    }

    fn seek(&mut self, _time: f64) {
        self.voices.iter_mut().for_each(|v| *v = Voice::default());
        self.pitch = 0.0;
    }
}

/// Events in, mono audio out.
pub fn synth_descriptor(sample_rate: u32) -> Result<Arc<NodeDescriptor>> {
    NodeDescriptor::builder("synth", "Sine voices driven by note events")
        .port(PortDescriptor::events_in("events_in"))
        .port(PortDescriptor::audio_out(
            "audio_out",
            AudioPortDescriptor::flexible(ChannelLayout::mono(), sample_rate),
        ))
        .build(|_: &NodeCreateContext<'_>| Ok(Box::new(Synth::new()) as Box<dyn NodeProcessor>))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_silent_without_notes() {
        let mut synth = Synth::new();
        assert_eq!(synth.next_sample(48000), 0.0);
        assert_eq!(synth.active_voices(), 0);
    }

    #[test]
    fn test_note_on_off() {
        let mut synth = Synth::new();
        synth.apply(&EventKind::NoteOn { note: 69, velocity: 1.0 });
        assert_eq!(synth.active_voices(), 1);
        // Phase starts at zero.
        assert_eq!(synth.next_sample(48000), 0.0);
        let second = synth.next_sample(48000);
        assert_relative_eq!(second, (TAU * 440.0 / 48000.0).sin(), epsilon = 1e-5);

        synth.apply(&EventKind::NoteOff { note: 69 });
        assert_eq!(synth.active_voices(), 0);
        assert_eq!(synth.next_sample(48000), 0.0);
    }

    #[test]
    fn test_output_is_mean_of_voices() {
        let mut synth = Synth::new();
        synth.apply(&EventKind::NoteOn { note: 60, velocity: 1.0 });
        synth.apply(&EventKind::NoteOn { note: 72, velocity: 1.0 });
        for _ in 0..1000 {
            assert!(synth.next_sample(48000).abs() <= 1.0);
        }
    }

    #[test]
    fn test_pitch_bend_octave() {
        let mut synth = Synth::new();
        synth.apply(&EventKind::Pitch { pitch: 1.0 });
        synth.apply(&EventKind::NoteOn { note: 57, velocity: 1.0 });
        synth.next_sample(48000);
        // A3 bent up one octave sounds as A4.
        assert_relative_eq!(synth.next_sample(48000), (TAU * 440.0 / 48000.0).sin(), epsilon = 1e-4);
    }

    #[test]
    fn test_seek_silences() {
        let mut synth = Synth::new();
        synth.apply(&EventKind::NoteOn { note: 40, velocity: 0.5 });
        synth.seek(0.0);
        assert_eq!(synth.active_voices(), 0);
    }
}
