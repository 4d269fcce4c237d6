//! Plays segments of an in-memory audio file in response to events.

use cadence_core::{
    AudioFile, AudioPortDescriptor, EventKind, NodeCreateContext, NodeDescriptor, NodeProcessor,
    PortDescriptor, Result, RunContext, TimeBase,
};
use std::sync::Arc;

pub const EVENTS_PORT: usize = 0;
pub const OUT_PORT: usize = 1;

/// Segments that can sound at once.
pub const MAX_VOICES: usize = 32;

#[derive(Debug, Clone, Copy, Default)]
struct Voice {
    active: bool,
    /// Next file frame to play.
    position: u64,
    end_frame: u64,
    /// Frames of the current window to skip before the voice starts.
    offset: usize,
    /// Allocation order, for eviction.
    serial: u64,
}

/// Clip player. Each segment event starts a voice playing file frames
/// `[start_frame, end_frame)` from the event's position on; voices mix additively.
pub struct AudioClip {
    file: Arc<AudioFile>,
    voices: [Voice; MAX_VOICES],
    next_voice: usize,
    serial: u64,
}

impl AudioClip {
    pub fn new(file: Arc<AudioFile>) -> Self {
        Self {
            file,
            voices: [Voice::default(); MAX_VOICES],
            next_voice: 0,
            serial: 0,
        }
    }

    pub fn active_voices(&self) -> usize {
        self.voices.iter().filter(|v| v.active).count()
    }

    /// Picks a free voice, looking round-robin from the last one handed out. With every
    /// voice busy the oldest is taken over.
    fn allocate(&mut self) -> &mut Voice {
        let free = (0..MAX_VOICES)
            .map(|i| (self.next_voice + i) % MAX_VOICES)
            .find(|&i| !self.voices[i].active);
        let index = match free {
            Some(index) => index,
            None => {
                let oldest = self
                    .voices
                    .iter()
                    .enumerate()
                    .min_by_key(|(_, v)| v.serial)
                    .map_or(0, |(i, _)| i);
                tracing::trace!("Clip voice {} evicted", oldest);
                oldest
            }
        };
        self.next_voice = (index + 1) % MAX_VOICES;
        self.serial += 1;
        let voice = &mut self.voices[index];
        voice.serial = self.serial;
        voice
    }

    fn start_segment(&mut self, offset: usize, start_frame: u64, end_frame: u64) {
        let end_frame = end_frame.min(self.file.frame_count());
        if start_frame >= end_frame {
            return;
        }
        let voice = self.allocate();
        voice.active = true;
        voice.position = start_frame;
        voice.end_frame = end_frame;
        voice.offset = offset;
    }

    /// Adds every active voice into the first `frames` frames of `target`.
    fn mix(&mut self, target: &mut [f32], channels: usize, frames: usize) {
        let file = &self.file;
        for voice in self.voices.iter_mut().filter(|v| v.active) {
            let offset = voice.offset.min(frames);
            let count = ((frames - offset) as u64).min(voice.end_frame - voice.position) as usize;
            for channel in 0..channels {
                let mut iter = file.iterator(channel, voice.position);
                let mut written = 0;
                while written < count {
                    let block = iter.advance();
                    if block.is_empty() {
                        break;
                    }
                    let take = block.len().min(count - written);
                    for (i, &sample) in block[..take].iter().enumerate() {
                        target[(offset + written + i) * channels + channel] += sample;
                    }
                    written += take;
                }
            }
            voice.offset = 0;
            voice.position += count as u64;
            if voice.position >= voice.end_frame {
                voice.active = false;
            }
        }
    }
}

impl NodeProcessor for AudioClip {
    fn run(&mut self, ctx: &mut RunContext<'_>) {
        let start = ctx.timestamp();
        let bpm = ctx.bpm();
        let Some((events, mut out)) = ctx.events_and_audio_out(EVENTS_PORT, OUT_PORT) else {
            return;
        };
        let channels = out.channel_count();
        let time_base = TimeBase::new(bpm, out.sample_rate());
        let free = out.free_frames();

        let frames = match events {
            Some(mut events) => {
                events.request(start + time_base.frames_to_whole_notes(free as f64));
                let available = time_base
                    .whole_notes_to_frames(events.time_available() - start)
                    .floor()
                    .max(0.0) as usize;
                let frames = free.min(available);
                let end = start + time_base.frames_to_whole_notes(frames as f64);
                while let Some(event) = events.pop_before(end) {
                    if let EventKind::Segment {
                        start_frame,
                        end_frame,
                    } = event.kind
                    {
                        let offset = time_base
                            .whole_notes_to_frames(event.start - start)
                            .round()
                            .max(0.0) as usize;
                        self.start_segment(offset.min(frames), start_frame, end_frame);
                    }
                }
                frames
            }
            None => free,
        };
        if frames == 0 {
            return;
        }

        let target = &mut out.samples_mut()[..frames * channels];
        target.fill(0.0);
        self.mix(target, channels, frames);
        out.advance(frames);
        ctx.set_timestamp(start + time_base.frames_to_whole_notes(frames as f64));
    }

    fn seek(&mut self, _time: f64) {
        self.voices = [Voice::default(); MAX_VOICES];
        self.next_voice = 0;
    }
}

/// A clip player for `file`. The output is fixed to the file's own format.
pub fn audio_clip_descriptor(file: Arc<AudioFile>) -> Result<Arc<NodeDescriptor>> {
    let audio = AudioPortDescriptor::fixed(file.channel_layout().clone(), file.sample_rate());
    NodeDescriptor::builder("audio_clip", "Plays segments of an audio file")
        .port(PortDescriptor::events_in("events_in"))
        .port(PortDescriptor::audio_out("audio_out", audio))
        .build(move |_: &NodeCreateContext<'_>| {
            Ok(Box::new(AudioClip::new(Arc::clone(&file))) as Box<dyn NodeProcessor>)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::ChannelLayout;

    fn ramp(frames: usize) -> Arc<AudioFile> {
        let samples: Vec<f32> = (0..frames).map(|i| i as f32).collect();
        Arc::new(AudioFile::from_channels(vec![samples], ChannelLayout::mono(), 48000).unwrap())
    }

    #[test]
    fn test_segment_plays_exact_range() {
        let mut clip = AudioClip::new(ramp(100));
        clip.start_segment(2, 10, 15);
        let mut out = vec![0.0; 10];
        clip.mix(&mut out, 1, 10);
        assert_eq!(out, [0.0, 0.0, 10.0, 11.0, 12.0, 13.0, 14.0, 0.0, 0.0, 0.0]);
        assert_eq!(clip.active_voices(), 0);
    }

    #[test]
    fn test_voice_spans_windows() {
        let mut clip = AudioClip::new(ramp(100));
        clip.start_segment(0, 0, 6);
        let mut first = vec![0.0; 4];
        clip.mix(&mut first, 1, 4);
        assert_eq!(clip.active_voices(), 1);
        let mut second = vec![0.0; 4];
        clip.mix(&mut second, 1, 4);
        assert_eq!(first, [0.0, 1.0, 2.0, 3.0]);
        assert_eq!(second, [4.0, 5.0, 0.0, 0.0]);
        assert_eq!(clip.active_voices(), 0);
    }

    #[test]
    fn test_overlapping_voices_add() {
        let mut clip = AudioClip::new(ramp(100));
        clip.start_segment(0, 1, 4);
        clip.start_segment(1, 1, 4);
        let mut out = vec![0.0; 5];
        clip.mix(&mut out, 1, 5);
        assert_eq!(out, [1.0, 3.0, 5.0, 3.0, 0.0]);
    }

    #[test]
    fn test_end_clamped_to_file() {
        let mut clip = AudioClip::new(ramp(8));
        clip.start_segment(0, 6, 1000);
        let mut out = vec![0.0; 4];
        clip.mix(&mut out, 1, 4);
        assert_eq!(out, [6.0, 7.0, 0.0, 0.0]);
        assert_eq!(clip.active_voices(), 0);
    }

    #[test]
    fn test_full_table_evicts_oldest() {
        let mut clip = AudioClip::new(ramp(100));
        for _ in 0..MAX_VOICES {
            clip.start_segment(0, 0, 50);
        }
        assert_eq!(clip.active_voices(), MAX_VOICES);
        let oldest_serial = clip.voices.iter().map(|v| v.serial).min().unwrap();
        clip.start_segment(0, 90, 100);
        assert_eq!(clip.active_voices(), MAX_VOICES);
        assert!(clip.voices.iter().all(|v| v.serial != oldest_serial));
        assert!(clip.voices.iter().any(|v| v.position == 90));
    }

    #[test]
    fn test_stereo_interleaving() {
        let file = AudioFile::from_channels(
            vec![vec![1.0; 4], vec![-1.0; 4]],
            ChannelLayout::stereo(),
            44100,
        )
        .unwrap();
        let mut clip = AudioClip::new(Arc::new(file));
        clip.start_segment(0, 0, 2);
        let mut out = vec![0.0; 6];
        clip.mix(&mut out, 2, 3);
        assert_eq!(out, [1.0, -1.0, 1.0, -1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_seek_clears_voices() {
        let mut clip = AudioClip::new(ramp(100));
        clip.start_segment(0, 0, 50);
        clip.seek(0.0);
        assert_eq!(clip.active_voices(), 0);
    }
}
