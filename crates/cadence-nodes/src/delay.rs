//! One-whole-note feedback delay.

use cadence_core::{
    AudioFormat, AudioPortDescriptor, ChannelLayout, FormatConstraint, NodeCreateContext,
    NodeDescriptor, NodeProcessor, PortDescriptor, Result, RunContext, TimeBase,
};
use std::sync::Arc;

pub const IN_PORT: usize = 0;
pub const OUT_PORT: usize = 1;

/// Upper bound on the delay line, in frames.
pub const MAX_DELAY_FRAMES: usize = 96000;

/// Level of the delayed signal mixed into the output, and kept per repeat.
const FEEDBACK: f32 = 0.5;

/// Mono feedback delay, one whole note long at the pipeline tempo.
///
/// `out = in + FEEDBACK * line[i]`, then `line[i] = line[i] * FEEDBACK + in`.
pub struct Delay {
    bpm: f64,
    line: Vec<f32>,
    index: usize,
}

impl Delay {
    pub fn new(bpm: f64) -> Self {
        Self {
            bpm,
            line: Vec::new(),
            index: 0,
        }
    }

    /// Delay length in frames for `sample_rate`.
    pub fn length_for(&self, sample_rate: u32) -> usize {
        let frames = TimeBase::new(self.bpm, sample_rate).frames_per_whole_note().round() as usize;
        frames.clamp(1, MAX_DELAY_FRAMES)
    }

    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        let delayed = self.line[self.index];
        self.line[self.index] = delayed * FEEDBACK + input;
        self.index = (self.index + 1) % self.line.len();
        input + delayed * FEEDBACK
    }
}

impl NodeProcessor for Delay {
    fn run(&mut self, ctx: &mut RunContext<'_>) {
        if self.line.is_empty() {
            return;
        }
        let Some((mut input, mut output)) = ctx.audio_pair(IN_PORT, OUT_PORT) else {
            return;
        };
        let frames = input.frames().min(output.free_frames());
        if frames == 0 {
            return;
        }
        {
            let source = &input.samples()[..frames];
            let target = &mut output.samples_mut()[..frames];
            for (dst, &src) in target.iter_mut().zip(source) {
                *dst = self.process(src);
            }
        }
        input.advance(frames);
        output.advance(frames);
    }

    fn seek(&mut self, _time: f64) {
        self.line.fill(0.0);
        self.index = 0;
    }

    fn port_connected(&mut self, _port: usize, format: Option<&AudioFormat>) -> Result<()> {
        if let Some(format) = format {
            let length = self.length_for(format.sample_rate);
            if self.line.len() != length {
                tracing::debug!("Delay line {} frames at {} Hz", length, format.sample_rate);
                self.line = vec![0.0; length];
                self.index = 0;
            }
        }
        Ok(())
    }
}

/// Mono in, mono out. The rate is whichever side connects first.
pub fn delay_descriptor(sample_rate: u32) -> Result<Arc<NodeDescriptor>> {
    NodeDescriptor::builder("delay", "One whole note feedback delay")
        .port(PortDescriptor::audio_in(
            "audio_in",
            AudioPortDescriptor {
                channel_layout: FormatConstraint::fixed(ChannelLayout::mono()),
                sample_rate: FormatConstraint::flexible(sample_rate),
            }
            .same_as(OUT_PORT),
        ))
        .port(PortDescriptor::audio_out(
            "audio_out",
            AudioPortDescriptor::fixed(ChannelLayout::mono(), sample_rate).same_as(IN_PORT),
        ))
        .build(|ctx: &NodeCreateContext<'_>| {
            Ok(Box::new(Delay::new(ctx.config.bpm)) as Box<dyn NodeProcessor>)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn delay_with_line(length: usize) -> Delay {
        let mut delay = Delay::new(120.0);
        delay.line = vec![0.0; length];
        delay
    }

    #[test]
    fn test_length_follows_tempo() {
        let delay = Delay::new(120.0);
        // 2 s per whole note at 120 bpm.
        assert_eq!(delay.length_for(24000), 48000);
        assert_eq!(delay.length_for(48000), MAX_DELAY_FRAMES);
        assert_eq!(Delay::new(240.0).length_for(48000), 48000);
    }

    #[test]
    fn test_impulse_repeats_and_decays() {
        let mut delay = delay_with_line(4);
        let out: Vec<f32> = std::iter::once(1.0)
            .chain(std::iter::repeat(0.0).take(12))
            .map(|x| delay.process(x))
            .collect();
        assert_relative_eq!(out[0], 1.0);
        assert_relative_eq!(out[4], 0.5);
        assert_relative_eq!(out[8], 0.25);
        assert_relative_eq!(out[12], 0.125);
        assert_eq!(out[1], 0.0);
    }

    #[test]
    fn test_seek_clears_line() {
        let mut delay = delay_with_line(2);
        delay.process(1.0);
        delay.seek(0.0);
        assert!(delay.line.iter().all(|&x| x == 0.0));
        assert_eq!(delay.process(0.0), 0.0);
        assert_eq!(delay.process(0.0), 0.0);
    }
}
