//! Sums any number of inputs into one output.

use cadence_core::{
    AudioPortDescriptor, ChannelLayout, Error, NodeCreateContext, NodeDescriptor, NodeProcessor,
    PortDescriptor, Result, RunContext,
};
use std::sync::Arc;

/// Additive mixer over `inputs` audio inputs followed by one audio output.
///
/// Each run writes `min(free, largest input fill)` frames. Every input adds what it
/// has up to that count and is advanced by the same amount; an input that has fewer
/// frames contributes silence for the rest.
pub struct Mixer {
    inputs: usize,
}

impl Mixer {
    pub fn new(inputs: usize) -> Self {
        Self { inputs }
    }

    #[inline]
    fn out_port(&self) -> usize {
        self.inputs
    }
}

impl NodeProcessor for Mixer {
    fn run(&mut self, ctx: &mut RunContext<'_>) {
        let out_port = self.out_port();
        let (free, channels) = match ctx.audio_out(out_port) {
            Some(out) => (out.free_frames(), out.channel_count()),
            None => return,
        };
        let fill = (0..self.inputs)
            .filter_map(|port| ctx.audio_in(port).map(|input| input.frames()))
            .max()
            .unwrap_or(0);
        let frames = free.min(fill);
        if frames == 0 {
            return;
        }
        let samples = frames * channels;

        if let Some(mut out) = ctx.audio_out(out_port) {
            out.samples_mut()[..samples].fill(0.0);
        }
        for port in 0..self.inputs {
            let Some((mut input, mut out)) = ctx.audio_pair(port, out_port) else {
                continue;
            };
            if input.channel_count() != channels {
                continue;
            }
            let taken = input.frames().min(frames);
            let source = &input.samples()[..taken * channels];
            for (acc, &sample) in out.samples_mut()[..source.len()].iter_mut().zip(source) {
                *acc += sample;
            }
            input.advance(taken);
        }
        if let Some(mut out) = ctx.audio_out(out_port) {
            out.advance(frames);
        }
    }
}

/// A mixer with `inputs` inputs. Whichever side connects first fixes the format for the
/// rest; unconnected, every port prefers `channel_layout` at `sample_rate`.
pub fn mixer_descriptor(
    inputs: usize,
    channel_layout: ChannelLayout,
    sample_rate: u32,
) -> Result<Arc<NodeDescriptor>> {
    if inputs == 0 {
        return Err(Error::InvalidParam("mixer needs at least one input".to_string()));
    }
    let audio = AudioPortDescriptor::flexible(channel_layout, sample_rate);
    let mut builder = NodeDescriptor::builder(format!("mixer-{}", inputs), "Sums its inputs");
    for port in 0..inputs {
        builder = builder.port(PortDescriptor::audio_in(
            format!("audio_in_{}", port),
            audio.clone().same_as(inputs),
        ));
    }
    builder
        .port(PortDescriptor::audio_out("audio_out", audio.same_as(0)))
        .build(move |_: &NodeCreateContext<'_>| {
            Ok(Box::new(Mixer::new(inputs)) as Box<dyn NodeProcessor>)
        })
}
