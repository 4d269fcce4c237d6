//! Sample-rate and channel-layout conversion node.
//!
//! Frames are remixed to the output layout first, then resampled with a band-limited
//! sinc filter (Blackman window, 800 Hz transition band below the lower Nyquist).
//! The filter is evaluated at the exact polyphase positions of the rational ratio
//! `out/gcd : in/gcd` whenever that ratio is fine enough to tabulate.

use crate::channel_matrix::ChannelMatrix;
use cadence_core::{
    AudioFormat, AudioPortDescriptor, Error, NodeCreateContext, NodeDescriptor, NodeProcessor,
    PortDescriptor, Result, RunContext,
};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use std::sync::Arc;

pub const IN_PORT: usize = 0;
pub const OUT_PORT: usize = 1;

/// Width of the band between passband edge and Nyquist, in Hz.
const TRANSITION_BAND: f64 = 800.0;

/// Input frames per filter step.
const CHUNK_FRAMES: usize = 256;

/// Largest upsampling factor tabulated exactly; finer ratios interpolate.
const MAX_EXACT_PHASES: usize = 1024;

fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// Filter parameters for converting `in_rate` to `out_rate`.
pub(crate) fn filter_parameters(in_rate: u32, out_rate: u32) -> SincInterpolationParameters {
    let divisor = gcd(in_rate, out_rate);
    let upsample = (out_rate / divisor) as usize;
    let lower = in_rate.min(out_rate) as f64;

    // Blackman: transition width ~ 5.5 / taps, relative to the sample rate.
    let taps = (5.5 * lower / TRANSITION_BAND).ceil() as usize;
    let sinc_len = taps.div_ceil(8) * 8;
    let f_cutoff = (1.0 - TRANSITION_BAND / lower) as f32;

    let (oversampling_factor, interpolation) = if upsample <= MAX_EXACT_PHASES {
        (upsample, SincInterpolationType::Nearest)
    } else {
        (256, SincInterpolationType::Linear)
    };

    SincInterpolationParameters {
        sinc_len,
        f_cutoff,
        interpolation,
        oversampling_factor,
        window: WindowFunction::Blackman,
    }
}

struct Filter {
    resampler: SincFixedIn<f32>,
    /// Planar input being collected, `CHUNK_FRAMES` per channel.
    input: Vec<Vec<f32>>,
    input_fill: usize,
    /// Planar output not yet written downstream.
    output: Vec<Vec<f32>>,
    output_start: usize,
    output_end: usize,
    /// Leading frames still to drop to cancel the filter delay.
    skip: usize,
}

impl Filter {
    fn new(in_rate: u32, out_rate: u32, channels: usize) -> Result<Self> {
        let resampler = SincFixedIn::<f32>::new(
            out_rate as f64 / in_rate as f64,
            1.0,
            filter_parameters(in_rate, out_rate),
            CHUNK_FRAMES,
            channels,
        )
        .map_err(|e| Error::InvalidParam(format!("resampler: {}", e)))?;
        let output = resampler.output_buffer_allocate(true);
        let skip = resampler.output_delay();
        Ok(Self {
            input: vec![vec![0.0; CHUNK_FRAMES]; channels],
            input_fill: 0,
            output,
            output_start: 0,
            output_end: 0,
            skip,
            resampler,
        })
    }

    fn reset(&mut self) {
        self.resampler.reset();
        self.input_fill = 0;
        self.output_start = 0;
        self.output_end = 0;
        self.skip = self.resampler.output_delay();
    }

    fn pending(&self) -> usize {
        self.output_end - self.output_start
    }

    fn process_chunk(&mut self) -> Result<()> {
        let (_, produced) = self
            .resampler
            .process_into_buffer(&self.input, &mut self.output, None)
            .map_err(|e| Error::InvalidState(format!("resampler: {}", e)))?;
        self.input_fill = 0;
        let dropped = self.skip.min(produced);
        self.skip -= dropped;
        self.output_start = dropped;
        self.output_end = produced;
        Ok(())
    }
}

/// Converts between two fixed formats.
pub struct Resample {
    matrix: ChannelMatrix,
    in_format: AudioFormat,
    out_format: AudioFormat,
    /// `None` when the rates match and only the matrix applies.
    filter: Option<Filter>,
    frame: Vec<f32>,
}

impl Resample {
    pub fn new(in_format: AudioFormat, out_format: AudioFormat) -> Result<Self> {
        let matrix = ChannelMatrix::new(&in_format.channel_layout, &out_format.channel_layout)?;
        let filter = if in_format.sample_rate == out_format.sample_rate {
            None
        } else {
            Some(Filter::new(
                in_format.sample_rate,
                out_format.sample_rate,
                out_format.channel_count(),
            )?)
        };
        tracing::debug!(
            "Resample {} Hz {} -> {} Hz {}",
            in_format.sample_rate,
            in_format.channel_layout,
            out_format.sample_rate,
            out_format.channel_layout
        );
        Ok(Self {
            frame: vec![0.0; out_format.channel_count()],
            matrix,
            in_format,
            out_format,
            filter,
        })
    }

    pub fn in_format(&self) -> &AudioFormat {
        &self.in_format
    }

    pub fn out_format(&self) -> &AudioFormat {
        &self.out_format
    }

    fn run_matrix_only(&mut self, ctx: &mut RunContext<'_>) {
        let Some((mut input, mut output)) = ctx.audio_pair(IN_PORT, OUT_PORT) else {
            return;
        };
        let in_channels = input.channel_count();
        let out_channels = output.channel_count();
        let frames = input.frames().min(output.free_frames());
        if frames == 0 {
            return;
        }
        {
            let source = &input.samples()[..frames * in_channels];
            let target = &mut output.samples_mut()[..frames * out_channels];
            for (src, dst) in source
                .chunks_exact(in_channels)
                .zip(target.chunks_exact_mut(out_channels))
            {
                self.matrix.apply(src, dst);
            }
        }
        input.advance(frames);
        output.advance(frames);
    }

    fn run_filter(&mut self, ctx: &mut RunContext<'_>) {
        let Some(filter) = self.filter.as_mut() else {
            return;
        };
        let Some((mut input, mut output)) = ctx.audio_pair(IN_PORT, OUT_PORT) else {
            return;
        };
        let in_channels = input.channel_count();
        let out_channels = output.channel_count();

        loop {
            // Hand over what is already converted.
            let frames = filter.pending().min(output.free_frames());
            if frames > 0 {
                let target = &mut output.samples_mut()[..frames * out_channels];
                for (i, dst) in target.chunks_exact_mut(out_channels).enumerate() {
                    for (c, sample) in dst.iter_mut().enumerate() {
                        *sample = filter.output[c][filter.output_start + i];
                    }
                }
                filter.output_start += frames;
                output.advance(frames);
            }
            if filter.pending() > 0 {
                return;
            }

            // Collect the next chunk.
            let wanted = CHUNK_FRAMES - filter.input_fill;
            let frames = input.frames().min(wanted);
            if frames > 0 {
                let source = &input.samples()[..frames * in_channels];
                for src in source.chunks_exact(in_channels) {
                    self.matrix.apply(src, &mut self.frame);
                    for (c, &sample) in self.frame.iter().enumerate() {
                        filter.input[c][filter.input_fill] = sample;
                    }
                    filter.input_fill += 1;
                }
                input.advance(frames);
            }
            if filter.input_fill < CHUNK_FRAMES {
                return;
            }

            if let Err(e) = filter.process_chunk() {
                tracing::error!("{}", e);
                return;
            }
        }
    }
}

impl NodeProcessor for Resample {
    fn run(&mut self, ctx: &mut RunContext<'_>) {
        if self.filter.is_some() {
            self.run_filter(ctx);
        } else {
            self.run_matrix_only(ctx);
        }
    }

    fn seek(&mut self, _time: f64) {
        if let Some(filter) = self.filter.as_mut() {
            filter.reset();
        }
    }
}

/// A node converting `in_format` to `out_format`. Both ports are fixed.
pub fn resample_descriptor(in_format: AudioFormat, out_format: AudioFormat) -> Result<Arc<NodeDescriptor>> {
    // Fail here rather than at node creation.
    ChannelMatrix::new(&in_format.channel_layout, &out_format.channel_layout)?;

    let name = format!(
        "resample-{}-{}",
        in_format.sample_rate, out_format.sample_rate
    );
    NodeDescriptor::builder(name, "Converts sample rate and channel layout")
        .port(PortDescriptor::audio_in(
            "audio_in",
            AudioPortDescriptor::fixed(in_format.channel_layout.clone(), in_format.sample_rate),
        ))
        .port(PortDescriptor::audio_out(
            "audio_out",
            AudioPortDescriptor::fixed(out_format.channel_layout.clone(), out_format.sample_rate),
        ))
        .build(move |_: &NodeCreateContext<'_>| {
            Ok(Box::new(Resample::new(in_format.clone(), out_format.clone())?) as Box<dyn NodeProcessor>)
        })
}
