//! Remixing between channel layouts.

use cadence_core::{ChannelId, ChannelLayout, Error, Result};
use std::f32::consts::FRAC_1_SQRT_2;

use ChannelId::*;

/// `out[o] = sum(coefficients[o][i] * in[i])`, one row per output channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelMatrix {
    in_channels: usize,
    out_channels: usize,
    coefficients: Vec<f32>,
    identity: bool,
}

/// Where an input channel with no counterpart in the output layout goes.
fn fold(id: ChannelId, input: &ChannelLayout, output: &ChannelLayout) -> Option<Vec<(usize, f32)>> {
    let has = |c| output.find_channel(c);
    let pair = |left, right, gain| match (has(left), has(right)) {
        (Some(l), Some(r)) => Some(vec![(l, gain), (r, gain)]),
        _ => None,
    };
    let one = |c, gain| has(c).map(|i| vec![(i, gain)]);
    let input_has_sides = input.find_channel(SideLeft).is_some() || input.find_channel(SideRight).is_some();
    let input_has_backs = input.find_channel(BackLeft).is_some() || input.find_channel(BackRight).is_some();

    match id {
        FrontCenter => pair(FrontLeft, FrontRight, FRAC_1_SQRT_2),
        FrontLeft => one(FrontCenter, FRAC_1_SQRT_2),
        FrontRight => one(FrontCenter, FRAC_1_SQRT_2),
        BackLeft | BackRight => {
            let (side, front) = if id == BackLeft {
                (SideLeft, FrontLeft)
            } else {
                (SideRight, FrontRight)
            };
            let side_gain = if input_has_sides { FRAC_1_SQRT_2 } else { 1.0 };
            one(BackCenter, FRAC_1_SQRT_2)
                .or_else(|| one(side, side_gain))
                .or_else(|| one(front, FRAC_1_SQRT_2))
                .or_else(|| one(FrontCenter, FRAC_1_SQRT_2))
        }
        SideLeft | SideRight => {
            let (back, front) = if id == SideLeft {
                (BackLeft, FrontLeft)
            } else {
                (BackRight, FrontRight)
            };
            let back_gain = if input_has_backs { FRAC_1_SQRT_2 } else { 1.0 };
            one(back, back_gain)
                .or_else(|| one(BackCenter, FRAC_1_SQRT_2))
                .or_else(|| one(front, 1.0))
                .or_else(|| one(FrontCenter, 1.0))
        }
        FrontLeftOfCenter => one(FrontLeft, 1.0).or_else(|| one(FrontCenter, FRAC_1_SQRT_2)),
        FrontRightOfCenter => one(FrontRight, 1.0).or_else(|| one(FrontCenter, FRAC_1_SQRT_2)),
        LowFrequency => one(FrontCenter, 1.0).or_else(|| pair(FrontLeft, FrontRight, FRAC_1_SQRT_2)),
        _ => None,
    }
}

impl ChannelMatrix {
    /// Builds the mix from `input` to `output`.
    ///
    /// Channels present on both sides pass straight through. Others fold onto nearby
    /// speakers; a channel with nowhere to go is an error. Each output row is scaled
    /// to unit gain.
    pub fn new(input: &ChannelLayout, output: &ChannelLayout) -> Result<Self> {
        let in_channels = input.channel_count();
        let out_channels = output.channel_count();
        let mut coefficients = vec![0.0f32; in_channels * out_channels];

        for (i, &id) in input.channels().iter().enumerate() {
            let targets = match output.find_channel(id) {
                Some(o) => vec![(o, 1.0)],
                None => fold(id, input, output).ok_or(Error::IncompatibleChannelLayouts)?,
            };
            for (o, gain) in targets {
                coefficients[o * in_channels + i] += gain;
            }
        }

        for row in coefficients.chunks_mut(in_channels) {
            let sum: f32 = row.iter().sum();
            if sum > 0.0 {
                row.iter_mut().for_each(|c| *c /= sum);
            }
        }

        Ok(Self {
            in_channels,
            out_channels,
            identity: input == output,
            coefficients,
        })
    }

    pub fn in_channels(&self) -> usize {
        self.in_channels
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    pub fn is_identity(&self) -> bool {
        self.identity
    }

    #[inline]
    pub fn coefficient(&self, out_channel: usize, in_channel: usize) -> f32 {
        self.coefficients[out_channel * self.in_channels + in_channel]
    }

    /// Mixes one interleaved frame.
    #[inline]
    pub fn apply(&self, input: &[f32], output: &mut [f32]) {
        if self.identity {
            output.copy_from_slice(input);
            return;
        }
        for (out, row) in output
            .iter_mut()
            .zip(self.coefficients.chunks(self.in_channels))
        {
            *out = row.iter().zip(input).map(|(c, s)| c * s).sum();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_identity() {
        let matrix = ChannelMatrix::new(&ChannelLayout::stereo(), &ChannelLayout::stereo()).unwrap();
        assert!(matrix.is_identity());
        let mut out = [0.0; 2];
        matrix.apply(&[0.25, -0.5], &mut out);
        assert_eq!(out, [0.25, -0.5]);
    }

    #[test]
    fn test_mono_to_stereo() {
        let matrix = ChannelMatrix::new(&ChannelLayout::mono(), &ChannelLayout::stereo()).unwrap();
        let mut out = [0.0; 2];
        matrix.apply(&[0.8], &mut out);
        assert_relative_eq!(out[0], 0.8);
        assert_relative_eq!(out[1], 0.8);
    }

    #[test]
    fn test_stereo_to_mono_averages() {
        let matrix = ChannelMatrix::new(&ChannelLayout::stereo(), &ChannelLayout::mono()).unwrap();
        let mut out = [0.0; 1];
        matrix.apply(&[1.0, 0.0], &mut out);
        assert_relative_eq!(out[0], 0.5);
    }

    #[test]
    fn test_5_1_to_stereo() {
        let matrix =
            ChannelMatrix::new(&ChannelLayout::surround_5_1(), &ChannelLayout::stereo()).unwrap();
        // FL, FR, FC, SL, SR, LFE
        for row in 0..2 {
            let sum: f32 = (0..6).map(|i| matrix.coefficient(row, i)).sum();
            assert_relative_eq!(sum, 1.0, epsilon = 1e-6);
        }
        // Side left lands on front left only.
        assert!(matrix.coefficient(0, 3) > 0.0);
        assert_eq!(matrix.coefficient(1, 3), 0.0);
        // Center and LFE reach both sides.
        assert!(matrix.coefficient(0, 2) > 0.0 && matrix.coefficient(1, 2) > 0.0);
        assert!(matrix.coefficient(0, 5) > 0.0 && matrix.coefficient(1, 5) > 0.0);
    }

    #[test]
    fn test_back_to_side_gain() {
        let quad_side = ChannelLayout::from_channels(&[FrontLeft, FrontRight, SideLeft, SideRight]).unwrap();
        let matrix = ChannelMatrix::new(&ChannelLayout::quad(), &quad_side).unwrap();
        // BackLeft (input 2) goes to SideLeft (output 2) at full weight.
        assert_relative_eq!(matrix.coefficient(2, 2), 1.0);
        assert_relative_eq!(matrix.coefficient(0, 0), 1.0);
    }

    #[test]
    fn test_unmappable_channel() {
        let top = ChannelLayout::from_channels(&[TopCenter]).unwrap();
        assert!(matches!(
            ChannelMatrix::new(&top, &ChannelLayout::stereo()),
            Err(Error::IncompatibleChannelLayouts)
        ));
    }
}
