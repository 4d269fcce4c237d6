//! Decoded audio held in memory, read channel by channel in blocks.

use crate::channel_layout::ChannelLayout;
use crate::{Error, Result};
use std::path::Path;

/// Frames handed out per iterator step.
const BLOCK_FRAMES: usize = 4096;

/// Planar f32 audio with a known layout and rate.
#[derive(Debug, Clone)]
pub struct AudioFile {
    channels: Vec<Vec<f32>>,
    channel_layout: ChannelLayout,
    sample_rate: u32,
}

impl AudioFile {
    /// Builds a file from planar channel data. All channels must be the same length.
    pub fn from_channels(
        channels: Vec<Vec<f32>>,
        channel_layout: ChannelLayout,
        sample_rate: u32,
    ) -> Result<Self> {
        if channels.len() != channel_layout.channel_count() {
            return Err(Error::InvalidParam(format!(
                "{} channels of data for a {}-channel layout",
                channels.len(),
                channel_layout.channel_count()
            )));
        }
        if sample_rate == 0 {
            return Err(Error::InvalidParam("sample rate is zero".to_string()));
        }
        let frames = channels.first().map_or(0, Vec::len);
        if channels.iter().any(|c| c.len() != frames) {
            return Err(Error::InvalidParam(
                "channels differ in length".to_string(),
            ));
        }
        Ok(Self {
            channels,
            channel_layout,
            sample_rate,
        })
    }

    /// Decodes a WAV file.
    pub fn load_wav(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut reader = hound::WavReader::open(path)?;
        let spec = reader.spec();
        let channel_count = spec.channels as usize;
        let channel_layout = ChannelLayout::default_for_count(channel_count)?;

        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<core::result::Result<_, _>>()?,
            hound::SampleFormat::Int => {
                let scale = 1.0 / (1u64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 * scale))
                    .collect::<core::result::Result<_, _>>()?
            }
        };

        let frames = interleaved.len() / channel_count;
        let mut channels = vec![Vec::with_capacity(frames); channel_count];
        for frame in interleaved.chunks_exact(channel_count) {
            for (channel, &sample) in channels.iter_mut().zip(frame) {
                channel.push(sample);
            }
        }

        tracing::debug!(
            "Loaded {}: {} frames, {} Hz, {}",
            path.display(),
            frames,
            spec.sample_rate,
            channel_layout
        );

        Self::from_channels(channels, channel_layout, spec.sample_rate)
    }

    #[inline]
    pub fn frame_count(&self) -> u64 {
        self.channels.first().map_or(0, Vec::len) as u64
    }

    pub fn channel_layout(&self) -> &ChannelLayout {
        &self.channel_layout
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel(&self, index: usize) -> &[f32] {
        &self.channels[index]
    }

    /// Block iterator over `channel` starting at `start_frame`.
    pub fn iterator(&self, channel: usize, start_frame: u64) -> AudioFileIterator<'_> {
        AudioFileIterator {
            samples: &self.channels[channel],
            position: (start_frame as usize).min(self.channels[channel].len()),
        }
    }
}

/// Walks one channel block by block.
pub struct AudioFileIterator<'a> {
    samples: &'a [f32],
    position: usize,
}

impl<'a> AudioFileIterator<'a> {
    /// The next block of samples; empty once the channel is exhausted.
    pub fn advance(&mut self) -> &'a [f32] {
        let end = (self.position + BLOCK_FRAMES).min(self.samples.len());
        let block = &self.samples[self.position..end];
        self.position = end;
        block
    }

    /// Frame index of the next block.
    pub fn position(&self) -> u64 {
        self.position as u64
    }
}
