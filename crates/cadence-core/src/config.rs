//! Pipeline configuration.

use crate::channel_layout::ChannelLayout;
use crate::time::TimeBase;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Configuration for a [`Pipeline`](crate::Pipeline).
///
/// `sample_rate` and `channel_layout` are the targets offered to nodes that adapt to
/// their surroundings (device nodes, the mixer, the delay). `latency` is how much
/// audio, in seconds, every audio connection buffers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub sample_rate: u32,
    pub channel_layout: ChannelLayout,
    pub latency: f64,
    pub bpm: f64,
    /// Worker threads; `None` uses one per CPU.
    pub worker_count: Option<usize>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channel_layout: ChannelLayout::stereo(),
            latency: 0.02,
            bpm: 120.0,
            worker_count: None,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if !(8000..=384000).contains(&self.sample_rate) {
            return Err(Error::InvalidConfig(format!(
                "sample_rate {} out of range (8000-384000 Hz)",
                self.sample_rate
            )));
        }
        if !(0.001..=2.0).contains(&self.latency) {
            return Err(Error::InvalidConfig(format!(
                "latency {} out of range (0.001-2.0 s)",
                self.latency
            )));
        }
        if !(20.0..=999.0).contains(&self.bpm) {
            return Err(Error::InvalidConfig(format!(
                "bpm {} out of range (20-999)",
                self.bpm
            )));
        }
        if self.worker_count == Some(0) {
            return Err(Error::InvalidConfig("worker_count must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn time_base(&self) -> TimeBase {
        TimeBase::new(self.bpm, self.sample_rate)
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count.unwrap_or_else(num_cpus::get).max(1)
    }
}
