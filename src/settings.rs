//! Preferences the audio graph reads when it builds its output nodes.

use cadence_core::{ChannelLayout, Error, Result};
use cadence_nodes::SampleFormat;
use serde::{Deserialize, Serialize};

/// How a render is encoded.
///
/// `bit_rate` only applies to lossy codecs; WAV output ignores it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportFormat {
    pub sample_rate: u32,
    pub channel_layout: ChannelLayout,
    pub sample_format: SampleFormat,
    pub bit_rate: u32,
}

impl Default for ExportFormat {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channel_layout: ChannelLayout::stereo(),
            sample_format: SampleFormat::Int24,
            bit_rate: 320_000,
        }
    }
}

impl ExportFormat {
    pub fn validate(&self) -> Result<()> {
        if !(8000..=384000).contains(&self.sample_rate) {
            return Err(Error::InvalidConfig(format!(
                "export sample_rate {} out of range (8000-384000 Hz)",
                self.sample_rate
            )));
        }
        if self.channel_layout.channel_count() == 0 {
            return Err(Error::InvalidConfig(
                "export channel layout has no channels".to_string(),
            ));
        }
        Ok(())
    }
}

/// Graph-level preferences.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphSettings {
    /// Device id to play through; `None` or an unavailable id means the default device.
    pub playback_device: Option<String>,
    pub export: ExportFormat,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_export_is_valid() {
        let export = ExportFormat::default();
        assert!(export.validate().is_ok());
        assert_eq!(export.sample_format.bits(), 24);
    }

    #[test]
    fn test_invalid_export_rate() {
        let export = ExportFormat {
            sample_rate: 1000,
            ..Default::default()
        };
        assert!(matches!(export.validate(), Err(Error::InvalidConfig(_))));
    }
}
