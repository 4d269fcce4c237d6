//! Speaker positions and the layouts built from them.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Upper bound on channels in one layout.
pub const MAX_CHANNELS: usize = 32;

/// A speaker position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelId {
    FrontLeft,
    FrontRight,
    FrontCenter,
    LowFrequency,
    BackLeft,
    BackRight,
    FrontLeftOfCenter,
    FrontRightOfCenter,
    BackCenter,
    SideLeft,
    SideRight,
    TopCenter,
    TopFrontLeft,
    TopFrontCenter,
    TopFrontRight,
    TopBackLeft,
    TopBackCenter,
    TopBackRight,
    StereoLeft,
    StereoRight,
    WideLeft,
    WideRight,
    SurroundDirectLeft,
    SurroundDirectRight,
    LowFrequency2,
}

impl ChannelId {
    pub fn name(self) -> &'static str {
        match self {
            ChannelId::FrontLeft => "Front Left",
            ChannelId::FrontRight => "Front Right",
            ChannelId::FrontCenter => "Front Center",
            ChannelId::LowFrequency => "Low Frequency",
            ChannelId::BackLeft => "Back Left",
            ChannelId::BackRight => "Back Right",
            ChannelId::FrontLeftOfCenter => "Front Left of Center",
            ChannelId::FrontRightOfCenter => "Front Right of Center",
            ChannelId::BackCenter => "Back Center",
            ChannelId::SideLeft => "Side Left",
            ChannelId::SideRight => "Side Right",
            ChannelId::TopCenter => "Top Center",
            ChannelId::TopFrontLeft => "Top Front Left",
            ChannelId::TopFrontCenter => "Top Front Center",
            ChannelId::TopFrontRight => "Top Front Right",
            ChannelId::TopBackLeft => "Top Back Left",
            ChannelId::TopBackCenter => "Top Back Center",
            ChannelId::TopBackRight => "Top Back Right",
            ChannelId::StereoLeft => "Stereo Left",
            ChannelId::StereoRight => "Stereo Right",
            ChannelId::WideLeft => "Wide Left",
            ChannelId::WideRight => "Wide Right",
            ChannelId::SurroundDirectLeft => "Surround Direct Left",
            ChannelId::SurroundDirectRight => "Surround Direct Right",
            ChannelId::LowFrequency2 => "Low Frequency 2",
        }
    }
}

/// Ordered set of channels. Interleaved frames carry one sample per entry, in order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelLayout {
    channels: SmallVec<[ChannelId; 8]>,
}

use ChannelId::*;

impl ChannelLayout {
    pub fn from_channels(channels: &[ChannelId]) -> Result<Self> {
        if channels.is_empty() {
            return Err(Error::InvalidParam("channel layout is empty".to_string()));
        }
        if channels.len() > MAX_CHANNELS {
            return Err(Error::MaxChannelsExceeded);
        }
        Ok(Self {
            channels: SmallVec::from_slice(channels),
        })
    }

    fn builtin(channels: &[ChannelId]) -> Self {
        Self {
            channels: SmallVec::from_slice(channels),
        }
    }

    pub fn mono() -> Self {
        Self::builtin(&[FrontCenter])
    }

    pub fn stereo() -> Self {
        Self::builtin(&[FrontLeft, FrontRight])
    }

    pub fn surround_2_1() -> Self {
        Self::builtin(&[FrontLeft, FrontRight, LowFrequency])
    }

    pub fn quad() -> Self {
        Self::builtin(&[FrontLeft, FrontRight, BackLeft, BackRight])
    }

    pub fn surround_5_1() -> Self {
        Self::builtin(&[FrontLeft, FrontRight, FrontCenter, SideLeft, SideRight, LowFrequency])
    }

    pub fn surround_5_1_back() -> Self {
        Self::builtin(&[FrontLeft, FrontRight, FrontCenter, BackLeft, BackRight, LowFrequency])
    }

    pub fn surround_7_1() -> Self {
        Self::builtin(&[
            FrontLeft,
            FrontRight,
            FrontCenter,
            SideLeft,
            SideRight,
            BackLeft,
            BackRight,
            LowFrequency,
        ])
    }

    /// Common layouts by conventional name.
    pub fn builtins() -> Vec<(&'static str, ChannelLayout)> {
        vec![
            ("Mono", Self::mono()),
            ("Stereo", Self::stereo()),
            ("2.1", Self::surround_2_1()),
            ("3.0", Self::builtin(&[FrontLeft, FrontRight, FrontCenter])),
            ("3.0 (back)", Self::builtin(&[FrontLeft, FrontRight, BackCenter])),
            ("Quad", Self::quad()),
            ("Quad (side)", Self::builtin(&[FrontLeft, FrontRight, SideLeft, SideRight])),
            ("5.0", Self::builtin(&[FrontLeft, FrontRight, FrontCenter, SideLeft, SideRight])),
            ("5.1", Self::surround_5_1()),
            ("5.1 (back)", Self::surround_5_1_back()),
            ("7.1", Self::surround_7_1()),
        ]
    }

    /// The usual layout for a bare channel count, as hardware reports it.
    pub fn default_for_count(count: usize) -> Result<Self> {
        match count {
            1 => Ok(Self::mono()),
            2 => Ok(Self::stereo()),
            3 => Ok(Self::surround_2_1()),
            4 => Ok(Self::quad()),
            6 => Ok(Self::surround_5_1()),
            8 => Ok(Self::surround_7_1()),
            0 => Err(Error::InvalidParam("zero channels".to_string())),
            n if n > MAX_CHANNELS => Err(Error::MaxChannelsExceeded),
            n => Err(Error::InvalidParam(format!("no default layout for {} channels", n))),
        }
    }

    #[inline]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn channels(&self) -> &[ChannelId] {
        &self.channels
    }

    pub fn find_channel(&self, id: ChannelId) -> Option<usize> {
        self.channels.iter().position(|&c| c == id)
    }

    /// Bytes in one interleaved f32 frame.
    #[inline]
    pub fn bytes_per_frame(&self) -> usize {
        self.channels.len() * std::mem::size_of::<f32>()
    }

    pub fn name(&self) -> Option<&'static str> {
        Self::builtins()
            .into_iter()
            .find(|(_, layout)| layout == self)
            .map(|(name, _)| name)
    }
}

impl std::fmt::Display for ChannelLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{}", name),
            None => write!(f, "{} channels", self.channel_count()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_for_count() {
        assert_eq!(ChannelLayout::default_for_count(1).unwrap(), ChannelLayout::mono());
        assert_eq!(ChannelLayout::default_for_count(2).unwrap(), ChannelLayout::stereo());
        assert!(matches!(
            ChannelLayout::default_for_count(40),
            Err(Error::MaxChannelsExceeded)
        ));
    }

    #[test]
    fn test_find_channel() {
        let layout = ChannelLayout::surround_5_1();
        assert_eq!(layout.find_channel(FrontCenter), Some(2));
        assert_eq!(layout.find_channel(BackCenter), None);
        assert_eq!(layout.bytes_per_frame(), 24);
    }

    #[test]
    fn test_display() {
        assert_eq!(ChannelLayout::stereo().to_string(), "Stereo");
        let odd = ChannelLayout::from_channels(&[TopCenter, WideLeft]).unwrap();
        assert_eq!(odd.to_string(), "2 channels");
    }
}
