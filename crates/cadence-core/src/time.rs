//! Musical time. Positions are whole notes (four beats); audio runs in frames.

/// Conversion between whole notes and frames at a fixed tempo and sample rate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeBase {
    pub bpm: f64,
    pub sample_rate: u32,
}

impl TimeBase {
    pub fn new(bpm: f64, sample_rate: u32) -> Self {
        Self { bpm, sample_rate }
    }

    #[inline]
    pub fn frames_per_whole_note(&self) -> f64 {
        self.sample_rate as f64 * 60.0 * 4.0 / self.bpm
    }

    #[inline]
    pub fn whole_notes_to_frames(&self, whole_notes: f64) -> f64 {
        whole_notes * self.frames_per_whole_note()
    }

    /// Frame index of a position, rounded to the nearest frame.
    #[inline]
    pub fn frame_at(&self, whole_notes: f64) -> u64 {
        self.whole_notes_to_frames(whole_notes).max(0.0).round() as u64
    }

    #[inline]
    pub fn frames_to_whole_notes(&self, frames: f64) -> f64 {
        frames / self.frames_per_whole_note()
    }

    #[inline]
    pub fn whole_notes_to_seconds(&self, whole_notes: f64) -> f64 {
        whole_notes * 4.0 * 60.0 / self.bpm
    }

    #[inline]
    pub fn seconds_to_whole_notes(&self, seconds: f64) -> f64 {
        seconds * self.bpm / (4.0 * 60.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_conversions() {
        let tb = TimeBase::new(120.0, 48000);
        // 120 bpm: one beat = 0.5 s, one whole note = 2 s
        assert_relative_eq!(tb.frames_per_whole_note(), 96000.0);
        assert_eq!(tb.frame_at(0.5), 48000);
        assert_relative_eq!(tb.frames_to_whole_notes(24000.0), 0.25);
        assert_relative_eq!(tb.whole_notes_to_seconds(1.0), 2.0);
        assert_relative_eq!(tb.seconds_to_whole_notes(1.0), 0.5);
    }
}
