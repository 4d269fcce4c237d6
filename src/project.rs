//! Musical content the audio graph plays: clips of decoded audio and their segments.
//!
//! A graph subscribes to every clip it realizes and receives the clip's event list
//! through an [`AtomicValueReader`]. Editing segments republishes that list to every
//! subscriber without touching the graph; adding or removing a clip bumps
//! [`Project::topology_version`] so graphs know to rebuild.

use crate::{Error, Result};
use cadence_core::{atomic_value, AtomicValueReader, AtomicValueWriter, AudioFile, Event, TimeBase};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Identifies a clip within its project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClipId(u64);

impl fmt::Display for ClipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "clip-{}", self.0)
    }
}

/// A placed range of a clip's audio.
///
/// `position` is where the range starts sounding, in whole notes; the frame range
/// is in the clip file's own sample rate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClipSegment {
    pub position: f64,
    pub start_frame: u64,
    pub end_frame: u64,
}

impl ClipSegment {
    pub fn new(position: f64, start_frame: u64, end_frame: u64) -> Self {
        Self {
            position,
            start_frame,
            end_frame,
        }
    }

    pub fn frame_count(&self) -> u64 {
        self.end_frame.saturating_sub(self.start_frame)
    }

    fn event(&self) -> Event {
        Event::segment(self.position, self.start_frame, self.end_frame)
    }
}

/// An audio file and the segments that play it.
pub struct AudioClip {
    id: ClipId,
    name: String,
    file: Arc<AudioFile>,
    segments: Vec<ClipSegment>,
    subscribers: Vec<(u64, AtomicValueWriter<Vec<Event>>)>,
}

impl AudioClip {
    pub fn id(&self) -> ClipId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn file(&self) -> &Arc<AudioFile> {
        &self.file
    }

    pub fn segments(&self) -> &[ClipSegment] {
        &self.segments
    }

    /// Adds a segment; the end is clamped to the file.
    pub fn add_segment(&mut self, segment: ClipSegment) -> Result<()> {
        if segment.start_frame >= segment.end_frame || !segment.position.is_finite() {
            return Err(cadence_core::Error::InvalidParam(format!(
                "empty or misplaced segment {:?}",
                segment
            ))
            .into());
        }
        self.segments.push(ClipSegment {
            end_frame: segment.end_frame.min(self.file.frame_count()),
            ..segment
        });
        self.publish();
        Ok(())
    }

    pub fn remove_segment(&mut self, index: usize) -> Option<ClipSegment> {
        if index >= self.segments.len() {
            return None;
        }
        let segment = self.segments.remove(index);
        self.publish();
        Some(segment)
    }

    pub fn clear_segments(&mut self) {
        self.segments.clear();
        self.publish();
    }

    /// Segment events sorted by start time.
    pub fn events(&self) -> Vec<Event> {
        let mut events: Vec<Event> = self.segments.iter().map(ClipSegment::event).collect();
        events.sort_by(|a, b| a.start.total_cmp(&b.start));
        events
    }

    /// Where the last segment stops sounding, in whole notes.
    pub fn end(&self, bpm: f64) -> f64 {
        let time_base = TimeBase::new(bpm, self.file.sample_rate());
        self.segments
            .iter()
            .map(|s| s.position + time_base.frames_to_whole_notes(s.frame_count() as f64))
            .fold(0.0, f64::max)
    }

    fn publish(&mut self) {
        let events = self.events();
        for (_, writer) in &mut self.subscribers {
            writer.write(events.clone());
        }
        tracing::trace!("Published {} events for {}", events.len(), self.id);
    }

    /// A reader of this clip's events for subscriber `key`, replacing any earlier one.
    pub(crate) fn subscribe(&mut self, key: u64) -> AtomicValueReader<Vec<Event>> {
        let (writer, reader) = atomic_value(self.events());
        match self.subscribers.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = writer,
            None => self.subscribers.push((key, writer)),
        }
        reader
    }

    pub(crate) fn unsubscribe(&mut self, key: u64) {
        self.subscribers.retain(|(k, _)| *k != key);
    }
}

/// The clips of a project.
#[derive(Default)]
pub struct Project {
    clips: Vec<AudioClip>,
    next_clip: u64,
    next_subscriber: u64,
    topology_version: u64,
}

impl Project {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_clip(&mut self, name: impl Into<String>, file: Arc<AudioFile>) -> ClipId {
        let id = ClipId(self.next_clip);
        self.next_clip += 1;
        let name = name.into();
        tracing::debug!(
            "Added {} \"{}\" ({} frames at {} Hz)",
            id,
            name,
            file.frame_count(),
            file.sample_rate()
        );
        self.clips.push(AudioClip {
            id,
            name,
            file,
            segments: Vec::new(),
            subscribers: Vec::new(),
        });
        self.topology_version += 1;
        id
    }

    /// Decodes a WAV file and adds it as a clip named after the file.
    pub fn import_wav(&mut self, path: impl AsRef<Path>) -> Result<ClipId> {
        let path = path.as_ref();
        let file = AudioFile::load_wav(path)?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(self.add_clip(name, Arc::new(file)))
    }

    pub fn remove_clip(&mut self, id: ClipId) -> Result<()> {
        let index = self
            .clips
            .iter()
            .position(|c| c.id == id)
            .ok_or(Error::ClipNotFound(id))?;
        self.clips.remove(index);
        self.topology_version += 1;
        tracing::debug!("Removed {}", id);
        Ok(())
    }

    pub fn clip(&self, id: ClipId) -> Result<&AudioClip> {
        self.clips
            .iter()
            .find(|c| c.id == id)
            .ok_or(Error::ClipNotFound(id))
    }

    pub fn clip_mut(&mut self, id: ClipId) -> Result<&mut AudioClip> {
        self.clips
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or(Error::ClipNotFound(id))
    }

    pub fn clips(&self) -> &[AudioClip] {
        &self.clips
    }

    pub(crate) fn clips_mut(&mut self) -> &mut [AudioClip] {
        &mut self.clips
    }

    /// Changes whenever a clip is added or removed.
    pub fn topology_version(&self) -> u64 {
        self.topology_version
    }

    /// Where the last segment of any clip stops sounding, in whole notes.
    pub fn end(&self, bpm: f64) -> f64 {
        self.clips.iter().map(|c| c.end(bpm)).fold(0.0, f64::max)
    }

    pub(crate) fn new_subscriber(&mut self) -> u64 {
        self.next_subscriber += 1;
        self.next_subscriber
    }

    pub(crate) fn unsubscribe_all(&mut self, key: u64) {
        for clip in &mut self.clips {
            clip.unsubscribe(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use cadence_core::ChannelLayout;

    fn file(frames: usize, rate: u32) -> Arc<AudioFile> {
        Arc::new(
            AudioFile::from_channels(vec![vec![0.0; frames]], ChannelLayout::mono(), rate)
                .unwrap(),
        )
    }

    #[test]
    fn test_clip_ids_are_unique() {
        let mut project = Project::new();
        let a = project.add_clip("a", file(10, 48000));
        let b = project.add_clip("b", file(10, 48000));
        assert_ne!(a, b);
        assert_eq!(project.clip(b).unwrap().name(), "b");
        assert_eq!(a.to_string(), "clip-0");
    }

    #[test]
    fn test_topology_version_tracks_clip_set() {
        let mut project = Project::new();
        let v0 = project.topology_version();
        let id = project.add_clip("a", file(10, 48000));
        assert!(project.topology_version() > v0);

        let v1 = project.topology_version();
        project
            .clip_mut(id)
            .unwrap()
            .add_segment(ClipSegment::new(0.0, 0, 5))
            .unwrap();
        assert_eq!(project.topology_version(), v1);

        project.remove_clip(id).unwrap();
        assert!(project.topology_version() > v1);
        assert!(matches!(project.remove_clip(id), Err(Error::ClipNotFound(_))));
    }

    #[test]
    fn test_events_sorted_and_clamped() {
        let mut project = Project::new();
        let id = project.add_clip("a", file(100, 48000));
        let clip = project.clip_mut(id).unwrap();
        clip.add_segment(ClipSegment::new(0.5, 0, 50)).unwrap();
        clip.add_segment(ClipSegment::new(0.25, 10, 500)).unwrap();

        let events = clip.events();
        assert_eq!(events[0], Event::segment(0.25, 10, 100));
        assert_eq!(events[1], Event::segment(0.5, 0, 50));
        assert!(clip.add_segment(ClipSegment::new(0.0, 5, 5)).is_err());
    }

    #[test]
    fn test_segment_edits_reach_subscribers() {
        let mut project = Project::new();
        let id = project.add_clip("a", file(100, 48000));
        let key = project.new_subscriber();
        let clip = project.clip_mut(id).unwrap();
        let mut reader = clip.subscribe(key);
        assert!(reader.get_read_ptr().is_empty());

        clip.add_segment(ClipSegment::new(0.0, 0, 10)).unwrap();
        assert_eq!(reader.get_read_ptr(), &vec![Event::segment(0.0, 0, 10)]);

        clip.remove_segment(0);
        assert!(reader.get_read_ptr().is_empty());

        clip.unsubscribe(key);
        clip.add_segment(ClipSegment::new(0.0, 0, 10)).unwrap();
        assert!(reader.get_read_ptr().is_empty());
    }

    #[test]
    fn test_resubscribe_replaces_writer() {
        let mut project = Project::new();
        let id = project.add_clip("a", file(100, 48000));
        let clip = project.clip_mut(id).unwrap();
        let _first = clip.subscribe(7);
        let _second = clip.subscribe(7);
        assert_eq!(clip.subscribers.len(), 1);
    }

    #[test]
    fn test_project_end() {
        let mut project = Project::new();
        let a = project.add_clip("a", file(48000, 48000));
        let b = project.add_clip("b", file(44100, 44100));
        project
            .clip_mut(a)
            .unwrap()
            .add_segment(ClipSegment::new(0.25, 0, 48000))
            .unwrap();
        project
            .clip_mut(b)
            .unwrap()
            .add_segment(ClipSegment::new(0.0, 0, 44100))
            .unwrap();
        // 120 bpm: one second is half a whole note
        assert_relative_eq!(project.end(120.0), 0.75);
        assert_eq!(Project::new().end(120.0), 0.0);
    }
}
