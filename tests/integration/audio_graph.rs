//! Audio graph integration tests
//!
//! Transport state, topology rebuilds and recovery from hardware events, all on the
//! dummy backend.

use crate::helpers::*;
use cadence::core::HardwareEvent;
use cadence::prelude::*;

/// Two seconds of stereo audio at the device rate.
fn long_clip() -> Arc<AudioFile> {
    constant_file(0.25, 2 * TEST_SAMPLE_RATE as usize, ChannelLayout::stereo(), TEST_SAMPLE_RATE)
}

#[test]
fn test_empty_project_builds_output_only() {
    let project = test_project();
    let graph = test_graph(&project);

    assert_eq!(graph.state(), GraphState::Stopped);
    assert_eq!(graph.node_count(), 1);
    assert_eq!(graph.playback_device().map(|d| d.id.as_str()), Some("dummy-out"));
    assert_eq!(graph.sample_rate(), TEST_SAMPLE_RATE);
    assert!(!graph.is_render());
    assert!(graph.render_progress().is_none());
}

#[test]
fn test_play_pause_stop() {
    let project = test_project();
    add_whole_clip(&project, long_clip(), 0.0);
    let mut graph = test_graph(&project);

    graph.play().unwrap();
    assert_eq!(graph.state(), GraphState::Playing);
    assert!(wait_for_play_head(&graph, 0.02, 2000), "play head did not advance");

    graph.pause().unwrap();
    assert_eq!(graph.state(), GraphState::Paused);
    let paused_at = graph.play_head();
    std::thread::sleep(std::time::Duration::from_millis(50));
    assert_eq!(graph.play_head(), paused_at, "play head moved while paused");

    // Resume continues from the paused position.
    graph.play().unwrap();
    assert_eq!(graph.state(), GraphState::Playing);
    assert!(wait_for_play_head(&graph, paused_at + 0.01, 2000));

    graph.stop();
    assert_eq!(graph.state(), GraphState::Stopped);
    let stopped_at = graph.play_head();
    assert!(stopped_at > paused_at);
    std::thread::sleep(std::time::Duration::from_millis(30));
    assert_eq!(graph.play_head(), stopped_at);
}

#[test]
fn test_pause_when_stopped_is_noop() {
    let project = test_project();
    let mut graph = test_graph(&project);

    graph.pause().unwrap();
    assert_eq!(graph.state(), GraphState::Stopped);
    graph.stop();
    assert_eq!(graph.state(), GraphState::Stopped);
}

#[test]
fn test_seek_stopped_and_paused() {
    let project = test_project();
    add_whole_clip(&project, long_clip(), 0.0);
    let mut graph = test_graph(&project);

    graph.seek(0.5).unwrap();
    assert_eq!(graph.play_head(), 0.5);
    assert_eq!(graph.state(), GraphState::Stopped);

    graph.play().unwrap();
    assert!(wait_for_play_head(&graph, 0.51, 2000));

    graph.pause().unwrap();
    graph.seek(0.25).unwrap();
    assert_eq!(graph.state(), GraphState::Paused);
    assert_eq!(graph.play_head(), 0.25);
}

#[test]
fn test_seek_while_playing_restarts_at_position() {
    let project = test_project();
    add_whole_clip(&project, long_clip(), 0.0);
    let mut graph = test_graph(&project);

    graph.play().unwrap();
    graph.seek(0.75).unwrap();
    assert_eq!(graph.state(), GraphState::Playing);
    assert!(graph.play_head() >= 0.75);
    assert!(wait_for_play_head(&graph, 0.76, 2000));
}

#[test]
fn test_seek_rejects_invalid_positions() {
    let project = test_project();
    let mut graph = test_graph(&project);

    assert!(graph.seek(-1.0).is_err());
    assert!(graph.seek(f64::NAN).is_err());
    assert_eq!(graph.play_head(), 0.0);
}

#[test]
fn test_add_clip_rebuilds_and_keeps_playing() {
    let project = test_project();
    add_whole_clip(&project, long_clip(), 0.0);
    let mut graph = test_graph(&project);
    assert_eq!(graph.node_count(), 4);

    graph.play().unwrap();
    assert!(wait_for_play_head(&graph, 0.02, 2000));
    let before = graph.play_head();

    graph.add_clip("second", long_clip()).unwrap();
    assert_eq!(graph.rebuild_count(), 1);
    assert_eq!(graph.state(), GraphState::Playing);
    assert!(graph.play_head() >= before);

    // One more mixer input: event source plus player.
    assert_eq!(graph.node_count(), 6);
    assert_eq!(project.lock().clips().len(), 2);
}

#[test]
fn test_remove_clip_rebuilds() {
    let project = test_project();
    let clip = add_whole_clip(&project, long_clip(), 0.0);
    let mut graph = test_graph(&project);

    graph.remove_clip(clip).unwrap();
    assert_eq!(graph.rebuild_count(), 1);
    assert_eq!(graph.node_count(), 1);

    let err = graph.remove_clip(clip).unwrap_err();
    assert!(matches!(err, cadence::Error::ClipNotFound(id) if id == clip));
}

#[test]
fn test_resampler_inserted_for_foreign_rate() {
    let project = test_project();
    add_whole_clip(
        &project,
        constant_file(0.25, 44100, ChannelLayout::stereo(), 44100),
        0.0,
    );
    let graph = test_graph(&project);

    // Output, mixer, event source, player, resampler.
    assert_eq!(graph.node_count(), 5);
}

#[test]
fn test_play_file_previews_in_place_of_project() {
    let project = test_project();
    add_whole_clip(&project, long_clip(), 0.0);
    let mut graph = test_graph(&project);
    graph.seek(0.5).unwrap();

    graph
        .play_file(constant_file(0.25, 44100, ChannelLayout::stereo(), 44100))
        .unwrap();
    assert!(graph.is_previewing());
    assert_eq!(graph.state(), GraphState::Playing);
    // Output, event source, player, resampler.
    assert_eq!(graph.node_count(), 4);
    assert!(wait_for_play_head(&graph, 0.02, 2000), "preview did not play");
    assert_eq!(project.lock().clips().len(), 1);

    graph.stop_preview().unwrap();
    assert!(!graph.is_previewing());
    assert_eq!(graph.state(), GraphState::Stopped);
    assert_eq!(graph.play_head(), 0.5);
    // Output, mixer, event source, player.
    assert_eq!(graph.node_count(), 4);
}

#[test]
fn test_play_file_at_device_rate_connects_directly() {
    let project = test_project();
    let mut graph = test_graph(&project);

    graph.play_file(long_clip()).unwrap();
    assert_eq!(graph.node_count(), 3);
    assert_eq!(graph.rebuild_count(), 0);

    // A second audition replaces the first.
    graph.play_file(long_clip()).unwrap();
    assert_eq!(graph.node_count(), 3);
    assert!(graph.is_previewing());

    graph.stop_preview().unwrap();
    assert_eq!(graph.node_count(), 1);
    assert_eq!(graph.play_head(), 0.0);
    // Nothing to end.
    graph.stop_preview().unwrap();
}

#[test]
fn test_render_graph_rejects_preview() {
    let temp = tempfile::tempdir().unwrap();
    let mut graph = AudioGraph::render(
        test_pipeline(),
        test_project(),
        &ExportFormat::default(),
        temp.path().join("never.wav"),
        480,
    )
    .unwrap();

    assert!(graph.play_file(long_clip()).is_err());
    assert!(!graph.is_previewing());
}

#[test]
fn test_segment_edit_does_not_rebuild() {
    let project = test_project();
    let clip = add_whole_clip(&project, long_clip(), 0.0);
    let mut graph = test_graph(&project);
    graph.play().unwrap();

    project
        .lock()
        .clip_mut(clip)
        .unwrap()
        .add_segment(ClipSegment::new(1.0, 0, 1000))
        .unwrap();
    graph.flush_events().unwrap();

    assert_eq!(graph.rebuild_count(), 0);
    assert_eq!(graph.state(), GraphState::Playing);
}

#[test]
fn test_project_change_picked_up_on_flush() {
    let project = test_project();
    let mut graph = test_graph(&project);
    assert_eq!(graph.node_count(), 1);

    add_whole_clip(&project, long_clip(), 0.0);
    assert_eq!(graph.rebuild_count(), 0);

    graph.flush_events().unwrap();
    assert_eq!(graph.rebuild_count(), 1);
    assert_eq!(graph.node_count(), 4);

    // Nothing changed since.
    graph.flush_events().unwrap();
    assert_eq!(graph.rebuild_count(), 1);
}

#[test]
fn test_lost_device_rebuilds() {
    let backend = Arc::new(UnreliableBackend::new());
    let project = test_project();
    add_whole_clip(&project, long_clip(), 0.0);
    let mut graph = AudioGraph::playback(
        test_pipeline_with(backend.clone()),
        Arc::clone(&project),
        GraphSettings::default(),
    )
    .unwrap();

    graph.play().unwrap();
    assert!(wait_for_play_head(&graph, 0.01, 2000));

    backend.post(HardwareEvent::DeviceLost {
        device: "dummy-out".to_string(),
    });
    assert!(graph.flush_events().unwrap() >= 1);
    assert_eq!(graph.rebuild_count(), 1);
    assert_eq!(graph.state(), GraphState::Playing);
    assert_eq!(graph.playback_device().map(|d| d.id.as_str()), Some("dummy-out"));
}

#[test]
fn test_unrelated_lost_device_ignored() {
    let backend = Arc::new(UnreliableBackend::new());
    let project = test_project();
    let mut graph = AudioGraph::playback(
        test_pipeline_with(backend.clone()),
        Arc::clone(&project),
        GraphSettings::default(),
    )
    .unwrap();

    backend.post(HardwareEvent::DeviceLost {
        device: "dummy-in".to_string(),
    });
    graph.flush_events().unwrap();
    assert_eq!(graph.rebuild_count(), 0);
}

#[test]
fn test_missing_preferred_device_falls_back() {
    let project = test_project();
    let settings = GraphSettings {
        playback_device: Some("no-such-device".to_string()),
        ..GraphSettings::default()
    };
    let graph = AudioGraph::playback(test_pipeline(), project, settings).unwrap();

    assert_eq!(graph.playback_device().map(|d| d.id.as_str()), Some("dummy-out"));
}

#[test]
fn test_recording_device_not_used_for_playback() {
    let project = test_project();
    let mut graph = test_graph(&project);

    graph.set_playback_device(Some("dummy-in".to_string())).unwrap();
    assert_eq!(graph.rebuild_count(), 1);
    assert_eq!(graph.playback_device().map(|d| d.id.as_str()), Some("dummy-out"));
}

#[test]
fn test_set_sample_rate() {
    let project = test_project();
    add_whole_clip(&project, long_clip(), 0.0);
    let mut graph = test_graph(&project);

    graph.set_sample_rate(44100).unwrap();
    assert_eq!(graph.sample_rate(), 44100);
    assert_eq!(graph.rebuild_count(), 1);

    let err = graph.set_sample_rate(0).unwrap_err();
    assert!(err.core().is_some());
    assert_eq!(graph.sample_rate(), 44100);
    assert_eq!(graph.rebuild_count(), 1);
}

#[test]
fn test_drop_releases_clip_subscriptions() {
    let project = test_project();
    let clip = add_whole_clip(&project, long_clip(), 0.0);
    {
        let mut graph = test_graph(&project);
        graph.play().unwrap();
    }

    // Editing after the graph is gone publishes to nobody.
    project
        .lock()
        .clip_mut(clip)
        .unwrap()
        .add_segment(ClipSegment::new(0.5, 0, 100))
        .unwrap();
}
