//! Render integration tests
//!
//! Format conversion end to end: a clip at a foreign rate cannot be wired straight
//! to a device, but plays (and renders) through a resampler.

use crate::helpers::tolerances::*;
use crate::helpers::*;
use cadence::core::{AudioFormat, Error as CoreError};
use cadence::hw::DummyBackend;
use cadence::nodes::{
    audio_clip, audio_clip_descriptor, device, device_format, playback_descriptor, resample,
    resample_descriptor,
};
use cadence::prelude::*;
use cadence::{register_builtin_nodes, RenderSummary, SampleFormat};
use std::time::Duration;

fn float_export(layout: ChannelLayout) -> ExportFormat {
    ExportFormat {
        sample_rate: TEST_SAMPLE_RATE,
        channel_layout: layout,
        sample_format: SampleFormat::Float32,
        ..ExportFormat::default()
    }
}

fn finish(job: &mut RenderJob) -> RenderSummary {
    job.wait_timeout(Duration::from_secs(30))
        .expect("Render failed")
        .expect("Render timed out")
}

#[test]
fn test_direct_connect_rejects_foreign_rate() {
    let mut pipeline = test_pipeline();
    register_builtin_nodes(&mut pipeline).unwrap();

    let file = sine_file(440.0, 44100, ChannelLayout::stereo(), 44100);
    let player = pipeline
        .create_node(&audio_clip_descriptor(file).unwrap())
        .unwrap();
    let playback_descr = pipeline.find_descriptor("playback:dummy-out").unwrap();
    let playback = pipeline.create_node(&playback_descr).unwrap();

    let err = pipeline
        .connect(player, audio_clip::OUT_PORT, playback, device::PORT)
        .unwrap_err();
    assert!(matches!(err, CoreError::IncompatibleSampleRates));
    assert!(err.is_format_mismatch());
}

fn mono_pipeline() -> Pipeline {
    Pipeline::builder()
        .audio_backend(Arc::new(DummyBackend::new()))
        .channel_layout(ChannelLayout::mono())
        .worker_count(2)
        .latency(0.01)
        .build()
        .unwrap()
}

#[test]
fn test_mono_clip_resampled_for_mono_device() {
    let mut pipeline = mono_pipeline();
    pipeline.refresh_audio_devices().unwrap();
    let playback_device = pipeline.audio_devices().find("dummy-out").cloned().unwrap();
    let config = pipeline.config().clone();
    let device_fmt = device_format(&playback_device, &config);
    assert_eq!(device_fmt, AudioFormat::new(ChannelLayout::mono(), 48000));

    let descriptor =
        playback_descriptor(Arc::clone(pipeline.audio_backend()), playback_device, &config)
            .unwrap();
    let playback = pipeline.create_node(&descriptor).unwrap();
    let file = sine_file(440.0, 44100, ChannelLayout::mono(), 44100);
    let player = pipeline
        .create_node(&audio_clip_descriptor(file).unwrap())
        .unwrap();

    let err = pipeline
        .connect(player, audio_clip::OUT_PORT, playback, device::PORT)
        .unwrap_err();
    assert!(matches!(err, CoreError::IncompatibleSampleRates));

    let resampler = pipeline
        .create_node(
            &resample_descriptor(AudioFormat::new(ChannelLayout::mono(), 44100), device_fmt)
                .unwrap(),
        )
        .unwrap();
    pipeline
        .connect(player, audio_clip::OUT_PORT, resampler, resample::IN_PORT)
        .unwrap();
    pipeline
        .connect(resampler, resample::OUT_PORT, playback, device::PORT)
        .unwrap();

    pipeline.start_pipeline(0.0).unwrap();
    let played = wait_for(2000, || {
        pipeline.node_timestamp(playback).unwrap_or(0.0) > 0.02
    });
    pipeline.stop_pipeline();
    assert!(played, "mono device did not consume audio");
}

#[test]
fn test_mono_project_plays_through_resampler() {
    let project = test_project();
    add_whole_clip(
        &project,
        sine_file(440.0, 44100, ChannelLayout::mono(), 44100),
        0.0,
    );
    let mut graph =
        AudioGraph::playback(mono_pipeline(), Arc::clone(&project), GraphSettings::default())
            .unwrap();
    // Output, mixer, event source, player, resampler.
    assert_eq!(graph.node_count(), 5);

    graph.play().unwrap();
    assert!(wait_for_play_head(&graph, 0.02, 2000), "play head did not advance");
    graph.stop();
}

#[test]
fn test_render_resamples_to_export_rate() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("resampled.wav");

    let project = test_project();
    add_whole_clip(
        &project,
        sine_file(440.0, 44100, ChannelLayout::stereo(), 44100),
        0.0,
    );

    let mut job = RenderJob::start(
        test_pipeline(),
        Arc::clone(&project),
        &float_export(ChannelLayout::stereo()),
        &path,
    )
    .unwrap();
    // One second of audio is half a whole note at 120 bpm.
    assert_eq!(job.target_frames(), 48000);
    // Resampler between the player and the mixer.
    assert_eq!(job.graph().node_count(), 5);

    let summary = finish(&mut job);
    assert!(job.is_complete());
    assert_eq!(job.progress(), 1.0);
    assert_eq!(summary.frames, 48000);
    assert_eq!(summary.channels, 2);
    assert_eq!(summary.sample_rate, 48000);
    assert_eq!(summary.bits_per_sample, 32);

    let (spec, samples) = read_wav_f32(&path);
    assert_eq!(spec.sample_rate, 48000);
    assert_eq!(samples.len(), 48000 * 2);

    // Away from the edges the level is that of a 0.5 sine.
    let middle = &samples[4800 * 2..43200 * 2];
    let expected = 0.5 / std::f32::consts::SQRT_2;
    let level = rms(middle);
    assert!(
        (level - expected).abs() < RESAMPLE_EPSILON,
        "RMS {} after resampling, expected {}",
        level,
        expected
    );
}

#[test]
fn test_render_places_clip_at_position() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("offset.wav");

    let project = test_project();
    add_whole_clip(
        &project,
        constant_file(0.5, 48000, ChannelLayout::stereo(), TEST_SAMPLE_RATE),
        0.25,
    );

    let mut job = RenderJob::start_frames(
        test_pipeline(),
        Arc::clone(&project),
        &float_export(ChannelLayout::stereo()),
        &path,
        48000,
    )
    .unwrap();
    let summary = finish(&mut job);
    assert_eq!(summary.frames, 48000);

    let (_, samples) = read_wav_f32(&path);
    assert_eq!(samples.len(), 48000 * 2);

    // A quarter note in is 24000 frames.
    assert_silence(&samples[..23990 * 2], SILENCE_THRESHOLD);
    for &sample in &samples[24010 * 2..] {
        assert!((sample - 0.5).abs() < FLOAT_EPSILON, "sample {}", sample);
    }
}

#[test]
fn test_render_downmixes_to_mono() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("mono.wav");

    let project = test_project();
    add_whole_clip(
        &project,
        constant_file(0.25, 24000, ChannelLayout::stereo(), TEST_SAMPLE_RATE),
        0.0,
    );

    let mut job = RenderJob::start(
        test_pipeline(),
        Arc::clone(&project),
        &float_export(ChannelLayout::mono()),
        &path,
    )
    .unwrap();
    let summary = finish(&mut job);
    assert_eq!(summary.channels, 1);
    assert_eq!(summary.frames, 24000);

    let (_, samples) = read_wav_f32(&path);
    assert_eq!(samples.len(), 24000);
    assert!(peak(&samples) > SILENCE_THRESHOLD);
}

#[test]
fn test_render_empty_project_is_silent() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("silence.wav");

    let mut job = RenderJob::start_frames(
        test_pipeline(),
        test_project(),
        &float_export(ChannelLayout::stereo()),
        &path,
        4800,
    )
    .unwrap();
    // Only the sink.
    assert_eq!(job.graph().node_count(), 1);

    let summary = finish(&mut job);
    assert_eq!(summary.frames, 4800);
    assert_eq!(job.frames_rendered(), 4800);

    let (_, samples) = read_wav_f32(&path);
    assert_eq!(samples.len(), 4800 * 2);
    assert_silence(&samples, SILENCE_THRESHOLD);
}

#[test]
fn test_render_graph_cannot_rebuild() {
    let temp = tempfile::tempdir().unwrap();
    let project = test_project();
    let mut graph = AudioGraph::render(
        test_pipeline(),
        project,
        &float_export(ChannelLayout::stereo()),
        temp.path().join("never.wav"),
        480,
    )
    .unwrap();

    assert!(graph.is_render());
    assert!(graph.playback_device().is_none());
    assert!(graph.render_progress().is_some());
    assert!(graph.rebuild().is_err());
}

#[test]
fn test_invalid_export_format_rejected() {
    let temp = tempfile::tempdir().unwrap();
    let export = ExportFormat {
        sample_rate: 0,
        ..ExportFormat::default()
    };
    let result = RenderJob::start_frames(
        test_pipeline(),
        test_project(),
        &export,
        temp.path().join("bad.wav"),
        480,
    );
    assert!(result.is_err());
}
