//! # delay
//!
//! Route the default recording device through a feedback delay to the default
//! playback device until Ctrl-C.
//!
//! ```bash
//! cargo run --example delay --features cpal
//! ```

use cadence::core::AudioFormat;
use cadence::nodes::{device_format, resample_descriptor};
use cadence::prelude::*;
use cadence::register_builtin_nodes;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};

/// Connects two audio nodes, through a resampler if their formats disagree.
fn connect(
    pipeline: &mut Pipeline,
    source: NodeId,
    from: &AudioFormat,
    dest: NodeId,
    to: &AudioFormat,
) -> cadence::Result<()> {
    match pipeline.connect_audio_nodes(source, dest) {
        Err(e) if e.is_format_mismatch() => {
            let resampler = pipeline.create_node(&resample_descriptor(from.clone(), to.clone())?)?;
            pipeline.connect_audio_nodes(source, resampler)?;
            pipeline.connect_audio_nodes(resampler, dest)?;
            Ok(())
        }
        other => Ok(other?),
    }
}

fn run() -> cadence::Result<()> {
    let mut pipeline = Pipeline::builder()
        .audio_backend(cadence::hw::default_audio_backend())
        .build()?;
    register_builtin_nodes(&mut pipeline)?;
    let config = pipeline.config().clone();

    let devices = pipeline.audio_devices();
    let (Some(out_device), Some(in_device)) = (
        devices.default_playback_device(),
        devices.default_recording_device(),
    ) else {
        return Err(cadence::core::Error::DeviceNotFound(
            "no default playback or recording device".to_string(),
        )
        .into());
    };
    eprintln!("recording from: {}", in_device.name);
    eprintln!("playing to: {}", out_device.name);

    let find = |name: String| {
        pipeline
            .find_descriptor(&name)
            .ok_or(cadence::core::Error::DeviceNotFound(name))
    };
    let recording_descr = find(format!("recording:{}", in_device.id))?;
    let playback_descr = find(format!("playback:{}", out_device.id))?;
    let delay_descr = find("delay".to_string())?;
    eprintln!("delay: {}", delay_descr.description());

    let in_format = device_format(in_device, &config);
    let out_format = device_format(out_device, &config);
    let delay_format = AudioFormat::new(ChannelLayout::mono(), in_format.sample_rate);

    let recording = pipeline.create_node(&recording_descr)?;
    let delay = pipeline.create_node(&delay_descr)?;
    let playback = pipeline.create_node(&playback_descr)?;

    connect(&mut pipeline, recording, &in_format, delay, &delay_format)?;
    connect(&mut pipeline, delay, &delay_format, playback, &out_format)?;

    let running = Arc::new(AtomicBool::new(true));
    let handler_running = Arc::clone(&running);
    let wakeup = pipeline.event_wakeup();
    ctrlc::set_handler(move || {
        handler_running.store(false, Ordering::Release);
        wakeup.wakeup();
    })
    .map_err(|e| std::io::Error::other(e.to_string()))?;

    pipeline.start_pipeline(0.0)?;
    while running.load(Ordering::Acquire) {
        pipeline.wait_events(None);
    }
    pipeline.stop_pipeline();
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
