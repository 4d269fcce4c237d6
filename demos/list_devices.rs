//! # list_devices
//!
//! List audio and MIDI devices, or keep watching for changes with `--watch`.
//!
//! ```bash
//! cargo run --example list_devices
//! cargo run --example list_devices --features hardware -- --watch
//! ```

use cadence::core::DevicePurpose;
use cadence::prelude::*;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};

fn list_devices(pipeline: &Pipeline) -> cadence::Result<()> {
    pipeline.refresh_audio_devices()?;
    pipeline.refresh_midi_devices()?;

    let audio = pipeline.audio_devices();
    for (index, device) in audio.devices.iter().enumerate() {
        let (purpose, default) = match device.purpose {
            DevicePurpose::Playback => ("playback", audio.default_playback == Some(index)),
            DevicePurpose::Recording => ("recording", audio.default_recording == Some(index)),
        };
        eprintln!(
            "{} device: {} Hz {} [{}]{}",
            purpose,
            device.sample_rate_default,
            device.name,
            device.id,
            if default { " (default)" } else { "" }
        );
    }

    let midi = pipeline.midi_devices();
    let default_midi = pipeline
        .midi_backend()
        .and_then(|backend| backend.default_device())
        .map(|device| device.id);
    for device in &midi {
        let default = default_midi.as_deref() == Some(device.id.as_str());
        eprintln!(
            "controller device: {}{}",
            device.name,
            if default { " (default)" } else { "" }
        );
    }
    eprintln!("{} devices found", audio.devices.len() + midi.len());
    Ok(())
}

fn run(watch: bool) -> cadence::Result<()> {
    let mut pipeline = Pipeline::builder()
        .audio_backend(cadence::hw::default_audio_backend())
        .midi_backend(cadence::hw::default_midi_backend())
        .worker_count(1)
        .build()?;

    list_devices(&pipeline)?;
    if !watch {
        return Ok(());
    }

    let changed = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&changed);
    pipeline.on_event(move |event| {
        if matches!(
            event,
            cadence::HardwareEvent::DevicesChanged | cadence::HardwareEvent::MidiDevicesChanged
        ) {
            flag.store(true, Ordering::Release);
        }
    });

    let running = Arc::new(AtomicBool::new(true));
    let handler_running = Arc::clone(&running);
    let wakeup = pipeline.event_wakeup();
    ctrlc::set_handler(move || {
        handler_running.store(false, Ordering::Release);
        wakeup.wakeup();
    })
    .map_err(|e| std::io::Error::other(e.to_string()))?;

    while running.load(Ordering::Acquire) {
        pipeline.wait_events(None);
        if changed.swap(false, Ordering::AcqRel) {
            eprintln!("devices changed");
            list_devices(&pipeline)?;
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let mut watch = false;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--watch" => watch = true,
            _ => {
                eprintln!("Usage: list_devices [--watch]");
                return ExitCode::FAILURE;
            }
        }
    }

    match run(watch) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
