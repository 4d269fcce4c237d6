//! # play
//!
//! Play a WAV file through the default playback device. Stops at the end of the
//! file or on Ctrl-C.
//!
//! ```bash
//! cargo run --example play -- input.wav
//! cargo run --example play --features cpal -- input.wav
//! ```

use cadence::prelude::*;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

fn run(path: &str) -> cadence::Result<()> {
    let pipeline = Pipeline::builder()
        .audio_backend(cadence::hw::default_audio_backend())
        .build()?;
    let bpm = pipeline.config().bpm;

    let file = Arc::new(AudioFile::load_wav(path)?);
    eprintln!("Channels: {} ({})", file.channel_layout().channel_count(), file.channel_layout());
    eprintln!("Sample Rate: {} Hz", file.sample_rate());
    let end = TimeBase::new(bpm, file.sample_rate()).frames_to_whole_notes(file.frame_count() as f64);

    let project = Arc::new(Mutex::new(Project::new()));
    let mut graph = AudioGraph::playback(pipeline, project, GraphSettings::default())?;
    if let Some(device) = graph.playback_device() {
        eprintln!("Playing through {}", device.name);
    }

    let running = Arc::new(AtomicBool::new(true));
    let handler_running = Arc::clone(&running);
    let wakeup = graph.event_wakeup();
    ctrlc::set_handler(move || {
        handler_running.store(false, Ordering::Release);
        wakeup.wakeup();
    })
    .map_err(|e| std::io::Error::other(e.to_string()))?;

    graph.play_file(file)?;
    while running.load(Ordering::Acquire) && graph.play_head() < end {
        graph.wait_events(Some(Duration::from_millis(100)))?;
    }
    graph.stop_preview()?;

    let underruns = graph.pipeline().underrun_count();
    if underruns > 0 {
        eprintln!("{} underruns", underruns);
    }
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let [path] = args.as_slice() else {
        eprintln!("Usage: play <inputfile.wav>");
        return ExitCode::FAILURE;
    };

    match run(path) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
