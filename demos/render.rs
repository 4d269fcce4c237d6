//! # render
//!
//! Render a WAV file through the pipeline into a new WAV file, converting sample
//! rate, channel layout and sample format on the way.
//!
//! ```bash
//! cargo run --example render -- input.wav output.wav --rate 44100 --format float32
//! ```

use cadence::hw::DummyBackend;
use cadence::prelude::*;
use cadence::SampleFormat;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

struct Args {
    input: String,
    output: String,
    export: ExportFormat,
}

fn usage() -> ExitCode {
    eprintln!(
        "Usage: render <input.wav> <output.wav> [--rate HZ] [--mono] \
         [--format int16|int24|int32|float32]"
    );
    ExitCode::FAILURE
}

fn parse_args() -> Option<Args> {
    let mut args = std::env::args().skip(1);
    let mut positional = Vec::new();
    let mut export = ExportFormat::default();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--rate" => export.sample_rate = args.next()?.parse().ok()?,
            "--mono" => export.channel_layout = ChannelLayout::mono(),
            "--format" => {
                export.sample_format = match args.next()?.as_str() {
                    "int16" => SampleFormat::Int16,
                    "int24" => SampleFormat::Int24,
                    "int32" => SampleFormat::Int32,
                    "float32" => SampleFormat::Float32,
                    _ => return None,
                }
            }
            _ if arg.starts_with("--") => return None,
            _ => positional.push(arg),
        }
    }
    let [input, output] = <[String; 2]>::try_from(positional).ok()?;
    Some(Args {
        input,
        output,
        export,
    })
}

fn run(args: Args) -> cadence::Result<()> {
    // Rendering never touches hardware.
    let pipeline = Pipeline::builder()
        .audio_backend(Arc::new(DummyBackend::new()))
        .build()?;

    let project = Arc::new(Mutex::new(Project::new()));
    {
        let mut project = project.lock();
        let clip = project.import_wav(&args.input)?;
        let clip = project.clip_mut(clip)?;
        let frames = clip.file().frame_count();
        clip.add_segment(ClipSegment::new(0.0, 0, frames))?;
    }

    let mut job = RenderJob::start(pipeline, project, &args.export, &args.output)?;

    let cancelled = Arc::new(AtomicBool::new(false));
    let handler_cancelled = Arc::clone(&cancelled);
    ctrlc::set_handler(move || handler_cancelled.store(true, Ordering::Release))
        .map_err(|e| std::io::Error::other(e.to_string()))?;

    loop {
        if cancelled.load(Ordering::Acquire) {
            job.stop();
            eprintln!("\ncancelled");
            return Ok(());
        }
        if let Some(summary) = job.wait_timeout(Duration::from_millis(100))? {
            eprintln!(
                "\rrendered {} frames, {} channels, {} Hz, {} bit -> {}",
                summary.frames,
                summary.channels,
                summary.sample_rate,
                summary.bits_per_sample,
                summary.path.display()
            );
            return Ok(());
        }
        eprint!("\r{:5.1}%", job.progress() * 100.0);
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let Some(args) = parse_args() else {
        return usage();
    };
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
