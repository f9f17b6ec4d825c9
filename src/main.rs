//! Chunkrec demo recorder
//!
//! Records a synthetic camera through the GStreamer encoder into chunk files.
//! Press Enter to stop, or pass `--frames` to stop after a fixed count.
//!
//! Usage:
//!   chunkrec [--config <path>] [--frames <n>] [--output <dir>] [--save-config]

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use chunkrec_lib::capture::{Pacing, SyntheticCamera};
use chunkrec_lib::config::{default_config_path, RecorderConfig};
use chunkrec_lib::encoding::test_pattern_readback;
use chunkrec_lib::recording::{GstBackend, Recorder};
use chunkrec_lib::render::HeadlessGraphics;

fn arg_value(args: &[String], name: &str) -> Option<String> {
    args.iter().position(|a| a == name).and_then(|i| args.get(i + 1)).cloned()
}

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config_path = arg_value(&args, "--config").map(PathBuf::from).unwrap_or_else(default_config_path);
    let mut config = RecorderConfig::load_or_default(&config_path);

    if let Some(frames) = arg_value(&args, "--frames") {
        config.max_frames = Some(frames.parse().context("--frames expects a number")?);
    }
    if let Some(dir) = arg_value(&args, "--output") {
        config.output_dir = PathBuf::from(dir);
    }
    if args.iter().any(|a| a == "--save-config") {
        config.save(&config_path)?;
        log::info!("Saved config to {}", config_path.display());
    }

    let camera = SyntheticCamera::new(config.framerate, Pacing::Realtime);
    let backend = GstBackend::new(config.container, test_pattern_readback());
    let recorder = Recorder::new(config, camera, HeadlessGraphics::new(), backend)?;
    let handle = recorder.spawn()?;

    // Enter on stdin stops the recording
    let (enter_tx, enter_rx) = crossbeam_channel::bounded::<()>(1);
    std::thread::Builder::new()
        .name("chunkrec-stdin".into())
        .spawn(move || {
            let mut line = String::new();
            if std::io::stdin().read_line(&mut line).is_ok() {
                let _ = enter_tx.send(());
            }
        })?;

    println!("Recording. Press Enter to stop.");
    while handle.is_running() {
        if enter_rx.recv_timeout(Duration::from_millis(100)).is_ok() {
            handle.stop();
            break;
        }
    }

    let summary = handle.join()?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
