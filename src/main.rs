mod app;
mod config;
mod pipeline;
mod types;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use config::{CanvasSize, Settings};

/// Posture checks with a live feedback window.
#[derive(Parser, Debug)]
#[command(name = "slouchless", version, about)]
struct Cli {
    /// TOML settings file; defaults apply when omitted.
    #[arg(long, env = "SLOUCHLESS_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Feedback window size, e.g. 600x600.
    #[arg(long, global = true)]
    canvas: Option<CanvasSize>,

    /// Frames per second streamed to the viewer.
    #[arg(long, global = true)]
    fps: Option<f32>,

    /// Minimum time between two classifier calls, in milliseconds.
    #[arg(long = "interval-ms", global = true)]
    interval_ms: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check posture periodically; open the feedback window on bad posture.
    Monitor {
        /// Run a single check instead of looping.
        #[arg(long)]
        once: bool,
    },
    /// Feedback window over synthetic frames or an image directory.
    Demo {
        #[arg(long)]
        images: Option<PathBuf>,
        /// Stop after this many seconds instead of waiting for the window to close.
        #[arg(long)]
        seconds: Option<u64>,
    },
    /// Stream a fixed overlay to check that the viewer works.
    Diagnose {
        #[arg(long, default_value_t = 5)]
        seconds: u64,
    },
}

impl Cli {
    fn settings(&self) -> Result<Settings> {
        let mut settings = match &self.config {
            Some(path) => Settings::load(path)?,
            None => Settings::default(),
        };
        if let Some(canvas) = self.canvas {
            settings.canvas_size = canvas;
        }
        if let Some(fps) = self.fps {
            settings.preview_fps = fps;
        }
        if let Some(interval_ms) = self.interval_ms {
            settings.inference_interval_ms = interval_ms;
        }
        settings.validate()?;
        Ok(settings)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = cli.settings()?;

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(settings.log_level.as_str()),
    )
    .init();

    match cli.command {
        Command::Monitor { once } => app::monitor(&settings, once),
        Command::Demo { images, seconds } => app::demo(&settings, images.as_deref(), seconds),
        Command::Diagnose { seconds } => app::diagnose(&settings, seconds),
    }
}
