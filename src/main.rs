//! OpenVINO Inference Bridge
//!
//! Command-line runner: lists compute devices, or pushes one image through a
//! model and writes the result.
//!
//! ```bash
//! openvino-bridge devices
//! openvino-bridge run --input frame.png --output styled.png --device 0
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use openvino_bridge::config::Config;
use openvino_bridge::engine::{InferenceBridge, OpenVinoBackend};
use openvino_bridge::utils::image::{load_rgba, save_rgba};

#[derive(Parser)]
#[command(name = "openvino-bridge", about = "Run image-to-image models with OpenVINO", version)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available compute devices, accelerators first
    Devices,

    /// Run the model over one image
    Run {
        /// Input image (PNG or JPEG)
        #[arg(short, long)]
        input: PathBuf,

        /// Where to write the result
        #[arg(short, long)]
        output: PathBuf,

        /// Model path, overriding the configuration
        #[arg(short, long)]
        model: Option<PathBuf>,

        /// Device index into the listing, overriding the configuration
        #[arg(short, long)]
        device: Option<usize>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .init();

    let config_path = cli
        .config
        .as_ref()
        .and_then(|p| p.to_str())
        .unwrap_or(Config::default_path());
    let mut config = Config::load(config_path).unwrap_or_else(|e| {
        info!("Using default config ({})", e);
        Config::default()
    });

    let backend = OpenVinoBackend::new()?;
    let mut bridge = InferenceBridge::with_config(backend, &config.inference);

    match cli.command {
        Commands::Devices => {
            let listing = bridge.refresh_devices()?;
            println!("{}", listing);
        }
        Commands::Run {
            input,
            output,
            model,
            device,
        } => {
            if let Some(model) = model {
                config.model.path = model;
            }
            if let Some(device) = device {
                config.inference.device_index = device;
            }

            let mut frame = load_rgba(&input)?;
            config.model.width = Some(frame.width);
            config.model.height = Some(frame.height);

            let chosen = bridge.bootstrap(&config)?.to_string();
            info!(
                "Running {}x{} frame on {} (alpha {:?})",
                frame.width,
                frame.height,
                chosen,
                bridge.alpha_policy()
            );

            bridge.run(&mut frame.pixels)?;
            save_rgba(&output, &frame)?;
            info!("Wrote {}", output.display());
        }
    }

    Ok(())
}
