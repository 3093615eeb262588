//! Acoustic Sentinel - CLI entry point

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use sentinel_core::api::{Engine, MessageStatus, QueueItem};
use sentinel_core::constants::{APP_NAME, APP_VERSION};
use sentinel_core::logic::config::SentinelConfig;
use sentinel_core::logic::model::{ModelConfigUpdate, SampleLabel, TrainingControl};

#[derive(Parser)]
#[command(name = "sentinel")]
#[command(about = "Acoustic anomaly detection with a reconstruction autoencoder")]
struct Args {
    /// Config file (defaults to the platform config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Model bundle path (overrides the config)
    #[arg(short, long, global = true)]
    model: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Train on labeled WAV files and save the model
    Train {
        /// Recordings of normal operation
        #[arg(long, num_args = 1.., required = true)]
        normal: Vec<PathBuf>,

        /// Recordings with known faults (calibration only)
        #[arg(long, num_args = 1..)]
        anomaly: Vec<PathBuf>,

        #[arg(long)]
        epochs: Option<usize>,

        #[arg(long)]
        latent_dim: Option<usize>,
    },

    /// Analyze a WAV file and list incidents
    Scan {
        file: PathBuf,

        /// Fixed sensitivity, disables per-file auto-calibration
        #[arg(short, long)]
        sensitivity: Option<f32>,

        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show engine and model status
    Inspect,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = SentinelConfig::resolve(args.config.as_deref()).context("loading config")?;
    if let Some(model) = args.model {
        config.model_path = Some(model);
    }

    log::info!("Starting {} v{}", APP_NAME, APP_VERSION);

    match args.command {
        Command::Train {
            normal,
            anomaly,
            epochs,
            latent_dim,
        } => {
            let engine = Engine::init(config.clone())?;
            // Fresh network from the configured shape, whatever was stored before
            let model = ModelConfigUpdate {
                epochs,
                latent_dim,
                ..Default::default()
            }
            .apply(&config.model);
            engine.detector().configure(model)?;

            let items: Vec<QueueItem> = normal
                .into_iter()
                .map(|path| QueueItem {
                    path,
                    label: SampleLabel::Normal,
                })
                .chain(anomaly.into_iter().map(|path| QueueItem {
                    path,
                    label: SampleLabel::Anomaly,
                }))
                .collect();

            let summary = engine.train_from_queue(
                &items,
                |p| match p.frames {
                    Some(n) => println!("[{}/{}] {} ({} frames)", p.index, p.total, p.path.display(), n),
                    None => println!("[{}/{}] {} skipped", p.index, p.total, p.path.display()),
                },
                |e| {
                    println!("epoch {}/{} loss {:.6}", e.epoch, e.total_epochs, e.loss);
                    TrainingControl::Continue
                },
            );
            println!("{}", summary.message.message);
            if summary.message.is_error() {
                bail!("training failed");
            }

            let path = config.model_path();
            engine
                .detector()
                .save_to_path(&path)
                .with_context(|| format!("saving model to {}", path.display()))?;
            println!("Model saved to {}", path.display());
        }

        Command::Scan {
            file,
            sensitivity,
            json,
        } => {
            if sensitivity.is_some() {
                config.scoring.auto_calibrate_after_scan = false;
            }
            let engine = Engine::init(config)?;
            if !engine.detector().is_trained() {
                bail!("no trained model found, run `sentinel train` first");
            }
            if let Some(s) = sensitivity {
                let msg = engine.set_sensitivity(s);
                if msg.status == MessageStatus::Error {
                    bail!(msg.message);
                }
            }

            let report = engine
                .analyze_file(&file)
                .with_context(|| format!("analyzing {}", file.display()))?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
                return Ok(());
            }

            println!("File: {}", file.display());
            println!("Duration: {:.2}s ({} frames)", report.duration_secs(), report.frames.len());
            if let Some(t) = report.effective_threshold {
                println!("Threshold: {:.3} (sensitivity {:.2})", t, engine.detector().sensitivity());
            }
            println!("Incidents: {}", report.incidents.len());
            for inc in &report.incidents {
                let verdict = inc
                    .verification
                    .as_ref()
                    .map(|v| format!(" [{:?}: {}]", v.status, v.reason))
                    .unwrap_or_default();
                println!(
                    "  {} @ {:.2}s for {:.2}s  peak x{:.2}  {}{}",
                    inc.id,
                    inc.start_offset,
                    inc.duration,
                    inc.peak_intensity,
                    inc.severity.as_str(),
                    verdict
                );
            }
        }

        Command::Inspect => {
            let engine = Engine::init(config)?;
            println!("{}", serde_json::to_string_pretty(&engine.status())?);
        }
    }

    Ok(())
}
