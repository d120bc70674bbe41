//! eeg-crop CLI
//!
//! Cropped-trial decoding of motor-imagery EEG.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use eeg_crop_decoder::{
    config::Config,
    core::{GroupKey, RunReport},
    model::ModelKind,
    runlog::RunLog,
    Pipeline, VERSION,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "eeg-crop")]
#[command(version = VERSION)]
#[command(about = "Cropped-trial EEG decoding", long_about = None)]
struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline: probe, window, split, train and score
    Fit {
        /// Model architecture (shallow or deep)
        #[arg(long)]
        model: Option<String>,

        /// Number of training epochs
        #[arg(long)]
        epochs: Option<usize>,

        /// Comma-separated subject ids
        #[arg(long, value_delimiter = ',')]
        subjects: Vec<u32>,

        /// Seed for initialisation, data and shuffling
        #[arg(long)]
        seed: Option<u64>,

        /// Directory of stored JSON recordings
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Output directory for the run report
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Show the receptive field and predictions per input window
    Probe {
        /// Model architecture (shallow or deep)
        #[arg(long)]
        model: Option<String>,

        /// Input window length in samples
        #[arg(long)]
        input_length: Option<usize>,

        /// Length of the final convolution
        #[arg(long)]
        final_conv_length: Option<usize>,
    },

    /// Count windows and trials per session
    Windows {
        /// Comma-separated subject ids
        #[arg(long, value_delimiter = ',')]
        subjects: Vec<u32>,

        /// Directory of stored JSON recordings
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Fixed window stride instead of the probed one
        #[arg(long)]
        stride: Option<i64>,
    },

    /// Show cumulative run statistics
    Status,

    /// Show configuration
    Config,

    /// Write the default configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_file = cli.config.as_deref();

    let result = match cli.command {
        Commands::Fit {
            model,
            epochs,
            subjects,
            seed,
            data_dir,
            output,
        } => cmd_fit(config_file, model, epochs, subjects, seed, data_dir, output),
        Commands::Probe {
            model,
            input_length,
            final_conv_length,
        } => cmd_probe(config_file, model, input_length, final_conv_length),
        Commands::Windows {
            subjects,
            data_dir,
            stride,
        } => cmd_windows(config_file, subjects, data_dir, stride),
        Commands::Status => cmd_status(config_file),
        Commands::Config => cmd_config(config_file),
        Commands::InitConfig { force } => cmd_init_config(config_file, force),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::load().context("loading config")?,
    };
    Ok(config)
}

fn apply_model(config: &mut Config, model: Option<String>) -> Result<()> {
    if let Some(name) = model {
        let kind: ModelKind = name.parse()?;
        if kind != config.model.kind {
            config.model.final_conv_length = None;
        }
        config.model.kind = kind;
    }
    Ok(())
}

fn apply_dataset(config: &mut Config, subjects: Vec<u32>, data_dir: Option<PathBuf>) {
    if !subjects.is_empty() {
        config.dataset.subject_ids = subjects;
    }
    if data_dir.is_some() {
        config.dataset.data_dir = data_dir;
    }
}

fn cmd_fit(
    config_file: Option<&Path>,
    model: Option<String>,
    epochs: Option<usize>,
    subjects: Vec<u32>,
    seed: Option<u64>,
    data_dir: Option<PathBuf>,
    output: Option<PathBuf>,
) -> Result<()> {
    let mut config = load_config(config_file)?;
    apply_model(&mut config, model)?;
    apply_dataset(&mut config, subjects, data_dir);
    if let Some(epochs) = epochs {
        config.training.epochs = epochs;
    }
    if let Some(seed) = seed {
        config.seed = seed;
    }
    if let Some(output) = output {
        config.export_path = output;
    }
    config.validate()?;
    config
        .ensure_directories()
        .context("creating output directories")?;

    println!("eeg-crop v{VERSION}");
    println!();
    println!("  Dataset: {} subjects {:?}", config.dataset.name, config.dataset.subject_ids);
    println!("  Model: {}", config.model.kind.name());
    println!("  Epochs: {}", config.training.epochs);
    println!("  Seed: {}", config.seed);
    println!();

    let stop = Arc::new(AtomicBool::new(false));
    let handler_flag = stop.clone();
    ctrlc::set_handler(move || {
        handler_flag.store(true, Ordering::SeqCst);
    })
    .context("setting Ctrl+C handler")?;

    let runlog = Arc::new(RunLog::with_persistence(config.runlog_path()));
    let pipeline = Pipeline::new(config).with_runlog(runlog.clone());

    let report = pipeline.run(Some(&stop))?;
    let path = pipeline.export(&report)?;
    runlog.save().context("saving run log")?;

    print_report(&report);
    println!();
    println!("Report written to {}", path.display());
    Ok(())
}

fn print_report(report: &RunReport) {
    if let Some(split) = &report.split {
        println!("Split: {}", split.strategy);
        println!(
            "  train: {} windows / {} trials",
            split.train_windows, split.train_trials
        );
        println!(
            "  valid: {} windows / {} trials",
            split.valid_windows, split.valid_trials
        );
        println!();
    }

    for record in &report.epochs {
        let valid_loss = record
            .valid_loss
            .map(|l| format!("{l:.4}"))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "Epoch {:>3}  train_loss {:.4}  valid_loss {}  ({} ms)",
            record.epoch, record.train_loss, valid_loss, record.duration_ms
        );
        for score in &record.scores {
            println!(
                "    {:<24} {:.4}{}",
                score.name,
                score.value,
                if score.is_best { "  *" } else { "" }
            );
        }
    }

    if report.stopped_early {
        println!();
        println!("Training stopped early on request.");
    }
}

fn cmd_probe(
    config_file: Option<&Path>,
    model: Option<String>,
    input_length: Option<usize>,
    final_conv_length: Option<usize>,
) -> Result<()> {
    let mut config = load_config(config_file)?;
    apply_model(&mut config, model)?;
    if let Some(length) = input_length {
        config.model.input_time_length = length;
    }
    if final_conv_length.is_some() {
        config.model.final_conv_length = final_conv_length;
    }

    let pipeline = Pipeline::new(config);
    let model = pipeline.build_model()?;
    let probe = pipeline.probe(&model)?;

    println!("Model: {}", pipeline.config().model.kind.name());
    println!("Temporal layers:");
    for layer in &model.architecture().layers {
        println!(
            "  {:<16} kernel {:>3}  dilation {:>3}",
            layer.name, layer.kernel, layer.dilation
        );
    }
    println!("Receptive field: {} samples", probe.receptive_field);
    println!("Input length: {} samples", probe.input_time_length);
    println!("Predictions per input: {}", probe.n_preds_per_input);
    Ok(())
}

fn cmd_windows(
    config_file: Option<&Path>,
    subjects: Vec<u32>,
    data_dir: Option<PathBuf>,
    stride: Option<i64>,
) -> Result<()> {
    let mut config = load_config(config_file)?;
    apply_dataset(&mut config, subjects, data_dir);
    if stride.is_some() {
        config.windowing.window_stride_samples = stride;
    }
    config.validate()?;

    let pipeline = Pipeline::new(config);
    let source = pipeline.source();
    let prepared = pipeline.prepare(source.as_ref())?;

    println!(
        "Window size {} samples, stride {} samples, trial span {} samples",
        prepared.windowing.window_size_samples,
        prepared.windowing.window_stride_samples,
        prepared.windowing.trial_span_samples()
    );
    println!();
    println!("{:<16} {:>8} {:>8}", "session", "windows", "trials");
    for (session, (windows, trials)) in prepared.dataset.counts_by(GroupKey::Session) {
        println!("{session:<16} {windows:>8} {trials:>8}");
    }
    println!(
        "{:<16} {:>8} {:>8}",
        "total",
        prepared.dataset.len(),
        prepared.dataset.n_trials()
    );
    Ok(())
}

fn cmd_status(config_file: Option<&Path>) -> Result<()> {
    let config = load_config(config_file)?;

    println!("eeg-crop Status");
    println!("===============");
    println!();

    let path = config.runlog_path();
    if !path.exists() {
        println!("No previous runs found.");
        return Ok(());
    }

    let runlog = RunLog::with_persistence(path);
    println!("{}", runlog.summary());
    println!();
    println!("Reports directory: {}", config.export_path.display());
    Ok(())
}

fn cmd_config(config_file: Option<&Path>) -> Result<()> {
    let config = load_config(config_file)?;
    let path = config_file
        .map(Path::to_path_buf)
        .unwrap_or_else(Config::config_path);

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {}", path.display());
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn cmd_init_config(config_file: Option<&Path>, force: bool) -> Result<()> {
    let path = config_file
        .map(Path::to_path_buf)
        .unwrap_or_else(Config::config_path);
    if path.exists() && !force {
        bail!(
            "{} already exists, pass --force to overwrite",
            path.display()
        );
    }

    Config::default().save_to(&path)?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}
