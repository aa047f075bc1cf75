//! funsd-ocr - FUNSD dataset preparation and PaddleOCR orchestration
//!
//! Prepares the FUNSD form dataset for text detection and recognition
//! finetuning, then drives the PaddleOCR training, export and inference
//! scripts as external processes.

mod config;
mod dataset;
mod demo;
mod error;
mod toolkit;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;
use crate::dataset::{cleaner, recognition, ErrorPolicy, Granularity, Split};
use crate::toolkit::{ModelRunner, SubprocessRunner, TrackingCredentials};

/// funsd-ocr - FUNSD preparation and PaddleOCR finetuning
#[derive(Parser, Debug)]
#[command(name = "funsd-ocr")]
#[command(about = "Prepare FUNSD for PaddleOCR and drive training, export and inference")]
struct Cli {
    /// Configuration file (defaults to the per-user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

/// Dataset options shared by the preparation commands
#[derive(clap::Args, Debug)]
struct DatasetArgs {
    /// Dataset root holding `train/` and `validation/`
    #[arg(long)]
    root: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the whole preparation pipeline: split, flatten, crop, clean
    Prepare {
        #[command(flatten)]
        dataset: DatasetArgs,
        #[arg(long)]
        ratio: Option<f64>,
        #[arg(long, value_enum)]
        granularity: Option<Granularity>,
        #[arg(long, value_enum)]
        on_error: Option<ErrorPolicy>,
    },
    /// Move a seeded random share of train documents to validation
    Split {
        #[command(flatten)]
        dataset: DatasetArgs,
        #[arg(long)]
        ratio: Option<f64>,
    },
    /// Write the detection index of both splits
    Flatten {
        #[command(flatten)]
        dataset: DatasetArgs,
    },
    /// Crop recognition samples and write the recognition index of both splits
    Crop {
        #[command(flatten)]
        dataset: DatasetArgs,
        #[arg(long, value_enum)]
        granularity: Option<Granularity>,
        #[arg(long, value_enum)]
        on_error: Option<ErrorPolicy>,
    },
    /// Write a cleaned copy of a recognition index
    Clean {
        /// Recognition index to clean
        index: PathBuf,
    },
    /// Finetune a model from a PaddleOCR training config
    Train {
        /// PaddleOCR YAML training config
        config_file: PathBuf,
        /// Experiment-tracking project name
        #[arg(long)]
        project: String,
    },
    /// Export a finetuned checkpoint to inference format
    Export {
        /// Directory holding `config.yml` and `best_accuracy`
        model_dir: PathBuf,
    },
    /// Run detection and recognition over a directory of images
    Infer {
        #[arg(long)]
        det_model_dir: PathBuf,
        #[arg(long)]
        rec_model_dir: PathBuf,
        #[arg(long)]
        image_dir: PathBuf,
        #[arg(long)]
        output_dir: PathBuf,
    },
    /// Detect and recognize text in one image and save an outlined copy
    Demo {
        image: PathBuf,
        #[arg(long)]
        det_model_dir: PathBuf,
        #[arg(long)]
        rec_model_dir: PathBuf,
        #[arg(long, default_value = "demo_output")]
        output_dir: PathBuf,
    },
    /// Write the default configuration file
    InitConfig,
}

fn main() -> Result<()> {
    // Before anything reads the environment, RUST_LOG and WANDB_API_KEY included
    let env_file = toolkit::runner::load_dotenv();
    let cli = Cli::parse();

    // Initialize logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    if let Some(path) = &env_file {
        debug!("Loaded environment from {:?}", path);
    }

    let config_path = match cli.config {
        Some(path) => path,
        None => config::default_config_path()?,
    };

    if let Command::InitConfig = cli.command {
        config::save_config(&AppConfig::default(), &config_path)?;
        info!("Wrote default configuration to {:?}", config_path);
        return Ok(());
    }

    let config = load_or_default_config(&config_path)?;
    run(cli.command, config)
}

/// Load configuration from file, falling back to defaults when absent
fn load_or_default_config(path: &Path) -> Result<AppConfig> {
    if path.exists() {
        let config = config::load_config(path)
            .with_context(|| format!("Failed to load configuration from {:?}", path))?;
        info!("Loaded configuration from {:?}", path);
        return Ok(config);
    }
    info!("Using default configuration");
    Ok(AppConfig::default())
}

fn run(command: Command, config: AppConfig) -> Result<()> {
    let settings = config.dataset;
    let root_of = |args: DatasetArgs| args.root.unwrap_or_else(|| settings.root.clone());
    let model_runner = || ModelRunner::new(SubprocessRunner, config.toolkit.clone());

    match command {
        Command::Prepare {
            dataset,
            ratio,
            granularity,
            on_error,
        } => {
            let root = root_of(dataset);
            split(&root, ratio.unwrap_or(settings.split_ratio))?;
            flatten(&root)?;
            let indexes = crop(
                &root,
                granularity.unwrap_or(settings.granularity),
                on_error.unwrap_or(settings.on_error),
            )?;
            for index in indexes {
                clean(&index)?;
            }
            info!("Dataset in {:?} ready for finetuning", root);
        }
        Command::Split { dataset, ratio } => {
            split(&root_of(dataset), ratio.unwrap_or(settings.split_ratio))?;
        }
        Command::Flatten { dataset } => flatten(&root_of(dataset))?,
        Command::Crop {
            dataset,
            granularity,
            on_error,
        } => {
            crop(
                &root_of(dataset),
                granularity.unwrap_or(settings.granularity),
                on_error.unwrap_or(settings.on_error),
            )?;
        }
        Command::Clean { index } => clean(&index)?,
        Command::Train {
            config_file,
            project,
        } => {
            // Checked before the config file is touched
            let credentials = TrackingCredentials::from_env()?;
            model_runner().train(&config_file, &project, &credentials)?;
            info!("Finetuning with {:?} finished", config_file);
        }
        Command::Export { model_dir } => {
            model_runner().export(&model_dir)?;
            info!("Exported inference model to {:?}", model_dir);
        }
        Command::Infer {
            det_model_dir,
            rec_model_dir,
            image_dir,
            output_dir,
        } => {
            model_runner().infer(&det_model_dir, &rec_model_dir, &image_dir, &output_dir)?;
            info!("Inference results written to {:?}", output_dir);
        }
        Command::Demo {
            image,
            det_model_dir,
            rec_model_dir,
            output_dir,
        } => {
            let report = demo::run_demo(
                &model_runner(),
                &image,
                &det_model_dir,
                &rec_model_dir,
                &output_dir,
            )?;
            for text in report.transcriptions() {
                println!("{}", text);
            }
            info!("Annotated image saved to {:?}", report.annotated);
        }
        Command::InitConfig => {}
    }

    Ok(())
}

fn split(root: &Path, ratio: f64) -> Result<()> {
    let moved = dataset::partition(root, ratio)?;
    info!("Moved {} documents to {}", moved, Split::Validation);
    Ok(())
}

fn flatten(root: &Path) -> Result<()> {
    for split in Split::ALL {
        let records = dataset::flatten_split(root, split)?;
        info!("{}: {} detection records", split, records);
    }
    Ok(())
}

/// Returns the recognition index written for each split
fn crop(root: &Path, granularity: Granularity, policy: ErrorPolicy) -> Result<Vec<PathBuf>> {
    let mut indexes = Vec::new();
    for split in Split::ALL {
        let stats = dataset::extract(root, split, granularity, policy)?;
        info!(
            "{}: {} crops, {} degenerate boxes, {} documents skipped",
            split, stats.records, stats.degenerate, stats.skipped_documents
        );
        indexes.push(recognition::recognition_index_path(root, split));
    }
    Ok(indexes)
}

fn clean(index: &Path) -> Result<()> {
    let report = cleaner::clean_file(index)?;
    info!(
        "Kept {} of {} rows in {:?}",
        report.kept_rows, report.input_rows, report.output
    );
    Ok(())
}
