//! leafscan command line.
//!
//! Runs pipeline workers and performs the administrative operations that
//! feed them: registering models, toggling them and queueing images.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use log::{info, warn};

use leafscan::config::{load_config, resolve_config_path, Config};
use leafscan::error::{LeafscanError, StorageError};
use leafscan::inference::{CommandLoader, ModelRegistry};
use leafscan::ingest::{enqueue_report, insert_model, EnqueueRequest};
use leafscan::model::{ModelCategory, ModelId, ModelType, NewModel, ProcessingModelType, UserId};
use leafscan::store::Stores;
use leafscan::worker::{RunMode, ShutdownSignal, WorkerPool};

#[derive(Parser)]
#[command(name = "leafscan", version)]
#[command(about = "Leaf image diagnosis queue and workers", long_about = None)]
struct Cli {
    /// Configuration file (defaults to $LEAFSCAN_CONFIG, then the user config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run pipeline workers until interrupted
    Worker {
        /// Queues to drain: validation, processing or both
        mode: RunMode,

        /// Overrides worker.worker_count
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Register a model and store its weights
    InsertModel {
        /// validation or processing
        category: ModelCategory,
        /// Type name within the category, e.g. COFFEE_LEAF_OCC
        model_type: String,
        subtype: String,
        module: String,
        class_name: String,
        #[arg(value_name = "VERSION")]
        model_version: String,
        weights_file: PathBuf,

        /// Make the model available to workers immediately
        #[arg(long)]
        enabled: bool,
    },

    /// Enable or disable a registered model
    EnableModel {
        model_id: ModelId,

        #[arg(long)]
        disable: bool,
    },

    /// Queue an image for diagnosis and print the report id
    Enqueue {
        user_id: UserId,
        image_file: PathBuf,
        processing_model_id: ModelId,
        /// classification or segmentation
        processing_model_type: ProcessingModelType,

        /// Store a stress mask (segmentation only)
        #[arg(long)]
        generate_mask: bool,

        /// Validate the image with this model before processing
        #[arg(long)]
        validation_model_id: Option<ModelId>,
    },

    /// Print queue and buffer sizes
    Status,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), LeafscanError> {
    let config_path = resolve_config_path(cli.config.as_deref())?;
    let config = load_config(&config_path)?;
    leafscan::logging::init(&config.logging)?;
    info!("Using configuration {}", config_path.display());

    match cli.command {
        Commands::Worker { mode, workers } => run_workers(config, mode, workers),
        Commands::InsertModel {
            category,
            model_type,
            subtype,
            module,
            class_name,
            model_version,
            weights_file,
            enabled,
        } => {
            let model = NewModel {
                kind: ModelType::from_parts(category, &model_type)?,
                subtype,
                module,
                class_name,
                version: model_version,
                enabled,
            };
            let weights = read_file(&weights_file)?;
            let stores = Stores::open(&config)?;
            let model_id = insert_model(&stores, &model, &weights)?;
            println!("{}", model_id);
            Ok(())
        }
        Commands::EnableModel { model_id, disable } => {
            let stores = Stores::open(&config)?;
            stores.database.set_model_enabled(model_id, !disable)?;
            info!(
                "Model {} {}",
                model_id,
                if disable { "disabled" } else { "enabled" }
            );
            Ok(())
        }
        Commands::Enqueue {
            user_id,
            image_file,
            processing_model_id,
            processing_model_type,
            generate_mask,
            validation_model_id,
        } => {
            let request = EnqueueRequest {
                user_id,
                filename: image_file
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_else(|| image_file.to_string_lossy().into_owned()),
                image: read_file(&image_file)?,
                processing_model_id,
                processing_model_type,
                generate_mask,
                validation_model_id,
            };
            let stores = Stores::open(&config)?;
            let report_id = enqueue_report(&stores, &request)?;
            println!("{}", report_id);
            Ok(())
        }
        Commands::Status => {
            let stores = Stores::open(&config)?;
            let counts = stores.queue.counts()?;
            println!("processing queue: {}", counts.processing);
            println!("validation queue: {}", counts.validation);
            println!("validation buffer: {}", counts.buffer);
            Ok(())
        }
    }
}

fn run_workers(
    mut config: Config,
    mode: RunMode,
    workers: Option<usize>,
) -> Result<(), LeafscanError> {
    if let Some(count) = workers {
        config.worker.worker_count = count.max(1);
    }

    // Create and migrate the database before any worker opens it.
    Stores::open(&config)?;

    let shutdown = ShutdownSignal::new();
    let handler_signal = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Interrupt received, stopping workers");
        handler_signal.trigger();
    }) {
        warn!("Failed to install interrupt handler: {}", e);
    }

    let loader = Arc::new(CommandLoader::new(&config.inference));
    let pool = WorkerPool::start(
        Arc::new(config),
        mode,
        Arc::new(ModelRegistry::standard()),
        loader,
        shutdown,
    )?;
    pool.wait()?;
    Ok(())
}

fn read_file(path: &Path) -> Result<Vec<u8>, StorageError> {
    std::fs::read(path).map_err(|e| StorageError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })
}
