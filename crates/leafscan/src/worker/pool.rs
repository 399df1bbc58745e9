use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, error, info};

use crate::config::Config;
use crate::error::WorkerError;
use crate::inference::{ModelRegistry, NetworkLoader};
use crate::store::Stores;
use crate::worker::{PipelineWorker, RunMode, ShutdownSignal};

/// Runs `worker.worker_count` pipeline workers on their own threads.
///
/// Every thread opens its own stores and loads its own models. The first
/// worker to fail triggers the shared shutdown signal so the rest stop
/// after their current job.
pub struct WorkerPool {
    workers: Vec<JoinHandle<Result<(), WorkerError>>>,
    shutdown: ShutdownSignal,
}

impl WorkerPool {
    pub fn start(
        config: Arc<Config>,
        mode: RunMode,
        registry: Arc<ModelRegistry>,
        loader: Arc<dyn NetworkLoader>,
        shutdown: ShutdownSignal,
    ) -> Result<Self, WorkerError> {
        let worker_count = config.worker.worker_count.max(1);
        let mut workers = Vec::with_capacity(worker_count);

        for worker_id in 0..worker_count {
            let config = Arc::clone(&config);
            let registry = Arc::clone(&registry);
            let loader = Arc::clone(&loader);
            let shutdown_signal = shutdown.clone();

            let spawned = thread::Builder::new()
                .name(format!("leafscan-worker-{}", worker_id))
                .spawn(move || {
                    let _guard = TriggerOnPanic(shutdown_signal.clone());
                    let result = run_worker(
                        worker_id,
                        &config,
                        mode,
                        &registry,
                        loader.as_ref(),
                        &shutdown_signal,
                    );
                    if let Err(e) = &result {
                        error!("Worker {} failed: {}", worker_id, e);
                        shutdown_signal.trigger();
                    }
                    result
                });

            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    // Stop whatever already started before reporting.
                    shutdown.trigger();
                    let pool = Self { workers, shutdown };
                    let _ = pool.wait();
                    return Err(WorkerError::SpawnFailed(e.to_string()));
                }
            }
        }

        info!("Started {} {} workers", worker_count, mode);

        Ok(Self { workers, shutdown })
    }

    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.trigger();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_triggered()
    }

    /// Joins every worker and returns the first failure, if any.
    pub fn wait(self) -> Result<(), WorkerError> {
        let mut first_error = None;

        for (i, worker) in self.workers.into_iter().enumerate() {
            let outcome = match worker.join() {
                Ok(result) => result,
                Err(_) => Err(WorkerError::Panicked(i)),
            };
            match outcome {
                Ok(()) => debug!("Worker {} finished", i),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        info!("All workers have stopped");
        first_error.map_or(Ok(()), Err)
    }
}

fn run_worker(
    worker_id: usize,
    config: &Config,
    mode: RunMode,
    registry: &ModelRegistry,
    loader: &dyn NetworkLoader,
    shutdown: &ShutdownSignal,
) -> Result<(), WorkerError> {
    debug!("Worker {} opening stores", worker_id);
    let stores = Stores::open(config)?;
    let descriptors = stores.database.enabled_models()?;
    let models = registry.load_models(&descriptors, stores.storage.as_ref(), mode, loader)?;

    PipelineWorker::new(stores, models, mode, config.worker.polling_interval())
        .with_id(worker_id)
        .run(shutdown)
}

/// Triggers shutdown if the owning worker thread unwinds.
struct TriggerOnPanic(ShutdownSignal);

impl Drop for TriggerOnPanic {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.trigger();
        }
    }
}
