//! Test harness for isolated pipeline runs.
//!
//! Each `TestHarness` owns a temporary directory holding the SQLite
//! database (and the blob root when the filesystem backend is selected),
//! plus the configuration pointing at it.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use leafscan::config::{load_config_from_str, Config};
use leafscan::inference::ModelRegistry;
use leafscan::ingest::{enqueue_report, insert_model, EnqueueRequest};
use leafscan::model::{
    ModelId, ModelType, NewModel, ProcessingModelType, ReportId, ValidationModelType,
};
use leafscan::store::Stores;
use leafscan::worker::{PipelineWorker, RunMode, ShutdownSignal};

use super::stubs::StubLoader;

pub struct TestHarness {
    temp_dir: TempDir,
    pub db_path: PathBuf,
    pub blob_root: Option<PathBuf>,
    pub config: Arc<Config>,
    pub loader: StubLoader,
}

impl TestHarness {
    /// Blobs are kept in the database.
    pub fn new() -> Self {
        Self::build(false, 1)
    }

    /// Blobs are kept under a directory next to the database.
    pub fn with_filesystem_storage() -> Self {
        Self::build(true, 1)
    }

    pub fn with_workers(worker_count: usize) -> Self {
        Self::build(false, worker_count)
    }

    fn build(filesystem: bool, worker_count: usize) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db_path = temp_dir.path().join("leafscan.db");
        let blob_root = filesystem.then(|| temp_dir.path().join("blobs"));

        let storage = match &blob_root {
            Some(root) => serde_json::json!({ "backend": "filesystem", "root": root }),
            None => serde_json::json!({ "backend": "database" }),
        };
        let json = serde_json::json!({
            "version": "1.0",
            "database": { "path": db_path },
            "storage": storage,
            "worker": { "polling_interval_secs": 0.01, "worker_count": worker_count },
            "inference": { "weights_cache": temp_dir.path().join("weights") }
        });
        let config = load_config_from_str(&json.to_string()).expect("Failed to load test config");

        let harness = Self {
            temp_dir,
            db_path,
            blob_root,
            config: Arc::new(config),
            loader: StubLoader::new(),
        };
        // Creates and migrates the database before any worker touches it.
        harness.stores();
        harness
    }

    /// Opens a fresh connection, as a separate process would.
    pub fn stores(&self) -> Stores {
        Stores::open(&self.config).expect("Failed to open stores")
    }

    pub fn register(&self, kind: ModelType) -> ModelId {
        let model = NewModel {
            kind,
            subtype: "resnet".to_string(),
            module: "resnet".to_string(),
            class_name: "ResNet".to_string(),
            version: "1.0.0".to_string(),
            enabled: true,
        };
        insert_model(&self.stores(), &model, b"weights").expect("Failed to register model")
    }

    pub fn register_occ(&self) -> ModelId {
        self.register(ModelType::Validation(ValidationModelType::CoffeeLeafOcc))
    }

    pub fn register_processing(&self, kind: ProcessingModelType) -> ModelId {
        self.register(ModelType::Processing(kind))
    }

    pub fn enqueue(
        &self,
        image: Vec<u8>,
        processing_model_id: ModelId,
        processing_model_type: ProcessingModelType,
        generate_mask: bool,
        validation_model_id: Option<ModelId>,
    ) -> ReportId {
        let request = EnqueueRequest {
            user_id: 7,
            filename: "leaf.jpg".to_string(),
            image,
            processing_model_id,
            processing_model_type,
            generate_mask,
            validation_model_id,
        };
        enqueue_report(&self.stores(), &request).expect("Failed to enqueue report")
    }

    /// A worker on its own connection with every enabled model loaded.
    pub fn worker(&self, mode: RunMode) -> PipelineWorker {
        let stores = self.stores();
        let descriptors = stores.database.enabled_models().expect("Failed to list models");
        let models = ModelRegistry::standard()
            .load_models(&descriptors, stores.storage.as_ref(), mode, &self.loader)
            .expect("Failed to load models");
        PipelineWorker::new(stores, models, mode, self.config.worker.polling_interval())
    }

    /// Runs a worker in `mode` until its queues are empty.
    pub fn drain(&self, mode: RunMode) {
        self.worker(mode)
            .run_until_idle(&ShutdownSignal::new())
            .expect("Worker failed");
    }

    /// Polls `condition` until it holds or `timeout` passes.
    pub fn wait_for(&self, timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        condition()
    }
}
