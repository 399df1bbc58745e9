//! The polling worker that drains the validation and processing queues.

use std::time::Duration;

use tracing::{debug, info, info_span, warn};

use crate::db::queue_repo::QueueElement;
use crate::error::WorkerError;
use crate::inference::{DispatchArgs, DispatchError, Inference, LoadedModels};
use crate::model::ProcessingModelType;
use crate::store::Stores;
use crate::worker::{RunMode, ShutdownSignal};

/// What a single poll did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Every queue this worker drains was empty.
    Idle,
    /// Jobs handled from each queue.
    Worked { validation: usize, processing: usize },
}

/// A single-threaded worker bound to one run mode.
///
/// The worker keeps no job state between iterations: everything it still
/// owes lives in the queue and buffer tables, so a killed worker can simply
/// be restarted.
pub struct PipelineWorker {
    id: usize,
    stores: Stores,
    models: LoadedModels,
    mode: RunMode,
    polling_interval: Duration,
}

impl PipelineWorker {
    pub fn new(
        stores: Stores,
        models: LoadedModels,
        mode: RunMode,
        polling_interval: Duration,
    ) -> Self {
        Self {
            id: 0,
            stores,
            models,
            mode,
            polling_interval,
        }
    }

    /// Sets the id used in log spans.
    pub fn with_id(mut self, id: usize) -> Self {
        self.id = id;
        self
    }

    /// Polls until `shutdown` is triggered, sleeping for the polling
    /// interval whenever there is nothing to do. Returns the first fatal
    /// error.
    pub fn run(&self, shutdown: &ShutdownSignal) -> Result<(), WorkerError> {
        let _span = info_span!("worker", id = self.id, mode = %self.mode).entered();
        info!(models = self.models.len(), "Worker started");
        if self.models.is_empty() {
            warn!("No enabled models for this run mode; queued jobs will fail dispatch");
        }

        while !shutdown.is_triggered() {
            if self.poll_once(shutdown)? == PollOutcome::Idle && shutdown.wait(self.polling_interval) {
                break;
            }
        }

        info!("Worker stopped");
        Ok(())
    }

    /// Polls until every queue this worker drains is empty.
    pub fn run_until_idle(&self, shutdown: &ShutdownSignal) -> Result<(), WorkerError> {
        let _span = info_span!("worker", id = self.id, mode = %self.mode).entered();
        while !shutdown.is_triggered() {
            if self.poll_once(shutdown)? == PollOutcome::Idle {
                break;
            }
        }
        Ok(())
    }

    /// Checks the queues of this worker's mode and drains the non-empty
    /// ones, validation first.
    pub fn poll_once(&self, shutdown: &ShutdownSignal) -> Result<PollOutcome, WorkerError> {
        let validation_pending = self.mode.drains_validation()
            && pending("validation", self.stores.queue.has_validation_elements());
        let processing_pending = self.mode.drains_processing()
            && pending("processing", self.stores.queue.has_processing_elements());

        if !validation_pending && !processing_pending {
            return Ok(PollOutcome::Idle);
        }

        let validation = if validation_pending {
            self.drain_validation(shutdown)?
        } else {
            0
        };
        let processing = if processing_pending {
            self.drain_processing(shutdown)?
        } else {
            0
        };

        Ok(PollOutcome::Worked {
            validation,
            processing,
        })
    }

    /// Handles validation jobs until the queue is empty or shutdown is
    /// requested.
    pub fn drain_validation(&self, shutdown: &ShutdownSignal) -> Result<usize, WorkerError> {
        let mut handled = 0;
        while !shutdown.is_triggered() {
            let Some(element) = dequeued("validation", self.stores.queue.dequeue_validation())
            else {
                break;
            };
            self.handle_validation(&element)?;
            handled += 1;
        }
        Ok(handled)
    }

    /// Handles processing jobs until the queue is empty or shutdown is
    /// requested.
    pub fn drain_processing(&self, shutdown: &ShutdownSignal) -> Result<usize, WorkerError> {
        let mut handled = 0;
        while !shutdown.is_triggered() {
            let Some(element) = dequeued("processing", self.stores.queue.dequeue_processing())
            else {
                break;
            };
            self.handle_processing(&element)?;
            handled += 1;
        }
        Ok(handled)
    }

    fn handle_validation(&self, element: &QueueElement) -> Result<(), WorkerError> {
        let _span = info_span!(
            "job",
            queue = "validation",
            job_id = element.id,
            report_id = element.report_id
        )
        .entered();

        let valid = match self.dispatch(element)? {
            Inference::Validity { valid } => valid,
            other => return Err(unexpected(element, "validity", &other)),
        };

        // The buffered job is resolved before the report records validity.
        if !self.stores.queue.apply_validation_result(element.id, valid)? {
            warn!("No buffered entry for job; result already applied");
        }
        self.stores
            .database
            .update_report_validity(element.report_id, element.report_type, valid)?;

        info!(valid, "Validation job completed");
        Ok(())
    }

    fn handle_processing(&self, element: &QueueElement) -> Result<(), WorkerError> {
        let _span = info_span!(
            "job",
            queue = "processing",
            job_id = element.id,
            report_id = element.report_id
        )
        .entered();

        match (element.report_type, self.dispatch(element)?) {
            (ProcessingModelType::Classification, Inference::Classification { disease, severity }) => {
                self.stores
                    .database
                    .update_classification_report(element.report_id, disease, severity)?;
                info!(disease, severity, "Classification job completed");
            }
            (
                ProcessingModelType::Segmentation,
                Inference::Segmentation {
                    stress_ratio,
                    severity,
                    mask,
                },
            ) => {
                if let Some(mask) = &mask {
                    self.stores.storage.store_mask(element.report_id, mask)?;
                }
                self.stores.database.update_segmentation_report(
                    element.report_id,
                    stress_ratio,
                    u32::from(severity),
                )?;
                info!(
                    stress_ratio,
                    severity,
                    mask = mask.is_some(),
                    "Segmentation job completed"
                );
            }
            (ProcessingModelType::Classification, other) => {
                return Err(unexpected(element, "classification", &other))
            }
            (ProcessingModelType::Segmentation, other) => {
                return Err(unexpected(element, "segmentation", &other))
            }
        }
        Ok(())
    }

    fn dispatch(&self, element: &QueueElement) -> Result<Inference, DispatchError> {
        debug!(model_id = element.model_id, "Dispatching job");
        self.models.dispatch(
            element.model_id,
            &element.image,
            &DispatchArgs {
                generate_mask: element.generate_mask,
            },
        )
    }
}

/// Queue checks only drive back-off, so a failed check counts as empty.
fn pending(queue: &str, result: Result<bool, crate::db::DatabaseError>) -> bool {
    result.unwrap_or_else(|e| {
        warn!(queue, error = %e, "Queue check failed");
        false
    })
}

/// A failed dequeue left the queue unchanged; retry on the next poll.
fn dequeued(
    queue: &str,
    result: Result<Option<QueueElement>, crate::db::DatabaseError>,
) -> Option<QueueElement> {
    result.unwrap_or_else(|e| {
        warn!(queue, error = %e, "Dequeue failed");
        None
    })
}

fn unexpected(element: &QueueElement, expected: &'static str, found: &Inference) -> WorkerError {
    DispatchError::UnexpectedOutput {
        model_id: element.model_id,
        expected,
        found: found.kind(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::queue_repo::{NewJob, QueueCounts};
    use crate::db::SqliteHandle;
    use crate::inference::{InferenceError, ModelRegistry, Network, NetworkLoader, Tensor};
    use crate::model::{Model, ModelType, NewModel, ValidationModelType};

    /// Validity is decided by the first image byte: 0 is a leaf.
    struct ByteNetwork;

    impl Network for ByteNetwork {
        fn forward(&self, image: &[u8]) -> Result<Vec<Tensor>, InferenceError> {
            let leaf = image.first() == Some(&0);
            let scores = if leaf { vec![1.0, 0.0] } else { vec![0.0, 1.0] };
            Ok(vec![
                Tensor::new(vec![1, 2], scores.clone())?,
                Tensor::new(vec![1, 2], scores)?,
            ])
        }
    }

    struct ByteLoader;

    impl NetworkLoader for ByteLoader {
        fn load(&self, _model: &Model, _weights: &[u8]) -> Result<Box<dyn Network>, InferenceError> {
            Ok(Box::new(ByteNetwork))
        }
    }

    fn setup(mode: RunMode) -> (Stores, PipelineWorker, i64, i64) {
        let stores = Stores::sqlite(SqliteHandle::open_in_memory().unwrap());
        let register = |kind: ModelType| {
            let id = stores
                .database
                .insert_model(&NewModel {
                    kind,
                    subtype: "resnet".to_string(),
                    module: "resnet".to_string(),
                    class_name: "ResNet".to_string(),
                    version: "1".to_string(),
                    enabled: true,
                })
                .unwrap();
            stores.storage.store_weights(id, b"w").unwrap();
            id
        };
        let occ = register(ModelType::Validation(ValidationModelType::CoffeeLeafOcc));
        let cls = register(ModelType::Processing(ProcessingModelType::Classification));

        let models = ModelRegistry::standard()
            .load_models(
                &stores.database.enabled_models().unwrap(),
                stores.storage.as_ref(),
                mode,
                &ByteLoader,
            )
            .unwrap();
        let worker = PipelineWorker::new(stores.clone(), models, mode, Duration::from_millis(10));
        (stores, worker, occ, cls)
    }

    fn enqueue(stores: &Stores, validation_model: Option<i64>, model_id: i64, first_byte: u8) -> i64 {
        let image_id = stores.database.insert_image(1, "leaf.jpg").unwrap();
        let report_id = stores
            .database
            .insert_classification_report(1, image_id, model_id)
            .unwrap();
        let job = NewJob {
            image_id,
            model_id,
            report_type: ProcessingModelType::Classification,
            report_id,
            image: vec![first_byte],
            generate_mask: None,
        };
        match validation_model {
            Some(v) => stores.queue.enqueue_validation(v, &job).unwrap(),
            None => stores.queue.enqueue_processing(&job).unwrap(),
        }
        report_id
    }

    #[test]
    fn test_idle_when_queues_are_empty() {
        let (_stores, worker, _, _) = setup(RunMode::Both);
        let outcome = worker.poll_once(&ShutdownSignal::new()).unwrap();
        assert_eq!(outcome, PollOutcome::Idle);
    }

    #[test]
    fn test_validation_mode_ignores_processing_queue() {
        let (stores, worker, _, cls) = setup(RunMode::Validation);
        enqueue(&stores, None, cls, 0);

        assert_eq!(worker.poll_once(&ShutdownSignal::new()).unwrap(), PollOutcome::Idle);
        assert_eq!(stores.queue.counts().unwrap().processing, 1);
    }

    #[test]
    fn test_both_mode_validates_then_processes() {
        let (stores, worker, occ, cls) = setup(RunMode::Both);
        let report_id = enqueue(&stores, Some(occ), cls, 0);

        let shutdown = ShutdownSignal::new();
        assert_eq!(
            worker.poll_once(&shutdown).unwrap(),
            PollOutcome::Worked {
                validation: 1,
                processing: 0
            }
        );
        worker.run_until_idle(&shutdown).unwrap();

        let report = stores.database.find_report(report_id).unwrap().unwrap();
        assert_eq!(report.valid, Some(true));
        assert!(report.is_processed());
    }

    #[test]
    fn test_reapplied_validation_still_records_validity() {
        let (stores, worker, occ, cls) = setup(RunMode::Validation);
        let report_id = enqueue(&stores, Some(occ), cls, 0);

        // A previous run promoted the job but died before writing validity.
        let element = stores.queue.dequeue_validation().unwrap().unwrap();
        assert!(stores.queue.apply_validation_result(element.id, true).unwrap());
        assert_eq!(stores.database.find_report(report_id).unwrap().unwrap().valid, None);

        worker.handle_validation(&element).unwrap();

        let report = stores.database.find_report(report_id).unwrap().unwrap();
        assert_eq!(report.valid, Some(true));
        assert_eq!(
            stores.queue.counts().unwrap(),
            QueueCounts {
                processing: 1,
                validation: 0,
                buffer: 0
            }
        );
    }

    #[test]
    fn test_invalid_job_is_dropped() {
        let (stores, worker, occ, cls) = setup(RunMode::Both);
        let report_id = enqueue(&stores, Some(occ), cls, 1);

        worker.run_until_idle(&ShutdownSignal::new()).unwrap();

        let report = stores.database.find_report(report_id).unwrap().unwrap();
        assert_eq!(report.valid, Some(false));
        assert!(!report.is_processed());
        assert_eq!(stores.queue.counts().unwrap(), Default::default());
    }

    #[test]
    fn test_unloaded_model_is_fatal() {
        let (stores, worker, _, cls) = setup(RunMode::Processing);
        let image_id = stores.database.insert_image(1, "leaf.jpg").unwrap();
        let report_id = stores
            .database
            .insert_classification_report(1, image_id, cls)
            .unwrap();
        stores
            .queue
            .enqueue_processing(&NewJob {
                image_id,
                model_id: 999,
                report_type: ProcessingModelType::Classification,
                report_id,
                image: vec![0],
                generate_mask: None,
            })
            .unwrap();

        let result = worker.poll_once(&ShutdownSignal::new());
        assert!(matches!(
            result,
            Err(WorkerError::Dispatch(DispatchError::ModelNotLoaded(999)))
        ));
    }

    #[test]
    fn test_triggered_shutdown_stops_draining() {
        let (stores, worker, _, cls) = setup(RunMode::Processing);
        enqueue(&stores, None, cls, 0);
        let shutdown = ShutdownSignal::new();
        shutdown.trigger();

        assert_eq!(worker.drain_processing(&shutdown).unwrap(), 0);
        worker.run(&shutdown).unwrap();
        assert_eq!(stores.queue.counts().unwrap().processing, 1);
    }
}
