//! Queue ordering and exclusivity across connections and worker pools.

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use common::stubs::stub_seq;
use common::{stub_image, TestHarness};

use leafscan::db::queue_repo::QueueCounts;
use leafscan::inference::ModelRegistry;
use leafscan::ingest::{enqueue_report, EnqueueRequest};
use leafscan::model::{ModelId, ProcessingModelType, ReportId};
use leafscan::store::Stores;
use leafscan::worker::{RunMode, ShutdownSignal, WorkerPool};

fn enqueue_many(
    stores: &Stores,
    count: u32,
    model_id: ModelId,
    validation_model_id: Option<ModelId>,
    leaf: impl Fn(u32) -> bool,
) -> Vec<ReportId> {
    (0..count)
        .map(|seq| {
            let request = EnqueueRequest {
                user_id: 1,
                filename: format!("leaf-{}.jpg", seq),
                image: stub_image(leaf(seq), 1, 1, seq),
                processing_model_id: model_id,
                processing_model_type: ProcessingModelType::Classification,
                generate_mask: false,
                validation_model_id,
            };
            enqueue_report(stores, &request).unwrap()
        })
        .collect()
}

#[test]
fn test_single_worker_processes_in_fifo_order() {
    let harness = TestHarness::new();
    let cls = harness.register_processing(ProcessingModelType::Classification);
    enqueue_many(&harness.stores(), 10, cls, None, |_| true);

    harness.drain(RunMode::Processing);

    let order: Vec<u32> = harness
        .loader
        .seen()
        .iter()
        .filter_map(|(_, image)| stub_seq(image))
        .collect();
    assert_eq!(order, (0..10).collect::<Vec<_>>());
}

#[test]
fn test_concurrent_dequeue_is_exclusive_and_complete() {
    const JOBS: u32 = 200;
    const THREADS: usize = 4;

    let harness = TestHarness::new();
    let cls = harness.register_processing(ProcessingModelType::Classification);
    enqueue_many(&harness.stores(), JOBS, cls, None, |_| true);

    // One connection per thread, opened up front.
    let connections: Vec<Stores> = (0..THREADS).map(|_| harness.stores()).collect();
    let handles: Vec<_> = connections
        .into_iter()
        .map(|stores| {
            thread::spawn(move || {
                let mut ids = Vec::new();
                while let Some(element) = stores.queue.dequeue_processing().unwrap() {
                    ids.push(element.id);
                }
                ids
            })
        })
        .collect();

    let per_thread: Vec<Vec<i64>> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    for ids in &per_thread {
        assert!(
            ids.windows(2).all(|w| w[0] < w[1]),
            "each thread must see increasing ids: {:?}",
            ids
        );
    }

    let all: Vec<i64> = per_thread.into_iter().flatten().collect();
    let unique: HashSet<i64> = all.iter().copied().collect();
    assert_eq!(all.len(), JOBS as usize, "no job may be dequeued twice");
    assert_eq!(unique.len(), JOBS as usize);
    assert_eq!(harness.stores().queue.counts().unwrap(), QueueCounts::default());
}

#[test]
fn test_validation_and_processing_pools_run_side_by_side() {
    const JOBS: u32 = 20;

    let harness = TestHarness::with_workers(2);
    let occ = harness.register_occ();
    let cls = harness.register_processing(ProcessingModelType::Classification);
    let stores = harness.stores();
    let reports = enqueue_many(&stores, JOBS, cls, Some(occ), |seq| seq % 2 == 0);

    let start = |mode: RunMode| {
        WorkerPool::start(
            Arc::clone(&harness.config),
            mode,
            Arc::new(ModelRegistry::standard()),
            Arc::new(harness.loader.clone()),
            ShutdownSignal::new(),
        )
        .unwrap()
    };
    let validation_pool = start(RunMode::Validation);
    let processing_pool = start(RunMode::Processing);

    let settled = harness.wait_for(Duration::from_secs(30), || {
        let idle = stores.queue.counts().unwrap() == QueueCounts::default();
        idle && reports.iter().enumerate().all(|(seq, id)| {
            let report = stores.database.find_report(*id).unwrap().unwrap();
            if seq % 2 == 0 {
                report.valid == Some(true) && report.is_processed()
            } else {
                report.valid == Some(false)
            }
        })
    });

    validation_pool.shutdown();
    processing_pool.shutdown();
    validation_pool.wait().unwrap();
    processing_pool.wait().unwrap();
    assert!(settled, "pools did not settle every report");

    for (seq, id) in reports.iter().enumerate() {
        let report = stores.database.find_report(*id).unwrap().unwrap();
        assert_eq!(report.is_processed(), seq % 2 == 0, "report {}", id);
    }

    // Every image was validated once and only valid ones were processed.
    let seen = harness.loader.seen();
    assert_eq!(seen.iter().filter(|(model, _)| *model == occ).count(), JOBS as usize);
    assert_eq!(
        seen.iter().filter(|(model, _)| *model == cls).count(),
        (JOBS / 2) as usize
    );
}
