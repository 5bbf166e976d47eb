// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use super::WorkItem;
use crate::clock::Clock;
use crate::config::{PolicyInputSource, QueueGateConfig};
use crate::error::AdmissionError;
use crate::metrics::PolicyMetrics;
use crate::policy::QueueThroughputPolicy;
use crate::workload::ExtensionClassifier;
use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Processes items drained from the ingest queue.
#[async_trait]
pub trait Worker: Send + Sync + 'static {
    async fn process(&self, item: WorkItem) -> Result<()>;
}

struct Running {
    sender: mpsc::Sender<WorkItem>,
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

/// Bounded ingest queue drained by a fixed pool of workers, with
/// policy-driven delays for expensive items.
pub struct QueueGate<W> {
    worker: Arc<W>,
    policy: Arc<QueueThroughputPolicy>,
    inputs: Arc<dyn PolicyInputSource>,
    classifier: ExtensionClassifier,
    clock: Arc<dyn Clock>,
    worker_count: usize,
    running: Mutex<Option<Running>>,
    metrics: Option<Arc<PolicyMetrics>>,
}

impl<W: Worker> QueueGate<W> {
    pub fn new(
        worker: W,
        policy: Arc<QueueThroughputPolicy>,
        inputs: Arc<dyn PolicyInputSource>,
        classifier: ExtensionClassifier,
        clock: Arc<dyn Clock>,
        config: &QueueGateConfig,
        metrics: Option<Arc<PolicyMetrics>>,
    ) -> Self {
        Self {
            worker: Arc::new(worker),
            policy,
            inputs,
            classifier,
            clock,
            worker_count: config.worker_count,
            running: Mutex::new(None),
            metrics,
        }
    }

    pub fn policy(&self) -> &Arc<QueueThroughputPolicy> {
        &self.policy
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Items waiting in the queue, not counting the ones being processed.
    pub fn queue_depth(&self) -> usize {
        self.running
            .lock()
            .as_ref()
            .map(|running| queue_depth(&running.sender))
            .unwrap_or(0)
    }

    /// Spawns the workers. The queue capacity is fixed here from an
    /// evaluation at depth zero. Returns the capacity in use.
    pub fn start(&self) -> usize {
        let mut running = self.running.lock();
        if let Some(running) = running.as_ref() {
            warn!("Workers already started");
            return running.sender.max_capacity();
        }

        let snapshot = self
            .policy
            .evaluate(0, &self.inputs.policy_inputs(), self.clock.now());
        let queue_capacity = snapshot.limits.queue_capacity.max(1);
        let (sender, receiver) = mpsc::channel(queue_capacity);
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let cancel = CancellationToken::new();

        let handles = (0..self.worker_count)
            .map(|worker_id| {
                tokio::spawn(run_worker(
                    worker_id,
                    self.worker.clone(),
                    receiver.clone(),
                    cancel.clone(),
                ))
            })
            .collect();

        info!(
            num_workers = self.worker_count,
            queue_capacity,
            preset = %snapshot.active_preset,
            "Started ingest workers"
        );
        *running = Some(Running {
            sender,
            cancel,
            handles,
        });
        queue_capacity
    }

    /// Cancels every worker, including ones in the middle of an item, and
    /// waits for them to exit.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().take() else {
            warn!("No workers to stop");
            return;
        };
        info!("Stopping workers...");
        running.cancel.cancel();
        for handle in running.handles {
            if let Err(err) = handle.await {
                error!("Worker task failed: {err:?}");
            }
        }
        info!("All workers stopped");
    }

    /// Admits `item` into the queue. Expensive items may be delayed first;
    /// the send itself waits while the queue is full.
    pub async fn submit(&self, item: WorkItem) -> Result<(), AdmissionError> {
        let sender = self
            .running
            .lock()
            .as_ref()
            .map(|running| running.sender.clone())
            .ok_or(AdmissionError::Closed)?;

        let depth = queue_depth(&sender);
        let snapshot = self
            .policy
            .evaluate(depth as u64, &self.inputs.policy_inputs(), self.clock.now());
        let class = self.classifier.classify(&item.file_name);

        if let Some(delay) = snapshot.limits.admission_delay(depth, class) {
            info!(
                object_id = %item.object_id,
                queue_depth = depth,
                threshold = snapshot.limits.expensive_admission_threshold,
                delay = ?delay,
                preset = %snapshot.active_preset,
                fail_safe = snapshot.fail_safe,
                "Deferring expensive workload admission under queue pressure"
            );
            if let Some(metrics) = &self.metrics {
                metrics
                    .admission_delays
                    .with_label_values(&[self.policy.name()])
                    .inc();
            }
            sleep(delay).await;
        }

        let object_id = item.object_id.clone();
        sender
            .send(item)
            .await
            .map_err(|_| AdmissionError::Closed)?;

        debug!(
            object_id = %object_id,
            queue_size = queue_depth(&sender),
            pressure_level = %snapshot.pressure_level,
            preset = %snapshot.active_preset,
            fail_safe = snapshot.fail_safe,
            workload_class = %class,
            "Item added to queue"
        );
        Ok(())
    }
}

fn queue_depth<T>(sender: &mpsc::Sender<T>) -> usize {
    sender.max_capacity() - sender.capacity()
}

async fn run_worker<W: Worker>(
    worker_id: usize,
    worker: Arc<W>,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<WorkItem>>>,
    cancel: CancellationToken,
) {
    info!("Worker {} started", worker_id);
    loop {
        let item = tokio::select! {
            _ = cancel.cancelled() => break,
            item = async { receiver.lock().await.recv().await } => match item {
                Some(item) => item,
                None => break,
            },
        };

        debug!(object_id = %item.object_id, "Worker {} processing item", worker_id);
        let object_id = item.object_id.clone();
        tokio::select! {
            _ = cancel.cancelled() => break,
            result = worker.process(item) => match result {
                Ok(()) => debug!(object_id = %object_id, "Worker {} completed item", worker_id),
                Err(err) => error!(
                    object_id = %object_id,
                    "Worker {} error processing item: {err:?}",
                    worker_id
                ),
            },
        }
    }
    info!("Worker {} stopped", worker_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::config::PolicyInputs;
    use anyhow::anyhow;
    use std::time::Duration;
    use tokio::sync::Semaphore;
    use tokio::time::Instant;

    #[derive(Clone)]
    struct RecordingWorker {
        processed: Arc<Mutex<Vec<String>>>,
        gate: Arc<Semaphore>,
    }

    impl RecordingWorker {
        fn open() -> Self {
            Self {
                processed: Default::default(),
                gate: Arc::new(Semaphore::new(Semaphore::MAX_PERMITS)),
            }
        }

        fn blocked() -> Self {
            Self {
                processed: Default::default(),
                gate: Arc::new(Semaphore::new(0)),
            }
        }

        fn processed(&self) -> Vec<String> {
            self.processed.lock().clone()
        }
    }

    #[async_trait]
    impl Worker for RecordingWorker {
        async fn process(&self, item: WorkItem) -> Result<()> {
            self.gate.acquire().await?.forget();
            if item.object_id.starts_with("bad") {
                return Err(anyhow!("cannot enrich {}", item.object_id));
            }
            self.processed.lock().push(item.object_id);
            Ok(())
        }
    }

    fn gate(
        worker: RecordingWorker,
        worker_count: usize,
        inputs: PolicyInputs,
    ) -> (QueueGate<RecordingWorker>, Arc<PolicyMetrics>) {
        let metrics = Arc::new(PolicyMetrics::new_for_testing());
        let gate = QueueGate::new(
            worker,
            Arc::new(QueueThroughputPolicy::for_queue(worker_count)),
            Arc::new(inputs),
            ExtensionClassifier::file_enrichment(),
            Arc::new(SystemClock),
            &QueueGateConfig { worker_count },
            Some(metrics.clone()),
        );
        (gate, metrics)
    }

    async fn wait_for(worker: &RecordingWorker, count: usize) {
        while worker.processed().len() < count {
            sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn workers_drain_the_queue() {
        let worker = RecordingWorker::open();
        let (gate, _) = gate(worker.clone(), 2, PolicyInputs::default());
        assert_eq!(gate.start(), 6);

        for id in ["a", "b", "c"] {
            gate.submit(WorkItem::new(id, format!("/files/{id}.txt")))
                .await
                .unwrap();
        }
        wait_for(&worker, 3).await;
        let mut processed = worker.processed();
        processed.sort();
        assert_eq!(processed, vec!["a", "b", "c"]);
        gate.stop().await;
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn start_is_idempotent_and_submit_requires_start() {
        let (gate, _) = gate(RecordingWorker::open(), 5, PolicyInputs::default());
        let err = gate.submit(WorkItem::new("a", "a.txt")).await.unwrap_err();
        assert!(matches!(err, AdmissionError::Closed));

        assert_eq!(gate.start(), 15);
        assert_eq!(gate.start(), 15);
        assert!(gate.is_running());
        gate.stop().await;
        assert!(!gate.is_running());
        gate.stop().await;
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn queue_capacity_follows_fail_safe_preset() {
        let (gate, _) = gate(RecordingWorker::open(), 2, PolicyInputs::new(None, true));
        assert_eq!(gate.start(), 12);
        gate.stop().await;
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn worker_error_does_not_stop_worker() {
        let worker = RecordingWorker::open();
        let (gate, _) = gate(worker.clone(), 1, PolicyInputs::default());
        gate.start();
        gate.submit(WorkItem::new("bad-1", "x.txt")).await.unwrap();
        gate.submit(WorkItem::new("good-1", "y.txt")).await.unwrap();
        wait_for(&worker, 1).await;
        assert_eq!(worker.processed(), vec!["good-1"]);
        gate.stop().await;
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn expensive_items_are_delayed_under_pressure() {
        let worker = RecordingWorker::blocked();
        let (gate, metrics) = gate(worker.clone(), 1, PolicyInputs::new(None, true));
        gate.start();

        // First item is taken by the only worker, which then blocks.
        gate.submit(WorkItem::new("held", "held.txt")).await.unwrap();
        while gate.queue_depth() > 0 {
            sleep(Duration::from_millis(1)).await;
        }
        for i in 0..4 {
            gate.submit(WorkItem::new(format!("b{i}"), "b.txt"))
                .await
                .unwrap();
        }
        assert_eq!(gate.queue_depth(), 4);

        let started = Instant::now();
        gate.submit(WorkItem::new("b-cheap", "notes.txt")).await.unwrap();
        assert_eq!(started.elapsed(), Duration::ZERO);

        let started = Instant::now();
        gate.submit(WorkItem::new("x", "setup.exe")).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(
            metrics.admission_delays.with_label_values(&["queue"]).get(),
            1
        );

        worker.gate.add_permits(100);
        wait_for(&worker, 7).await;
        gate.stop().await;
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn full_queue_blocks_producer_until_drained() {
        let worker = RecordingWorker::blocked();
        let (gate, _) = gate(worker.clone(), 1, PolicyInputs::new(Some("conservative"), false));
        let capacity = gate.start();
        assert_eq!(capacity, 12);

        gate.submit(WorkItem::new("held", "held.txt")).await.unwrap();
        while gate.queue_depth() > 0 {
            sleep(Duration::from_millis(1)).await;
        }
        for i in 0..capacity {
            gate.submit(WorkItem::new(format!("q{i}"), "q.txt"))
                .await
                .unwrap();
        }
        let blocked = tokio::time::timeout(
            Duration::from_secs(1),
            gate.submit(WorkItem::new("overflow", "o.txt")),
        )
        .await;
        assert!(blocked.is_err());

        worker.gate.add_permits(100);
        gate.submit(WorkItem::new("late", "late.txt")).await.unwrap();
        wait_for(&worker, capacity + 2).await;
        gate.stop().await;
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn stop_cancels_busy_workers() {
        let worker = RecordingWorker::blocked();
        let (gate, _) = gate(worker.clone(), 3, PolicyInputs::default());
        gate.start();
        gate.submit(WorkItem::new("stuck", "a.txt")).await.unwrap();
        sleep(Duration::from_millis(10)).await;

        gate.stop().await;
        assert!(worker.processed().is_empty());
        assert!(matches!(
            gate.submit(WorkItem::new("late", "a.txt")).await,
            Err(AdmissionError::Closed)
        ));

        assert_eq!(gate.start(), 9);
        gate.stop().await;
    }
}
