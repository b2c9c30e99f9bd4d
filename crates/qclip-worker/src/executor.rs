//! Job executor.

use std::sync::Arc;
use std::time::{Duration, Instant};

use qclip_queue::{AbandonOutcome, Delivery, DeliveryQueue};
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;
use crate::pipeline::Pipeline;

/// Deliveries requested per receive or claim call.
const MAX_BATCH: usize = 5;

/// How a delivery was settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Result published and delivery acked
    Acked { degraded: usize },
    /// Pipeline failed; the queue requeued or dead-lettered the delivery
    Abandoned(AbandonOutcome),
    /// The queue rejected the settlement; the delivery stays pending until claimed
    Unsettled,
}

/// Shared handles for spawning delivery tasks.
#[derive(Clone)]
struct DeliveryRunner {
    queue: Arc<dyn DeliveryQueue>,
    pipeline: Arc<Pipeline>,
    semaphore: Arc<Semaphore>,
    consumer: String,
    max_jobs: usize,
    renew_every: Duration,
}

impl DeliveryRunner {
    fn in_flight(&self) -> usize {
        self.max_jobs - self.semaphore.available_permits()
    }

    fn spawn(&self, permit: OwnedSemaphorePermit, delivery: Delivery) {
        let runner = self.clone();
        tokio::spawn(async move {
            metrics::set_jobs_in_flight(runner.in_flight());
            runner.run(delivery).await;
            drop(permit);
            metrics::set_jobs_in_flight(runner.in_flight());
        });
    }

    /// Handle one delivery, renewing its lease until it is settled.
    async fn run(&self, delivery: Delivery) -> DeliveryOutcome {
        let lease = delivery.clone();
        let handle =
            JobExecutor::handle_delivery(self.queue.as_ref(), Arc::clone(&self.pipeline), delivery);
        tokio::pin!(handle);

        let mut renew = tokio::time::interval_at(
            tokio::time::Instant::now() + self.renew_every,
            self.renew_every,
        );
        renew.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                outcome = &mut handle => return outcome,
                _ = renew.tick() => {
                    if let Err(e) = self.queue.renew(&self.consumer, &lease).await {
                        warn!(
                            job_id = %lease.descriptor.job_id,
                            error = %e,
                            "Failed to renew delivery lease"
                        );
                    }
                }
            }
        }
    }
}

/// Job executor that consumes deliveries from the queue.
pub struct JobExecutor {
    config: WorkerConfig,
    queue: Arc<dyn DeliveryQueue>,
    pipeline: Arc<Pipeline>,
    job_semaphore: Arc<Semaphore>,
    shutdown: watch::Sender<bool>,
    consumer_name: String,
}

impl JobExecutor {
    pub fn new(config: WorkerConfig, queue: Arc<dyn DeliveryQueue>, pipeline: Pipeline) -> Self {
        let job_semaphore = Arc::new(Semaphore::new(config.max_concurrent_jobs));
        let (shutdown, _) = watch::channel(false);
        let consumer_name = format!("worker-{}", Uuid::new_v4());

        Self {
            config,
            queue,
            pipeline: Arc::new(pipeline),
            job_semaphore,
            shutdown,
            consumer_name,
        }
    }

    pub fn consumer_name(&self) -> &str {
        &self.consumer_name
    }

    fn runner(&self) -> DeliveryRunner {
        DeliveryRunner {
            queue: Arc::clone(&self.queue),
            pipeline: Arc::clone(&self.pipeline),
            semaphore: Arc::clone(&self.job_semaphore),
            consumer: self.consumer_name.clone(),
            max_jobs: self.config.max_concurrent_jobs,
            renew_every: self.config.lease_renewal_interval(),
        }
    }

    /// Consume deliveries until [`shutdown`](Self::shutdown) is signalled,
    /// then wait for in-flight deliveries up to the shutdown timeout.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            consumer = %self.consumer_name,
            max_concurrent_jobs = self.config.max_concurrent_jobs,
            "Starting job executor"
        );

        let mut shutdown_rx = self.shutdown.subscribe();
        let claim_task = tokio::spawn(Self::claim_loop(
            self.config.clone(),
            self.runner(),
            self.shutdown.subscribe(),
        ));

        loop {
            if *shutdown_rx.borrow() {
                info!("Shutdown signal received, stopping executor");
                break;
            }
            tokio::select! {
                _ = shutdown_rx.changed() => {}
                result = self.consume() => {
                    if let Err(e) = result {
                        error!(error = %e, "Error consuming deliveries");
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        }

        claim_task.abort();

        info!("Waiting for in-flight jobs to complete");
        if tokio::time::timeout(self.config.shutdown_timeout, self.wait_for_jobs())
            .await
            .is_err()
        {
            warn!(
                in_flight = self.in_flight(),
                "Shutdown timeout elapsed; unsettled deliveries will be reclaimed"
            );
        }

        info!("Job executor stopped");
        Ok(())
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    pub fn in_flight(&self) -> usize {
        self.config.max_concurrent_jobs - self.job_semaphore.available_permits()
    }

    /// Receive up to the number of free slots and spawn a task per delivery.
    async fn consume(&self) -> WorkerResult<()> {
        let available = self.job_semaphore.available_permits();
        if available == 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            return Ok(());
        }

        let deliveries = self
            .queue
            .receive(
                &self.consumer_name,
                available.min(MAX_BATCH),
                self.config.receive_wait,
            )
            .await?;

        if deliveries.is_empty() {
            return Ok(());
        }
        debug!(count = deliveries.len(), "Received deliveries");

        let runner = self.runner();
        for delivery in deliveries {
            let permit = Arc::clone(&self.job_semaphore)
                .acquire_owned()
                .await
                .map_err(|_| WorkerError::config_error("Job semaphore closed"))?;
            runner.spawn(permit, delivery);
        }

        Ok(())
    }

    /// Periodically take over deliveries abandoned by crashed consumers.
    async fn claim_loop(
        config: WorkerConfig,
        runner: DeliveryRunner,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let mut interval = tokio::time::interval(config.claim_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    let available = runner.semaphore.available_permits();
                    if available == 0 {
                        continue;
                    }
                    match runner
                        .queue
                        .claim_stale(&runner.consumer, config.claim_min_idle, available.min(MAX_BATCH))
                        .await
                    {
                        Ok(deliveries) if !deliveries.is_empty() => {
                            info!(count = deliveries.len(), "Claimed stale deliveries");
                            metrics::record_claimed(deliveries.len());
                            for delivery in deliveries {
                                let Ok(permit) = Arc::clone(&runner.semaphore).acquire_owned().await
                                else {
                                    break;
                                };
                                runner.spawn(permit, delivery);
                            }
                        }
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "Failed to claim stale deliveries"),
                    }
                }
            }
        }
    }

    /// Run the pipeline for one delivery and settle it.
    ///
    /// Acks only after the result is published; any failure, including a
    /// panic in the pipeline task, abandons the delivery.
    pub async fn handle_delivery(
        queue: &dyn DeliveryQueue,
        pipeline: Arc<Pipeline>,
        delivery: Delivery,
    ) -> DeliveryOutcome {
        let logger = JobLogger::new(&delivery.descriptor.job_id, "transcription")
            .with_delivery(delivery.delivery_count);
        if delivery.is_redelivery() {
            info!(
                job_id = %delivery.descriptor.job_id,
                delivery = delivery.delivery_count,
                "Handling redelivered job"
            );
        }
        metrics::record_job_started();
        let started = Instant::now();

        let descriptor = delivery.descriptor.clone();
        let task_logger = logger.clone();
        let span = logger.create_span();
        let task = tokio::spawn(
            async move { pipeline.run(&descriptor, &task_logger).await }.instrument(span),
        );

        let result = match task.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(WorkerError::panicked(panic_message(e.into_panic()))),
            Err(e) => Err(WorkerError::panicked(e.to_string())),
        };
        let elapsed = started.elapsed().as_secs_f64();

        match result {
            Ok(report) => match queue.ack(&delivery).await {
                Ok(()) => {
                    logger.log_completion(&format!(
                        "{} ({} degraded stages)",
                        report.result_key,
                        report.degraded.len()
                    ));
                    metrics::record_job_acked(elapsed);
                    DeliveryOutcome::Acked {
                        degraded: report.degraded.len(),
                    }
                }
                Err(e) => {
                    logger.log_error(&format!("Failed to ack published job: {}", e));
                    DeliveryOutcome::Unsettled
                }
            },
            Err(err) => {
                logger.log_error(&err.to_string());
                match queue.abandon(&delivery, &err.to_string()).await {
                    Ok(outcome) => {
                        if outcome == AbandonOutcome::DeadLettered {
                            warn!(
                                job_id = %delivery.descriptor.job_id,
                                delivery = delivery.delivery_count,
                                "Job dead-lettered after exhausting deliveries"
                            );
                        }
                        metrics::record_job_abandoned(outcome.as_str(), elapsed);
                        DeliveryOutcome::Abandoned(outcome)
                    }
                    Err(e) => {
                        logger.log_error(&format!("Failed to abandon delivery: {}", e));
                        DeliveryOutcome::Unsettled
                    }
                }
            }
        }
    }

    /// Wait for all in-flight deliveries to settle.
    async fn wait_for_jobs(&self) {
        while self.in_flight() > 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeExtractor, FakeSummarizer, FakeTranscriber};
    use qclip_firestore::MemoryTranscriptStore;
    use qclip_models::{input_key, result_key, JobDescriptor, JobId};
    use qclip_queue::MemoryQueue;
    use qclip_storage::MemoryStore;
    use std::sync::atomic::Ordering;

    struct Harness {
        store: MemoryStore,
        queue: MemoryQueue,
        extractor: Arc<FakeExtractor>,
        transcriber: Arc<FakeTranscriber>,
        transcripts: MemoryTranscriptStore,
        work_dir: tempfile::TempDir,
    }

    impl Harness {
        fn new(max_deliveries: u32) -> Self {
            Self {
                store: MemoryStore::new(),
                queue: MemoryQueue::new(max_deliveries),
                extractor: Arc::new(FakeExtractor::default()),
                transcriber: FakeTranscriber::new("hello world"),
                transcripts: MemoryTranscriptStore::new(),
                work_dir: tempfile::tempdir().unwrap(),
            }
        }

        fn pipeline(&self) -> Pipeline {
            Pipeline::new(
                Arc::new(self.store.clone()),
                self.extractor.clone(),
                self.transcriber.clone(),
                self.work_dir.path(),
            )
            .with_summarizer(Arc::new(FakeSummarizer::default()))
            .with_transcript_store(Arc::new(self.transcripts.clone()))
        }

        async fn admit(&self) -> JobId {
            let job_id = JobId::new();
            self.store.insert(input_key(&job_id), b"video".to_vec());
            self.queue
                .enqueue(&JobDescriptor::new(job_id.clone()))
                .await
                .unwrap();
            job_id
        }

        async fn next(&self) -> Delivery {
            let mut deliveries = self
                .queue
                .receive("test", 1, Duration::from_millis(100))
                .await
                .unwrap();
            assert_eq!(deliveries.len(), 1);
            deliveries.remove(0)
        }

        /// Runner for the consumer that [`next`](Self::next) receives as.
        fn runner(&self, max_jobs: usize, renew_every: Duration) -> DeliveryRunner {
            DeliveryRunner {
                queue: Arc::new(self.queue.clone()),
                pipeline: Arc::new(self.pipeline()),
                semaphore: Arc::new(Semaphore::new(max_jobs)),
                consumer: "test".to_string(),
                max_jobs,
                renew_every,
            }
        }

        async fn handle_next(&self) -> DeliveryOutcome {
            let delivery = self.next().await;
            JobExecutor::handle_delivery(&self.queue, Arc::new(self.pipeline()), delivery).await
        }
    }

    #[tokio::test]
    async fn test_success_acks_after_publish() {
        let h = Harness::new(5);
        let job_id = h.admit().await;

        let outcome = h.handle_next().await;

        assert_eq!(outcome, DeliveryOutcome::Acked { degraded: 0 });
        assert!(h.store.get(&result_key(&job_id)).is_some());
        assert_eq!(h.queue.acked().len(), 1);
        assert_eq!(h.queue.in_flight_len(), 0);
    }

    #[tokio::test]
    async fn test_persistence_failure_still_acks() {
        let h = Harness::new(5);
        h.transcripts.set_failing(true);
        h.admit().await;

        let outcome = h.handle_next().await;

        assert_eq!(outcome, DeliveryOutcome::Acked { degraded: 1 });
        assert_eq!(h.queue.acked().len(), 1);
    }

    #[tokio::test]
    async fn test_publish_failure_abandons_and_redelivers() {
        let h = Harness::new(5);
        h.store.fail_puts("results/");
        let job_id = h.admit().await;

        let outcome = h.handle_next().await;

        assert_eq!(outcome, DeliveryOutcome::Abandoned(AbandonOutcome::Requeued));
        assert!(h.queue.acked().is_empty());

        h.store.heal();
        let redelivery = h.next().await;
        assert_eq!(redelivery.descriptor.job_id, job_id);
        assert_eq!(redelivery.delivery_count, 2);

        let outcome =
            JobExecutor::handle_delivery(&h.queue, Arc::new(h.pipeline()), redelivery).await;
        assert_eq!(outcome, DeliveryOutcome::Acked { degraded: 0 });
    }

    #[tokio::test]
    async fn test_exhausted_deliveries_dead_letter() {
        let h = Harness::new(2);
        h.transcriber.fail.store(true, Ordering::SeqCst);
        h.admit().await;

        assert_eq!(
            h.handle_next().await,
            DeliveryOutcome::Abandoned(AbandonOutcome::Requeued)
        );
        assert_eq!(
            h.handle_next().await,
            DeliveryOutcome::Abandoned(AbandonOutcome::DeadLettered)
        );

        let dead = h.queue.dead_letters();
        assert_eq!(dead.len(), 1);
        assert!(dead[0].1.contains("Transcription failed"));
        assert_eq!(h.queue.ready_len(), 0);
    }

    #[tokio::test]
    async fn test_panic_is_contained_and_abandoned() {
        let h = Harness::new(5);
        h.extractor.panic.store(true, Ordering::SeqCst);
        h.admit().await;

        let outcome = h.handle_next().await;

        assert_eq!(outcome, DeliveryOutcome::Abandoned(AbandonOutcome::Requeued));
        assert!(std::fs::read_dir(h.work_dir.path()).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn test_run_processes_queue_and_shuts_down() {
        let h = Harness::new(5);
        let mut ids = Vec::new();
        for _ in 0..3 {
            ids.push(h.admit().await);
        }

        let config = WorkerConfig {
            receive_wait: Duration::from_millis(20),
            work_dir: h.work_dir.path().to_path_buf(),
            ..WorkerConfig::default()
        };
        let executor = Arc::new(JobExecutor::new(config, Arc::new(h.queue.clone()), h.pipeline()));
        let runner = {
            let executor = Arc::clone(&executor);
            tokio::spawn(async move { executor.run().await })
        };

        for _ in 0..100 {
            if h.queue.acked().len() == ids.len() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        executor.shutdown();
        runner.await.unwrap().unwrap();

        assert_eq!(h.queue.acked().len(), 3);
        for id in &ids {
            assert!(h.store.get(&result_key(id)).is_some());
        }
        assert_eq!(executor.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_long_job_is_not_reclaimed_by_its_own_worker() {
        let h = Harness::new(5);
        h.transcriber.delay_ms.store(400, Ordering::SeqCst);
        let job_id = h.admit().await;

        let config = WorkerConfig {
            receive_wait: Duration::from_millis(20),
            claim_interval: Duration::from_millis(20),
            claim_min_idle: Duration::from_millis(100),
            job_timeout: Duration::from_secs(10),
            work_dir: h.work_dir.path().to_path_buf(),
            ..WorkerConfig::default()
        };
        let executor = Arc::new(JobExecutor::new(config, Arc::new(h.queue.clone()), h.pipeline()));
        let runner = {
            let executor = Arc::clone(&executor);
            tokio::spawn(async move { executor.run().await })
        };

        for _ in 0..100 {
            if !h.queue.acked().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
        executor.shutdown();
        runner.await.unwrap().unwrap();

        assert_eq!(h.transcriber.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.queue.acked().len(), 1);
        assert_eq!(h.queue.acked()[0].job_id, job_id);
        assert_eq!(h.queue.in_flight_len(), 0);
    }

    #[tokio::test]
    async fn test_delivery_lease_is_renewed_while_running() {
        let h = Harness::new(5);
        h.transcriber.delay_ms.store(300, Ordering::SeqCst);
        h.admit().await;
        let delivery = h.next().await;

        let runner = h.runner(1, Duration::from_millis(20));
        let running = tokio::spawn(async move { runner.run(delivery).await });

        tokio::time::sleep(Duration::from_millis(150)).await;
        let stolen = h
            .queue
            .claim_stale("other", Duration::from_millis(100), 10)
            .await
            .unwrap();
        assert!(stolen.is_empty());

        assert_eq!(running.await.unwrap(), DeliveryOutcome::Acked { degraded: 0 });
        assert_eq!(h.transcriber.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_in_flight_drops_when_delivery_settles() {
        let h = Harness::new(5);
        h.transcriber.delay_ms.store(100, Ordering::SeqCst);
        h.admit().await;
        let delivery = h.next().await;

        let runner = h.runner(2, Duration::from_millis(50));
        let permit = Arc::clone(&runner.semaphore).acquire_owned().await.unwrap();
        runner.spawn(permit, delivery);
        assert_eq!(runner.in_flight(), 1);

        for _ in 0..100 {
            if runner.in_flight() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(runner.in_flight(), 0);
        assert_eq!(h.queue.acked().len(), 1);
    }
}
