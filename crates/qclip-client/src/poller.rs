//! Submit-and-poll driver.
//!
//! One [`Poller`] owns one [`PollSession`] at a time. Polling runs on a
//! background task at a fixed interval with exactly one request in flight;
//! ticks missed while a request is outstanding are skipped. Resetting or
//! dropping the poller stops the task, and a task from an earlier session
//! can never write into the current one.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use qclip_models::{JobId, JobStatus, PollStage};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::api::JobsApi;
use crate::config::{CeilingPolicy, PollerConfig};
use crate::error::{ClientError, ClientResult};
use crate::machine::PollEvent;
use crate::session::{LogLevel, PollSession};

/// Error recorded when the attempt ceiling is hit.
pub const POLL_TIMEOUT_MESSAGE: &str = "Job polling timeout - backend may be unresponsive";

struct PollTask {
    /// Dropping the sender cancels the task
    _cancel: watch::Sender<()>,
    handle: JoinHandle<()>,
}

/// Drives a [`PollSession`] through submit and polling.
pub struct Poller {
    api: Arc<dyn JobsApi>,
    config: PollerConfig,
    session: Arc<Mutex<PollSession>>,
    task: Mutex<Option<PollTask>>,
}

impl Poller {
    pub fn new(api: Arc<dyn JobsApi>, config: PollerConfig) -> Self {
        Self {
            api,
            config,
            session: Arc::new(Mutex::new(PollSession::new(0))),
            task: Mutex::new(None),
        }
    }

    /// Snapshot of the current session.
    pub fn session(&self) -> PollSession {
        lock(&self.session).clone()
    }

    pub fn stage(&self) -> PollStage {
        lock(&self.session).stage
    }

    /// Upload `file` and start polling the admitted job.
    ///
    /// With no file the session stays idle and records an error. Returns the
    /// job id once the upload is acknowledged; an upload failure fails the
    /// session with the server's message and is returned as well.
    pub async fn submit(&self, file: Option<&Path>) -> ClientResult<Option<JobId>> {
        let generation = {
            let mut session = lock(&self.session);
            if !session.apply(PollEvent::Submit {
                has_file: file.is_some(),
            }) {
                return Ok(None);
            }
            session.generation
        };
        let Some(path) = file else {
            return Ok(None);
        };

        update(&self.session, generation, |s| {
            s.record(LogLevel::Info, format!("Uploading {}", path.display()))
        });

        match self.api.submit(path).await {
            Ok(response) => {
                let job_id = response.job_id;
                let admitted = update(&self.session, generation, |s| {
                    s.job_id = Some(job_id.clone());
                    s.last_status = Some(response.status);
                    s.record(LogLevel::Success, format!("Job created with ID: {}", job_id));
                    s.apply(PollEvent::ArtifactPersisted) && s.apply(PollEvent::QueueAcknowledged)
                });
                if admitted == Some(true) {
                    self.start_polling(generation, job_id.clone());
                }
                Ok(Some(job_id))
            }
            Err(e) => {
                update(&self.session, generation, |s| {
                    s.apply(PollEvent::SubmitRejected(e.to_string()))
                });
                Err(e)
            }
        }
    }

    /// Start a fresh session that polls an already admitted job.
    pub fn attach(&self, job_id: JobId) {
        let generation = self.replace_session(|generation| {
            PollSession::attached(generation, job_id.clone())
        });
        self.start_polling(generation, job_id);
    }

    /// Stop polling and replace the session with an idle one.
    pub fn reset(&self) {
        self.replace_session(PollSession::new);
    }

    /// Wait for the poll task to stop, then return the session.
    pub async fn wait(&self) -> PollSession {
        let task = lock(&self.task).take();
        if let Some(task) = task {
            let PollTask { _cancel, handle } = task;
            let _ = handle.await;
        }
        self.session()
    }

    fn replace_session(&self, make: impl FnOnce(u64) -> PollSession) -> u64 {
        lock(&self.task).take();
        let mut session = lock(&self.session);
        let generation = session.generation + 1;
        *session = make(generation);
        debug!(generation, "Session replaced");
        generation
    }

    fn start_polling(&self, generation: u64, job_id: JobId) {
        let (cancel, cancel_rx) = watch::channel(());
        let handle = tokio::spawn(poll_loop(
            Arc::clone(&self.api),
            self.config.clone(),
            Arc::clone(&self.session),
            generation,
            job_id,
            cancel_rx,
        ));
        *lock(&self.task) = Some(PollTask {
            _cancel: cancel,
            handle,
        });
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Apply `f` to the session if it still belongs to `generation`.
fn update<T>(
    session: &Mutex<PollSession>,
    generation: u64,
    f: impl FnOnce(&mut PollSession) -> T,
) -> Option<T> {
    let mut session = lock(session);
    if session.generation != generation {
        return None;
    }
    Some(f(&mut session))
}

async fn poll_loop(
    api: Arc<dyn JobsApi>,
    config: PollerConfig,
    session: Arc<Mutex<PollSession>>,
    generation: u64,
    job_id: JobId,
    mut cancel: watch::Receiver<()>,
) {
    info!(job_id = %job_id, interval_ms = config.poll_interval.as_millis() as u64, "Polling job");
    update(&session, generation, |s| {
        s.record(LogLevel::Info, format!("Starting to poll job {}", job_id))
    });

    let mut ticker =
        tokio::time::interval_at(Instant::now() + config.poll_interval, config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.changed() => break,
            _ = ticker.tick() => {}
        }

        let Some(attempt) = update(&session, generation, |s| {
            s.attempt_count += 1;
            s.attempt_count
        }) else {
            break;
        };

        let outcome = tokio::select! {
            _ = cancel.changed() => break,
            outcome = api.status(&job_id) => outcome,
        };

        let keep_polling = update(&session, generation, |s| {
            apply_poll(s, attempt, outcome, &config)
        })
        .unwrap_or(false);
        if !keep_polling {
            break;
        }
    }

    debug!(job_id = %job_id, generation, "Poll loop stopped");
}

/// Fold one poll outcome into the session. Returns whether to keep polling.
fn apply_poll(
    session: &mut PollSession,
    attempt: u32,
    outcome: ClientResult<qclip_models::JobStatusResponse>,
    config: &PollerConfig,
) -> bool {
    let failed_poll = match outcome {
        Ok(response) => {
            session.last_status = Some(response.status);
            session.record(
                LogLevel::Info,
                format!("Job status: {}", response.status.as_str()),
            );
            match response.status {
                JobStatus::Queued => session.apply(PollEvent::PollQueued),
                JobStatus::Processing => session.apply(PollEvent::PollProcessing),
                JobStatus::Completed => session.apply(PollEvent::PollCompleted(response.result)),
                JobStatus::Failed => session.apply(PollEvent::PollFailed(
                    response.error.unwrap_or_else(|| "Unknown error".to_string()),
                )),
            };
            false
        }
        Err(e) => {
            let level = if attempt > 10 {
                LogLevel::Warn
            } else {
                LogLevel::Info
            };
            let message = match &e {
                ClientError::Http { status, .. } => {
                    format!("Poll response not OK: {}. Retrying...", status)
                }
                other => format!("Poll error: {}", other),
            };
            session.record(level, message);
            true
        }
    };

    if session.is_terminal() {
        return false;
    }

    let counts = failed_poll || config.ceiling == CeilingPolicy::AllResponses;
    if counts && attempt > config.max_attempts {
        session.record(
            LogLevel::Error,
            format!("Max retries reached ({}). Stopping poll.", config.max_attempts),
        );
        session.apply(PollEvent::MaxAttemptsExceeded);
        return false;
    }

    session.stage.is_polling()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use qclip_models::{JobStatusResponse, SubmitResponse};
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Replays scripted status responses; repeats the last one when exhausted.
    struct FakeApi {
        job_id: JobId,
        submit_error: Option<(u16, String)>,
        script: Mutex<VecDeque<ClientResult<JobStatusResponse>>>,
        fallback: fn() -> ClientResult<JobStatusResponse>,
        submits: AtomicUsize,
        polls: AtomicUsize,
    }

    impl FakeApi {
        fn new(
            script: Vec<ClientResult<JobStatusResponse>>,
            fallback: fn() -> ClientResult<JobStatusResponse>,
        ) -> Arc<Self> {
            Arc::new(Self {
                job_id: JobId::new(),
                submit_error: None,
                script: Mutex::new(script.into()),
                fallback,
                submits: AtomicUsize::new(0),
                polls: AtomicUsize::new(0),
            })
        }

        fn polls(&self) -> usize {
            self.polls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl JobsApi for FakeApi {
        async fn submit(&self, _path: &Path) -> ClientResult<SubmitResponse> {
            self.submits.fetch_add(1, Ordering::SeqCst);
            match &self.submit_error {
                Some((status, message)) => Err(ClientError::Http {
                    status: *status,
                    message: message.clone(),
                }),
                None => Ok(SubmitResponse::queued(self.job_id.clone())),
            }
        }

        async fn status(&self, job_id: &JobId) -> ClientResult<JobStatusResponse> {
            assert_eq!(job_id, &self.job_id);
            self.polls.fetch_add(1, Ordering::SeqCst);
            let next = lock(&self.script).pop_front();
            next.unwrap_or_else(self.fallback)
        }
    }

    fn processing() -> ClientResult<JobStatusResponse> {
        Ok(JobStatusResponse::processing())
    }

    fn unreachable_backend() -> ClientResult<JobStatusResponse> {
        Err(ClientError::Transport("connection refused".to_string()))
    }

    fn queued() -> ClientResult<JobStatusResponse> {
        Ok(JobStatusResponse {
            status: JobStatus::Queued,
            result: None,
            error: None,
        })
    }

    fn completed() -> ClientResult<JobStatusResponse> {
        Ok(JobStatusResponse::completed(json!({"transcription": "hello"})))
    }

    fn config(max_attempts: u32, ceiling: CeilingPolicy) -> PollerConfig {
        PollerConfig {
            poll_interval: Duration::from_millis(2000),
            max_attempts,
            ceiling,
            ..PollerConfig::default()
        }
    }

    fn poller(api: &Arc<FakeApi>, config: PollerConfig) -> Poller {
        Poller::new(api.clone(), config)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_secs(120)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequence_stops_after_completed() {
        let api = FakeApi::new(vec![processing(), processing(), completed()], processing);
        let poller = poller(&api, config(30, CeilingPolicy::AllResponses));

        let job_id = poller.submit(Some(Path::new("clip.mp4"))).await.unwrap();
        assert_eq!(job_id, Some(api.job_id.clone()));

        let session = poller.wait().await;
        assert_eq!(session.stage, PollStage::Completed);
        assert_eq!(
            session.stages,
            vec![
                PollStage::Idle,
                PollStage::Preparing,
                PollStage::Uploaded,
                PollStage::Queued,
                PollStage::Processing,
                PollStage::Processing,
                PollStage::Completed
            ]
        );
        assert_eq!(session.result.unwrap()["transcription"], "hello");
        assert_eq!(session.attempt_count, 3);
        assert_eq!(api.polls(), 3);

        settle().await;
        assert_eq!(api.polls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_report_before_processing() {
        let api = FakeApi::new(vec![queued(), processing(), completed()], processing);
        let poller = poller(&api, config(30, CeilingPolicy::AllResponses));

        poller.attach(api.job_id.clone());
        let session = poller.wait().await;

        assert_eq!(
            session.stages,
            vec![
                PollStage::Idle,
                PollStage::Queued,
                PollStage::Processing,
                PollStage::Completed
            ]
        );
        assert_eq!(api.polls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ceiling_fails_with_timeout_message() {
        let api = FakeApi::new(Vec::new(), unreachable_backend);
        let poller = poller(&api, config(3, CeilingPolicy::ErrorsOnly));

        poller.attach(api.job_id.clone());
        let session = poller.wait().await;

        assert_eq!(session.stage, PollStage::Failed);
        assert_eq!(session.error.as_deref(), Some(POLL_TIMEOUT_MESSAGE));
        assert_eq!(api.polls(), 4);

        settle().await;
        assert_eq!(api.polls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_only_lets_processing_run_past_ceiling() {
        let mut script: Vec<_> = (0..6).map(|_| processing()).collect();
        script.push(completed());
        let api = FakeApi::new(script, processing);
        let poller = poller(&api, config(2, CeilingPolicy::ErrorsOnly));

        poller.attach(api.job_id.clone());
        let session = poller.wait().await;

        assert_eq!(session.stage, PollStage::Completed);
        assert_eq!(api.polls(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_responses_times_out_stuck_processing() {
        let api = FakeApi::new(Vec::new(), processing);
        let poller = poller(&api, config(3, CeilingPolicy::AllResponses));

        poller.attach(api.job_id.clone());
        let session = poller.wait().await;

        assert_eq!(session.stage, PollStage::Failed);
        assert_eq!(session.error.as_deref(), Some(POLL_TIMEOUT_MESSAGE));
        assert_eq!(api.polls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_keep_polling() {
        let api = FakeApi::new(
            vec![
                unreachable_backend(),
                Err(ClientError::Http {
                    status: 502,
                    message: "bad gateway".to_string(),
                }),
                Err(ClientError::parse("expected value")),
                completed(),
            ],
            processing,
        );
        let poller = poller(&api, config(30, CeilingPolicy::AllResponses));

        poller.attach(api.job_id.clone());
        let session = poller.wait().await;

        assert_eq!(session.stage, PollStage::Completed);
        assert!(session.log.iter().any(|e| e.message.contains("Poll response not OK: 502")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_job_error_is_verbatim() {
        let api = FakeApi::new(
            vec![Ok(JobStatusResponse::failed("ffmpeg exited with 1"))],
            processing,
        );
        let poller = poller(&api, config(30, CeilingPolicy::AllResponses));

        poller.attach(api.job_id.clone());
        let session = poller.wait().await;

        assert_eq!(session.stage, PollStage::Failed);
        assert_eq!(session.error.as_deref(), Some("ffmpeg exited with 1"));
        settle().await;
        assert_eq!(api.polls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_stops_polling_and_replaces_session() {
        let api = FakeApi::new(Vec::new(), processing);
        let poller = poller(&api, config(30, CeilingPolicy::AllResponses));

        poller.attach(api.job_id.clone());
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(api.polls(), 1);
        let before = poller.session().generation;

        poller.reset();
        settle().await;

        let session = poller.session();
        assert_eq!(api.polls(), 1);
        assert_eq!(session.stage, PollStage::Idle);
        assert_eq!(session.generation, before + 1);
        assert_eq!(session.attempt_count, 0);
        assert!(session.job_id.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_stops_polling() {
        let api = FakeApi::new(Vec::new(), processing);
        let poller = poller(&api, config(30, CeilingPolicy::AllResponses));

        poller.attach(api.job_id.clone());
        tokio::time::sleep(Duration::from_millis(2500)).await;
        drop(poller);
        settle().await;

        assert_eq!(api.polls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_without_file_stays_idle() {
        let api = FakeApi::new(Vec::new(), processing);
        let poller = poller(&api, config(30, CeilingPolicy::AllResponses));

        let job_id = poller.submit(None).await.unwrap();

        assert!(job_id.is_none());
        let session = poller.session();
        assert_eq!(session.stage, PollStage::Idle);
        assert!(session.error.is_some());
        assert_eq!(api.submits.load(Ordering::SeqCst), 0);
        settle().await;
        assert_eq!(api.polls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_submit_fails_session() {
        let api = Arc::new(FakeApi {
            job_id: JobId::new(),
            submit_error: Some((413, "Upload too large".to_string())),
            script: Mutex::new(VecDeque::new()),
            fallback: processing,
            submits: AtomicUsize::new(0),
            polls: AtomicUsize::new(0),
        });
        let poller = poller(&api, config(30, CeilingPolicy::AllResponses));

        let err = poller
            .submit(Some(Path::new("big.mp4")))
            .await
            .unwrap_err();

        assert_eq!(err.status(), Some(413));
        let session = poller.session();
        assert_eq!(session.stage, PollStage::Failed);
        assert_eq!(session.error.as_deref(), Some("Upload too large"));
        assert_eq!(
            session.stages,
            vec![PollStage::Idle, PollStage::Preparing, PollStage::Failed]
        );
        settle().await;
        assert_eq!(api.polls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_submit_while_polling_is_ignored() {
        let api = FakeApi::new(Vec::new(), processing);
        let poller = poller(&api, config(30, CeilingPolicy::AllResponses));

        poller.attach(api.job_id.clone());
        let second = poller.submit(Some(Path::new("again.mp4"))).await.unwrap();

        assert!(second.is_none());
        assert_eq!(api.submits.load(Ordering::SeqCst), 0);
        assert_eq!(poller.stage(), PollStage::Queued);
        poller.reset();
    }
}
