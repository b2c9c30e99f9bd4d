//! The per-delivery job pipeline.
//!
//! Stages run in a fixed order inside a private working directory:
//!
//! 1. Fetch the input artifact (required)
//! 2. Extract speech audio (required)
//! 3. Transcribe (required)
//! 4. Summarize (best-effort, placeholder on failure)
//! 5. Publish the result document (required)
//! 6. Persist the transcript to the transcript store (best-effort)
//! 7. Remove the working directory (always)
//!
//! A required failure aborts the run with a [`WorkerError`]; best-effort
//! failures are captured in [`PipelineReport::degraded`].

use std::fmt::Display;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use qclip_firestore::TranscriptStore;
use qclip_inference::{Summarizer, TranscriptionProvider};
use qclip_media::AudioExtractor;
use qclip_models::{JobDescriptor, JobId, JobResult};
use qclip_storage::{publish_result, ArtifactStore};
use tracing::{debug, Instrument};
use uuid::Uuid;

use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;
use crate::stage::{Stage, StageFailure};

/// Summary written when the transcript holds no speech.
pub const EMPTY_TRANSCRIPT_SUMMARY: &str = "No speech detected; nothing to summarize.";

/// Summary written when the summarizer fails.
pub fn summary_unavailable(reason: impl Display) -> String {
    format!("Summary unavailable: {}", reason)
}

const INPUT_FILE: &str = "input.bin";
const AUDIO_FILE: &str = "audio.wav";

/// Outcome of a pipeline run that reached Publish.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub job_id: JobId,
    pub result_key: String,
    pub result: JobResult,
    /// Best-effort and cleanup failures swallowed along the way
    pub degraded: Vec<StageFailure>,
}

impl PipelineReport {
    pub fn is_degraded(&self) -> bool {
        !self.degraded.is_empty()
    }
}

/// Staged transcription pipeline over injected providers.
pub struct Pipeline {
    store: Arc<dyn ArtifactStore>,
    extractor: Arc<dyn AudioExtractor>,
    transcriber: Arc<dyn TranscriptionProvider>,
    summarizer: Option<Arc<dyn Summarizer>>,
    transcripts: Option<Arc<dyn TranscriptStore>>,
    work_dir: PathBuf,
    timeout: Option<Duration>,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn ArtifactStore>,
        extractor: Arc<dyn AudioExtractor>,
        transcriber: Arc<dyn TranscriptionProvider>,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            extractor,
            transcriber,
            summarizer: None,
            transcripts: None,
            work_dir: work_dir.into(),
            timeout: None,
        }
    }

    /// Enable the summarization stage.
    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    /// Enable the transcript persistence stage.
    pub fn with_transcript_store(mut self, transcripts: Arc<dyn TranscriptStore>) -> Self {
        self.transcripts = Some(transcripts);
        self
    }

    /// Bound the stages of one run. Cleanup still runs after a timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Run every stage for one delivery of `descriptor`.
    pub async fn run(
        &self,
        descriptor: &JobDescriptor,
        logger: &JobLogger,
    ) -> WorkerResult<PipelineReport> {
        let dir = WorkDir::create(&self.work_dir, &descriptor.job_id).await?;
        logger.log_start(&format!("working in {}", dir.path().display()));

        let stages = self.run_stages(descriptor, dir.path(), logger);
        let outcome = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, stages)
                .await
                .unwrap_or_else(|_| Err(WorkerError::Timeout(limit.as_secs()))),
            None => stages.await,
        };

        let started = Instant::now();
        let cleanup = dir.remove().await;
        metrics::record_stage_duration(Stage::Cleanup, started.elapsed().as_secs_f64());

        match (outcome, cleanup) {
            (Ok(mut report), Err(e)) => {
                logger.log_degraded(Stage::Cleanup, &e.to_string());
                report.degraded.push(StageFailure::new(Stage::Cleanup, e.to_string()));
                Ok(report)
            }
            (Err(err), Err(e)) => {
                logger.log_degraded(Stage::Cleanup, &e.to_string());
                Err(err)
            }
            (outcome, Ok(())) => outcome,
        }
    }

    async fn run_stages(
        &self,
        descriptor: &JobDescriptor,
        dir: &Path,
        logger: &JobLogger,
    ) -> WorkerResult<PipelineReport> {
        let job_id = &descriptor.job_id;
        let mut degraded = Vec::new();

        let input = dir.join(INPUT_FILE);
        let bytes = timed(Stage::Fetch, self.store.get_file(&descriptor.input_ref, &input))
            .await
            .map_err(WorkerError::Fetch)?;
        logger.log_stage(Stage::Fetch, &format!("fetched {} bytes", bytes));

        let audio = dir.join(AUDIO_FILE);
        let audio_bytes = timed(Stage::Transform, self.extractor.extract(&input, &audio)).await?;
        logger.log_stage(Stage::Transform, &format!("extracted {} bytes of audio", audio_bytes));

        let data = tokio::fs::read(&audio).await?;
        let transcription = timed(
            Stage::PrimaryAnalysis,
            self.transcriber.transcribe(data, self.extractor.content_type()),
        )
        .await?;
        logger.log_stage(
            Stage::PrimaryAnalysis,
            &format!(
                "{} returned {} chars",
                self.transcriber.name(),
                transcription.len()
            ),
        );

        let mut result = JobResult::new(transcription.clone());
        if let Some(summarizer) = &self.summarizer {
            result = if transcription.trim().is_empty() {
                debug!(job_id = %job_id, "Empty transcript, skipping summarizer");
                result.with_summary(EMPTY_TRANSCRIPT_SUMMARY)
            } else {
                match best_effort(
                    Stage::SecondaryAnalysis,
                    logger,
                    &mut degraded,
                    summarizer.summarize(&transcription),
                )
                .await
                {
                    Ok(summary) => result
                        .with_summary(summary.summary)
                        .with_key_points(summary.key_points),
                    Err(reason) => result.with_summary(summary_unavailable(reason)),
                }
            };
        }

        let result_key = timed(
            Stage::Publish,
            publish_result(self.store.as_ref(), job_id, &result),
        )
        .await
        .map_err(WorkerError::Publish)?;
        logger.log_stage(Stage::Publish, &format!("published {}", result_key));

        if let Some(transcripts) = &self.transcripts {
            let persisted = best_effort(
                Stage::SecondaryPersistence,
                logger,
                &mut degraded,
                transcripts.upsert_transcription(job_id, &transcription),
            )
            .await;
            if persisted.is_ok() {
                logger.log_stage(Stage::SecondaryPersistence, "transcript persisted");
            }
        }

        Ok(PipelineReport {
            job_id: job_id.clone(),
            result_key,
            result,
            degraded,
        })
    }
}

/// Await a stage future, recording its duration.
async fn timed<T, E, F>(stage: Stage, fut: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
{
    let started = Instant::now();
    let out = fut
        .instrument(tracing::debug_span!("stage", stage = %stage))
        .await;
    metrics::record_stage_duration(stage, started.elapsed().as_secs_f64());
    out
}

/// Await a best-effort stage, capturing its failure instead of propagating it.
///
/// Returns the failure message on error so the caller can substitute a value.
async fn best_effort<T, E, F>(
    stage: Stage,
    logger: &JobLogger,
    degraded: &mut Vec<StageFailure>,
    fut: F,
) -> Result<T, String>
where
    E: Display,
    F: Future<Output = Result<T, E>>,
{
    timed(stage, fut).await.map_err(|e| {
        let message = e.to_string();
        logger.log_degraded(stage, &message);
        metrics::record_stage_degraded(stage);
        degraded.push(StageFailure::new(stage, message.clone()));
        message
    })
}

/// Private working directory of one delivery.
///
/// Removed explicitly with [`WorkDir::remove`]; if the run unwinds first the
/// directory is removed on drop.
struct WorkDir {
    path: PathBuf,
    removed: bool,
}

impl WorkDir {
    async fn create(parent: &Path, job_id: &JobId) -> WorkerResult<Self> {
        let path = parent.join(format!("{}-{}", job_id, Uuid::new_v4()));
        tokio::fs::create_dir_all(&path).await?;
        Ok(Self {
            path,
            removed: false,
        })
    }

    fn path(&self) -> &Path {
        &self.path
    }

    async fn remove(mut self) -> std::io::Result<()> {
        self.removed = true;
        match tokio::fs::remove_dir_all(&self.path).await {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        if !self.removed {
            let _ = std::fs::remove_dir_all(&self.path);
        }
    }
}
