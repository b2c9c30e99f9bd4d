//! Transcription worker binary.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use qclip_firestore::{FirestoreClient, FirestoreTranscriptStore};
use qclip_inference::{DeepgramClient, GeminiConfig, GeminiSummarizer};
use qclip_media::{check_ffmpeg, FfmpegAudioExtractor, FfmpegRunner};
use qclip_queue::RedisStreamQueue;
use qclip_storage::R2Client;
use qclip_worker::{JobExecutor, Pipeline, WorkerConfig};

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS)
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("rustls crypto provider was already installed");
    }

    dotenvy::dotenv().ok();

    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("qclip=info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(true).with_target(true))
            .with(env_filter)
            .init();
    }

    info!("Starting qclip-worker");

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    if let Some(port) = std::env::var("METRICS_PORT").ok().and_then(|p| p.parse::<u16>().ok()) {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        match qclip_worker::metrics::init_metrics(addr) {
            Ok(()) => info!(%addr, "Serving worker metrics"),
            Err(e) => warn!("Metrics disabled: {}", e),
        }
    }

    let store = match R2Client::from_env() {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to create storage client: {}", e);
            std::process::exit(1);
        }
    };

    let queue = match RedisStreamQueue::from_env() {
        Ok(q) => q,
        Err(e) => {
            error!("Failed to create job queue: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = queue.init().await {
        error!("Failed to initialize job queue: {}", e);
        std::process::exit(1);
    }

    let transcriber = match DeepgramClient::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to create transcription client: {}", e);
            std::process::exit(1);
        }
    };

    let mut runner = FfmpegRunner::new().with_timeout(config.ffmpeg_timeout);
    match &config.ffmpeg_path {
        Some(path) => runner = runner.with_binary(path.clone()),
        None => {
            if let Err(e) = check_ffmpeg() {
                warn!("{}; transform stage will fail until it is installed", e);
            }
        }
    }

    let mut pipeline = Pipeline::new(
        Arc::new(store),
        Arc::new(FfmpegAudioExtractor::new(runner)),
        Arc::new(transcriber),
        config.work_dir.clone(),
    )
    .with_timeout(config.job_timeout);

    if config.summary_enabled {
        match GeminiConfig::from_env().map(GeminiSummarizer::new) {
            Some(Ok(summarizer)) => pipeline = pipeline.with_summarizer(Arc::new(summarizer)),
            Some(Err(e)) => warn!("Summarization disabled: {}", e),
            None => info!("GEMINI_API_KEY not set; summarization disabled"),
        }
    }

    match FirestoreClient::from_env() {
        Ok(client) => {
            pipeline = pipeline.with_transcript_store(Arc::new(FirestoreTranscriptStore::new(client)))
        }
        Err(e) => warn!("Transcript persistence disabled: {}", e),
    }

    let executor = Arc::new(JobExecutor::new(config, Arc::new(queue), pipeline));

    let signal_executor = Arc::clone(&executor);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        signal_executor.shutdown();
    });

    if let Err(e) = executor.run().await {
        error!("Executor error: {}", e);
        std::process::exit(1);
    }

    info!("Worker shutdown complete");
}
