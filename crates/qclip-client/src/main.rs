//! `qclip` command-line client.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use qclip_client::{CeilingPolicy, HttpJobsApi, JobsApi, PollSession, Poller, PollerConfig};
use qclip_models::{JobId, PollStage};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "qclip", version, about = "Submit videos to QuickClip and follow their jobs")]
struct Cli {
    /// Base URL of the upload API
    #[arg(long, global = true, env = "QCLIP_API_URL")]
    api_url: Option<String>,

    /// Milliseconds between status polls
    #[arg(long, global = true, env = "POLL_INTERVAL_MS")]
    interval_ms: Option<u64>,

    /// Polls allowed before giving up (default 30). With --ceiling all, a job
    /// still processing after interval * (max_attempts + 1), about 62s by
    /// default, is reported as timed out; raise this for long videos
    #[arg(long, global = true, env = "POLL_MAX_ATTEMPTS")]
    max_attempts: Option<u32>,

    /// Which responses count toward --max-attempts: "all" or "errors-only"
    #[arg(long, global = true, env = "POLL_CEILING_POLICY")]
    ceiling: Option<CeilingPolicy>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a video and wait for its transcription
    Submit {
        file: PathBuf,

        /// Print the job id and exit without polling
        #[arg(long)]
        no_wait: bool,
    },
    /// Print the current status of a job once
    Status { job_id: String },
    /// Poll an existing job until it finishes
    Watch { job_id: String },
}

impl Cli {
    fn poller_config(&self) -> PollerConfig {
        let mut config = PollerConfig::from_env();
        if let Some(url) = &self.api_url {
            config.base_url = url.clone();
        }
        if let Some(ms) = self.interval_ms.filter(|ms| *ms > 0) {
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(max) = self.max_attempts {
            config.max_attempts = max;
        }
        if let Some(ceiling) = self.ceiling {
            config.ceiling = ceiling;
        }
        config
    }
}

#[tokio::main]
async fn main() {
    let _ = rustls::crypto::ring::default_provider().install_default();
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("qclip=warn")))
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(2);
        }
    }
}

/// Returns whether the command ended in a successful state.
async fn run(cli: Cli) -> Result<bool> {
    let config = cli.poller_config();
    let api = Arc::new(HttpJobsApi::new(&config).context("Failed to build HTTP client")?);
    info!(base_url = %api.base_url(), "Using API");
    if let Some(budget) = config.ceiling_budget() {
        info!(
            budget_secs = budget.as_secs(),
            max_attempts = config.max_attempts,
            "Jobs still processing past the poll budget are reported as timed out"
        );
    }

    match cli.command {
        Commands::Submit { file, no_wait } => {
            if !file.is_file() {
                bail!("{} is not a file", file.display());
            }
            if no_wait {
                let response = api.submit(&file).await?;
                print_json(&response)?;
                return Ok(true);
            }
            let poller = Poller::new(api, config);
            if let Err(e) = poller.submit(Some(&file)).await {
                error!(error = %e, "Upload failed");
            }
            finish(poller.wait().await)
        }
        Commands::Status { job_id } => {
            let job_id = parse_job_id(&job_id)?;
            let response = api.status(&job_id).await?;
            print_json(&response)?;
            Ok(!matches!(response.status, qclip_models::JobStatus::Failed))
        }
        Commands::Watch { job_id } => {
            let job_id = parse_job_id(&job_id)?;
            let poller = Poller::new(api, config);
            poller.attach(job_id);
            finish(poller.wait().await)
        }
    }
}

fn parse_job_id(raw: &str) -> Result<JobId> {
    JobId::parse(raw).with_context(|| format!("Invalid job id '{}'", raw))
}

fn finish(session: PollSession) -> Result<bool> {
    print_json(&session)?;
    Ok(session.stage == PollStage::Completed)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
