mod artifact;
mod backend;
mod cli;
mod config;
mod error;
mod pipeline;
mod registry;
mod ui;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use artifact::LocalArtifactStore;
use backend::{BedrockClient, GenerationBackend, StubBackend};
use cli::{Cli, Command};
use config::FourcutConfig;
use pipeline::{Driver, GenerateRequest};
use registry::{JobRegistry, JobStatus};

/// Sample diary used by `fourcut demo`.
const DEMO_DIARY: &str = "Today was a lucky day. I almost missed the bus this morning, \
but the driver waited for me. My favorite pork cutlet was served at lunch. When I got \
home in the evening, my dog greeted me wagging his tail. A small but happy day.";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = FourcutConfig::load()?;
    let num_cuts = cli.cuts.unwrap_or(config.num_cuts);
    let style_guide = cli.style.clone().unwrap_or_else(|| config.style_guide.clone());
    let max_retries = cli.max_retries.unwrap_or(config.max_retries);

    match cli.command {
        Command::Generate {
            diary,
            file,
            reference,
        } => {
            let diary = read_diary(diary, file)?;
            let reference_image = match reference {
                Some(path) => Some(
                    std::fs::read(&path)
                        .with_context(|| format!("failed to read reference image {path}"))?,
                ),
                None => None,
            };
            if config.api_key.is_empty() {
                bail!(
                    "no API key configured; set BEDROCK_API_KEY or api_key in fourcut.toml \
                     (or try `fourcut demo`)"
                );
            }
            let backend = BedrockClient::new(
                config.api_key.clone(),
                &config.region,
                config.text_model_id.clone(),
                config.image_model_id.clone(),
            );
            let request = GenerateRequest {
                diary,
                num_cuts,
                style_guide,
                max_retries,
                reference_image,
            };
            run_pipeline(backend, &config, request).await
        }
        Command::Demo => {
            let request = GenerateRequest {
                diary: DEMO_DIARY.to_string(),
                num_cuts,
                style_guide,
                max_retries,
                reference_image: None,
            };
            run_pipeline(StubBackend::new(num_cuts), &config, request).await
        }
    }
}

/// Run one job and mirror its registry record to the terminal until it
/// reaches a terminal status.
async fn run_pipeline<B: GenerationBackend>(
    backend: B,
    config: &FourcutConfig,
    request: GenerateRequest,
) -> Result<()> {
    let registry = Arc::new(JobRegistry::new());
    let artifacts = LocalArtifactStore::new(config.artifact_dir.clone());
    let driver = Driver::new(backend, artifacts, registry.clone());

    let job_id = uuid::Uuid::new_v4().to_string();
    registry.create(&job_id);

    let poller = {
        let registry = registry.clone();
        let job_id = job_id.clone();
        let progress = ui::JobProgress::start(&job_id);
        tokio::spawn(async move {
            loop {
                if let Some(job) = registry.get(&job_id) {
                    progress.update(&job);
                    if job.status.is_terminal() {
                        progress.complete(&job);
                        break;
                    }
                }
                tokio::time::sleep(Duration::from_millis(120)).await;
            }
        })
    };

    if let Err(error) = driver.run(&job_id, request).await {
        // Already recorded in the job record; the poller reports it.
        tracing::debug!(%error, "pipeline aborted");
    }
    poller.await.context("progress poller crashed")?;

    let job = registry
        .get(&job_id)
        .context("job record vanished from the registry")?;
    ui::print_record(&job);

    match job.status {
        JobStatus::Succeeded => Ok(()),
        _ => bail!(
            "generation failed: {}",
            job.error.unwrap_or_else(|| "unknown error".into())
        ),
    }
}

fn read_diary(diary: Option<String>, file: Option<String>) -> Result<String> {
    match (diary, file) {
        (Some(text), _) => Ok(text),
        (None, Some(path)) => std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read diary file {path}")),
        (None, None) => bail!("provide diary text or --file <path>"),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "fourcut=debug" } else { "fourcut=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
