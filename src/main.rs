mod cli;

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use baton::anthropic::AnthropicClient;
use baton::checkpoint::CheckpointStore;
use baton::config::BatonConfig;
use baton::driver::{JobDriver, sample_items, stored_progress};
use baton::review::{AnyAgent, HeuristicAgent, ItemAnalyzer, LlmAgent, WorkItem};
use baton::state_machine::{JobReport, JobRequest};
use baton::ui;
use cli::{Cli, Command};

fn init_tracing(verbose: bool) {
    let default = if verbose { "baton=debug" } else { "baton=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn build_agent(config: &BatonConfig, offline: bool) -> Result<AnyAgent> {
    if offline || config.api_key.is_empty() {
        tracing::info!("using offline heuristic analyses");
        return Ok(AnyAgent::Heuristic(HeuristicAgent));
    }
    let timeout = Duration::from_secs(config.activity_timeout_secs);
    let client = AnthropicClient::new(config.api_key.clone(), timeout)?;
    Ok(AnyAgent::Llm(LlmAgent::new(client, config.model.clone())))
}

fn load_items(path: &Path) -> Result<Vec<WorkItem>> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parsing {}", path.display()))
}

async fn run_with_progress(
    driver: &JobDriver<AnyAgent>,
    total: usize,
    job: impl Future<Output = Result<JobReport, baton::BatonError>>,
) -> Result<JobReport> {
    let bar = ui::BatchProgressBar::start(total);
    let follower = tokio::spawn(bar.follow(driver.progress()));
    let result = job.await;
    match &result {
        Ok(_) => {
            let _ = follower.await;
        }
        Err(_) => follower.abort(),
    }
    Ok(result?)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = BatonConfig::load()?;
    if let Some(threshold) = cli.threshold {
        config.handoff_threshold = threshold;
    }
    if let Some(max_attempts) = cli.max_attempts {
        config.max_attempts = max_attempts;
    }
    if let Some(dir) = cli.checkpoint_dir {
        config.checkpoint_dir = dir;
    }
    let store = CheckpointStore::new(&config.checkpoint_dir);

    match cli.command {
        Command::Run { items, file, job_id } => {
            let items = match (items, file) {
                (_, Some(path)) => load_items(&path)?,
                (Some(count), None) => sample_items(count),
                (None, None) => anyhow::bail!("either --items or --file is required"),
            };
            let job_id = job_id.unwrap_or_else(|| {
                let id = uuid::Uuid::new_v4().simple().to_string();
                format!("batch-{}", &id[..8])
            });
            let request = JobRequest::new(job_id, items);
            let total = request.total_count();

            let agent = build_agent(&config, cli.offline)?;
            let analyzer = ItemAnalyzer::new(agent, config.retry_config());
            let driver = JobDriver::new(analyzer, config.restart_policy()).with_store(store);
            let report = run_with_progress(&driver, total, driver.submit(request)).await?;
            ui::print_report(&report);
        }
        Command::Resume { job_id } => {
            let total = store.load_request(&job_id)?.total_count();
            let agent = build_agent(&config, cli.offline)?;
            let analyzer = ItemAnalyzer::new(agent, config.retry_config());
            let driver = JobDriver::new(analyzer, config.restart_policy()).with_store(store);
            let report = run_with_progress(&driver, total, driver.resume(&job_id)).await?;
            ui::print_report(&report);
        }
        Command::Status { job_id } => {
            let progress = stored_progress(&store, &job_id)?;
            ui::print_progress(&job_id, &progress);
        }
    }

    Ok(())
}
