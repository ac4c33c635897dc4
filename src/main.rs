use anyhow::{Context, Result};
use clap::Parser;
use postfleet::config;
use postfleet::driver::HttpDriver;
use postfleet::model::RawRow;
use postfleet::orchestrator::Orchestrator;
use postfleet::otp::GitOtpSource;
use postfleet::source::{self, SupabaseClient};
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Optional JSON file with raw work rows, bypassing the remote fetch
    #[arg(long)]
    items: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let rows: Vec<RawRow> = match &args.items {
        Some(path) => {
            let payload = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read items file {}", path.display()))?;
            serde_json::from_str(&payload).context("items file is not a JSON array of rows")?
        }
        None => {
            // An unreachable store is the one process-fatal condition:
            // there is nothing to do and no way to know what to do.
            let store = SupabaseClient::from_env()?;
            let fetched = source::fetch_with_fallback(&store).await?;
            if let Some(table) = fetched.source {
                info!(table = table.as_str(), rows = fetched.rows.len(), "work fetched");
            }
            fetched.rows
        }
    };

    if rows.is_empty() {
        info!("no work rows, exiting cleanly");
        return Ok(());
    }

    let buckets = source::categorize(&rows, &cfg.categories);

    let driver = HttpDriver::new(&cfg.driver.base_url, cfg.driver.token.as_deref())?;
    let otp = GitOtpSource::new(cfg.otp.repo_url.clone(), cfg.otp_work_dir());

    let report = Orchestrator::new(&cfg, &driver, &otp).run(&buckets).await;

    info!(attempted = report.attempted(), "run finished");
    for outcome in report.failed_categories() {
        warn!(category = %outcome.category, result = ?outcome.result, "category did not complete cleanly");
    }

    Ok(())
}
