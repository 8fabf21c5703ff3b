use orchestrator::app_state::AppState;
use orchestrator::config::Config;
use orchestrator::watcher::WatcherMsg;
use shared_types::TaskInput;
use std::path::Path;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const USAGE: &str = "usage: orchestrator <run TASK_FILE | sweep | watch>";

/// Used when `RUST_LOG` is unset.
const DEFAULT_LOG_FILTER: &str = "orchestrator=info";

fn load_env_file() {
    let cwd = match std::env::current_dir() {
        Ok(dir) => dir,
        Err(e) => {
            tracing::warn!(error = %e, "Could not determine current directory for .env lookup");
            return;
        }
    };

    let mut current = cwd.clone();
    loop {
        let candidate = current.join(".env");
        if candidate.exists() {
            match dotenvy::from_path(&candidate) {
                Ok(_) => {
                    tracing::info!(path = %candidate.display(), "Loaded environment from .env");
                }
                Err(e) => {
                    tracing::warn!(
                        path = %candidate.display(),
                        error = %e,
                        "Failed to load .env file"
                    );
                }
            }
            return;
        }

        if !current.pop() {
            break;
        }
    }

    tracing::info!(
        cwd = %cwd.display(),
        "No .env file found in current directory or ancestors; using process environment only"
    );
}

/// Task files are JSON or TOML, picked by extension.
fn read_task(path: &Path) -> anyhow::Result<TaskInput> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read task file {}: {e}", path.display()))?;
    let task = match path.extension().and_then(|ext| ext.to_str()) {
        Some("toml") => toml::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("Invalid task file {}: {e}", path.display()))?,
        _ => serde_json::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("Invalid task file {}: {e}", path.display()))?,
    };
    Ok(task)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    load_env_file();
    let config = Config::from_env()?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = args.first().map(String::as_str);

    let state = AppState::from_config(&config).await?;
    info!(
        database = %config.database_url,
        max_iterations = config.max_iterations,
        "Orchestrator ready"
    );

    match command {
        Some("run") => {
            let path = args
                .get(1)
                .ok_or_else(|| anyhow::anyhow!("missing task file\n{USAGE}"))?;
            let task = read_task(Path::new(path))?;
            let outcome = state.run_task(task).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Some("sweep") => {
            let watcher = state
                .ensure_watcher(
                    config.watcher_poll_interval.as_millis() as u64,
                    config.stale_run_after,
                )
                .await
                .map_err(|e| anyhow::anyhow!("failed to start watcher: {e}"))?;
            let report = ractor::call!(watcher, |reply| WatcherMsg::Sweep { reply })
                .map_err(|e| anyhow::anyhow!("watcher call failed: {e}"))?
                .map_err(|e| anyhow::anyhow!("sweep failed: {e}"))?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            watcher.stop(None);
        }
        Some("watch") => {
            let watcher = state
                .ensure_watcher(
                    config.watcher_poll_interval.as_millis() as u64,
                    config.stale_run_after,
                )
                .await
                .map_err(|e| anyhow::anyhow!("failed to start watcher: {e}"))?;
            info!("Watching; press Ctrl-C to stop");
            tokio::signal::ctrl_c().await?;
            watcher.stop(None);
            info!("Watcher stopped");
        }
        _ => anyhow::bail!(USAGE),
    }

    Ok(())
}
