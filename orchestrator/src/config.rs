use std::path::PathBuf;
use std::time::Duration;

use crate::runner::DEFAULT_MAX_ITERATIONS;

/// External property system configured for one organization
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalSystemConfig {
    pub organization_id: String,
    pub base_url: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite URL for the run log and escalations
    pub database_url: String,
    /// Endpoint of the reasoning gateway
    pub reasoning_base_url: String,
    /// Env var holding the reasoning API key (the key itself is never stored here)
    pub reasoning_api_key_env: String,
    pub reasoning_model: String,
    pub reasoning_timeout: Duration,
    /// Iteration ceiling per run
    pub max_iterations: u32,
    /// Interval between emergency and stale-run scans
    pub watcher_poll_interval: Duration,
    /// RUNNING runs older than this are reconciled as FAILED
    pub stale_run_after: chrono::Duration,
    /// TOML file with organizations, properties, vendors and tenants
    pub property_data_path: PathBuf,
    /// `EXTERNAL_SYSTEMS=org-1=https://pms.example.com,org-2=...`
    pub external_systems: Vec<ExternalSystemConfig>,
    /// Env var holding the bearer token for external property systems
    pub external_api_key_env: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let max_iterations: u32 = env_parse("ORCHESTRATOR_MAX_ITERATIONS", DEFAULT_MAX_ITERATIONS)?;
        if max_iterations == 0 {
            anyhow::bail!("ORCHESTRATOR_MAX_ITERATIONS must be at least 1");
        }

        Ok(Self {
            database_url: env_str("ORCHESTRATOR_DATABASE_URL", "sqlite:./data/orchestrator.db"),
            reasoning_base_url: env_str(
                "REASONING_BASE_URL",
                "http://127.0.0.1:9090/provider/v1/reason",
            ),
            reasoning_api_key_env: env_str("REASONING_API_KEY_ENV", "REASONING_API_KEY"),
            reasoning_model: env_str("REASONING_MODEL", "default"),
            reasoning_timeout: Duration::from_millis(env_parse("REASONING_TIMEOUT_MS", 60_000)?),
            max_iterations,
            watcher_poll_interval: Duration::from_millis(env_parse("WATCHER_POLL_MS", 60_000)?),
            stale_run_after: chrono::Duration::minutes(env_parse("STALE_RUN_MINUTES", 30)?),
            property_data_path: PathBuf::from(env_str(
                "PROPERTY_DATA_PATH",
                "./config/property-data.toml",
            )),
            external_systems: parse_external_systems(&env_csv("EXTERNAL_SYSTEMS", &[]))?,
            external_api_key_env: env_str("EXTERNAL_API_KEY_ENV", "EXTERNAL_SYSTEM_API_KEY"),
        })
    }

    pub fn reasoning_api_key(&self) -> Option<String> {
        std::env::var(&self.reasoning_api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
    }

    pub fn external_api_key(&self) -> Option<String> {
        std::env::var(&self.external_api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
    }
}

fn parse_external_systems(entries: &[String]) -> anyhow::Result<Vec<ExternalSystemConfig>> {
    entries
        .iter()
        .map(|entry| {
            let (org, url) = entry.split_once('=').ok_or_else(|| {
                anyhow::anyhow!("Invalid EXTERNAL_SYSTEMS entry '{entry}'. Expected org_id=url")
            })?;
            let (org, url) = (org.trim(), url.trim());
            if org.is_empty() || !(url.starts_with("http://") || url.starts_with("https://")) {
                anyhow::bail!("Invalid EXTERNAL_SYSTEMS entry '{entry}'. Expected org_id=url");
            }
            Ok(ExternalSystemConfig {
                organization_id: org.to_string(),
                base_url: url.to_string(),
            })
        })
        .collect()
}

fn env_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(val) => val
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Failed to parse env var {key}={val}: {e}")),
        Err(_) => Ok(default),
    }
}

fn env_csv(key: &str, default: &[&str]) -> Vec<String> {
    match std::env::var(key) {
        Ok(raw) => raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
            .collect(),
        Err(_) => default.iter().map(|s| (*s).to_string()).collect(),
    }
}
