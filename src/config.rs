//! Configuration types.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;
use uuid::Uuid;

use crate::error::ConfigError;
use crate::formulas::FormulaConfig;

/// Worker loop configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Identifier written into `claimed_by` for every job this worker claims.
    pub worker_id: String,
    /// Sleep between empty polls of the job store.
    pub poll_interval: Duration,
    /// How often a running job refreshes its heartbeat and checks for cancellation.
    pub heartbeat_interval: Duration,
    /// Formula values handed to skills when a job carries no snapshot of its own.
    pub formulas: FormulaConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", Uuid::new_v4()),
            poll_interval: Duration::from_secs(1),
            heartbeat_interval: Duration::from_secs(15),
            formulas: FormulaConfig::canonical(),
        }
    }
}

/// Stuck-job repair configuration.
#[derive(Debug, Clone)]
pub struct RepairConfig {
    /// Processing jobs without a heartbeat for this long are considered lost.
    pub stuck_threshold: Duration,
    /// Maximum attempts per submission (the original run counts as attempt 1).
    pub max_repair_attempts: u32,
    /// Repair check interval.
    pub repair_check_interval: Duration,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            stuck_threshold: Duration::from_secs(300), // 5 minutes
            max_repair_attempts: 3,
            repair_check_interval: Duration::from_secs(60), // 1 minute
        }
    }
}

/// Document extraction service settings.
#[derive(Debug, Clone)]
pub struct ExtractionConfig {
    pub api_key: SecretString,
    pub model: String,
}

/// Process-wide configuration, read from the environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub report_dir: PathBuf,
    pub api_port: u16,
    /// Number of worker loops to run in this process.
    pub workers: usize,
    pub worker: WorkerConfig,
    pub repair: RepairConfig,
    /// `None` when no API key is configured; the extraction skill is then not registered.
    pub extraction: Option<ExtractionConfig>,
    /// Directory for the rolling log file, if file logging is wanted.
    pub log_dir: Option<PathBuf>,
}

impl AppConfig {
    /// Load configuration from `WASTEWISE_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary lookup (used by tests).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = WorkerConfig::default();
        let repair_defaults = RepairConfig::default();

        let worker = WorkerConfig {
            worker_id: lookup("WASTEWISE_WORKER_ID").unwrap_or(defaults.worker_id),
            poll_interval: Duration::from_millis(parse_or(
                &lookup,
                "WASTEWISE_POLL_INTERVAL_MS",
                1000u64,
            )?),
            heartbeat_interval: Duration::from_secs(parse_or(
                &lookup,
                "WASTEWISE_HEARTBEAT_INTERVAL_SECS",
                defaults.heartbeat_interval.as_secs(),
            )?),
            formulas: FormulaConfig::canonical(),
        };

        let repair = RepairConfig {
            stuck_threshold: Duration::from_secs(parse_or(
                &lookup,
                "WASTEWISE_STUCK_THRESHOLD_SECS",
                repair_defaults.stuck_threshold.as_secs(),
            )?),
            max_repair_attempts: parse_or(
                &lookup,
                "WASTEWISE_MAX_REPAIR_ATTEMPTS",
                repair_defaults.max_repair_attempts,
            )?,
            repair_check_interval: Duration::from_secs(parse_or(
                &lookup,
                "WASTEWISE_REPAIR_CHECK_INTERVAL_SECS",
                repair_defaults.repair_check_interval.as_secs(),
            )?),
        };

        if worker.heartbeat_interval >= repair.stuck_threshold {
            return Err(ConfigError::InvalidValue {
                key: "WASTEWISE_HEARTBEAT_INTERVAL_SECS".to_string(),
                message: "heartbeat interval must be shorter than the stuck threshold".to_string(),
            });
        }

        let workers: usize = parse_or(&lookup, "WASTEWISE_WORKERS", 1)?;
        if workers == 0 {
            return Err(ConfigError::InvalidValue {
                key: "WASTEWISE_WORKERS".to_string(),
                message: "at least one worker is required".to_string(),
            });
        }

        let extraction = lookup("ANTHROPIC_API_KEY")
            .filter(|key| !key.is_empty())
            .map(|key| ExtractionConfig {
                api_key: SecretString::from(key),
                model: lookup("WASTEWISE_EXTRACTION_MODEL")
                    .unwrap_or_else(|| "claude-sonnet-4-20250514".to_string()),
            });

        Ok(Self {
            db_path: lookup("WASTEWISE_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data/wastewise.db")),
            report_dir: lookup("WASTEWISE_REPORT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data/reports")),
            api_port: parse_or(&lookup, "WASTEWISE_API_PORT", 8080)?,
            workers,
            worker,
            repair,
            extraction,
            log_dir: lookup("WASTEWISE_LOG_DIR").map(PathBuf::from),
        })
    }
}

fn parse_or<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{raw:?}: {e}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = AppConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.worker.poll_interval, Duration::from_secs(1));
        assert_eq!(config.repair.stuck_threshold, Duration::from_secs(300));
        assert_eq!(config.repair.max_repair_attempts, 3);
        assert_eq!(config.api_port, 8080);
        assert_eq!(config.workers, 1);
        assert!(config.extraction.is_none());
        assert!(config.worker.worker_id.starts_with("worker-"));
    }

    #[test]
    fn overrides_are_parsed() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("WASTEWISE_POLL_INTERVAL_MS", "250"),
            ("WASTEWISE_WORKER_ID", "w1"),
            ("WASTEWISE_WORKERS", "4"),
            ("ANTHROPIC_API_KEY", "sk-test"),
        ]))
        .unwrap();
        assert_eq!(config.worker.poll_interval, Duration::from_millis(250));
        assert_eq!(config.worker.worker_id, "w1");
        assert_eq!(config.workers, 4);
        assert!(config.extraction.is_some());
    }

    #[test]
    fn invalid_number_is_an_error() {
        let err = AppConfig::from_lookup(lookup_from(&[("WASTEWISE_API_PORT", "eighty")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "WASTEWISE_API_PORT"));
    }

    #[test]
    fn heartbeat_must_be_shorter_than_threshold() {
        let err = AppConfig::from_lookup(lookup_from(&[
            ("WASTEWISE_HEARTBEAT_INTERVAL_SECS", "30"),
            ("WASTEWISE_STUCK_THRESHOLD_SECS", "30"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn zero_workers_rejected() {
        assert!(AppConfig::from_lookup(lookup_from(&[("WASTEWISE_WORKERS", "0")])).is_err());
    }
}
