//! Configuration module
//!
//! Run settings are layered: CLI flags over `TESTSCHED_*` environment
//! variables over the plan's `settings` block over built-in defaults.

mod env;
mod plan;

pub use env::{print_env_help, EnvConfig};
pub use plan::{GroupSpec, TestPlan};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::executor::{default_pool_size, Isolation, SchedulerConfig};
use crate::models::{FailurePolicy, Outcome, HARD_FAILURE_THRESHOLD};
use crate::output::OutputFormat;

/// Default throttle between progress lines for one running test
pub const DEFAULT_PROGRESS_INTERVAL_SECS: f64 = 10.0;

/// One partial layer of run settings
///
/// Unset fields leave lower layers untouched.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Number of groups run at once
    pub pool_size: Option<usize>,

    /// Per-test timeout in seconds
    pub timeout_secs: Option<f64>,

    /// Seconds between progress reports for a running test
    pub progress_interval_secs: Option<f64>,

    /// Abort after more than this many hard failures
    pub max_fail: Option<usize>,

    /// Report format (table, json, json-pretty, csv, summary)
    pub format: Option<String>,

    /// Lowest outcome counted as a hard failure (diff, timeout, fatal)
    pub hard_failure: Option<String>,
}

/// Fully resolved application configuration
#[derive(Clone, Debug, PartialEq)]
pub struct AppConfig {
    pub pool_size: usize,
    pub timeout: Option<Duration>,
    pub progress_interval: Option<Duration>,
    pub max_fail: Option<usize>,
    pub format: OutputFormat,
    pub hard_failure: Outcome,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            timeout: None,
            progress_interval: Some(Duration::from_secs_f64(DEFAULT_PROGRESS_INTERVAL_SECS)),
            max_fail: None,
            format: OutputFormat::Table,
            hard_failure: HARD_FAILURE_THRESHOLD,
        }
    }
}

impl AppConfig {
    /// Apply layers in order, later layers taking precedence
    pub fn resolve<'a>(layers: impl IntoIterator<Item = &'a Settings>) -> Result<Self> {
        let mut config = Self::default();
        for layer in layers {
            config.apply(layer)?;
        }
        Ok(config)
    }

    /// Override every field `settings` sets
    pub fn apply(&mut self, settings: &Settings) -> Result<()> {
        if let Some(pool_size) = settings.pool_size {
            self.pool_size = pool_size;
        }
        if let Some(secs) = settings.timeout_secs {
            self.timeout = Some(seconds(secs).context("Invalid timeout")?);
        }
        if let Some(secs) = settings.progress_interval_secs {
            self.progress_interval = Some(seconds(secs).context("Invalid progress interval")?);
        }
        if let Some(max_fail) = settings.max_fail {
            self.max_fail = Some(max_fail);
        }
        if let Some(format) = &settings.format {
            self.format = format.parse().map_err(anyhow::Error::msg)?;
        }
        if let Some(level) = &settings.hard_failure {
            let outcome: Outcome = level.parse().map_err(anyhow::Error::msg)?;
            if outcome.level() == 0 {
                anyhow::bail!("Hard-failure threshold must be diff, timeout or fatal, got {outcome}");
            }
            self.hard_failure = outcome;
        }
        Ok(())
    }

    pub fn policy(&self) -> FailurePolicy {
        FailurePolicy::default().with_hard_failure(self.hard_failure)
    }

    /// Scheduler settings for this configuration
    pub fn scheduler_config(&self, isolation: Isolation) -> SchedulerConfig {
        SchedulerConfig {
            pool_size: self.pool_size,
            timeout: self.timeout,
            progress_interval: self.progress_interval,
            max_fail: self.max_fail,
            policy: self.policy(),
            isolation,
        }
    }
}

fn seconds(secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs).with_context(|| format!("{secs} is not a valid number of seconds"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert!(config.pool_size >= 1);
        assert_eq!(config.timeout, None);
        assert_eq!(config.progress_interval, Some(Duration::from_secs(10)));
        assert_eq!(config.format, OutputFormat::Table);
        assert_eq!(config.hard_failure, Outcome::Diff);
    }

    #[test]
    fn test_later_layers_win() {
        let plan = Settings {
            pool_size: Some(2),
            timeout_secs: Some(30.0),
            format: Some("csv".to_string()),
            ..Default::default()
        };
        let env = Settings {
            pool_size: Some(4),
            ..Default::default()
        };
        let cli = Settings {
            timeout_secs: Some(1.5),
            max_fail: Some(0),
            ..Default::default()
        };

        let config = AppConfig::resolve([&plan, &env, &cli]).unwrap();
        assert_eq!(config.pool_size, 4);
        assert_eq!(config.timeout, Some(Duration::from_millis(1500)));
        assert_eq!(config.format, OutputFormat::Csv);
        assert_eq!(config.max_fail, Some(0));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let negative = Settings {
            timeout_secs: Some(-1.0),
            ..Default::default()
        };
        assert!(AppConfig::resolve([&negative]).is_err());

        let format = Settings {
            format: Some("xml".to_string()),
            ..Default::default()
        };
        assert!(AppConfig::resolve([&format]).is_err());

        let threshold = Settings {
            hard_failure: Some("skip".to_string()),
            ..Default::default()
        };
        assert!(AppConfig::resolve([&threshold]).is_err());
    }

    #[test]
    fn test_scheduler_config() {
        let settings = Settings {
            pool_size: Some(3),
            hard_failure: Some("fatal".to_string()),
            ..Default::default()
        };
        let config = AppConfig::resolve([&settings]).unwrap();
        let scheduler = config.scheduler_config(Isolation::InProcess);

        assert_eq!(scheduler.pool_size, 3);
        assert!(!scheduler.policy.is_hard_failure(Outcome::Timeout));
        assert!(scheduler.policy.is_hard_failure(Outcome::Fatal));
        assert!(scheduler.validate().is_ok());
    }
}
