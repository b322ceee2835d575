//! Environment variable configuration
//!
//! `TESTSCHED_*` variables override plan settings and are overridden by
//! CLI flags.

use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use super::Settings;

/// Environment variable prefix
const ENV_PREFIX: &str = "TESTSCHED";

/// Configuration read from environment variables
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EnvConfig {
    /// Settings layer from the numeric and format variables
    pub settings: Settings,
    /// Plan file from TESTSCHED_PLAN
    pub plan: Option<PathBuf>,
}

impl EnvConfig {
    /// Load configuration from environment variables
    pub fn load() -> Result<Self> {
        Ok(Self {
            settings: Settings {
                pool_size: get_env_parse("POOL_SIZE")?,
                timeout_secs: get_env_parse("TIMEOUT")?,
                progress_interval_secs: get_env_parse("PROGRESS_INTERVAL")?,
                max_fail: get_env_parse("MAX_FAIL")?,
                format: get_env("FORMAT"),
                hard_failure: get_env("HARD_FAILURE"),
            },
            plan: get_env("PLAN").map(PathBuf::from),
        })
    }

    /// Check if any environment variables are set
    pub fn has_any(&self) -> bool {
        self.plan.is_some() || self.settings != Settings::default()
    }
}

/// Get environment variable with prefix, treating empty as unset
fn get_env(name: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}_{name}"))
        .ok()
        .filter(|v| !v.trim().is_empty())
}

/// Get environment variable and parse to type
fn get_env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    get_env(name)
        .map(|v| {
            v.trim()
                .parse()
                .with_context(|| format!("Invalid {ENV_PREFIX}_{name}: {v:?}"))
        })
        .transpose()
}

/// Print all TESTSCHED environment variables
pub fn print_env_help() {
    println!("Environment Variables:");
    println!();
    println!("  {ENV_PREFIX}_POOL_SIZE          Number of groups run at once");
    println!("  {ENV_PREFIX}_TIMEOUT            Per-test timeout in seconds");
    println!("  {ENV_PREFIX}_PROGRESS_INTERVAL  Seconds between progress lines");
    println!("  {ENV_PREFIX}_MAX_FAIL           Abort after more than N hard failures");
    println!("  {ENV_PREFIX}_FORMAT             Report format (table, json, json-pretty, csv, summary)");
    println!("  {ENV_PREFIX}_HARD_FAILURE       Lowest hard-failure outcome (diff, timeout, fatal)");
    println!("  {ENV_PREFIX}_PLAN               Path to the test plan");
    println!("  {ENV_PREFIX}_LOG                Log filter, e.g. testsched=debug");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Tests in this module mutate the process environment.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    struct EnvGuard {
        keys: Vec<String>,
    }

    impl EnvGuard {
        fn set(vars: &[(&str, &str)]) -> Self {
            let mut keys = Vec::new();
            for (name, value) in vars {
                let key = format!("{ENV_PREFIX}_{name}");
                env::set_var(&key, value);
                keys.push(key);
            }
            Self { keys }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for key in &self.keys {
                env::remove_var(key);
            }
        }
    }

    #[test]
    fn test_env_config_default() {
        let config = EnvConfig::default();
        assert!(config.plan.is_none());
        assert!(!config.has_any());
    }

    #[test]
    fn test_env_config_load() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::set(&[
            ("POOL_SIZE", "3"),
            ("TIMEOUT", "2.5"),
            ("FORMAT", "json"),
            ("PLAN", "plans/smoke.yaml"),
        ]);

        let config = EnvConfig::load().unwrap();
        assert_eq!(config.settings.pool_size, Some(3));
        assert_eq!(config.settings.timeout_secs, Some(2.5));
        assert_eq!(config.settings.format.as_deref(), Some("json"));
        assert_eq!(config.plan, Some(PathBuf::from("plans/smoke.yaml")));
        assert!(config.has_any());
    }

    #[test]
    fn test_env_config_invalid_number() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::set(&[("MAX_FAIL", "many")]);

        let err = EnvConfig::load().unwrap_err();
        assert!(err.to_string().contains("TESTSCHED_MAX_FAIL"));
    }
}
