//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Formation prefix shared by every record the dispatcher owns.
pub const DEFAULT_FORMATION_PREFIX: &str = "Hyke System";

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Only records whose formation type starts with this are selected.
    pub formation_prefix: String,
    /// Upper bound for a single handler invocation.
    pub record_timeout: Duration,
    /// Mark records COMPLETED after their handler succeeds.
    pub complete_on_success: bool,
    /// Skip Running-flow follow-ups when the same step already completed.
    pub gate_running_flow_rerun: bool,
    /// Cron expression for repeated passes. `None` runs a single pass.
    pub schedule: Option<String>,
    /// Path of the SQLite database file.
    pub db_path: PathBuf,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            formation_prefix: DEFAULT_FORMATION_PREFIX.to_string(),
            record_timeout: Duration::from_secs(30),
            complete_on_success: false,
            gate_running_flow_rerun: false,
            schedule: None,
            db_path: PathBuf::from("./data/status-dispatch.db"),
        }
    }
}

impl DispatchConfig {
    /// Build config from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let formation_prefix = lookup("DISPATCH_FORMATION_PREFIX")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(defaults.formation_prefix);

        let record_timeout = match lookup("DISPATCH_RECORD_TIMEOUT_SECS") {
            Some(raw) => {
                let secs: u64 = raw.trim().parse().map_err(|e| ConfigError::InvalidValue {
                    key: "DISPATCH_RECORD_TIMEOUT_SECS".into(),
                    message: format!("{e}"),
                })?;
                if secs == 0 {
                    return Err(ConfigError::InvalidValue {
                        key: "DISPATCH_RECORD_TIMEOUT_SECS".into(),
                        message: "must be greater than zero".into(),
                    });
                }
                Duration::from_secs(secs)
            }
            None => defaults.record_timeout,
        };

        let complete_on_success = parse_flag(
            "DISPATCH_COMPLETE_ON_SUCCESS",
            lookup("DISPATCH_COMPLETE_ON_SUCCESS"),
            defaults.complete_on_success,
        )?;
        let gate_running_flow_rerun = parse_flag(
            "DISPATCH_GATE_RUNNING_FLOW_RERUN",
            lookup("DISPATCH_GATE_RUNNING_FLOW_RERUN"),
            defaults.gate_running_flow_rerun,
        )?;

        let schedule = lookup("DISPATCH_SCHEDULE").filter(|s| !s.trim().is_empty());

        let db_path = lookup("DISPATCH_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path);

        Ok(Self {
            formation_prefix,
            record_timeout,
            complete_on_success,
            gate_running_flow_rerun,
            schedule,
            db_path,
        })
    }
}

fn parse_flag(key: &str, raw: Option<String>, default: bool) -> Result<bool, ConfigError> {
    let Some(raw) = raw else {
        return Ok(default);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected a boolean, got '{other}'"),
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
        let config = DispatchConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.formation_prefix, "Hyke System");
        assert_eq!(config.record_timeout, Duration::from_secs(30));
        assert!(!config.complete_on_success);
        assert!(!config.gate_running_flow_rerun);
        assert!(config.schedule.is_none());
    }

    #[test]
    fn reads_overrides() {
        let config = DispatchConfig::from_lookup(lookup_from(&[
            ("DISPATCH_FORMATION_PREFIX", "Acme System"),
            ("DISPATCH_RECORD_TIMEOUT_SECS", "5"),
            ("DISPATCH_COMPLETE_ON_SUCCESS", "true"),
            ("DISPATCH_GATE_RUNNING_FLOW_RERUN", "yes"),
            ("DISPATCH_SCHEDULE", "0 */5 * * * *"),
            ("DISPATCH_DB_PATH", "/tmp/dispatch.db"),
        ]))
        .unwrap();
        assert_eq!(config.formation_prefix, "Acme System");
        assert_eq!(config.record_timeout, Duration::from_secs(5));
        assert!(config.complete_on_success);
        assert!(config.gate_running_flow_rerun);
        assert_eq!(config.schedule.as_deref(), Some("0 */5 * * * *"));
        assert_eq!(config.db_path, PathBuf::from("/tmp/dispatch.db"));
    }

    #[test]
    fn rejects_bad_timeout() {
        let err = DispatchConfig::from_lookup(lookup_from(&[(
            "DISPATCH_RECORD_TIMEOUT_SECS",
            "soon",
        )]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));

        let err =
            DispatchConfig::from_lookup(lookup_from(&[("DISPATCH_RECORD_TIMEOUT_SECS", "0")]))
                .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn rejects_bad_flag() {
        let err =
            DispatchConfig::from_lookup(lookup_from(&[("DISPATCH_COMPLETE_ON_SUCCESS", "maybe")]))
                .unwrap_err();
        assert!(err.to_string().contains("DISPATCH_COMPLETE_ON_SUCCESS"));
    }
}
