//! Engine configuration read from the environment.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// What happens when a vote closes without a single ballot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NoQuorumPolicy {
    /// Every voter records the synthetic timeout choice and stays put.
    #[default]
    Stall,
    /// The vote is opened again with a fresh deadline.
    Reopen,
}

impl FromStr for NoQuorumPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stall" => Ok(Self::Stall),
            "reopen" => Ok(Self::Reopen),
            other => Err(format!("expected \"stall\" or \"reopen\", got {other:?}")),
        }
    }
}

/// Runtime settings of the engine and its host binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Period of the timer sweep.
    pub sweep_interval: Duration,
    /// Fallback for votes that close empty.
    pub no_quorum_policy: NoQuorumPolicy,
    /// Vote window when an empty vote is reopened.
    pub reopen_seconds: u32,
    /// YAML story graph loaded by the binary.
    pub story_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_millis(1000),
            no_quorum_policy: NoQuorumPolicy::Stall,
            reopen_seconds: 30,
            story_path: None,
        }
    }
}

fn parse<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: &str,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let value = lookup(var).unwrap_or_else(|| default.to_string());
    value.parse().map_err(|e: T::Err| ConfigError::Invalid {
        var,
        value,
        reason: e.to_string(),
    })
}

impl EngineConfig {
    /// Reads the configuration from `THREADLINE_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` for a value that does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Reads the configuration through `lookup`, falling back to defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` for a value that does not parse.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let sweep_ms: u64 = parse(&lookup, "THREADLINE_SWEEP_INTERVAL_MS", "1000")?;
        if sweep_ms == 0 {
            return Err(ConfigError::Invalid {
                var: "THREADLINE_SWEEP_INTERVAL_MS",
                value: "0".into(),
                reason: "must be positive".into(),
            });
        }
        Ok(Self {
            sweep_interval: Duration::from_millis(sweep_ms),
            no_quorum_policy: parse(&lookup, "THREADLINE_NO_QUORUM_POLICY", "stall")?,
            reopen_seconds: parse(&lookup, "THREADLINE_REOPEN_SECONDS", "30")?,
            story_path: lookup("THREADLINE_STORY_PATH").map(PathBuf::from),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn test_defaults_when_nothing_is_set() {
        let config = EngineConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_reads_every_variable() {
        // Arrange
        let vars = lookup(&[
            ("THREADLINE_SWEEP_INTERVAL_MS", "250"),
            ("THREADLINE_NO_QUORUM_POLICY", "Reopen"),
            ("THREADLINE_REOPEN_SECONDS", "45"),
            ("THREADLINE_STORY_PATH", "/srv/story.yaml"),
        ]);

        // Act
        let config = EngineConfig::from_lookup(vars).unwrap();

        // Assert
        assert_eq!(config.sweep_interval, Duration::from_millis(250));
        assert_eq!(config.no_quorum_policy, NoQuorumPolicy::Reopen);
        assert_eq!(config.reopen_seconds, 45);
        assert_eq!(config.story_path, Some(PathBuf::from("/srv/story.yaml")));
    }

    #[test]
    fn test_unknown_policy_is_invalid() {
        let result = EngineConfig::from_lookup(lookup(&[("THREADLINE_NO_QUORUM_POLICY", "panic")]));
        assert!(matches!(
            result,
            Err(ConfigError::Invalid { var: "THREADLINE_NO_QUORUM_POLICY", .. })
        ));
    }

    #[test]
    fn test_zero_sweep_interval_is_invalid() {
        let result = EngineConfig::from_lookup(lookup(&[("THREADLINE_SWEEP_INTERVAL_MS", "0")]));
        assert!(result.is_err());
    }
}
