//! Process settings read from the environment.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::retry::RetryPolicy;

const STAGE_VAR: &str = "HARBOR_STAGE";
const DATABASE_URL_VAR: &str = "DATABASE_URL";
const RETRY_ATTEMPTS_VAR: &str = "HARBOR_EVENT_RETRY_ATTEMPTS";
const RETRY_BASE_MS_VAR: &str = "HARBOR_EVENT_RETRY_BASE_MS";
const RETRY_MAX_MS_VAR: &str = "HARBOR_EVENT_RETRY_MAX_MS";

/// Errors raised while reading settings.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A required variable is not set.
    #[error("{0} must be set")]
    Missing(&'static str),

    /// A variable is set to something unusable.
    #[error("{var} has an invalid value {value:?}: {reason}")]
    Invalid {
        /// The variable name.
        var: &'static str,
        /// The rejected value.
        value: String,
        /// Why it was rejected.
        reason: &'static str,
    },
}

/// Where the process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Local,
    Testing,
    CiTesting,
    Develop,
    Staging,
    Production,
}

impl Stage {
    /// The value used in `HARBOR_STAGE`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Testing => "testing",
            Self::CiTesting => "ci-testing",
            Self::Develop => "develop",
            Self::Staging => "staging",
            Self::Production => "production",
        }
    }

    /// Deployed stages need a database URL; local and test stages may run
    /// against the in-memory backend.
    #[must_use]
    pub fn requires_database(self) -> bool {
        matches!(self, Self::Develop | Self::Staging | Self::Production)
    }

    /// Whether logs should be human-readable rather than JSON.
    #[must_use]
    pub fn is_local(self) -> bool {
        self == Self::Local
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(Self::Local),
            "testing" => Ok(Self::Testing),
            "ci-testing" => Ok(Self::CiTesting),
            "develop" => Ok(Self::Develop),
            "staging" => Ok(Self::Staging),
            "production" => Ok(Self::Production),
            other => Err(ConfigError::Invalid {
                var: STAGE_VAR,
                value: other.to_owned(),
                reason: "unknown stage",
            }),
        }
    }
}

/// Settings constructed once at process start and passed down explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub stage: Stage,
    pub database_url: Option<String>,
    pub retry: RetryPolicy,
}

impl Settings {
    /// Reads settings from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a required variable is missing or a value
    /// cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Reads settings through `lookup`, which maps a variable name to its
    /// value.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a required variable is missing or a value
    /// cannot be parsed.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let stage: Stage = lookup(STAGE_VAR)
            .ok_or(ConfigError::Missing(STAGE_VAR))?
            .parse()?;

        let database_url = lookup(DATABASE_URL_VAR).filter(|url| !url.is_empty());
        if stage.requires_database() && database_url.is_none() {
            return Err(ConfigError::Missing(DATABASE_URL_VAR));
        }

        let defaults = RetryPolicy::default();
        let max_attempts = match lookup(RETRY_ATTEMPTS_VAR) {
            Some(raw) => match raw.parse::<u32>() {
                Ok(attempts) if attempts > 0 => attempts,
                _ => {
                    return Err(ConfigError::Invalid {
                        var: RETRY_ATTEMPTS_VAR,
                        value: raw,
                        reason: "expected a positive integer",
                    });
                }
            },
            None => defaults.max_attempts,
        };
        let base_delay = millis(&lookup, RETRY_BASE_MS_VAR)?.unwrap_or(defaults.base_delay);
        let max_delay = millis(&lookup, RETRY_MAX_MS_VAR)?.unwrap_or(defaults.max_delay);

        Ok(Self {
            stage,
            database_url,
            retry: RetryPolicy {
                max_attempts,
                base_delay,
                max_delay,
            },
        })
    }
}

fn millis<F>(lookup: &F, var: &'static str) -> Result<Option<Duration>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(var)
        .map(|raw| {
            raw.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| ConfigError::Invalid {
                    var,
                    value: raw,
                    reason: "expected milliseconds",
                })
        })
        .transpose()
}
