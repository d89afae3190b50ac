use std::net::IpAddr;
use std::time::Duration;

use axum::http::HeaderValue;
use worktrack_events::DEFAULT_SUBSCRIBER_CAPACITY;
use worktrack_lifecycle::ServiceSettings;

/// A malformed or missing configuration value.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{var} has invalid value {value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub database_url: String,
    pub host: IpAddr,
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS`.
    pub cors_origins: Vec<String>,
    pub request_timeout_secs: u64,
    /// Grace period for background tasks after the server stops.
    pub shutdown_timeout_secs: u64,
    /// Deadline for each storage step taken by a coordinator.
    pub storage_timeout_secs: u64,
    pub default_session_minutes: i64,
    pub subscriber_queue_capacity: usize,
    pub db_max_connections: u32,
    pub log_format: LogFormat,
}

impl ServerConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                     | Default                 |
    /// |-----------------------------|-------------------------|
    /// | `DATABASE_URL`              | required                |
    /// | `HOST`                      | `0.0.0.0`               |
    /// | `PORT`                      | `8000`                  |
    /// | `CORS_ORIGINS`              | `http://localhost:5173` |
    /// | `REQUEST_TIMEOUT_SECS`      | `30`                    |
    /// | `SHUTDOWN_TIMEOUT_SECS`     | `10`                    |
    /// | `STORAGE_TIMEOUT_SECS`      | `5`                     |
    /// | `DEFAULT_SESSION_MINUTES`   | `60`                    |
    /// | `SUBSCRIBER_QUEUE_CAPACITY` | `256`                   |
    /// | `DB_MAX_CONNECTIONS`        | `20`                    |
    /// | `LOG_FORMAT`                | `pretty` (or `json`)    |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let cors_origins: Vec<String> = lookup("CORS_ORIGINS")
            .unwrap_or_else(|| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        for origin in &cors_origins {
            HeaderValue::from_str(origin).map_err(|e| ConfigError::Invalid {
                var: "CORS_ORIGINS",
                value: origin.clone(),
                reason: e.to_string(),
            })?;
        }

        let default_session_minutes: i64 = parse(&lookup, "DEFAULT_SESSION_MINUTES", 60)?;
        if default_session_minutes <= 0 {
            return Err(ConfigError::Invalid {
                var: "DEFAULT_SESSION_MINUTES",
                value: default_session_minutes.to_string(),
                reason: "must be positive".into(),
            });
        }

        let log_format = match lookup("LOG_FORMAT").as_deref().map(str::trim) {
            None | Some("") | Some("pretty") => LogFormat::Pretty,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "LOG_FORMAT",
                    value: other.to_string(),
                    reason: "expected `pretty` or `json`".into(),
                })
            }
        };

        Ok(Self {
            database_url,
            host: parse(&lookup, "HOST", IpAddr::from([0, 0, 0, 0]))?,
            port: parse(&lookup, "PORT", 8000)?,
            cors_origins,
            request_timeout_secs: parse(&lookup, "REQUEST_TIMEOUT_SECS", 30)?,
            shutdown_timeout_secs: parse(&lookup, "SHUTDOWN_TIMEOUT_SECS", 10)?,
            storage_timeout_secs: parse(&lookup, "STORAGE_TIMEOUT_SECS", 5)?,
            default_session_minutes,
            subscriber_queue_capacity: parse(
                &lookup,
                "SUBSCRIBER_QUEUE_CAPACITY",
                DEFAULT_SUBSCRIBER_CAPACITY,
            )?,
            db_max_connections: parse(&lookup, "DB_MAX_CONNECTIONS", 20)?,
            log_format,
        })
    }

    /// Coordinator settings derived from this configuration.
    pub fn service_settings(&self) -> ServiceSettings {
        ServiceSettings {
            default_duration: chrono::Duration::minutes(self.default_session_minutes),
            storage_timeout: Duration::from_secs(self.storage_timeout_secs),
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

fn parse<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        None => Ok(default),
        Some(raw) if raw.trim().is_empty() => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            value: raw,
            reason: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<ServerConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_only_database_url_is_set() {
        let config = load(&[("DATABASE_URL", "postgres://localhost/worktrack")]).unwrap();
        assert_eq!(config.port, 8000);
        assert_eq!(config.host.to_string(), "0.0.0.0");
        assert_eq!(config.cors_origins, vec!["http://localhost:5173"]);
        assert_eq!(config.storage_timeout_secs, 5);
        assert_eq!(config.subscriber_queue_capacity, 256);
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert_eq!(
            config.service_settings().default_duration,
            chrono::Duration::minutes(60)
        );
    }

    #[test]
    fn database_url_is_required() {
        assert_matches!(load(&[]), Err(ConfigError::Missing("DATABASE_URL")));
    }

    #[test]
    fn malformed_numbers_are_reported() {
        let err = load(&[("DATABASE_URL", "postgres://x"), ("PORT", "eighty")]).unwrap_err();
        assert_matches!(err, ConfigError::Invalid { var: "PORT", .. });
    }

    #[test]
    fn non_positive_session_length_is_rejected() {
        let err = load(&[
            ("DATABASE_URL", "postgres://x"),
            ("DEFAULT_SESSION_MINUTES", "0"),
        ])
        .unwrap_err();
        assert_matches!(err, ConfigError::Invalid { var: "DEFAULT_SESSION_MINUTES", .. });
    }

    #[test]
    fn origins_are_split_and_trimmed() {
        let config = load(&[
            ("DATABASE_URL", "postgres://x"),
            ("CORS_ORIGINS", "http://a.test, http://b.test ,"),
            ("LOG_FORMAT", "json"),
        ])
        .unwrap();
        assert_eq!(config.cors_origins, vec!["http://a.test", "http://b.test"]);
        assert_eq!(config.log_format, LogFormat::Json);
    }
}
