//! Configuration types.

use std::time::Duration;

use redis::{ConnectionAddr, ConnectionInfo, IntoConnectionInfo, RedisConnectionInfo};
use secrecy::{ExposeSecret, SecretString};

use crate::error::ConfigError;

/// Store key names used by the worker.
///
/// Every key is optionally namespaced by `prefix`, which lets several
/// deployments share one store.
#[derive(Debug, Clone)]
pub struct KeySpace {
    pub prefix: String,
    pub locks: String,
    pub liveness: String,
    pub jobs: String,
    pub files: String,
    pub log: String,
    pub results: String,
}

impl Default for KeySpace {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            locks: "locks".to_string(),
            liveness: "last_updates".to_string(),
            jobs: "jobs".to_string(),
            files: "files".to_string(),
            log: "log".to_string(),
            results: "queue:done".to_string(),
        }
    }
}

impl KeySpace {
    /// Key space with every key prefixed by `prefix`.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ..Self::default()
        }
    }

    fn key(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    pub fn locks(&self) -> String {
        self.key(&self.locks)
    }

    pub fn liveness(&self) -> String {
        self.key(&self.liveness)
    }

    pub fn jobs(&self) -> String {
        self.key(&self.jobs)
    }

    pub fn files(&self) -> String {
        self.key(&self.files)
    }

    pub fn log(&self) -> String {
        self.key(&self.log)
    }

    pub fn results(&self) -> String {
        self.key(&self.results)
    }

    /// Pending queue for a pipeline: `queue:{pipeline}:pending`.
    pub fn pending(&self, pipeline: &str) -> String {
        self.key(&format!("queue:{pipeline}:pending"))
    }

    /// Processing queue for a pipeline: `queue:{pipeline}:processing`.
    pub fn processing(&self, pipeline: &str) -> String {
        self.key(&format!("queue:{pipeline}:processing"))
    }
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Full connection URL. Takes precedence over the individual parts.
    pub redis_url: Option<String>,
    pub redis_host: String,
    pub redis_port: u16,
    pub redis_db: i64,
    pub redis_password: Option<SecretString>,
    /// How often the heartbeat re-checks the lock and writes liveness.
    pub heartbeat_interval: Duration,
    /// How long the log emitter waits for a message before re-checking exit.
    pub log_poll_interval: Duration,
    pub keys: KeySpace,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            redis_host: "127.0.0.1".to_string(),
            redis_port: 6379,
            redis_db: 0,
            redis_password: None,
            heartbeat_interval: Duration::from_secs(5),
            log_poll_interval: Duration::from_secs(5),
            keys: KeySpace::default(),
        }
    }
}

impl WorkerConfig {
    /// Create a new config builder.
    pub fn builder() -> WorkerConfigBuilder {
        WorkerConfigBuilder::default()
    }

    /// Load configuration from `WORKER_*` environment variables.
    ///
    /// Unset variables fall back to the defaults; set but unparsable ones are
    /// an error, as are zero intervals.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let redis_port = parse_env("WORKER_REDIS_PORT")?.unwrap_or(defaults.redis_port);
        let redis_db = parse_env("WORKER_REDIS_DB")?.unwrap_or(defaults.redis_db);
        let heartbeat_interval = interval_env("WORKER_HEARTBEAT_INTERVAL_SECS")?
            .unwrap_or(defaults.heartbeat_interval);
        let log_poll_interval =
            interval_env("WORKER_LOG_POLL_INTERVAL_SECS")?.unwrap_or(defaults.log_poll_interval);

        let keys = match std::env::var("WORKER_KEY_PREFIX") {
            Ok(prefix) if !prefix.is_empty() => KeySpace::with_prefix(prefix),
            _ => KeySpace::default(),
        };

        Ok(Self {
            redis_url: std::env::var("WORKER_REDIS_URL").ok(),
            redis_host: std::env::var("WORKER_REDIS_HOST").unwrap_or(defaults.redis_host),
            redis_port,
            redis_db,
            redis_password: std::env::var("WORKER_REDIS_PASSWORD")
                .ok()
                .filter(|p| !p.is_empty())
                .map(SecretString::from),
            heartbeat_interval,
            log_poll_interval,
            keys,
        })
    }

    /// Connection details for the store, built from the parts unless an
    /// explicit URL was configured.
    ///
    /// The password is passed through as-is, so it may contain characters
    /// that are reserved in URLs.
    pub fn connection_info(&self) -> Result<ConnectionInfo, ConfigError> {
        if let Some(url) = &self.redis_url {
            return url
                .as_str()
                .into_connection_info()
                .map_err(|e| ConfigError::InvalidValue {
                    key: "WORKER_REDIS_URL".to_string(),
                    message: e.to_string(),
                });
        }
        Ok(ConnectionInfo {
            addr: ConnectionAddr::Tcp(self.redis_host.clone(), self.redis_port),
            redis: RedisConnectionInfo {
                db: self.redis_db,
                password: self
                    .redis_password
                    .as_ref()
                    .map(|p| p.expose_secret().to_string()),
                ..RedisConnectionInfo::default()
            },
        })
    }

    /// Store location for logs. Never contains credentials.
    pub fn redacted_url(&self) -> String {
        if let Some(url) = &self.redis_url {
            return match (url.find("://"), url.rfind('@')) {
                (Some(scheme), Some(at)) if at > scheme => {
                    format!("{}://***{}", &url[..scheme], &url[at..])
                }
                _ => url.clone(),
            };
        }
        let auth = if self.redis_password.is_some() { "***@" } else { "" };
        format!(
            "redis://{auth}{}:{}/{}",
            self.redis_host, self.redis_port, self.redis_db
        )
    }
}

fn parse_env<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    std::env::var(key)
        .ok()
        .map(|raw| parse_value(key, &raw))
        .transpose()
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })
}

/// Whole seconds, at least one.
fn parse_interval(key: &str, raw: &str) -> Result<Duration, ConfigError> {
    match parse_value::<u64>(key, raw)? {
        0 => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "interval must be at least 1 second".to_string(),
        }),
        secs => Ok(Duration::from_secs(secs)),
    }
}

fn interval_env(key: &str) -> Result<Option<Duration>, ConfigError> {
    std::env::var(key)
        .ok()
        .map(|raw| parse_interval(key, &raw))
        .transpose()
}

/// Builder for WorkerConfig
#[derive(Default)]
pub struct WorkerConfigBuilder {
    config: WorkerConfig,
}

impl WorkerConfigBuilder {
    pub fn redis_url(mut self, url: impl Into<String>) -> Self {
        self.config.redis_url = Some(url.into());
        self
    }

    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config.heartbeat_interval = interval;
        self
    }

    pub fn log_poll_interval(mut self, interval: Duration) -> Self {
        self.config.log_poll_interval = interval;
        self
    }

    pub fn keys(mut self, keys: KeySpace) -> Self {
        self.config.keys = keys;
        self
    }

    pub fn build(self) -> WorkerConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_keys_match_store_layout() {
        let keys = KeySpace::default();
        assert_eq!(keys.locks(), "locks");
        assert_eq!(keys.liveness(), "last_updates");
        assert_eq!(keys.results(), "queue:done");
        assert_eq!(keys.pending("concept-map"), "queue:concept-map:pending");
        assert_eq!(
            keys.processing("concept-map"),
            "queue:concept-map:processing"
        );
    }

    #[test]
    fn prefix_applies_to_every_key() {
        let keys = KeySpace::with_prefix("staging:");
        assert_eq!(keys.jobs(), "staging:jobs");
        assert_eq!(keys.pending("a"), "staging:queue:a:pending");
    }

    #[test]
    fn connection_info_from_parts() {
        let info = WorkerConfig::default().connection_info().unwrap();
        assert_eq!(info.addr, ConnectionAddr::Tcp("127.0.0.1".into(), 6379));
        assert_eq!(info.redis.db, 0);
        assert_eq!(info.redis.password, None);
    }

    #[test]
    fn password_with_reserved_characters_is_kept_verbatim() {
        let config = WorkerConfig {
            redis_password: Some(SecretString::from("pa/ss#1")),
            redis_db: 3,
            ..WorkerConfig::default()
        };
        let info = config.connection_info().unwrap();
        assert_eq!(info.redis.password.as_deref(), Some("pa/ss#1"));
        assert_eq!(info.redis.db, 3);
        assert_eq!(info.addr, ConnectionAddr::Tcp("127.0.0.1".into(), 6379));
    }

    #[test]
    fn explicit_url_wins() {
        let config = WorkerConfig::builder()
            .redis_url("redis://cache:6380/1")
            .heartbeat_interval(Duration::from_millis(50))
            .build();
        let info = config.connection_info().unwrap();
        assert_eq!(info.addr, ConnectionAddr::Tcp("cache".into(), 6380));
        assert_eq!(info.redis.db, 1);
        assert_eq!(config.heartbeat_interval, Duration::from_millis(50));
    }

    #[test]
    fn malformed_url_is_config_error() {
        let config = WorkerConfig::builder().redis_url("not-a-url").build();
        assert!(matches!(
            config.connection_info(),
            Err(ConfigError::InvalidValue { key, .. }) if key == "WORKER_REDIS_URL"
        ));
    }

    #[test]
    fn redacted_url_masks_credentials() {
        let config = WorkerConfig {
            redis_password: Some(SecretString::from("pa/ss#1")),
            ..WorkerConfig::default()
        };
        assert_eq!(config.redacted_url(), "redis://***@127.0.0.1:6379/0");
        assert_eq!(
            WorkerConfig::default().redacted_url(),
            "redis://127.0.0.1:6379/0"
        );

        let config = WorkerConfig::builder()
            .redis_url("redis://:secret@cache:6380/1")
            .build();
        assert_eq!(config.redacted_url(), "redis://***@cache:6380/1");
    }

    #[test]
    fn zero_interval_is_rejected() {
        assert!(matches!(
            parse_interval("WORKER_HEARTBEAT_INTERVAL_SECS", "0"),
            Err(ConfigError::InvalidValue { key, .. }) if key == "WORKER_HEARTBEAT_INTERVAL_SECS"
        ));
        assert!(parse_interval("WORKER_LOG_POLL_INTERVAL_SECS", " 0 ").is_err());
        assert!(parse_interval("WORKER_LOG_POLL_INTERVAL_SECS", "soon").is_err());
        assert_eq!(
            parse_interval("WORKER_LOG_POLL_INTERVAL_SECS", "2").unwrap(),
            Duration::from_secs(2)
        );
    }

    #[test]
    fn password_is_redacted_in_debug() {
        let config = WorkerConfig {
            redis_password: Some(SecretString::from("hunter2")),
            ..WorkerConfig::default()
        };
        assert!(!format!("{config:?}").contains("hunter2"));
    }
}
