use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub kafka: KafkaConfig,
    pub user_api: UserApiConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub limiter: LimiterConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (default: 0.0.0.0:3333)
    pub bind_address: SocketAddr,
    /// Process-wide server id, high byte of every session id (range 1-255)
    pub id: u8,
    /// Default per-connection share difficulty
    pub difficulty: u64,
    /// Accept every well-formed share regardless of target. Load testing
    /// only; also requires STRATUM_SIMULATOR=1 in the environment.
    #[serde(default)]
    pub simulator: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaConfig {
    /// Broker list (host:port,host:port)
    pub brokers: String,
    /// Topic carrying freshly-minted mining templates
    #[serde(default = "KafkaConfig::default_job_topic")]
    pub job_topic: String,
    /// Topic receiving every accepted/classified share
    #[serde(default = "KafkaConfig::default_share_topic")]
    pub share_topic: String,
    /// Topic receiving block-solving shares with header and coinbase bytes
    #[serde(default = "KafkaConfig::default_solved_topic")]
    pub solved_share_topic: String,
}

impl KafkaConfig {
    fn default_job_topic() -> String {
        "StratumJob".to_string()
    }

    fn default_share_topic() -> String {
        "ShareLog".to_string()
    }

    fn default_solved_topic() -> String {
        "SolvedShare".to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserApiConfig {
    /// Base URL of the user list endpoint; paged with `?last_id=<n>`
    pub url: String,
    /// Poll interval for the name -> id refresh loop
    #[serde(default = "UserApiConfig::default_refresh_interval", with = "secs")]
    pub refresh_interval: Duration,
}

impl UserApiConfig {
    fn default_refresh_interval() -> Duration {
        Duration::from_secs(10)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SeaORM connection URL (mysql://... in production, sqlite::memory: in tests)
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Jobs older than this are evicted from the repository
    #[serde(default = "LimiterConfig::default_job_lifetime", with = "secs")]
    pub job_lifetime: Duration,
    /// Idle re-broadcast interval for the latest job
    #[serde(default = "LimiterConfig::default_notify_interval", with = "secs")]
    pub notify_interval: Duration,
    /// Accepted nTime drift, both against the job and against wall clock
    #[serde(default = "LimiterConfig::default_share_time_window", with = "secs")]
    pub share_time_window: Duration,
    /// Pending worker-name records before the oldest is dropped
    #[serde(default = "LimiterConfig::default_worker_queue")]
    pub worker_queue: usize,
}

impl LimiterConfig {
    fn default_job_lifetime() -> Duration {
        Duration::from_secs(300)
    }

    fn default_notify_interval() -> Duration {
        Duration::from_secs(30)
    }

    fn default_share_time_window() -> Duration {
        Duration::from_secs(600)
    }

    fn default_worker_queue() -> usize {
        10_000
    }
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            job_lifetime: Self::default_job_lifetime(),
            notify_interval: Self::default_notify_interval(),
            share_time_window: Self::default_share_time_window(),
            worker_queue: Self::default_worker_queue(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                bind_address: "0.0.0.0:3333".parse().unwrap(),
                id: 1,
                difficulty: 16384,
                simulator: false,
            },
            kafka: KafkaConfig {
                brokers: "127.0.0.1:9092".to_string(),
                job_topic: KafkaConfig::default_job_topic(),
                share_topic: KafkaConfig::default_share_topic(),
                solved_share_topic: KafkaConfig::default_solved_topic(),
            },
            user_api: UserApiConfig {
                url: "http://127.0.0.1:8000/users".to_string(),
                refresh_interval: UserApiConfig::default_refresh_interval(),
            },
            database: DatabaseConfig {
                url: "sqlite::memory:".to_string(),
            },
            limiter: LimiterConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> crate::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|_| {
            crate::error::ConfigError::FileNotFound {
                path: path.display().to_string(),
            }
        })?;
        let config: Config =
            toml::from_str(&content).map_err(|e| crate::error::ConfigError::InvalidFormat {
                message: e.to_string(),
            })?;
        Ok(config)
    }
}

/// Duration fields are written as plain seconds in the TOML file.
mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}
