pub mod types;
pub mod validation;

pub use types::{Config, DatabaseConfig, KafkaConfig, LimiterConfig, ServerConfig, UserApiConfig};
