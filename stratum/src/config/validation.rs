use crate::config::types::Config;
use crate::error::{ConfigError, Result};
use std::time::Duration;

impl Config {
    pub fn validate(&self) -> Result<()> {
        // Server id 0 is reserved; session ids would collide across processes
        if self.server.id == 0 {
            return Err(ConfigError::InvalidServerId { id: 0 }.into());
        }

        if self.kafka.brokers.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "kafka.brokers".to_string(),
            }
            .into());
        }

        if self.user_api.url.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "user_api.url".to_string(),
            }
            .into());
        }

        if self.database.url.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "database.url".to_string(),
            }
            .into());
        }

        if self.limiter.job_lifetime == Duration::ZERO {
            return Err(ConfigError::InvalidDuration {
                field: "limiter.job_lifetime".to_string(),
                duration: self.limiter.job_lifetime,
            }
            .into());
        }

        if self.limiter.notify_interval == Duration::ZERO {
            return Err(ConfigError::InvalidDuration {
                field: "limiter.notify_interval".to_string(),
                duration: self.limiter.notify_interval,
            }
            .into());
        }

        if self.limiter.share_time_window == Duration::ZERO {
            return Err(ConfigError::InvalidDuration {
                field: "limiter.share_time_window".to_string(),
                duration: self.limiter.share_time_window,
            }
            .into());
        }

        // The simulator disables target checks; require an explicit
        // environment opt-in on top of the config flag so a copied config
        // file cannot enable it in production.
        if self.server.simulator
            && std::env::var("STRATUM_SIMULATOR").as_deref() != Ok("1")
        {
            return Err(ConfigError::SimulatorNotArmed.into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn server_id_zero_is_rejected() {
        let mut config = Config::default();
        config.server.id = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn simulator_requires_environment_arm() {
        let mut config = Config::default();
        config.server.simulator = true;
        // Not armed via STRATUM_SIMULATOR in the test environment
        if std::env::var("STRATUM_SIMULATOR").as_deref() != Ok("1") {
            assert!(config.validate().is_err());
        }
    }
}
