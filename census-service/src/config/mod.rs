use secrecy::SecretString;
use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct CensusConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub mongodb: MongoConfig,
    pub sync: SyncSettings,
    /// Secret mixed into password hashes.
    pub salt: SecretString,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MongoConfig {
    pub uri: String,
    pub database: String,
}

/// Tunables of the synchronization engine.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncSettings {
    /// Records per chunk; bounds the size of a single grouped write.
    pub batch_size: usize,
    pub progress_interval: Duration,
    /// Pending snapshots buffered for a slow consumer.
    pub progress_capacity: usize,
    /// Deadline for grouped writes.
    pub write_timeout: Duration,
    /// Deadline for lookups and conflict queries.
    pub query_timeout: Duration,
    /// Region assumed for phone numbers without an international prefix.
    pub phone_region: String,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            batch_size: 200,
            progress_interval: Duration::from_secs(10),
            progress_capacity: 10,
            write_timeout: Duration::from_secs(30),
            query_timeout: Duration::from_secs(10),
            phone_region: "ES".to_string(),
        }
    }
}

impl CensusConfig {
    pub fn load() -> Result<Self, AppError> {
        let mut common_config = core_config::Config::load()?;
        let is_prod = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string()) == "prod";

        if let Ok(level) = env::var("LOG_LEVEL") {
            common_config.log_level = level;
        }
        if let Ok(endpoint) = env::var("OTLP_ENDPOINT") {
            common_config.otlp_endpoint = Some(endpoint);
        }

        let defaults = SyncSettings::default();

        Ok(CensusConfig {
            common: common_config,
            mongodb: MongoConfig {
                uri: get_env("MONGODB_URI", Some("mongodb://localhost:27017"), is_prod)?,
                database: get_env("MONGODB_DATABASE", Some("census_db"), is_prod)?,
            },
            sync: SyncSettings {
                batch_size: parse_env("SYNC_BATCH_SIZE", defaults.batch_size)?,
                progress_interval: Duration::from_secs(parse_env(
                    "SYNC_PROGRESS_INTERVAL_SECS",
                    defaults.progress_interval.as_secs(),
                )?),
                progress_capacity: parse_env("SYNC_PROGRESS_CAPACITY", defaults.progress_capacity)?,
                write_timeout: Duration::from_secs(parse_env(
                    "SYNC_WRITE_TIMEOUT_SECS",
                    defaults.write_timeout.as_secs(),
                )?),
                query_timeout: Duration::from_secs(parse_env(
                    "SYNC_QUERY_TIMEOUT_SECS",
                    defaults.query_timeout.as_secs(),
                )?),
                phone_region: get_env("PHONE_DEFAULT_REGION", Some("ES"), false)?,
            },
            salt: SecretString::new(get_env("CENSUS_SALT", None, is_prod)?),
        })
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required but not set",
                    key
                )))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: FromStr + Copy,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(val) => val.parse().map_err(|e: T::Err| {
            AppError::ConfigError(anyhow::anyhow!("{} has an invalid value: {}", key, e))
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_defaults() {
        let settings = SyncSettings::default();
        assert_eq!(settings.batch_size, 200);
        assert_eq!(settings.progress_interval, Duration::from_secs(10));
        assert_eq!(settings.progress_capacity, 10);
        assert_eq!(settings.phone_region, "ES");
    }

    #[test]
    fn test_get_env_falls_back_to_default_outside_prod() {
        let value = get_env("CENSUS_TEST_SURELY_UNSET_KEY", Some("fallback"), false)
            .expect("default should apply");
        assert_eq!(value, "fallback");
        assert!(get_env("CENSUS_TEST_SURELY_UNSET_KEY", None, false).is_err());
        assert!(get_env("CENSUS_TEST_SURELY_UNSET_KEY", Some("fallback"), true).is_err());
    }
}
