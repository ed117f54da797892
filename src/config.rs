//! Typed configuration, parsed from a `key=value` properties file
//! (spec.md §6).

use std::fmt;
use std::path::Path;

use crate::error::ConfigError;

const DEFAULT_STATE_CLIENT_POOL_SIZE: usize = 8;

/// A zero-size pool has no client to assign a join to (the source's
/// `mqtt_connector.py` only wires the join subscription when
/// `state_client_pool_size > 0`); reject it here rather than divide by
/// zero in the pool's round-robin counter. Exposed so `main` can re-run
/// it after applying a `--pool-size` override, which bypasses `parse`.
pub fn validate_pool_size(size: usize) -> Result<(), ConfigError> {
    if size == 0 {
        return Err(ConfigError::InvalidValue {
            key: "state_client_pool_size".to_string(),
            value: "0".to_string(),
        });
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityOfService {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl QualityOfService {
    fn from_code(code: u8) -> Option<QualityOfService> {
        match code {
            0 => Some(QualityOfService::AtMostOnce),
            1 => Some(QualityOfService::AtLeastOnce),
            2 => Some(QualityOfService::ExactlyOnce),
            _ => None,
        }
    }
}

impl fmt::Display for QualityOfService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            QualityOfService::AtMostOnce => 0,
            QualityOfService::AtLeastOnce => 1,
            QualityOfService::ExactlyOnce => 2,
        };
        write!(f, "{code}")
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub address: String,
    pub username: String,
    pub password: String,
    pub base_topic: String,
    pub quality_of_service: QualityOfService,
    pub position_bound: u32,
    pub max_car_size: u32,
    pub state_client_pool_size: usize,
}

impl Config {
    /// Loads configuration from a properties file on disk.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Config::parse(&text)
    }

    /// Parses configuration from already-read `key=value` text. Pure and
    /// filesystem-free so it can be exercised directly in tests.
    pub fn parse(text: &str) -> Result<Config, ConfigError> {
        let mut values = std::collections::HashMap::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut parts = line.splitn(2, '=');
            let key = parts.next().unwrap_or("").trim();
            let value = parts.next().unwrap_or("").trim();
            if !key.is_empty() {
                values.insert(key.to_string(), value.to_string());
            }
        }

        let required = |key: &str| -> Result<String, ConfigError> {
            values
                .get(key)
                .cloned()
                .ok_or_else(|| ConfigError::MissingKey(key.to_string()))
        };

        let parse_u32 = |key: &str, value: &str| -> Result<u32, ConfigError> {
            value.parse::<u32>().map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value: value.to_string(),
            })
        };

        let address = required("address")?;
        let username = required("username")?;
        let password = required("password")?;
        let base_topic = required("base_topic")?;

        let qos_raw = required("quality_of_service")?;
        let qos_code: u8 = qos_raw.parse().map_err(|_| ConfigError::InvalidValue {
            key: "quality_of_service".to_string(),
            value: qos_raw.clone(),
        })?;
        let quality_of_service = QualityOfService::from_code(qos_code).ok_or_else(|| ConfigError::InvalidValue {
            key: "quality_of_service".to_string(),
            value: qos_raw,
        })?;

        let position_bound = parse_u32("position_bound", &required("position_bound")?)?;
        let max_car_size = parse_u32("max_car_size", &required("max_car_size")?)?;

        let state_client_pool_size = match values.get("state_client_pool_size") {
            Some(raw) => raw.parse::<usize>().map_err(|_| ConfigError::InvalidValue {
                key: "state_client_pool_size".to_string(),
                value: raw.clone(),
            })?,
            None => DEFAULT_STATE_CLIENT_POOL_SIZE,
        };
        validate_pool_size(state_client_pool_size)?;

        Ok(Config {
            address,
            username,
            password,
            base_topic,
            quality_of_service,
            position_bound,
            max_car_size,
            state_client_pool_size,
        })
    }
}
