//! Typed error kinds for the controller.
//!
//! `ConfigError` and `BusError` are fatal at startup and bubble up through
//! `main`'s `Result`. `ProtocolError` is always recoverable: callers log it
//! and drop the offending message, it never propagates further.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required config key `{0}`")]
    MissingKey(String),
    #[error("invalid value for config key `{key}`: `{value}`")]
    InvalidValue { key: String, value: String },
    #[error("could not read config file `{path}`: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum BusError {
    #[error("failed to connect to broker at {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: rumqttc::ConnectionError,
    },
    #[error("broker refused connection for `{address}`: {reason}")]
    ConnectRejected { address: String, reason: String, code: i32 },
    #[error("client error: {0}")]
    Client(#[from] rumqttc::ClientError),
}

impl BusError {
    /// The process exit code this error should propagate, per spec §6.
    pub fn exit_code(&self) -> i32 {
        match self {
            BusError::ConnectRejected { code, .. } => *code,
            _ => 1,
        }
    }
}

/// Top-level error covering everything that can abort startup or
/// shutdown before the controller's tasks can run their own recovery.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Bus(#[from] BusError),
}

impl AppError {
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::Config(_) => 1,
            AppError::Bus(err) => err.exit_code(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ProtocolError {
    #[error("malformed payload on topic `{topic}`: {reason}")]
    MalformedPayload { topic: String, reason: String },
    #[error("join message for already-registered car `{0}`")]
    DuplicateJoin(String),
    #[error("state message for unrecognized car `{0}`")]
    UnknownCar(String),
    #[error("unrecognized topic suffix `{0}`")]
    UnknownTopicKind(String),
}
