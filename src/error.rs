//! Error types for RC8 controller operations

use thiserror::Error;
use crate::transport::TransportError;
use crate::variable::{ValueShape, VariableClass};

pub type Result<T> = std::result::Result<T, RC8Error>;

#[derive(Error, Debug)]
pub enum RC8Error {
    #[error("Connection not configured. Call configure_connection() first.")]
    ConfigurationMissing,

    #[error("Not connected to controller. Call start() first.")]
    NotConnected,

    #[error("Connection failed: {message}")]
    ConnectionFailed {
        message: String,
        #[source]
        source: TransportError,
    },

    #[error("Remote protocol error {code:#010x}: {message}")]
    RemoteProtocol { code: i32, message: String },

    #[error("Could not bind task '{program}': {message}")]
    TaskResolutionFailed {
        program: String,
        code: Option<i32>,
        message: String,
    },

    #[error("Invalid mode: {mode}. Allowed: {allowed}")]
    InvalidMode { mode: String, allowed: String },

    #[error("{class}{index} out of range (valid indices 0..={max})")]
    IndexOutOfRange {
        class: VariableClass,
        index: i64,
        max: u16,
    },

    #[error("{target} expects a {expected} value, got {found}")]
    ValueMismatch {
        target: String,
        expected: ValueShape,
        found: ValueShape,
    },

    #[error("Transport error: {0}")]
    Transport(TransportError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RC8Error {
    /// Protocol error code carried by this error, if any
    pub fn code(&self) -> Option<i32> {
        match self {
            RC8Error::RemoteProtocol { code, .. } => Some(*code),
            RC8Error::TaskResolutionFailed { code, .. } => *code,
            RC8Error::ConnectionFailed { source, .. } => source.code(),
            RC8Error::Transport(source) => source.code(),
            _ => None,
        }
    }
}
