//! Boundary to the remote-object protocol client
//!
//! The wire protocol itself lives outside this crate. Anything that can open,
//! read, write and release named controller objects can drive the driver by
//! implementing [`RemoteTransport`]; the in-memory
//! [`SimulatedController`](crate::simulator::SimulatedController) is one such
//! implementation.

use std::fmt;
use std::time::Duration;
use thiserror::Error;
use crate::variable::Value;

/// Opaque token for an object opened on the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RemoteHandle(pub u32);

impl fmt::Display for RemoteHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Failure reported by a transport call
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    /// The controller rejected the request with a numeric error code
    #[error("remote error {code:#010x}: {message}")]
    Remote { code: i32, message: String },

    #[error("transport I/O failure: {0}")]
    Io(String),

    #[error("transport is not connected")]
    Closed,
}

impl TransportError {
    pub fn remote(code: i32, message: impl Into<String>) -> Self {
        TransportError::Remote {
            code,
            message: message.into(),
        }
    }

    pub fn code(&self) -> Option<i32> {
        match self {
            TransportError::Remote { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::Io(err.to_string())
    }
}

pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Parameters passed when opening the controller object
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerSpec {
    pub name: String,
    pub provider: String,
    pub machine: String,
    pub option: String,
}

/// Primitive operations of the remote-object protocol.
///
/// Every call may block for up to the connection timeout. Implementations
/// must be shareable across threads; the driver serializes access per cache
/// key, not per transport.
pub trait RemoteTransport: Send + Sync {
    fn connect(&self, host: &str, port: u16, timeout: Duration) -> TransportResult<()>;

    fn disconnect(&self) -> TransportResult<()>;

    fn open_controller(&self, spec: &ControllerSpec) -> TransportResult<RemoteHandle>;

    fn open_variable(&self, owner: RemoteHandle, name: &str) -> TransportResult<RemoteHandle>;

    fn get_value(&self, handle: RemoteHandle) -> TransportResult<Value>;

    fn put_value(&self, handle: RemoteHandle, value: &Value) -> TransportResult<()>;

    fn release_handle(&self, handle: RemoteHandle) -> TransportResult<()>;

    fn open_task(&self, owner: RemoteHandle, name: &str) -> TransportResult<RemoteHandle>;

    fn get_task_variable(&self, task: RemoteHandle, name: &str) -> TransportResult<RemoteHandle>;

    fn task_start(&self, task: RemoteHandle, mode: i32) -> TransportResult<()>;

    fn task_stop(&self, task: RemoteHandle, mode: i32) -> TransportResult<()>;

    fn list_task_names(&self, owner: RemoteHandle) -> TransportResult<Vec<String>>;

    fn open_robot(&self, owner: RemoteHandle, name: &str) -> TransportResult<RemoteHandle>;
}
