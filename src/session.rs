//! Remote session to the RC8 controller
//!
//! Owns the transport connection and the top-level controller handle. Every
//! other component routes its protocol calls through here, which is where
//! transport errors are turned into [`RC8Error`]s and enriched with the
//! controller's own error description.

use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use crate::diagnostics::{enrich_message, read_error_description};
use crate::transport::{ControllerSpec, RemoteHandle, RemoteTransport, TransportError};
use crate::variable::Value;
use crate::{RC8Error, Result};

/// Default provider for RC8 controllers (virtual and real)
pub const DEFAULT_PROVIDER: &str = "CaoProv.DENSO.VRC";

/// Where and how long to wait for the controller
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub timeout: Duration,
}

impl Endpoint {
    fn is_complete(&self) -> bool {
        !self.host.trim().is_empty() && self.port != 0 && !self.timeout.is_zero()
    }
}

impl Default for ControllerSpec {
    fn default() -> Self {
        Self {
            name: String::new(),
            provider: DEFAULT_PROVIDER.to_string(),
            machine: "localhost".to_string(),
            option: String::new(),
        }
    }
}

#[derive(Debug, Default)]
struct SessionState {
    endpoint: Option<Endpoint>,
    controller: Option<RemoteHandle>,
}

/// Stateful connection to one controller
pub struct RemoteSession {
    transport: Arc<dyn RemoteTransport>,
    controller_spec: ControllerSpec,
    state: RwLock<SessionState>,
    /// Serializes start/shutdown
    lifecycle: Mutex<()>,
}

impl RemoteSession {
    pub fn new(transport: Arc<dyn RemoteTransport>) -> Self {
        Self::with_controller_spec(transport, ControllerSpec::default())
    }

    pub fn with_controller_spec(transport: Arc<dyn RemoteTransport>, controller_spec: ControllerSpec) -> Self {
        Self {
            transport,
            controller_spec,
            state: RwLock::new(SessionState::default()),
            lifecycle: Mutex::new(()),
        }
    }

    /// Record connection parameters. No I/O happens until [`start`](Self::start).
    pub fn configure(&self, host: &str, port: u16, timeout_ms: u64) {
        let endpoint = Endpoint {
            host: host.to_string(),
            port,
            timeout: Duration::from_millis(timeout_ms),
        };
        debug!("Session configured for {}:{} (timeout {:?})", endpoint.host, endpoint.port, endpoint.timeout);
        self.state.write().endpoint = Some(endpoint);
    }

    pub fn endpoint(&self) -> Option<Endpoint> {
        self.state.read().endpoint.clone()
    }

    /// Connect and resolve the controller handle.
    ///
    /// A session that is already running is shut down first.
    pub fn start(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock();

        let endpoint = self
            .endpoint()
            .filter(Endpoint::is_complete)
            .ok_or(RC8Error::ConfigurationMissing)?;

        if self.is_connected() {
            warn!("Session already started, reconnecting");
            self.close();
        }

        info!("Connecting to RC8 controller at {}:{}", endpoint.host, endpoint.port);
        self.transport
            .connect(&endpoint.host, endpoint.port, endpoint.timeout)
            .map_err(|e| self.connection_failed(e, None))?;

        let controller = match self.transport.open_controller(&self.controller_spec) {
            Ok(handle) => handle,
            Err(e) => {
                let err = self.connection_failed(e, None);
                if let Err(e) = self.transport.disconnect() {
                    warn!("Disconnect after failed start also failed: {}", e);
                }
                return Err(err);
            }
        };

        self.state.write().controller = Some(controller);
        info!("Connected to controller (provider {}, handle {})", self.controller_spec.provider, controller);
        Ok(())
    }

    /// Release the controller handle and disconnect. Failures are logged only.
    pub fn shutdown(&self) {
        let _lifecycle = self.lifecycle.lock();
        self.close();
    }

    fn close(&self) {
        let Some(controller) = self.state.write().controller.take() else {
            debug!("Session not started, nothing to shut down");
            return;
        };

        if let Err(e) = self.transport.release_handle(controller) {
            warn!("Failed to release controller handle {}: {}", controller, e);
        }
        if let Err(e) = self.transport.disconnect() {
            warn!("Failed to disconnect from controller: {}", e);
        }
        info!("Session closed");
    }

    pub fn is_connected(&self) -> bool {
        self.state.read().controller.is_some()
    }

    /// The controller handle, or `NotConnected`
    pub fn controller(&self) -> Result<RemoteHandle> {
        self.state.read().controller.ok_or(RC8Error::NotConnected)
    }

    pub fn open_named_variable(&self, name: &str) -> Result<RemoteHandle> {
        let controller = self.controller()?;
        self.transport
            .open_variable(controller, name)
            .map_err(|e| self.protocol_error(e))
    }

    /// Open a variable owned by a robot rather than by the controller
    pub fn open_robot_variable(&self, robot: RemoteHandle, name: &str) -> Result<RemoteHandle> {
        self.controller()?;
        self.transport
            .open_variable(robot, name)
            .map_err(|e| self.protocol_error(e))
    }

    pub fn get_value(&self, handle: RemoteHandle) -> Result<Value> {
        self.controller()?;
        self.transport.get_value(handle).map_err(|e| self.protocol_error(e))
    }

    /// Read a value for liveness checking. Failures are expected here, so
    /// they are not enriched with the controller's error description.
    pub fn probe_value(&self, handle: RemoteHandle) -> Result<Value> {
        self.controller()?;
        self.transport.get_value(handle).map_err(plain_error)
    }

    pub fn put_value(&self, handle: RemoteHandle, value: &Value) -> Result<()> {
        self.controller()?;
        self.transport
            .put_value(handle, value)
            .map_err(|e| self.protocol_error(e))
    }

    pub fn release_handle(&self, handle: RemoteHandle) -> Result<()> {
        self.controller()?;
        self.transport.release_handle(handle).map_err(|e| self.protocol_error(e))
    }

    /// Release a handle that is being discarded anyway
    pub fn release_best_effort(&self, handle: RemoteHandle, what: &str) {
        if !self.is_connected() {
            return;
        }
        match self.transport.release_handle(handle) {
            Ok(()) => debug!("Released {} handle {}", what, handle),
            Err(e) => warn!("Failed to release {} handle {}: {}", what, handle, e),
        }
    }

    pub fn open_task(&self, name: &str) -> Result<RemoteHandle> {
        let controller = self.controller()?;
        self.transport
            .open_task(controller, name)
            .map_err(|e| self.protocol_error(e))
    }

    pub fn get_task_variable(&self, task: RemoteHandle, name: &str) -> Result<RemoteHandle> {
        self.controller()?;
        self.transport
            .get_task_variable(task, name)
            .map_err(|e| self.protocol_error(e))
    }

    pub fn task_start(&self, task: RemoteHandle, mode: i32) -> Result<()> {
        self.controller()?;
        self.transport.task_start(task, mode).map_err(|e| self.protocol_error(e))
    }

    pub fn task_stop(&self, task: RemoteHandle, mode: i32) -> Result<()> {
        self.controller()?;
        self.transport.task_stop(task, mode).map_err(|e| self.protocol_error(e))
    }

    pub fn list_task_names(&self) -> Result<Vec<String>> {
        let controller = self.controller()?;
        self.transport
            .list_task_names(controller)
            .map_err(|e| self.protocol_error(e))
    }

    pub fn open_robot(&self, name: &str) -> Result<RemoteHandle> {
        let controller = self.controller()?;
        self.transport
            .open_robot(controller, name)
            .map_err(|e| self.protocol_error(e))
    }

    /// Map a transport failure, enriching remote errors with the controller's
    /// description of what went wrong.
    fn protocol_error(&self, err: TransportError) -> RC8Error {
        match err {
            TransportError::Remote { code, message } => {
                let controller = self.state.read().controller;
                let description = read_error_description(self.transport.as_ref(), controller);
                RC8Error::RemoteProtocol {
                    code,
                    message: enrich_message(&message, description.as_deref()),
                }
            }
            other => RC8Error::Transport(other),
        }
    }

    fn connection_failed(&self, err: TransportError, controller: Option<RemoteHandle>) -> RC8Error {
        warn!("Controller connection failed: {}", err);
        let description = match err {
            TransportError::Remote { .. } => read_error_description(self.transport.as_ref(), controller),
            _ => None,
        };
        RC8Error::ConnectionFailed {
            message: enrich_message(&err.to_string(), description.as_deref()),
            source: err,
        }
    }
}

fn plain_error(err: TransportError) -> RC8Error {
    match err {
        TransportError::Remote { code, message } => RC8Error::RemoteProtocol { code, message },
        other => RC8Error::Transport(other),
    }
}
