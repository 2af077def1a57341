//! RC8 controller facade
//!
//! Composes the session, the variable handle cache, the task registry and the
//! position probe into the operation set the command layer calls. All
//! operations are synchronous and the controller is shared across threads.

use std::sync::Arc;
use tracing::{error, info};
use crate::cache::HandleCache;
use crate::config::{CacheConfig, DaemonConfig};
use crate::position::PositionProbe;
use crate::registry::{TaskBinding, TaskRegistry, TaskStatus};
use crate::session::{Endpoint, RemoteSession};
use crate::transport::{ControllerSpec, RemoteTransport, TransportError};
use crate::variable::{Value, VariableClass};
use crate::{RC8Error, Result};

pub struct RC8Controller {
    session: Arc<RemoteSession>,
    variables: HandleCache,
    programs: TaskRegistry,
    position: PositionProbe,
    preload: bool,
}

impl RC8Controller {
    pub fn new(transport: Arc<dyn RemoteTransport>, cache: &CacheConfig) -> Self {
        Self::with_controller_spec(transport, ControllerSpec::default(), cache)
    }

    pub fn with_controller_spec(
        transport: Arc<dyn RemoteTransport>,
        controller_spec: ControllerSpec,
        cache: &CacheConfig,
    ) -> Self {
        let session = Arc::new(RemoteSession::with_controller_spec(transport, controller_spec));
        info!(
            "RC8 controller created (variables: {}, position: {:?})",
            cache.variables,
            cache.position()
        );
        Self {
            variables: HandleCache::new(session.clone(), cache.variables),
            programs: TaskRegistry::new(session.clone()),
            position: PositionProbe::new(session.clone(), cache.position()),
            preload: cache.preload(),
            session,
        }
    }

    /// Build from daemon configuration, recording the connection parameters
    /// when a `controller` section is present
    pub fn from_config(transport: Arc<dyn RemoteTransport>, config: &DaemonConfig) -> Self {
        let cache = config.cache();
        match &config.controller {
            Some(connection) => {
                let controller = Self::with_controller_spec(transport, connection.controller_spec(), &cache);
                controller.configure_connection(&connection.host, connection.port, connection.timeout_ms());
                controller
            }
            None => Self::new(transport, &cache),
        }
    }

    pub fn configure_connection(&self, host: &str, port: u16, timeout_ms: u64) {
        info!("Connection configured: {}:{} (timeout {} ms)", host, port, timeout_ms);
        self.session.configure(host, port, timeout_ms);
    }

    pub fn endpoint(&self) -> Option<Endpoint> {
        self.session.endpoint()
    }

    /// Connect, resolve the controller and warm the caches.
    ///
    /// Restarting drops every cached handle from the previous session first.
    pub fn start(&self) -> Result<()> {
        self.release_handles();
        self.session.start()?;

        if self.preload {
            match self.variables.preload() {
                Ok(loaded) => info!("Preloaded {} variable handles", loaded),
                Err(e) => {
                    error!("Variable preload failed, closing session: {}", e);
                    self.release_handles();
                    self.session.shutdown();
                    return Err(preload_failed(e));
                }
            }
        }
        self.position.prepare();

        info!("RC8 controller started");
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    pub fn get_value(&self, class: VariableClass, index: i64) -> Result<Value> {
        self.variables.get(class, index)
    }

    pub fn set_value(&self, class: VariableClass, index: i64, value: Value) -> Result<()> {
        self.variables.set(class, index, value)
    }

    pub fn get_position(&self) -> Result<Vec<f64>> {
        self.position.get_position()
    }

    pub fn list_program_names(&self) -> Result<Vec<String>> {
        let names = self.session.list_task_names()?;
        info!("Programs found: {:?}", names);
        Ok(names)
    }

    pub fn resolve_program(&self, name: &str) -> Result<TaskBinding> {
        self.programs.resolve(name)
    }

    pub fn start_program(&self, name: &str, mode: &str) -> Result<()> {
        self.programs.start_program(name, mode)
    }

    pub fn stop_program(&self, name: &str, mode: &str) -> Result<()> {
        self.programs.stop_program(name, mode)
    }

    pub fn program_status(&self, name: &str) -> Result<TaskStatus> {
        self.programs.status(name)
    }

    /// Most recently resolved program, if any
    pub fn current_program(&self) -> Option<String> {
        self.programs.current_program()
    }

    pub fn invalidate_variable_cache(&self, class: Option<VariableClass>) {
        self.variables.invalidate(class);
    }

    pub fn invalidate_program_cache(&self, name: Option<&str>) -> usize {
        self.programs.invalidate(name)
    }

    /// Release every cached handle and close the session
    pub fn shutdown(&self) {
        info!("Shutting down RC8 controller");
        self.release_handles();
        self.session.shutdown();
        info!("RC8 controller shutdown complete");
    }

    pub fn variables(&self) -> &HandleCache {
        &self.variables
    }

    pub fn programs(&self) -> &TaskRegistry {
        &self.programs
    }

    fn release_handles(&self) {
        self.programs.invalidate(None);
        self.variables.clear();
        self.position.release();
        self.position.reset();
    }
}

/// A failed preload fails the whole start
fn preload_failed(err: RC8Error) -> RC8Error {
    let source = match &err {
        RC8Error::RemoteProtocol { code, message } => TransportError::remote(*code, message.clone()),
        RC8Error::Transport(source) => source.clone(),
        _ => TransportError::Closed,
    };
    RC8Error::ConnectionFailed {
        message: format!("Variable preload failed: {}", err),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CachePolicy;
    use crate::simulator::{Operation, SimulatedController};

    fn assert_send_sync<T: Send + Sync>() {}

    fn started(cache: CacheConfig) -> (Arc<SimulatedController>, RC8Controller) {
        let sim = Arc::new(SimulatedController::new());
        let controller = RC8Controller::new(sim.clone(), &cache);
        controller.configure_connection("127.0.0.1", 5007, 2000);
        controller.start().unwrap();
        (sim, controller)
    }

    #[test]
    fn test_controller_is_shareable() {
        assert_send_sync::<RC8Controller>();
    }

    #[test]
    fn test_start_requires_configuration() {
        let sim = Arc::new(SimulatedController::new());
        let controller = RC8Controller::new(sim.clone(), &CacheConfig::default());
        assert!(matches!(controller.start(), Err(RC8Error::ConfigurationMissing)));
        assert_eq!(sim.call_count(Operation::Connect), 0);
    }

    #[test]
    fn test_operations_before_start() {
        let sim = Arc::new(SimulatedController::new());
        let controller = RC8Controller::new(sim, &CacheConfig::default());
        assert!(matches!(controller.get_value(VariableClass::I, 1), Err(RC8Error::NotConnected)));
        assert!(matches!(controller.list_program_names(), Err(RC8Error::NotConnected)));
        assert!(matches!(controller.resolve_program("Pro1"), Err(RC8Error::NotConnected)));
        assert!(matches!(controller.get_position(), Err(RC8Error::NotConnected)));
    }

    #[test]
    fn test_start_prepares_arm() {
        let (sim, controller) = started(CacheConfig::default());
        assert!(controller.is_connected());
        assert_eq!(sim.call_count(Operation::OpenRobot), 1);

        controller.get_position().unwrap();
        assert_eq!(sim.call_count(Operation::OpenRobot), 1);
    }

    #[test]
    fn test_preload_resolves_every_variable() {
        let cache = CacheConfig {
            variables: CachePolicy::Persistent,
            preload: Some(true),
            position: None,
        };
        let (sim, controller) = started(cache);
        let total: usize = VariableClass::ALL.iter().map(|c| c.capacity()).sum();
        assert_eq!(controller.variables().len(), total);

        sim.clear_calls();
        controller.get_value(VariableClass::IO, 499).unwrap();
        assert_eq!(sim.call_count(Operation::OpenVariable), 0);
    }

    #[test]
    fn test_failed_preload_closes_session() {
        let sim = Arc::new(SimulatedController::new());
        let cache = CacheConfig {
            variables: CachePolicy::Persistent,
            preload: Some(true),
            position: None,
        };
        let controller = RC8Controller::new(sim.clone(), &cache);
        controller.configure_connection("127.0.0.1", 5007, 2000);
        sim.inject_fault(Operation::OpenVariable, -5);

        let err = controller.start().unwrap_err();
        assert!(matches!(err, RC8Error::ConnectionFailed { .. }));
        assert_eq!(err.code(), Some(-5));

        assert!(!controller.is_connected());
        assert!(!sim.is_connected());
        assert_eq!(sim.open_handles(), 0);
        assert!(controller.variables().is_empty());
        assert!(matches!(controller.get_value(VariableClass::I, 0), Err(RC8Error::NotConnected)));

        // A later start without the fault succeeds from scratch
        controller.start().unwrap();
        assert!(controller.is_connected());
        assert_eq!(controller.variables().len(), VariableClass::ALL.iter().map(|c| c.capacity()).sum::<usize>());
    }

    #[test]
    fn test_list_program_names() {
        let sim = Arc::new(SimulatedController::new().with_task("Pro3"));
        let controller = RC8Controller::new(sim, &CacheConfig::default());
        controller.configure_connection("127.0.0.1", 5007, 2000);
        controller.start().unwrap();

        let names = controller.list_program_names().unwrap();
        assert!(names.contains(&"Pro1".to_string()));
        assert!(names.contains(&"Pro3".to_string()));
    }

    #[test]
    fn test_program_lifecycle() {
        let (sim, controller) = started(CacheConfig::default());
        controller.start_program("Pro1.pcs", "one_cycle").unwrap();
        assert_eq!(controller.program_status("Pro1").unwrap(), TaskStatus::Running);
        assert_eq!(controller.current_program().as_deref(), Some("Pro1"));

        controller.stop_program("Pro1", "step_stop").unwrap();
        assert_eq!(sim.task_status("Pro1"), Some(4));
        assert_eq!(sim.call_count_for(Operation::OpenTask, "Pro1"), 1);
    }

    #[test]
    fn test_shutdown_releases_everything() {
        let (sim, controller) = started(CacheConfig::default());
        controller.get_value(VariableClass::S, 3).unwrap();
        controller.resolve_program("Pro2").unwrap();
        controller.get_position().unwrap();

        controller.shutdown();
        assert!(!controller.is_connected());
        assert!(!sim.is_connected());
        assert_eq!(sim.open_handles(), 0);
        assert!(controller.variables().is_empty());
        assert!(controller.programs().is_empty());
    }

    #[test]
    fn test_restart_drops_old_handles() {
        let (sim, controller) = started(CacheConfig::default());
        controller.get_value(VariableClass::F, 7).unwrap();
        controller.resolve_program("Pro1").unwrap();

        controller.start().unwrap();
        assert!(controller.variables().is_empty());
        assert!(controller.programs().is_empty());

        controller.get_value(VariableClass::F, 7).unwrap();
        assert_eq!(sim.call_count_for(Operation::OpenVariable, "F7"), 2);
    }

    #[test]
    fn test_from_config() {
        let yaml = "controller:\n  host: 10.0.0.5\n  port: 5007\ncache:\n  variables: on_demand\n";
        let config = DaemonConfig::load_from_str(yaml).unwrap();
        let sim = Arc::new(SimulatedController::new());
        let controller = RC8Controller::from_config(sim.clone(), &config);

        let endpoint = controller.endpoint().unwrap();
        assert_eq!(endpoint.host, "10.0.0.5");
        assert_eq!(controller.variables().policy(), CachePolicy::OnDemand);

        controller.start().unwrap();
        controller.get_position().unwrap();
        controller.get_position().unwrap();
        assert_eq!(sim.call_count_for(Operation::OpenVariable, crate::position::POSITION_VARIABLE), 2);
    }
}
