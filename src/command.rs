//! JSON command surface
//!
//! Maps `{"command_type": ..., "parameters": {...}}` requests onto
//! [`RC8Controller`] operations and answers every request, including
//! malformed ones, with a [`CommandResponse`].

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};
use crate::controller::RC8Controller;
use crate::variable::{Value, VariableClass};
use crate::{RC8Error, Result};

/// Generic command request payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRequest {
    /// Command type (e.g. "get_value", "start_program")
    pub command_type: String,
    /// Optional command-specific parameters
    pub parameters: Option<serde_json::Value>,
}

/// Generic command response payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResponse {
    /// Command type that was executed
    pub command_type: String,
    /// Whether the command was successful
    pub success: bool,
    /// Descriptive message about the result
    pub message: String,
    /// Time taken to complete command in milliseconds
    pub duration_ms: u64,
    /// Command-specific response data
    pub data: Option<serde_json::Value>,
    /// Protocol error code of a failed command, when the controller reported one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<i32>,
    /// Wall-clock completion time (Unix epoch seconds)
    pub stime: f64,
}

#[derive(Debug, Deserialize)]
struct ConnectionParameters {
    host: String,
    port: u16,
    timeout: u64,
}

#[derive(Debug, Deserialize)]
struct VariableParameters {
    class: String,
    index: i64,
}

#[derive(Debug, Deserialize)]
struct SetValueParameters {
    class: String,
    index: i64,
    value: Value,
}

#[derive(Debug, Deserialize)]
struct ProgramParameters {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ProgramModeParameters {
    name: String,
    mode: String,
}

#[derive(Debug, Default, Deserialize)]
struct InvalidateVariablesParameters {
    class: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct InvalidateProgramsParameters {
    name: Option<String>,
}

/// Result of a successful command: message plus optional payload
struct Outcome {
    message: String,
    data: Option<serde_json::Value>,
}

impl Outcome {
    fn message(message: impl Into<String>) -> Self {
        Self { message: message.into(), data: None }
    }

    fn with_data(message: impl Into<String>, data: serde_json::Value) -> Self {
        Self { message: message.into(), data: Some(data) }
    }
}

pub struct CommandDispatcher {
    controller: Arc<RC8Controller>,
}

impl CommandDispatcher {
    pub const COMMANDS: [&'static str; 13] = [
        "configure_connection",
        "start",
        "get_value",
        "set_value",
        "get_position",
        "list_programs",
        "resolve_program",
        "start_program",
        "stop_program",
        "program_status",
        "invalidate_variables",
        "invalidate_programs",
        "shutdown",
    ];

    pub fn new(controller: Arc<RC8Controller>) -> Self {
        Self { controller }
    }

    pub fn controller(&self) -> &Arc<RC8Controller> {
        &self.controller
    }

    /// Parse one JSON request line and dispatch it
    pub fn handle_line(&self, line: &str) -> CommandResponse {
        let start_time = Instant::now();
        match serde_json::from_str::<CommandRequest>(line) {
            Ok(request) => self.dispatch(&request),
            Err(e) => {
                error!("Failed to parse command request: {}", e);
                response("unknown", false, format!("Invalid request format: {}", e), start_time, None, None)
            }
        }
    }

    pub fn dispatch(&self, request: &CommandRequest) -> CommandResponse {
        let start_time = Instant::now();
        info!("Processing command: {}", request.command_type);
        debug!("Command request: {:?}", request);

        if !Self::COMMANDS.contains(&request.command_type.as_str()) {
            return response(
                &request.command_type,
                false,
                format!("Unknown command type: {}", request.command_type),
                start_time,
                None,
                None,
            );
        }

        match self.execute(request) {
            Ok(outcome) => {
                info!("Command '{}' completed in {}ms", request.command_type, start_time.elapsed().as_millis());
                response(&request.command_type, true, outcome.message, start_time, outcome.data, None)
            }
            Err(e) => {
                error!("Command '{}' failed: {}", request.command_type, e);
                response(
                    &request.command_type,
                    false,
                    format!("{} failed: {}", request.command_type, e),
                    start_time,
                    None,
                    e.code(),
                )
            }
        }
    }

    fn execute(&self, request: &CommandRequest) -> Result<Outcome> {
        let controller = &self.controller;
        let parameters = request.parameters.as_ref();

        match request.command_type.as_str() {
            "configure_connection" => {
                let p: ConnectionParameters = required(parameters)?;
                controller.configure_connection(&p.host, p.port, p.timeout);
                Ok(Outcome::message(format!("Connection configured for {}:{}", p.host, p.port)))
            }
            "start" => {
                controller.start()?;
                Ok(Outcome::message("Connected to controller"))
            }
            "get_value" => {
                let p: VariableParameters = required(parameters)?;
                let class: VariableClass = p.class.parse()?;
                let value = controller.get_value(class, p.index)?;
                Ok(Outcome::with_data(
                    format!("{}{} read", class, p.index),
                    json!({ "class": class, "index": p.index, "value": value }),
                ))
            }
            "set_value" => {
                let p: SetValueParameters = required(parameters)?;
                let class: VariableClass = p.class.parse()?;
                controller.set_value(class, p.index, p.value)?;
                Ok(Outcome::message(format!("{}{} set", class, p.index)))
            }
            "get_position" => {
                let position = controller.get_position()?;
                Ok(Outcome::with_data("Current position read", json!({ "position": position })))
            }
            "list_programs" => {
                let programs = controller.list_program_names()?;
                Ok(Outcome::with_data(
                    format!("{} programs found", programs.len()),
                    json!({ "programs": programs }),
                ))
            }
            "resolve_program" => {
                let p: ProgramParameters = required(parameters)?;
                let binding = controller.resolve_program(&p.name)?;
                Ok(Outcome::with_data(
                    format!("Program '{}' resolved", binding.program),
                    json!({ "program": binding.program }),
                ))
            }
            "start_program" => {
                let p: ProgramModeParameters = required(parameters)?;
                controller.start_program(&p.name, &p.mode)?;
                Ok(Outcome::message(format!("Program '{}' started ({})", p.name, p.mode)))
            }
            "stop_program" => {
                let p: ProgramModeParameters = required(parameters)?;
                controller.stop_program(&p.name, &p.mode)?;
                Ok(Outcome::message(format!("Program '{}' stopped ({})", p.name, p.mode)))
            }
            "program_status" => {
                let p: ProgramParameters = required(parameters)?;
                let status = controller.program_status(&p.name)?;
                Ok(Outcome::with_data(
                    format!("Program '{}' is {}", p.name, status),
                    json!({ "program": p.name, "status": status.to_string(), "running": status.is_running() }),
                ))
            }
            "invalidate_variables" => {
                let p: InvalidateVariablesParameters = optional(parameters)?;
                let class = p.class.map(|c| c.parse::<VariableClass>()).transpose()?;
                controller.invalidate_variable_cache(class);
                Ok(Outcome::message("Variable cache invalidated"))
            }
            "invalidate_programs" => {
                let p: InvalidateProgramsParameters = optional(parameters)?;
                let dropped = controller.invalidate_program_cache(p.name.as_deref());
                Ok(Outcome::with_data(
                    format!("{} program binding(s) dropped", dropped),
                    json!({ "dropped": dropped }),
                ))
            }
            "shutdown" => {
                controller.shutdown();
                Ok(Outcome::message("Controller connection closed"))
            }
            other => Err(RC8Error::Config(format!("Unknown command type: {}", other))),
        }
    }
}

fn required<T: DeserializeOwned>(parameters: Option<&serde_json::Value>) -> Result<T> {
    let parameters = parameters.ok_or_else(|| RC8Error::Config("Missing parameters".to_string()))?;
    Ok(serde_json::from_value(parameters.clone())?)
}

fn optional<T: DeserializeOwned + Default>(parameters: Option<&serde_json::Value>) -> Result<T> {
    match parameters {
        None | Some(serde_json::Value::Null) => Ok(T::default()),
        Some(parameters) => Ok(serde_json::from_value(parameters.clone())?),
    }
}

fn response(
    command_type: &str,
    success: bool,
    message: String,
    start_time: Instant,
    data: Option<serde_json::Value>,
    error_code: Option<i32>,
) -> CommandResponse {
    CommandResponse {
        command_type: command_type.to_string(),
        success,
        message,
        duration_ms: start_time.elapsed().as_millis() as u64,
        data,
        error_code,
        stime: chrono::Utc::now().timestamp_millis() as f64 / 1000.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::simulator::{Operation, SimulatedController};

    fn dispatcher() -> (Arc<SimulatedController>, CommandDispatcher) {
        let sim = Arc::new(SimulatedController::new());
        let controller = Arc::new(RC8Controller::new(sim.clone(), &CacheConfig::default()));
        (sim, CommandDispatcher::new(controller))
    }

    fn started() -> (Arc<SimulatedController>, CommandDispatcher) {
        let (sim, dispatcher) = dispatcher();
        let configure = dispatcher.handle_line(
            r#"{"command_type":"configure_connection","parameters":{"host":"127.0.0.1","port":5007,"timeout":2000}}"#,
        );
        assert!(configure.success, "{}", configure.message);
        assert!(dispatcher.handle_line(r#"{"command_type":"start"}"#).success);
        (sim, dispatcher)
    }

    #[test]
    fn test_malformed_request() {
        let (_, dispatcher) = dispatcher();
        let response = dispatcher.handle_line("not json");
        assert!(!response.success);
        assert_eq!(response.command_type, "unknown");
    }

    #[test]
    fn test_unknown_command() {
        let (_, dispatcher) = dispatcher();
        let response = dispatcher.handle_line(r#"{"command_type":"explode"}"#);
        assert!(!response.success);
        assert!(response.message.contains("Unknown command type"));
    }

    #[test]
    fn test_start_without_configuration() {
        let (_, dispatcher) = dispatcher();
        let response = dispatcher.handle_line(r#"{"command_type":"start"}"#);
        assert!(!response.success);
        assert!(response.message.contains("configure_connection"));
    }

    #[test]
    fn test_missing_parameters() {
        let (_, dispatcher) = started();
        let response = dispatcher.handle_line(r#"{"command_type":"get_value"}"#);
        assert!(!response.success);

        let response = dispatcher.handle_line(r#"{"command_type":"get_value","parameters":{"class":"I"}}"#);
        assert!(!response.success);
    }

    #[test]
    fn test_set_then_get() {
        let (_, dispatcher) = started();
        let set = dispatcher.handle_line(
            r#"{"command_type":"set_value","parameters":{"class":"f","index":4,"value":2}}"#,
        );
        assert!(set.success, "{}", set.message);

        let get = dispatcher.handle_line(r#"{"command_type":"get_value","parameters":{"class":"F","index":4}}"#);
        assert!(get.success);
        assert_eq!(get.data.unwrap()["value"], json!(2.0));
    }

    #[test]
    fn test_out_of_range_index() {
        let (sim, dispatcher) = started();
        sim.clear_calls();
        let response = dispatcher.handle_line(r#"{"command_type":"get_value","parameters":{"class":"IO","index":500}}"#);
        assert!(!response.success);
        assert!(response.error_code.is_none());
        assert_eq!(sim.call_count(Operation::OpenVariable), 0);
    }

    #[test]
    fn test_program_commands() {
        let (sim, dispatcher) = started();
        let start = dispatcher.handle_line(
            r#"{"command_type":"start_program","parameters":{"name":"Pro1.pcs","mode":"continuous"}}"#,
        );
        assert!(start.success, "{}", start.message);

        let status = dispatcher.handle_line(r#"{"command_type":"program_status","parameters":{"name":"Pro1"}}"#);
        assert_eq!(status.data.unwrap()["running"], json!(true));

        let bogus = dispatcher.handle_line(
            r#"{"command_type":"stop_program","parameters":{"name":"Pro1","mode":"bogus_mode"}}"#,
        );
        assert!(!bogus.success);
        assert_eq!(sim.call_count(Operation::TaskStop), 0);

        let dropped = dispatcher.handle_line(r#"{"command_type":"invalidate_programs"}"#);
        assert_eq!(dropped.data.unwrap()["dropped"], json!(1));
    }

    #[test]
    fn test_protocol_error_code_reported() {
        let (sim, dispatcher) = started();
        sim.inject_fault(Operation::ListTaskNames, -7);
        let response = dispatcher.handle_line(r#"{"command_type":"list_programs"}"#);
        assert!(!response.success);
        assert_eq!(response.error_code, Some(-7));
    }

    #[test]
    fn test_shutdown_command() {
        let (sim, dispatcher) = started();
        let response = dispatcher.handle_line(r#"{"command_type":"shutdown"}"#);
        assert!(response.success);
        assert!(!sim.is_connected());

        let response = dispatcher.handle_line(r#"{"command_type":"get_position"}"#);
        assert!(!response.success);
    }
}
