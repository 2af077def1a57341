//! Task (program) registry
//!
//! Binds a program name to its task handle and `@STATUS` variable handle,
//! reusing bindings while they still validate and recovering from the
//! controller's "object already exists" rejection when a task is re-opened.

use parking_lot::ReentrantMutex;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, error, info};
use crate::recovery::{Recovery, RecoveryTable};
use crate::session::RemoteSession;
use crate::transport::RemoteHandle;
use crate::variable::{Value, ValueShape};
use crate::{RC8Error, Result};

pub const STATUS_VARIABLE: &str = "@STATUS";

/// Strip a trailing, case-insensitive `.pcs` extension
pub fn normalize_program_name(name: &str) -> String {
    let name = name.trim();
    let len = name.len();
    if len >= 4 && name.is_char_boundary(len - 4) && name[len - 4..].eq_ignore_ascii_case(".pcs") {
        name[..len - 4].to_string()
    } else {
        name.to_string()
    }
}

/// How a task is started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartMode {
    OneCycle,
    Continuous,
    StepForward,
}

impl StartMode {
    const NAMES: &'static str = "one_cycle, continuous, step_forward";

    pub fn code(self) -> i32 {
        match self {
            StartMode::OneCycle => 1,
            StartMode::Continuous => 2,
            StartMode::StepForward => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StartMode::OneCycle => "one_cycle",
            StartMode::Continuous => "continuous",
            StartMode::StepForward => "step_forward",
        }
    }
}

impl FromStr for StartMode {
    type Err = RC8Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "one_cycle" => Ok(StartMode::OneCycle),
            "continuous" => Ok(StartMode::Continuous),
            "step_forward" => Ok(StartMode::StepForward),
            other => Err(RC8Error::InvalidMode {
                mode: other.to_string(),
                allowed: Self::NAMES.to_string(),
            }),
        }
    }
}

/// How a task is stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMode {
    DefaultStop,
    InstantStop,
    StepStop,
    CycleStop,
}

impl StopMode {
    const NAMES: &'static str = "default_stop, instant_stop, step_stop, cycle_stop";

    pub fn code(self) -> i32 {
        match self {
            StopMode::DefaultStop => 0,
            StopMode::InstantStop => 1,
            StopMode::StepStop => 2,
            StopMode::CycleStop => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StopMode::DefaultStop => "default_stop",
            StopMode::InstantStop => "instant_stop",
            StopMode::StepStop => "step_stop",
            StopMode::CycleStop => "cycle_stop",
        }
    }
}

impl FromStr for StopMode {
    type Err = RC8Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "default_stop" => Ok(StopMode::DefaultStop),
            "instant_stop" => Ok(StopMode::InstantStop),
            "step_stop" => Ok(StopMode::StepStop),
            "cycle_stop" => Ok(StopMode::CycleStop),
            other => Err(RC8Error::InvalidMode {
                mode: other.to_string(),
                allowed: Self::NAMES.to_string(),
            }),
        }
    }
}

/// Task state as reported by `@STATUS`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    NonExistent,
    HoldStopped,
    Stopped,
    Running,
    StepStopped,
    Unknown(i64),
}

impl From<i64> for TaskStatus {
    fn from(code: i64) -> Self {
        match code {
            0 => TaskStatus::NonExistent,
            1 => TaskStatus::HoldStopped,
            2 => TaskStatus::Stopped,
            3 => TaskStatus::Running,
            4 => TaskStatus::StepStopped,
            other => TaskStatus::Unknown(other),
        }
    }
}

impl TaskStatus {
    pub fn is_running(self) -> bool {
        self == TaskStatus::Running
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::NonExistent => f.write_str("NON_EXISTENT"),
            TaskStatus::HoldStopped => f.write_str("HOLD_STOPPED"),
            TaskStatus::Stopped => f.write_str("STOPPED"),
            TaskStatus::Running => f.write_str("RUNNING"),
            TaskStatus::StepStopped => f.write_str("STEP_STOPPED"),
            TaskStatus::Unknown(code) => write!(f, "UNKNOWN({})", code),
        }
    }
}

/// A program bound to its task and status handles
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskBinding {
    pub program: String,
    pub task: RemoteHandle,
    pub status: RemoteHandle,
}

#[derive(Debug, Default)]
struct RegistryState {
    bindings: HashMap<String, TaskBinding>,
    current: Option<String>,
}

type State = RefCell<RegistryState>;

pub struct TaskRegistry {
    session: Arc<RemoteSession>,
    recovery: RecoveryTable,
    /// Held across validate-resolve-store; reentrant because start/stop
    /// resolve while already holding it
    state: ReentrantMutex<State>,
}

impl TaskRegistry {
    pub fn new(session: Arc<RemoteSession>) -> Self {
        Self::with_recovery(session, RecoveryTable::default())
    }

    pub fn with_recovery(session: Arc<RemoteSession>, recovery: RecoveryTable) -> Self {
        Self {
            session,
            recovery,
            state: ReentrantMutex::new(RefCell::new(RegistryState::default())),
        }
    }

    /// Bind `name` to a task, reusing a cached binding that still validates.
    pub fn resolve(&self, name: &str) -> Result<TaskBinding> {
        let program = normalize_program_name(name);
        self.session.controller()?;

        let guard = self.state.lock();
        let cached = guard.borrow().bindings.get(&program).cloned();

        if let Some(binding) = &cached {
            if self.validate(binding) {
                info!("Program '{}' reused (validated cached handle + {})", program, STATUS_VARIABLE);
                guard.borrow_mut().current = Some(program);
                return Ok(binding.clone());
            }
            info!("Program '{}' cached handle seems stale, resolving fresh", program);
        }

        match self.open_binding(&program) {
            Ok(binding) => {
                if let Some(stale) = cached.filter(|stale| *stale != binding) {
                    self.release_binding(&stale);
                }
                {
                    let mut state = guard.borrow_mut();
                    state.bindings.insert(program.clone(), binding.clone());
                    state.current = Some(program.clone());
                }
                info!("Program '{}' resolved fresh (handle + {})", program, STATUS_VARIABLE);
                Ok(binding)
            }
            Err(err) => self.recover(&guard, &program, cached, err),
        }
    }

    /// Start a program, binding it first if needed. The mode is checked
    /// before anything is sent to the controller.
    pub fn start_program(&self, name: &str, mode: &str) -> Result<()> {
        let mode: StartMode = mode.parse()?;
        let binding = self.bound(name)?;

        self.session.task_start(binding.task, mode.code())?;
        info!("Program '{}' started in mode '{}'", binding.program, mode.as_str());
        Ok(())
    }

    pub fn stop_program(&self, name: &str, mode: &str) -> Result<()> {
        let mode: StopMode = mode.parse()?;
        let binding = self.bound(name)?;

        self.session.task_stop(binding.task, mode.code())?;
        info!("Program '{}' stopped in mode '{}'", binding.program, mode.as_str());
        Ok(())
    }

    /// Current `@STATUS` of a program
    pub fn status(&self, name: &str) -> Result<TaskStatus> {
        let binding = self.resolve(name)?;
        match self.session.get_value(binding.status)? {
            Value::Integer(code) => {
                let status = TaskStatus::from(code);
                debug!("Program '{}' status: {}", binding.program, status);
                Ok(status)
            }
            other => Err(RC8Error::ValueMismatch {
                target: format!("{}.{}", binding.program, STATUS_VARIABLE),
                expected: ValueShape::Integer,
                found: other.shape(),
            }),
        }
    }

    /// Drop one binding (by program name) or all of them, releasing handles
    pub fn invalidate(&self, name: Option<&str>) -> usize {
        let guard = self.state.lock();
        let dropped: Vec<TaskBinding> = {
            let mut state = guard.borrow_mut();
            let dropped: Vec<TaskBinding> = match name {
                Some(name) => state
                    .bindings
                    .remove(&normalize_program_name(name))
                    .into_iter()
                    .collect(),
                None => state.bindings.drain().map(|(_, binding)| binding).collect(),
            };
            if let Some(current) = &state.current {
                if dropped.iter().any(|b| &b.program == current) {
                    state.current = None;
                }
            }
            dropped
        };

        for binding in &dropped {
            self.release_binding(binding);
        }
        if !dropped.is_empty() {
            info!("Invalidated {} program binding(s)", dropped.len());
        }
        dropped.len()
    }

    /// Most recently used program
    pub fn current_program(&self) -> Option<String> {
        self.state.lock().borrow().current.clone()
    }

    pub fn is_bound(&self, name: &str) -> bool {
        self.state
            .lock()
            .borrow()
            .bindings
            .contains_key(&normalize_program_name(name))
    }

    pub fn len(&self) -> usize {
        self.state.lock().borrow().bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Existing binding, or a fresh resolve when the program is unbound
    fn bound(&self, name: &str) -> Result<TaskBinding> {
        let program = normalize_program_name(name);
        let guard = self.state.lock();
        let existing = guard.borrow().bindings.get(&program).cloned();

        let binding = match existing {
            Some(binding) => binding,
            None => self.resolve(&program)?,
        };
        guard.borrow_mut().current = Some(program);
        Ok(binding)
    }

    fn open_binding(&self, program: &str) -> Result<TaskBinding> {
        let task = self.session.open_task(program)?;
        let status = match self.session.get_task_variable(task, STATUS_VARIABLE) {
            Ok(status) => status,
            Err(e) => {
                self.session.release_best_effort(task, "task");
                return Err(e);
            }
        };
        Ok(TaskBinding {
            program: program.to_string(),
            task,
            status,
        })
    }

    /// A readable `@STATUS` is taken as proof the task object is still alive.
    /// This is a heuristic: a transient read failure looks exactly like a
    /// dead handle and costs one re-resolution.
    fn validate(&self, binding: &TaskBinding) -> bool {
        match self.session.probe_value(binding.status) {
            Ok(_) => true,
            Err(e) => {
                debug!("Validation probe for '{}' failed: {}", binding.program, e);
                false
            }
        }
    }

    fn recover(
        &self,
        state: &State,
        program: &str,
        cached: Option<TaskBinding>,
        err: RC8Error,
    ) -> Result<TaskBinding> {
        let recovery = err.code().and_then(|code| self.recovery.lookup(code));

        match (recovery, cached) {
            (Some(Recovery::ReuseCached), Some(binding)) => {
                info!("{} for '{}': reusing existing handle if possible", err, program);
                if self.validate(&binding) {
                    state.borrow_mut().current = Some(program.to_string());
                    info!("Program '{}' reused after duplicate-object rejection", program);
                    return Ok(binding);
                }
                error!("Could not reuse handle for '{}' after {}", program, err);
                self.forget(state, program);
                Err(RC8Error::TaskResolutionFailed {
                    program: program.to_string(),
                    code: err.code(),
                    message: err.to_string(),
                })
            }
            (Some(Recovery::ReuseCached), None) => {
                error!("No cached binding to reuse for '{}': {}", program, err);
                Err(err)
            }
            (None, cached) => {
                if cached.is_some() {
                    self.forget(state, program);
                }
                error!("Error while retrieving task '{}': {}", program, err);
                Err(err)
            }
        }
    }

    fn forget(&self, state: &State, program: &str) {
        let removed = {
            let mut state = state.borrow_mut();
            if state.current.as_deref() == Some(program) {
                state.current = None;
            }
            state.bindings.remove(program)
        };
        if let Some(binding) = removed {
            self.release_binding(&binding);
        }
    }

    fn release_binding(&self, binding: &TaskBinding) {
        self.session.release_best_effort(binding.status, "status variable");
        self.session.release_best_effort(binding.task, "task");
    }
}
