//! In-memory controller for tests and offline runs
//!
//! Implements [`RemoteTransport`] against a small model of an RC8: global
//! variables, a task table with `@STATUS`, an `Arm` robot with
//! `@CURRENT_POSITION`, and `@ERROR_DESCRIPTION`. Every call is recorded so
//! callers can assert exactly which remote operations were issued, and faults
//! can be queued per operation to exercise recovery paths.

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::thread;
use std::time::Duration;
use tracing::debug;
use crate::transport::{ControllerSpec, RemoteHandle, RemoteTransport, TransportError, TransportResult};
use crate::variable::{Value, ValueShape, VariableClass};

/// E_HANDLE: the handle is unknown or was invalidated
pub const E_INVALID_HANDLE: i32 = -2147024890;
/// E_INVALIDARG: unknown object name, wrong owner or wrong value type
pub const E_INVALID_ARGUMENT: i32 = -2147024809;

/// Task status values as reported through `@STATUS`
const STATUS_STOPPED: i64 = 2;
const STATUS_RUNNING: i64 = 3;
const STATUS_STEP_STOPPED: i64 = 4;

/// Remote operation kinds, used for call accounting and fault injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Connect,
    Disconnect,
    OpenController,
    OpenVariable,
    GetValue,
    PutValue,
    ReleaseHandle,
    OpenTask,
    GetTaskVariable,
    TaskStart,
    TaskStop,
    ListTaskNames,
    OpenRobot,
}

/// A recorded transport call
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub operation: Operation,
    /// Object name or handle the call addressed
    pub target: String,
}

#[derive(Debug, Clone, PartialEq)]
enum VariableSlot {
    Global(String),
    ErrorDescription,
    CurrentPosition,
    TaskStatus(String),
}

#[derive(Debug, Clone, PartialEq)]
enum SimObject {
    Controller,
    Variable(VariableSlot),
    Task(String),
    Robot,
}

#[derive(Debug)]
struct SimState {
    connected: bool,
    next_handle: u32,
    objects: HashMap<RemoteHandle, SimObject>,
    globals: HashMap<String, Value>,
    tasks: BTreeMap<String, i64>,
    position: Vec<f64>,
    error_description: String,
    faults: VecDeque<(Operation, i32)>,
    record_calls: bool,
    calls: Vec<Call>,
}

impl SimState {
    /// Record the call, then apply connection state and queued faults
    fn enter(&mut self, operation: Operation, target: String) -> TransportResult<()> {
        if self.record_calls {
            self.calls.push(Call { operation, target });
        }

        if operation != Operation::Connect && !self.connected {
            return Err(TransportError::Closed);
        }

        if let Some(pos) = self.faults.iter().position(|(op, _)| *op == operation) {
            let (_, code) = self.faults.remove(pos).unwrap_or((operation, E_INVALID_ARGUMENT));
            self.error_description = format!("Simulated fault on {:?}", operation);
            return Err(TransportError::remote(code, format!("simulated {:?} failure", operation)));
        }
        Ok(())
    }

    fn allocate(&mut self, object: SimObject) -> RemoteHandle {
        self.next_handle += 1;
        let handle = RemoteHandle(self.next_handle);
        self.objects.insert(handle, object);
        handle
    }

    fn object(&self, handle: RemoteHandle) -> TransportResult<&SimObject> {
        self.objects
            .get(&handle)
            .ok_or_else(|| TransportError::remote(E_INVALID_HANDLE, format!("invalid handle {}", handle)))
    }

    fn read(&self, slot: &VariableSlot) -> TransportResult<Value> {
        match slot {
            VariableSlot::Global(name) => match self.globals.get(name) {
                Some(value) => Ok(value.clone()),
                None => Ok(default_value(name)),
            },
            VariableSlot::ErrorDescription => Ok(Value::Text(self.error_description.clone())),
            VariableSlot::CurrentPosition => Ok(Value::Vector(self.position.clone())),
            VariableSlot::TaskStatus(task) => self
                .tasks
                .get(task)
                .map(|status| Value::Integer(*status))
                .ok_or_else(|| invalid_argument(format!("task {} no longer exists", task))),
        }
    }
}

fn invalid_argument(message: impl Into<String>) -> TransportError {
    TransportError::remote(E_INVALID_ARGUMENT, message)
}

/// Initial value of an unwritten global variable
fn default_value(name: &str) -> Value {
    match VariableClass::parse_variable_name(name) {
        Some((VariableClass::P, _)) => Value::Vector(vec![0.0; 7]),
        Some((VariableClass::J, _)) => Value::Vector(vec![0.0; 8]),
        Some((VariableClass::V, _)) => Value::Vector(vec![0.0; 3]),
        Some((class, _)) => match class.shape() {
            ValueShape::Integer => Value::Integer(0),
            ValueShape::Float => Value::Float(0.0),
            ValueShape::Text => Value::Text(String::new()),
            ValueShape::Vector => Value::Vector(Vec::new()),
        },
        None => Value::Integer(0),
    }
}

/// Simulated RC8 controller
pub struct SimulatedController {
    state: Mutex<SimState>,
    latency: Duration,
}

impl SimulatedController {
    /// A connected-ready controller with tasks `Pro1` and `Pro2`
    pub fn new() -> Self {
        let mut tasks = BTreeMap::new();
        tasks.insert("Pro1".to_string(), STATUS_STOPPED);
        tasks.insert("Pro2".to_string(), STATUS_STOPPED);

        Self {
            state: Mutex::new(SimState {
                connected: false,
                next_handle: 0,
                objects: HashMap::new(),
                globals: HashMap::new(),
                tasks,
                position: vec![250.0, 0.0, 450.0, 180.0, 0.0, 180.0, 5.0],
                error_description: String::new(),
                faults: VecDeque::new(),
                record_calls: true,
                calls: Vec::new(),
            }),
            latency: Duration::ZERO,
        }
    }

    /// Delay every call, to widen race windows in concurrency tests
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Stop recording calls, for long-running use where nobody reads the log
    pub fn without_call_log(self) -> Self {
        {
            let mut state = self.state.lock();
            state.record_calls = false;
            state.calls.clear();
        }
        self
    }

    pub fn with_task(self, name: &str) -> Self {
        self.state.lock().tasks.insert(name.to_string(), STATUS_STOPPED);
        self
    }

    /// Fail the next call of `operation` with `code`. Faults queue up.
    pub fn inject_fault(&self, operation: Operation, code: i32) {
        self.state.lock().faults.push_back((operation, code));
    }

    pub fn set_error_description(&self, description: &str) {
        self.state.lock().error_description = description.to_string();
    }

    pub fn set_position(&self, position: Vec<f64>) {
        self.state.lock().position = position;
    }

    pub fn set_task_status(&self, name: &str, status: i64) {
        self.state.lock().tasks.insert(name.to_string(), status);
    }

    pub fn task_status(&self, name: &str) -> Option<i64> {
        self.state.lock().tasks.get(name).copied()
    }

    /// Stored value of a global variable, if it was ever written
    pub fn global(&self, name: &str) -> Option<Value> {
        self.state.lock().globals.get(name).cloned()
    }

    /// Forget a handle as a controller-side reset would
    pub fn invalidate_handle(&self, handle: RemoteHandle) {
        self.state.lock().objects.remove(&handle);
    }

    /// Forget every task and task-variable handle
    pub fn drop_task_handles(&self) {
        self.state.lock().objects.retain(|_, object| {
            !matches!(object, SimObject::Task(_) | SimObject::Variable(VariableSlot::TaskStatus(_)))
        });
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    /// Number of handles currently open on the controller
    pub fn open_handles(&self) -> usize {
        self.state.lock().objects.len()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    pub fn call_count(&self, operation: Operation) -> usize {
        self.state.lock().calls.iter().filter(|c| c.operation == operation).count()
    }

    pub fn call_count_for(&self, operation: Operation, target: &str) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.operation == operation && c.target == target)
            .count()
    }

    fn pause(&self) {
        if !self.latency.is_zero() {
            thread::sleep(self.latency);
        }
    }
}

impl Default for SimulatedController {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteTransport for SimulatedController {
    fn connect(&self, host: &str, port: u16, _timeout: Duration) -> TransportResult<()> {
        self.pause();
        let mut state = self.state.lock();
        state.enter(Operation::Connect, format!("{}:{}", host, port))?;
        state.connected = true;
        debug!("Simulated controller accepted connection from {}:{}", host, port);
        Ok(())
    }

    fn disconnect(&self) -> TransportResult<()> {
        let mut state = self.state.lock();
        state.enter(Operation::Disconnect, String::new())?;
        state.connected = false;
        state.objects.clear();
        Ok(())
    }

    fn open_controller(&self, spec: &ControllerSpec) -> TransportResult<RemoteHandle> {
        self.pause();
        let mut state = self.state.lock();
        state.enter(Operation::OpenController, spec.provider.clone())?;
        Ok(state.allocate(SimObject::Controller))
    }

    fn open_variable(&self, owner: RemoteHandle, name: &str) -> TransportResult<RemoteHandle> {
        self.pause();
        let mut state = self.state.lock();
        state.enter(Operation::OpenVariable, name.to_string())?;

        let slot = match (state.object(owner)?, name) {
            (SimObject::Controller, "@ERROR_DESCRIPTION") => VariableSlot::ErrorDescription,
            (SimObject::Controller, _) if VariableClass::parse_variable_name(name).is_some() => {
                VariableSlot::Global(name.to_string())
            }
            (SimObject::Robot, "@CURRENT_POSITION") => VariableSlot::CurrentPosition,
            _ => return Err(invalid_argument(format!("no variable {} on {}", name, owner))),
        };
        Ok(state.allocate(SimObject::Variable(slot)))
    }

    fn get_value(&self, handle: RemoteHandle) -> TransportResult<Value> {
        self.pause();
        let mut state = self.state.lock();
        state.enter(Operation::GetValue, handle.to_string())?;

        match state.object(handle)? {
            SimObject::Variable(slot) => {
                let slot = slot.clone();
                state.read(&slot)
            }
            _ => Err(invalid_argument(format!("{} is not a variable", handle))),
        }
    }

    fn put_value(&self, handle: RemoteHandle, value: &Value) -> TransportResult<()> {
        self.pause();
        let mut state = self.state.lock();
        state.enter(Operation::PutValue, handle.to_string())?;

        let name = match state.object(handle)? {
            SimObject::Variable(VariableSlot::Global(name)) => name.clone(),
            _ => return Err(invalid_argument(format!("{} is read-only", handle))),
        };
        let accepts = VariableClass::parse_variable_name(&name)
            .map(|(class, _)| class.shape() == value.shape())
            .unwrap_or(false);
        if !accepts {
            return Err(invalid_argument(format!("type mismatch writing {}", name)));
        }
        state.globals.insert(name, value.clone());
        Ok(())
    }

    fn release_handle(&self, handle: RemoteHandle) -> TransportResult<()> {
        let mut state = self.state.lock();
        state.enter(Operation::ReleaseHandle, handle.to_string())?;
        state
            .objects
            .remove(&handle)
            .map(|_| ())
            .ok_or_else(|| TransportError::remote(E_INVALID_HANDLE, format!("invalid handle {}", handle)))
    }

    fn open_task(&self, owner: RemoteHandle, name: &str) -> TransportResult<RemoteHandle> {
        self.pause();
        let mut state = self.state.lock();
        state.enter(Operation::OpenTask, name.to_string())?;

        if *state.object(owner)? != SimObject::Controller {
            return Err(invalid_argument("tasks are owned by the controller"));
        }
        if !state.tasks.contains_key(name) {
            return Err(invalid_argument(format!("no task named {}", name)));
        }
        Ok(state.allocate(SimObject::Task(name.to_string())))
    }

    fn get_task_variable(&self, task: RemoteHandle, name: &str) -> TransportResult<RemoteHandle> {
        self.pause();
        let mut state = self.state.lock();
        state.enter(Operation::GetTaskVariable, name.to_string())?;

        let task_name = match state.object(task)? {
            SimObject::Task(task_name) => task_name.clone(),
            _ => return Err(invalid_argument(format!("{} is not a task", task))),
        };
        if name != "@STATUS" {
            return Err(invalid_argument(format!("no variable {} on task {}", name, task_name)));
        }
        Ok(state.allocate(SimObject::Variable(VariableSlot::TaskStatus(task_name))))
    }

    fn task_start(&self, task: RemoteHandle, mode: i32) -> TransportResult<()> {
        self.pause();
        let mut state = self.state.lock();
        state.enter(Operation::TaskStart, task.to_string())?;

        let task_name = match state.object(task)? {
            SimObject::Task(task_name) => task_name.clone(),
            _ => return Err(invalid_argument(format!("{} is not a task", task))),
        };
        if !(1..=3).contains(&mode) {
            return Err(invalid_argument(format!("invalid start mode {}", mode)));
        }
        state.tasks.insert(task_name, STATUS_RUNNING);
        Ok(())
    }

    fn task_stop(&self, task: RemoteHandle, mode: i32) -> TransportResult<()> {
        self.pause();
        let mut state = self.state.lock();
        state.enter(Operation::TaskStop, task.to_string())?;

        let task_name = match state.object(task)? {
            SimObject::Task(task_name) => task_name.clone(),
            _ => return Err(invalid_argument(format!("{} is not a task", task))),
        };
        let status = match mode {
            0 | 1 | 3 => STATUS_STOPPED,
            2 => STATUS_STEP_STOPPED,
            _ => return Err(invalid_argument(format!("invalid stop mode {}", mode))),
        };
        state.tasks.insert(task_name, status);
        Ok(())
    }

    fn list_task_names(&self, owner: RemoteHandle) -> TransportResult<Vec<String>> {
        self.pause();
        let mut state = self.state.lock();
        state.enter(Operation::ListTaskNames, owner.to_string())?;
        state.object(owner)?;
        Ok(state.tasks.keys().cloned().collect())
    }

    fn open_robot(&self, owner: RemoteHandle, name: &str) -> TransportResult<RemoteHandle> {
        self.pause();
        let mut state = self.state.lock();
        state.enter(Operation::OpenRobot, name.to_string())?;

        if *state.object(owner)? != SimObject::Controller || name != "Arm" {
            return Err(invalid_argument(format!("no robot named {}", name)));
        }
        Ok(state.allocate(SimObject::Robot))
    }
}
