//! rc8d - DENSO RC8 robot controller driver
//!
//! Drives an RC8 controller through a stateful remote-object session and
//! exposes its variables and programs as plain get/set/start/stop operations.
//! The remote protocol itself sits behind the [`RemoteTransport`] trait.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rc8d::{CacheConfig, RC8Controller, SimulatedController, Value, VariableClass};
//!
//! fn main() -> rc8d::Result<()> {
//!     let controller = RC8Controller::new(Arc::new(SimulatedController::new()), &CacheConfig::default());
//!     controller.configure_connection("192.168.0.1", 5007, 3000);
//!     controller.start()?;
//!
//!     controller.set_value(VariableClass::I, 10, Value::Integer(42))?;
//!     println!("I10 = {}", controller.get_value(VariableClass::I, 10)?);
//!
//!     controller.start_program("Pro1", "one_cycle")?;
//!     controller.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **RemoteSession**: connection and controller handle
//! - **HandleCache**: variable handles under a persistent, lazy or on-demand policy
//! - **TaskRegistry**: program bindings and already-exists recovery
//! - **PositionProbe**: arm and current-position handles
//! - **RC8Controller**: facade over all of the above
//! - **CommandDispatcher**: JSON command surface

pub mod cache;
pub mod command;
pub mod config;
pub mod controller;
pub mod diagnostics;
pub mod error;
pub mod position;
pub mod recovery;
pub mod registry;
pub mod session;
pub mod simulator;
pub mod transport;
pub mod variable;

pub use cache::{CachePolicy, HandleCache};
pub use command::{CommandDispatcher, CommandRequest, CommandResponse};
pub use config::{CacheConfig, ConnectionConfig, DaemonConfig};
pub use controller::RC8Controller;
pub use error::{RC8Error, Result};
pub use position::{PositionPolicy, PositionProbe};
pub use recovery::{Recovery, RecoveryTable, E_OBJECT_ALREADY_EXISTS};
pub use registry::{StartMode, StopMode, TaskBinding, TaskRegistry, TaskStatus};
pub use session::{Endpoint, RemoteSession};
pub use simulator::{Operation, SimulatedController};
pub use transport::{ControllerSpec, RemoteHandle, RemoteTransport, TransportError};
pub use variable::{Value, ValueShape, VariableClass};
