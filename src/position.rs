//! Current robot position
//!
//! The position variable belongs to the `Arm` robot object, not to the
//! controller, so reading it needs two handles: the arm, resolved once and
//! kept, and `@CURRENT_POSITION` on the arm, kept or released per call
//! depending on [`PositionPolicy`].

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use crate::session::RemoteSession;
use crate::transport::RemoteHandle;
use crate::variable::{Value, ValueShape};
use crate::{RC8Error, Result};

pub const ROBOT_NAME: &str = "Arm";
pub const POSITION_VARIABLE: &str = "@CURRENT_POSITION";

/// What happens to the position handle after a read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionPolicy {
    Hold,
    Release,
}

#[derive(Debug, Default)]
struct ProbeHandles {
    arm: Option<RemoteHandle>,
    position: Option<RemoteHandle>,
}

pub struct PositionProbe {
    session: Arc<RemoteSession>,
    policy: PositionPolicy,
    handles: Mutex<ProbeHandles>,
}

impl PositionProbe {
    pub fn new(session: Arc<RemoteSession>, policy: PositionPolicy) -> Self {
        Self {
            session,
            policy,
            handles: Mutex::new(ProbeHandles::default()),
        }
    }

    pub fn policy(&self) -> PositionPolicy {
        self.policy
    }

    /// Resolve the arm handle at start-up. A failure is only logged;
    /// [`get_position`](Self::get_position) retries lazily.
    pub fn prepare(&self) {
        let mut handles = self.handles.lock();
        match self.session.open_robot(ROBOT_NAME) {
            Ok(arm) => {
                info!("Robot '{}' handle loaded", ROBOT_NAME);
                handles.arm = Some(arm);
            }
            Err(e) => warn!("Robot '{}' not available at start, will retry on first read: {}", ROBOT_NAME, e),
        }
    }

    pub fn get_position(&self) -> Result<Vec<f64>> {
        self.session.controller()?;
        let mut handles = self.handles.lock();

        let arm = match handles.arm {
            Some(arm) => arm,
            None => {
                debug!("Robot handle missing, resolving '{}'", ROBOT_NAME);
                let arm = self.session.open_robot(ROBOT_NAME)?;
                handles.arm = Some(arm);
                arm
            }
        };

        let position = match handles.position {
            Some(position) => position,
            None => self.session.open_robot_variable(arm, POSITION_VARIABLE)?,
        };

        let value = self.session.get_value(position);
        // A held handle that failed a read is dropped so the next call re-resolves
        if self.policy == PositionPolicy::Hold && value.is_ok() {
            handles.position = Some(position);
        } else {
            handles.position = None;
            if let Err(e) = self.session.release_handle(position) {
                warn!("Failed to release {} handle {}: {}", POSITION_VARIABLE, position, e);
            }
        }

        match value? {
            Value::Vector(position) => {
                info!("Current position read: {:?}", position);
                Ok(position)
            }
            other => Err(RC8Error::ValueMismatch {
                target: POSITION_VARIABLE.to_string(),
                expected: ValueShape::Vector,
                found: other.shape(),
            }),
        }
    }

    /// Release the position and arm handles
    pub fn release(&self) {
        let mut handles = self.handles.lock();
        if let Some(position) = handles.position.take() {
            self.session.release_best_effort(position, "position variable");
        }
        if let Some(arm) = handles.arm.take() {
            self.session.release_best_effort(arm, "robot");
        }
    }

    /// Forget handles without releasing them (the session is already gone)
    pub fn reset(&self) {
        *self.handles.lock() = ProbeHandles::default();
    }
}
