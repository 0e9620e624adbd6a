use miniconf::{Leaf, Tree};
use serde::{Deserialize, Serialize};

use super::clamp;

/// PID controller configuration.
///
/// The update runs once per call with an implied unit time step: the caller paces the loop and
/// the gains absorb the period.
///
/// ```text
/// e = setpoint - x
/// i += e
/// y = clamp(kp*e + ki*i + kd*(e - e_last), y_min, y_max)
/// ```
///
/// The integrator has no anti-windup. It keeps accumulating while the output is saturated.
///
/// # Miniconf
///
/// `{"kp": 1.0, "ki": 0.0, "kd": 0.0, "setpoint": 300.0, "y_min": 0.0, "y_max": 40.0}`
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize, Tree)]
#[serde(default)]
pub struct Pid {
    /// Proportional gain
    pub kp: Leaf<f64>,
    /// Integral gain per update
    pub ki: Leaf<f64>,
    /// Derivative gain per update
    pub kd: Leaf<f64>,
    /// Target input value
    pub setpoint: Leaf<f64>,
    /// Output lower limit
    pub y_min: Leaf<f64>,
    /// Output upper limit
    pub y_max: Leaf<f64>,
}

impl Default for Pid {
    fn default() -> Self {
        Self::new(1.0, 0.0, 0.0, 0.0)
    }
}

/// PID controller state.
///
/// Accumulated error sum and the error of the previous update.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct PidState {
    pub integral: f64,
    pub last_error: f64,
}

impl Pid {
    pub const fn new(kp: f64, ki: f64, kd: f64, setpoint: f64) -> Self {
        Self {
            kp: Leaf(kp),
            ki: Leaf(ki),
            kd: Leaf(kd),
            setpoint: Leaf(setpoint),
            y_min: Leaf(0.0),
            y_max: Leaf(100.0),
        }
    }

    pub const fn with_limits(mut self, y_min: f64, y_max: f64) -> Self {
        self.y_min = Leaf(y_min);
        self.y_max = Leaf(y_max);
        self
    }

    /// Feed a new input value into the controller, update the state and return the new output.
    ///
    /// Only `state` is modified.
    pub fn update(&self, state: &mut PidState, x: f64) -> f64 {
        let error = *self.setpoint - x;
        state.integral += error;
        let y = *self.kp * error
            + *self.ki * state.integral
            + *self.kd * (error - state.last_error);
        state.last_error = error;
        clamp(y, *self.y_min, *self.y_max)
    }
}

/// A PID configuration together with the state it owns.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct PidController {
    config: Pid,
    state: PidState,
}

impl PidController {
    pub fn new(config: Pid) -> Self {
        Self {
            config,
            state: PidState::default(),
        }
    }

    pub fn update(&mut self, x: f64) -> f64 {
        self.config.update(&mut self.state, x)
    }

    pub fn config(&self) -> &Pid {
        &self.config
    }

    /// Replace gains, setpoint or limits. The accumulated state is kept.
    pub fn set_config(&mut self, config: Pid) {
        self.config = config;
    }

    pub fn state(&self) -> &PidState {
        &self.state
    }
}
