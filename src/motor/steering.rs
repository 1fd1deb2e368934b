// Steering servo controller
//
// Commands move a normalized target in [-1, 1] (negative = left). The loop
// smooths toward it with PID, scales by sensitivity and maps the result into
// an asymmetric angle window around the configured center.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{info, warn};

use super::actuator::{Actuator, ActuatorError, PinSpec};
use super::control_loop::{ControlLoop, ControlTask, ControllerError};
use super::setpoint::{NORMALIZED_MAX, NORMALIZED_MIN, Setpoint, normalize, smooth_toward};
use crate::config::{
    Reconfigure, RuntimeConfig, SERVO_MAX_ANGLE, SERVO_MAX_PULSE_MS, SERVO_MIN_ANGLE, SERVO_MIN_PULSE_MS,
    SERVO_PERIOD_MS, STEERING_COMMAND_STEP, SteeringDynamics,
};
use crate::pid::PidController;
use crate::sync::lock;

/// Usable servo angles: `center - left_range ..= center + right_range`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AngleWindow {
    pub center: i32,
    pub left_range: i32,
    pub right_range: i32,
}

impl AngleWindow {
    /// Clamp the requested window to the servo's absolute travel
    pub fn new(center: i32, left_range: i32, right_range: i32) -> Self {
        let center = center.clamp(SERVO_MIN_ANGLE, SERVO_MAX_ANGLE);
        Self {
            center,
            left_range: left_range.clamp(0, center - SERVO_MIN_ANGLE),
            right_range: right_range.clamp(0, SERVO_MAX_ANGLE - center),
        }
    }

    fn from_dynamics(dynamics: &SteeringDynamics) -> Self {
        Self::new(dynamics.center_angle, dynamics.left_range, dynamics.right_range)
    }

    pub fn min_angle(&self) -> i32 {
        self.center - self.left_range
    }

    pub fn max_angle(&self) -> i32 {
        self.center + self.right_range
    }

    pub fn to_angle(&self, normalized: f64) -> i32 {
        let clamped = normalized.clamp(NORMALIZED_MIN, NORMALIZED_MAX);
        let range = if clamped >= 0.0 { self.right_range } else { self.left_range };
        self.center + (clamped * f64::from(range)).round() as i32
    }

    pub fn to_normalized(&self, angle: i32) -> f64 {
        let angle = angle.clamp(self.min_angle(), self.max_angle());
        let offset = f64::from(angle - self.center);
        if angle >= self.center {
            (offset / f64::from(self.right_range.max(1))).clamp(0.0, NORMALIZED_MAX)
        } else {
            (offset / f64::from(self.left_range.max(1))).clamp(NORMALIZED_MIN, 0.0)
        }
    }
}

/// PWM duty for an absolute servo angle (0.5 ms .. 2.5 ms in a 20 ms frame)
pub fn servo_duty(angle: i32) -> f64 {
    let angle = angle.clamp(SERVO_MIN_ANGLE, SERVO_MAX_ANGLE);
    let proportion = f64::from(angle - SERVO_MIN_ANGLE) / f64::from(SERVO_MAX_ANGLE - SERVO_MIN_ANGLE);
    let pulse_ms = SERVO_MIN_PULSE_MS + proportion * (SERVO_MAX_PULSE_MS - SERVO_MIN_PULSE_MS);
    pulse_ms / SERVO_PERIOD_MS
}

#[derive(Debug)]
struct SteeringState {
    setpoint: Setpoint,
    dynamics: SteeringDynamics,
    window: AngleWindow,
    generation: u64,
    recenter: bool,
}

struct SteeringTask {
    shared: Arc<Mutex<SteeringState>>,
    actuator: Box<dyn Actuator>,
    pin: u8,
    pid: PidController,
    seen_generation: Option<u64>,
    write_failed: bool,
}

impl ControlTask for SteeringTask {
    fn period(&self) -> Duration {
        Duration::from_millis(lock(&self.shared).dynamics.pid.interval_ms)
    }

    fn step(&mut self, dt: Duration) {
        let (mut setpoint, dynamics, window, generation, recenter) = {
            let mut state = lock(&self.shared);
            let recenter = std::mem::take(&mut state.recenter);
            (state.setpoint, state.dynamics, state.window, state.generation, recenter)
        };

        if self.seen_generation != Some(generation) {
            let tuning = dynamics.pid;
            self.pid.set_coefficients(tuning.kp, tuning.ki, tuning.kd);
            self.pid.set_output_limits(-tuning.output_limit, tuning.output_limit);
            self.pid.reset();
            self.seen_generation = Some(generation);
        }
        if recenter {
            setpoint.current = 0.0;
            self.pid.reset();
        }

        let updated = smooth_toward(
            &mut self.pid,
            setpoint.target,
            setpoint.current,
            dt.as_secs_f64(),
            dynamics.pid.output_limit,
        );
        lock(&self.shared).setpoint.current = updated;

        let scaled = (updated * dynamics.sensitivity).clamp(NORMALIZED_MIN, NORMALIZED_MAX);
        let duty = servo_duty(window.to_angle(scaled));

        match self.actuator.write_pwm(self.pin, duty) {
            Ok(()) => self.write_failed = false,
            Err(e) => {
                if !self.write_failed {
                    warn!("Steering write failed: {}", e);
                }
                self.write_failed = true;
            }
        }
    }

    fn neutralize(&mut self) {
        let center = {
            let mut state = lock(&self.shared);
            state.setpoint = Setpoint::default();
            state.window.center
        };
        if let Err(e) = self.actuator.write_pwm(self.pin, servo_duty(center)) {
            warn!("Failed to center steering: {}", e);
        }
    }
}

/// PID-smoothed steering servo
pub struct SteeringController {
    shared: Arc<Mutex<SteeringState>>,
    control: ControlLoop<SteeringTask>,
}

impl SteeringController {
    /// Configure the servo PWM pin, center it and start the loop
    pub fn start(
        mut actuator: Box<dyn Actuator>,
        pin: u8,
        dynamics: SteeringDynamics,
    ) -> Result<Self, ControllerError> {
        Self::bring_up(actuator.as_mut(), pin, &dynamics)?;
        Self::spawn(actuator, pin, dynamics)
    }

    /// Configure the servo PWM pin and hold it at the center angle
    pub fn bring_up(actuator: &mut dyn Actuator, pin: u8, dynamics: &SteeringDynamics) -> Result<(), ActuatorError> {
        actuator.configure(&PinSpec::pwm(&[pin]))?;
        actuator.write_pwm(pin, servo_duty(AngleWindow::from_dynamics(dynamics).center))
    }

    /// Start the loop on an actuator that already went through [`Self::bring_up`]
    pub fn spawn(actuator: Box<dyn Actuator>, pin: u8, dynamics: SteeringDynamics) -> Result<Self, ControllerError> {
        let window = AngleWindow::from_dynamics(&dynamics);
        let shared = Arc::new(Mutex::new(SteeringState {
            setpoint: Setpoint::default(),
            dynamics,
            window,
            generation: 0,
            recenter: false,
        }));

        let task = SteeringTask {
            shared: Arc::clone(&shared),
            actuator,
            pin,
            pid: PidController::default(),
            seen_generation: None,
            write_failed: false,
        };

        let control = ControlLoop::spawn("steering", task)?;
        Ok(Self { shared, control })
    }

    /// Replace the target, clamped to `[-1, 1]`
    pub fn set_steering(&self, value: f64) {
        if let Some(target) = normalize(value) {
            lock(&self.shared).setpoint.target = target;
        }
    }

    pub fn center(&self) {
        self.set_steering(0.0);
    }

    /// Target an absolute angle, clamped into the window
    pub fn set_angle(&self, angle: i32) {
        let mut state = lock(&self.shared);
        state.setpoint.target = state.window.to_normalized(angle);
    }

    pub fn turn_left(&self, intensity: f64) {
        self.nudge(-1.0, intensity);
    }

    pub fn turn_right(&self, intensity: f64) {
        self.nudge(1.0, intensity);
    }

    /// Repeated nudges accumulate on the current target
    fn nudge(&self, direction: f64, intensity: f64) {
        if !intensity.is_finite() {
            return;
        }
        let magnitude = intensity.abs().clamp(0.0, 1.0);
        if magnitude == 0.0 {
            return;
        }

        let mut state = lock(&self.shared);
        let step = match state.dynamics.command_step {
            step if step > 0.0 => step,
            _ => STEERING_COMMAND_STEP,
        };
        state.setpoint.target =
            (state.setpoint.target + direction * step * magnitude).clamp(NORMALIZED_MIN, NORMALIZED_MAX);
    }

    pub fn setpoint(&self) -> Setpoint {
        lock(&self.shared).setpoint
    }

    pub fn window(&self) -> AngleWindow {
        lock(&self.shared).window
    }

    pub fn sensitivity(&self) -> f64 {
        lock(&self.shared).dynamics.sensitivity
    }

    /// Stop the loop thread and leave the servo centered
    pub fn shutdown(&self) {
        self.control.stop();
    }
}

impl Reconfigure for SteeringController {
    fn reconfigure(&self, config: &RuntimeConfig) {
        let dynamics = config.steering_dynamics();
        let window = AngleWindow::from_dynamics(&dynamics);

        let mut state = lock(&self.shared);
        if state.dynamics.pid != dynamics.pid {
            state.generation += 1;
        }
        if state.window != window {
            info!(
                "Steering window now {}..={} (center {})",
                window.min_angle(),
                window.max_angle(),
                window.center
            );
            state.window = window;
            state.setpoint.target = 0.0;
            state.recenter = true;
        }
        state.dynamics = dynamics;
    }
}
