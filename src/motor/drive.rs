// Drive motor controllers for the dual H-bridge
//
// Two strategies, picked once at startup:
// - DiscreteDrive: Stopped/Forward/Backward with a staleness timeout, edge-triggered digital writes
// - SmoothedDrive: proportional throttle smoothed by PID, PWM on every tick

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::actuator::{Actuator, ActuatorError, Level, PinSpec};
use super::control_loop::{ControlLoop, ControlTask, ControllerError};
use super::setpoint::{Setpoint, normalize, smooth_toward};
use crate::config::{DISCRETE_TICK_MS, MotorDynamics, MotorPins, RuntimeConfig, Reconfigure};
use crate::pid::PidController;
use crate::sync::lock;

/// Entry points the command table binds to, whichever strategy runs underneath
pub trait DriveControl: Reconfigure {
    fn forward(&self, intensity: f64);
    fn backward(&self, intensity: f64);
    fn stop(&self);
    /// Signed throttle in `[-1, 1]`
    fn set_throttle(&self, value: f64);

    fn setpoint(&self) -> Setpoint;

    /// Stop the loop thread and leave the motors stopped
    fn shutdown(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Motion {
    #[default]
    Stopped,
    Forward,
    Backward,
}

impl Motion {
    fn inverted(self, invert: bool) -> Self {
        match (self, invert) {
            (Motion::Forward, true) => Motion::Backward,
            (Motion::Backward, true) => Motion::Forward,
            (motion, _) => motion,
        }
    }

    fn as_normalized(self) -> f64 {
        match self {
            Motion::Stopped => 0.0,
            Motion::Forward => 1.0,
            Motion::Backward => -1.0,
        }
    }
}

/// Pair of H-bridge pins for one side
#[derive(Debug, Clone, Copy)]
struct Side {
    forward_pin: u8,
    backward_pin: u8,
}

fn sides(pins: &MotorPins) -> [Side; 2] {
    [
        Side {
            forward_pin: pins.forward_left,
            backward_pin: pins.backward_left,
        },
        Side {
            forward_pin: pins.forward_right,
            backward_pin: pins.backward_right,
        },
    ]
}

fn all_pins(pins: &MotorPins) -> [u8; 4] {
    [pins.forward_left, pins.backward_left, pins.forward_right, pins.backward_right]
}

// ===== Discrete + timeout =====

#[derive(Debug)]
struct DiscreteState {
    requested: Motion,
    command_active: bool,
    last_command: Instant,
    applied: Motion,
    dynamics: MotorDynamics,
}

struct DiscreteTask {
    shared: Arc<Mutex<DiscreteState>>,
    actuator: Box<dyn Actuator>,
    sides: [Side; 2],
    applied_inversion: Option<(bool, bool)>,
    expired_logged: bool,
}

impl DiscreteTask {
    fn apply(&mut self, motion: Motion, inversion: (bool, bool)) -> Result<(), ActuatorError> {
        let [left, right] = self.sides;
        for (side, invert) in [(left, inversion.0), (right, inversion.1)] {
            let effective = motion.inverted(invert);
            self.actuator
                .write_digital(side.forward_pin, Level::from(effective == Motion::Forward))?;
            self.actuator
                .write_digital(side.backward_pin, Level::from(effective == Motion::Backward))?;
        }
        Ok(())
    }
}

impl ControlTask for DiscreteTask {
    fn period(&self) -> Duration {
        Duration::from_millis(DISCRETE_TICK_MS)
    }

    fn step(&mut self, _dt: Duration) {
        let now = Instant::now();
        let (desired, inversion, changed) = {
            let mut state = lock(&self.shared);
            let timeout = Duration::from_millis(state.dynamics.timeout_ms);

            if state.command_active
                && !timeout.is_zero()
                && now.duration_since(state.last_command) > timeout
            {
                state.command_active = false;
                state.requested = Motion::Stopped;
                if !self.expired_logged {
                    warn!(
                        "Drive command stale ({:?} old), stopping motors",
                        now.duration_since(state.last_command)
                    );
                    self.expired_logged = true;
                }
            } else if state.command_active {
                self.expired_logged = false;
            }

            let desired = state.requested;
            let inversion = (state.dynamics.invert_left, state.dynamics.invert_right);
            let changed = desired != state.applied || self.applied_inversion != Some(inversion);
            state.applied = desired;
            (desired, inversion, changed)
        };

        if changed {
            debug!("Applying drive motion {:?}", desired);
            match self.apply(desired, inversion) {
                Ok(()) => self.applied_inversion = Some(inversion),
                Err(e) => {
                    warn!("Drive write failed: {}", e);
                    // Retry on the next tick
                    self.applied_inversion = None;
                }
            }
        }
    }

    fn neutralize(&mut self) {
        for side in self.sides {
            for pin in [side.forward_pin, side.backward_pin] {
                if let Err(e) = self.actuator.write_digital(pin, Level::Low) {
                    warn!("Failed to release drive pin {}: {}", pin, e);
                }
            }
        }
        lock(&self.shared).applied = Motion::Stopped;
    }
}

/// On/off drive that stops by itself when commands go stale
pub struct DiscreteDrive {
    shared: Arc<Mutex<DiscreteState>>,
    control: ControlLoop<DiscreteTask>,
}

impl DiscreteDrive {
    /// Configure the four H-bridge pins as digital outputs and start the loop
    pub fn start(
        mut actuator: Box<dyn Actuator>,
        pins: MotorPins,
        dynamics: MotorDynamics,
    ) -> Result<Self, ControllerError> {
        Self::bring_up(actuator.as_mut(), &pins)?;
        Self::spawn(actuator, pins, dynamics)
    }

    /// Configure the four H-bridge pins as digital outputs, all low
    pub fn bring_up(actuator: &mut dyn Actuator, pins: &MotorPins) -> Result<(), ActuatorError> {
        actuator.configure(&PinSpec::digital(&all_pins(pins)))?;
        for pin in all_pins(pins) {
            actuator.write_digital(pin, Level::Low)?;
        }
        Ok(())
    }

    /// Start the loop on an actuator that already went through [`Self::bring_up`]
    pub fn spawn(
        actuator: Box<dyn Actuator>,
        pins: MotorPins,
        dynamics: MotorDynamics,
    ) -> Result<Self, ControllerError> {
        let shared = Arc::new(Mutex::new(DiscreteState {
            requested: Motion::Stopped,
            command_active: false,
            last_command: Instant::now(),
            applied: Motion::Stopped,
            dynamics,
        }));

        let task = DiscreteTask {
            shared: Arc::clone(&shared),
            actuator,
            sides: sides(&pins),
            applied_inversion: Some((dynamics.invert_left, dynamics.invert_right)),
            expired_logged: false,
        };

        let control = ControlLoop::spawn("drive", task)?;
        Ok(Self { shared, control })
    }

    fn command(&self, motion: Motion) {
        let now = Instant::now();
        let mut state = lock(&self.shared);
        state.requested = motion;
        state.command_active = true;
        state.last_command = now;
    }

    pub fn requested(&self) -> Motion {
        lock(&self.shared).requested
    }

    /// Motion last written to the pins by the loop
    pub fn applied(&self) -> Motion {
        lock(&self.shared).applied
    }
}

impl DriveControl for DiscreteDrive {
    fn forward(&self, intensity: f64) {
        if intensity.is_finite() && intensity.abs().min(1.0) > 0.0 {
            self.command(Motion::Forward);
        } else {
            self.stop();
        }
    }

    fn backward(&self, intensity: f64) {
        if intensity.is_finite() && intensity.abs().min(1.0) > 0.0 {
            self.command(Motion::Backward);
        } else {
            self.stop();
        }
    }

    fn stop(&self) {
        let mut state = lock(&self.shared);
        state.requested = Motion::Stopped;
        state.command_active = false;
    }

    fn set_throttle(&self, value: f64) {
        match normalize(value) {
            Some(v) if v > 0.0 => self.command(Motion::Forward),
            Some(v) if v < 0.0 => self.command(Motion::Backward),
            _ => self.stop(),
        }
    }

    fn setpoint(&self) -> Setpoint {
        let state = lock(&self.shared);
        Setpoint {
            target: state.requested.as_normalized(),
            current: state.applied.as_normalized(),
        }
    }

    fn shutdown(&self) {
        self.stop();
        self.control.stop();
    }
}

impl Reconfigure for DiscreteDrive {
    fn reconfigure(&self, config: &RuntimeConfig) {
        lock(&self.shared).dynamics = config.motor_dynamics();
    }
}

// ===== Continuous PID-smoothed =====

#[derive(Debug)]
struct SmoothedState {
    setpoint: Setpoint,
    dynamics: MotorDynamics,
    generation: u64,
}

struct SmoothedTask {
    shared: Arc<Mutex<SmoothedState>>,
    actuator: Box<dyn Actuator>,
    sides: [Side; 2],
    pid: PidController,
    seen_generation: Option<u64>,
    write_failed: bool,
}

/// Duty cycles for (forward, backward) pins of one side
fn side_duty(value: f64, invert: bool, min_active: f64) -> (f64, f64) {
    let value = if invert { -value } else { value };
    let magnitude = value.abs().min(1.0);
    if magnitude < f64::EPSILON {
        return (0.0, 0.0);
    }
    let duty = magnitude.max(min_active);
    if value > 0.0 { (duty, 0.0) } else { (0.0, duty) }
}

impl SmoothedTask {
    fn write(&mut self, current: f64, dynamics: &MotorDynamics) -> Result<(), ActuatorError> {
        let [left, right] = self.sides;
        for (side, invert) in [(left, dynamics.invert_left), (right, dynamics.invert_right)] {
            let (forward, backward) = side_duty(current, invert, dynamics.min_active_throttle);
            self.actuator.write_pwm(side.forward_pin, forward)?;
            self.actuator.write_pwm(side.backward_pin, backward)?;
        }
        Ok(())
    }
}

impl ControlTask for SmoothedTask {
    fn period(&self) -> Duration {
        Duration::from_millis(lock(&self.shared).dynamics.pid.interval_ms)
    }

    fn step(&mut self, dt: Duration) {
        let (setpoint, dynamics, generation) = {
            let state = lock(&self.shared);
            (state.setpoint, state.dynamics, state.generation)
        };

        if self.seen_generation != Some(generation) {
            let tuning = dynamics.pid;
            self.pid.set_coefficients(tuning.kp, tuning.ki, tuning.kd);
            self.pid.set_output_limits(-tuning.output_limit, tuning.output_limit);
            self.pid.reset();
            self.seen_generation = Some(generation);
        }

        let current = smooth_toward(
            &mut self.pid,
            setpoint.target,
            setpoint.current,
            dt.as_secs_f64(),
            dynamics.pid.output_limit,
        );
        lock(&self.shared).setpoint.current = current;

        match self.write(current, &dynamics) {
            Ok(()) => self.write_failed = false,
            Err(e) => {
                if !self.write_failed {
                    warn!("Drive write failed: {}", e);
                }
                self.write_failed = true;
            }
        }
    }

    fn neutralize(&mut self) {
        for side in self.sides {
            for pin in [side.forward_pin, side.backward_pin] {
                if let Err(e) = self.actuator.write_pwm(pin, 0.0) {
                    warn!("Failed to release drive pin {}: {}", pin, e);
                }
            }
        }
        let mut state = lock(&self.shared);
        state.setpoint = Setpoint::default();
    }
}

/// Proportional drive: commands set a target, the loop ramps toward it
pub struct SmoothedDrive {
    shared: Arc<Mutex<SmoothedState>>,
    control: ControlLoop<SmoothedTask>,
}

impl SmoothedDrive {
    /// Configure the four H-bridge pins for PWM and start the loop
    pub fn start(
        mut actuator: Box<dyn Actuator>,
        pins: MotorPins,
        dynamics: MotorDynamics,
    ) -> Result<Self, ControllerError> {
        Self::bring_up(actuator.as_mut(), &pins)?;
        Self::spawn(actuator, pins, dynamics)
    }

    /// Configure the four H-bridge pins for PWM at zero duty
    pub fn bring_up(actuator: &mut dyn Actuator, pins: &MotorPins) -> Result<(), ActuatorError> {
        actuator.configure(&PinSpec::pwm(&all_pins(pins)))?;
        for pin in all_pins(pins) {
            actuator.write_pwm(pin, 0.0)?;
        }
        Ok(())
    }

    /// Start the loop on an actuator that already went through [`Self::bring_up`]
    pub fn spawn(
        actuator: Box<dyn Actuator>,
        pins: MotorPins,
        dynamics: MotorDynamics,
    ) -> Result<Self, ControllerError> {
        let shared = Arc::new(Mutex::new(SmoothedState {
            setpoint: Setpoint::default(),
            dynamics,
            generation: 0,
        }));

        let task = SmoothedTask {
            shared: Arc::clone(&shared),
            actuator,
            sides: sides(&pins),
            pid: PidController::default(),
            seen_generation: None,
            write_failed: false,
        };

        let control = ControlLoop::spawn("drive", task)?;
        Ok(Self { shared, control })
    }

    fn set_target(&self, value: f64) {
        if let Some(target) = normalize(value) {
            lock(&self.shared).setpoint.target = target;
        }
    }
}

impl DriveControl for SmoothedDrive {
    fn forward(&self, intensity: f64) {
        self.set_target(intensity.abs());
    }

    fn backward(&self, intensity: f64) {
        self.set_target(-intensity.abs());
    }

    fn stop(&self) {
        self.set_target(0.0);
    }

    fn set_throttle(&self, value: f64) {
        self.set_target(value);
    }

    fn setpoint(&self) -> Setpoint {
        lock(&self.shared).setpoint
    }

    fn shutdown(&self) {
        self.stop();
        self.control.stop();
    }
}

impl Reconfigure for SmoothedDrive {
    fn reconfigure(&self, config: &RuntimeConfig) {
        let dynamics = config.motor_dynamics();
        let mut state = lock(&self.shared);
        if state.dynamics != dynamics {
            state.dynamics = dynamics;
            state.generation += 1;
        }
    }
}
