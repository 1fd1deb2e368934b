// Motor control module for the drive H-bridge and steering servo
//
// Provides:
// - Actuator abstraction (pin bring-up, digital and PWM writes) and a simulated backend
// - Fixed-interval control loop threads with join-then-neutral teardown
// - Drive strategies (discrete with timeout, PID-smoothed) and the steering controller

pub mod actuator;
pub mod control_loop;
pub mod drive;
pub mod setpoint;
pub mod sim;
pub mod steering;

pub use actuator::{Actuator, ActuatorError, Level, PinSpec};
pub use control_loop::ControllerError;
pub use drive::{DiscreteDrive, DriveControl, Motion, SmoothedDrive};
pub use setpoint::{NORMALIZED_MAX, NORMALIZED_MIN, Setpoint};
pub use sim::{SimActuator, SimProbe};
pub use steering::{AngleWindow, SteeringController, servo_duty};
