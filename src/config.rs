// Defaults, runtime configuration snapshot and the hot-swappable store
//
// The store hands out immutable `Arc<RuntimeConfig>` snapshots. An update
// clones the current snapshot, applies one key, and swaps the Arc; readers
// never see a half-applied change.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::sync::lock;

// Listening endpoint
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;

// Motor H-bridge pins (BCM numbering)
pub const MOTOR_FORWARD_LEFT_PIN: u8 = 17;
pub const MOTOR_BACKWARD_LEFT_PIN: u8 = 27;
pub const MOTOR_FORWARD_RIGHT_PIN: u8 = 23;
pub const MOTOR_BACKWARD_RIGHT_PIN: u8 = 22;

// Staleness timeout for discrete drive, 0 disables it
pub const MOTOR_COMMAND_TIMEOUT_MS: u64 = 150;

// Wake period of the discrete drive loop
pub const DISCRETE_TICK_MS: u64 = 10;

// Steering servo
pub const STEERING_PWM_PIN: u8 = 18;
pub const STEERING_CENTER_ANGLE: i32 = 90;
pub const STEERING_LEFT_LIMIT: i32 = 20;
pub const STEERING_RIGHT_LIMIT: i32 = 20;
pub const STEERING_COMMAND_STEP: f64 = 0.1;

// Absolute servo travel and pulse widths (50 Hz frame)
pub const SERVO_MIN_ANGLE: i32 = 0;
pub const SERVO_MAX_ANGLE: i32 = 180;
pub const SERVO_MIN_PULSE_MS: f64 = 0.5;
pub const SERVO_MAX_PULSE_MS: f64 = 2.5;
pub const SERVO_PERIOD_MS: f64 = 20.0;

// Bounds applied when turning tunables into controller dynamics
pub const MIN_CONTROL_INTERVAL_MS: u64 = 5;
/// A loop asleep longer than this would miss `stop` and stall shutdown
pub const MAX_CONTROL_INTERVAL_MS: u64 = 1000;
pub const MIN_OUTPUT_LIMIT: f64 = 0.01;
pub const MAX_OUTPUT_LIMIT: f64 = 1.0;

/// Strategy used by the drive motors, fixed for the lifetime of the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum DriveMode {
    /// On/off H-bridge with a staleness timeout
    Discrete,
    /// Proportional throttle smoothed by PID
    #[default]
    Smoothed,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PidTuning {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    pub output_limit: f64,
    pub interval_ms: u64,
}

impl PidTuning {
    /// Interval and limit clamped so the loop always has a short positive period
    pub fn sanitized(&self) -> Self {
        Self {
            output_limit: self.output_limit.abs().clamp(MIN_OUTPUT_LIMIT, MAX_OUTPUT_LIMIT),
            interval_ms: self.interval_ms.clamp(MIN_CONTROL_INTERVAL_MS, MAX_CONTROL_INTERVAL_MS),
            ..*self
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotorPins {
    pub forward_left: u8,
    pub backward_left: u8,
    pub forward_right: u8,
    pub backward_right: u8,
}

impl Default for MotorPins {
    fn default() -> Self {
        Self {
            forward_left: MOTOR_FORWARD_LEFT_PIN,
            backward_left: MOTOR_BACKWARD_LEFT_PIN,
            forward_right: MOTOR_FORWARD_RIGHT_PIN,
            backward_right: MOTOR_BACKWARD_RIGHT_PIN,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotorConfig {
    pub pins: MotorPins,
    pub left_inverted: bool,
    pub right_inverted: bool,
    /// Staleness timeout of the discrete drive (`--drive-mode discrete`).
    /// The smoothed drive holds its target until told otherwise and ignores it.
    pub command_timeout_ms: u64,
    pub min_active_throttle: f64,
    pub pid: PidTuning,
}

impl Default for MotorConfig {
    fn default() -> Self {
        Self {
            pins: MotorPins::default(),
            left_inverted: false,
            right_inverted: true,
            command_timeout_ms: MOTOR_COMMAND_TIMEOUT_MS,
            min_active_throttle: 0.0,
            pid: PidTuning {
                kp: 2.5,
                ki: 0.0,
                kd: 0.35,
                output_limit: 0.15,
                interval_ms: 20,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SteeringConfig {
    pub pwm_pin: u8,
    pub sensitivity: f64,
    pub command_step: f64,
    pub center_angle: i32,
    pub left_limit_degrees: i32,
    pub right_limit_degrees: i32,
    pub pid: PidTuning,
}

impl Default for SteeringConfig {
    fn default() -> Self {
        Self {
            pwm_pin: STEERING_PWM_PIN,
            sensitivity: 1.0,
            command_step: STEERING_COMMAND_STEP,
            center_angle: STEERING_CENTER_ANGLE,
            left_limit_degrees: STEERING_LEFT_LIMIT,
            right_limit_degrees: STEERING_RIGHT_LIMIT,
            pid: PidTuning {
                kp: 3.0,
                ki: 0.0,
                kd: 0.45,
                output_limit: 0.2,
                interval_ms: 20,
            },
        }
    }
}

/// Complete set of tunables, read through immutable snapshots
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub motor: MotorConfig,
    pub steering: SteeringConfig,
}

/// Dynamics handed to a drive controller
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotorDynamics {
    pub invert_left: bool,
    pub invert_right: bool,
    pub timeout_ms: u64,
    pub min_active_throttle: f64,
    pub pid: PidTuning,
}

/// Dynamics handed to the steering controller
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SteeringDynamics {
    pub pid: PidTuning,
    pub sensitivity: f64,
    pub command_step: f64,
    pub center_angle: i32,
    pub left_range: i32,
    pub right_range: i32,
}

impl RuntimeConfig {
    pub fn motor_dynamics(&self) -> MotorDynamics {
        MotorDynamics {
            invert_left: self.motor.left_inverted,
            invert_right: self.motor.right_inverted,
            timeout_ms: self.motor.command_timeout_ms,
            min_active_throttle: self.motor.min_active_throttle.clamp(0.0, 1.0),
            pid: self.motor.pid.sanitized(),
        }
    }

    pub fn steering_dynamics(&self) -> SteeringDynamics {
        SteeringDynamics {
            pid: self.steering.pid.sanitized(),
            sensitivity: self.steering.sensitivity,
            command_step: self.steering.command_step.min(1.0),
            center_angle: self.steering.center_angle,
            left_range: self.steering.left_limit_degrees,
            right_range: self.steering.right_limit_degrees,
        }
    }

    /// Log the whole snapshot as one JSON line
    pub fn log_effective(&self) {
        match serde_json::to_string(self) {
            Ok(json) => info!(config = %json, "Effective configuration"),
            Err(e) => warn!("Failed to serialize configuration: {}", e),
        }
    }
}

/// Why a configuration update was refused. The previous snapshot stays active.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigRejected {
    #[error("unknown configuration key: {0}")]
    UnknownKey(String),

    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: String, value: String },
}

/// Source of configuration snapshots and sink for remote updates
pub trait ConfigurationProvider: Send + Sync {
    fn snapshot(&self) -> Arc<RuntimeConfig>;

    /// Apply one `key=value` atomically and return the new snapshot
    fn on_update(&self, key: &str, value: &str) -> Result<Arc<RuntimeConfig>, ConfigRejected>;
}

/// Implemented by anything that swaps its dynamics in place after an update
pub trait Reconfigure: Send + Sync {
    fn reconfigure(&self, config: &RuntimeConfig);
}

/// Explicitly constructed configuration store
#[derive(Debug, Default)]
pub struct ConfigStore {
    current: Mutex<Arc<RuntimeConfig>>,
}

impl ConfigStore {
    pub fn new(initial: RuntimeConfig) -> Self {
        Self {
            current: Mutex::new(Arc::new(initial)),
        }
    }
}

impl ConfigurationProvider for ConfigStore {
    fn snapshot(&self) -> Arc<RuntimeConfig> {
        lock(&self.current).clone()
    }

    fn on_update(&self, key: &str, value: &str) -> Result<Arc<RuntimeConfig>, ConfigRejected> {
        let mut current = lock(&self.current);
        let mut next = RuntimeConfig::clone(&current);
        apply_setting(&mut next, key.trim(), value.trim())?;

        let next = Arc::new(next);
        *current = Arc::clone(&next);
        info!(key = %key.trim(), value = %value.trim(), "Configuration updated");
        Ok(next)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Setting {
    MotorForwardLeftPin,
    MotorBackwardLeftPin,
    MotorForwardRightPin,
    MotorBackwardRightPin,
    MotorLeftInverted,
    MotorRightInverted,
    MotorCommandTimeout,
    MotorMinActiveThrottle,
    MotorKp,
    MotorKi,
    MotorKd,
    MotorOutputLimit,
    MotorInterval,
    SteeringPwmPin,
    SteeringSensitivity,
    SteeringCommandStep,
    SteeringCenterAngle,
    SteeringLeftLimit,
    SteeringRightLimit,
    SteeringKp,
    SteeringKi,
    SteeringKd,
    SteeringOutputLimit,
    SteeringInterval,
}

// (dotted key, legacy env-style key)
const SETTINGS: &[(&str, &str, Setting)] = &[
    ("motor.forward_left_pin", "MOTOR_FORWARD_LEFT_PIN", Setting::MotorForwardLeftPin),
    ("motor.backward_left_pin", "MOTOR_BACKWARD_LEFT_PIN", Setting::MotorBackwardLeftPin),
    ("motor.forward_right_pin", "MOTOR_FORWARD_RIGHT_PIN", Setting::MotorForwardRightPin),
    ("motor.backward_right_pin", "MOTOR_BACKWARD_RIGHT_PIN", Setting::MotorBackwardRightPin),
    ("motor.left_inverted", "MOTOR_LEFT_INVERTED", Setting::MotorLeftInverted),
    ("motor.right_inverted", "MOTOR_RIGHT_INVERTED", Setting::MotorRightInverted),
    ("motor.command_timeout_ms", "MOTOR_COMMAND_TIMEOUT_MS", Setting::MotorCommandTimeout),
    ("motor.min_active_throttle", "MOTOR_MIN_ACTIVE_THROTTLE", Setting::MotorMinActiveThrottle),
    ("motor.pid.kp", "MOTOR_PID_KP", Setting::MotorKp),
    ("motor.pid.ki", "MOTOR_PID_KI", Setting::MotorKi),
    ("motor.pid.kd", "MOTOR_PID_KD", Setting::MotorKd),
    ("motor.pid.output_limit", "MOTOR_PID_OUTPUT_LIMIT", Setting::MotorOutputLimit),
    ("motor.pid.interval_ms", "MOTOR_PID_INTERVAL_MS", Setting::MotorInterval),
    ("steering.pwm_pin", "STEERING_PWM_PIN", Setting::SteeringPwmPin),
    ("steering.sensitivity", "STEERING_SENSITIVITY", Setting::SteeringSensitivity),
    ("steering.command_step", "STEERING_COMMAND_STEP", Setting::SteeringCommandStep),
    ("steering.center_angle", "STEERING_CENTER_ANGLE", Setting::SteeringCenterAngle),
    ("steering.left_limit_degrees", "STEERING_LEFT_LIMIT_DEGREES", Setting::SteeringLeftLimit),
    ("steering.right_limit_degrees", "STEERING_RIGHT_LIMIT_DEGREES", Setting::SteeringRightLimit),
    ("steering.pid.kp", "STEERING_PID_KP", Setting::SteeringKp),
    ("steering.pid.ki", "STEERING_PID_KI", Setting::SteeringKi),
    ("steering.pid.kd", "STEERING_PID_KD", Setting::SteeringKd),
    ("steering.pid.output_limit", "STEERING_PID_OUTPUT_LIMIT", Setting::SteeringOutputLimit),
    ("steering.pid.interval_ms", "STEERING_PID_INTERVAL_MS", Setting::SteeringInterval),
];

fn lookup(key: &str) -> Option<Setting> {
    SETTINGS
        .iter()
        .find(|(dotted, legacy, _)| key.eq_ignore_ascii_case(dotted) || key.eq_ignore_ascii_case(legacy))
        .map(|&(_, _, setting)| setting)
}

/// Apply a single setting to `config`, leaving it untouched on error
pub fn apply_setting(config: &mut RuntimeConfig, key: &str, value: &str) -> Result<(), ConfigRejected> {
    let setting = lookup(key).ok_or_else(|| ConfigRejected::UnknownKey(key.to_string()))?;
    let invalid = || ConfigRejected::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    };

    let motor = &mut config.motor;
    let steering = &mut config.steering;

    match setting {
        Setting::MotorForwardLeftPin => motor.pins.forward_left = parse_pin(value).ok_or_else(invalid)?,
        Setting::MotorBackwardLeftPin => motor.pins.backward_left = parse_pin(value).ok_or_else(invalid)?,
        Setting::MotorForwardRightPin => motor.pins.forward_right = parse_pin(value).ok_or_else(invalid)?,
        Setting::MotorBackwardRightPin => motor.pins.backward_right = parse_pin(value).ok_or_else(invalid)?,
        Setting::MotorLeftInverted => motor.left_inverted = parse_bool(value).ok_or_else(invalid)?,
        Setting::MotorRightInverted => motor.right_inverted = parse_bool(value).ok_or_else(invalid)?,
        Setting::MotorCommandTimeout => motor.command_timeout_ms = value.parse().map_err(|_| invalid())?,
        Setting::MotorMinActiveThrottle => {
            motor.min_active_throttle = parse_f64(value)
                .filter(|v| (0.0..=1.0).contains(v))
                .ok_or_else(invalid)?
        }
        Setting::MotorKp => motor.pid.kp = parse_f64(value).ok_or_else(invalid)?,
        Setting::MotorKi => motor.pid.ki = parse_f64(value).ok_or_else(invalid)?,
        Setting::MotorKd => motor.pid.kd = parse_f64(value).ok_or_else(invalid)?,
        Setting::MotorOutputLimit => motor.pid.output_limit = parse_positive(value).ok_or_else(invalid)?,
        Setting::MotorInterval => motor.pid.interval_ms = parse_interval(value).ok_or_else(invalid)?,
        Setting::SteeringPwmPin => steering.pwm_pin = parse_pin(value).ok_or_else(invalid)?,
        Setting::SteeringSensitivity => steering.sensitivity = parse_positive(value).ok_or_else(invalid)?,
        Setting::SteeringCommandStep => {
            steering.command_step = parse_positive(value).ok_or_else(invalid)?.min(1.0)
        }
        Setting::SteeringCenterAngle => {
            steering.center_angle = value
                .parse::<i32>()
                .ok()
                .filter(|angle| (SERVO_MIN_ANGLE..=SERVO_MAX_ANGLE).contains(angle))
                .ok_or_else(invalid)?
        }
        Setting::SteeringLeftLimit => steering.left_limit_degrees = parse_range(value).ok_or_else(invalid)?,
        Setting::SteeringRightLimit => steering.right_limit_degrees = parse_range(value).ok_or_else(invalid)?,
        Setting::SteeringKp => steering.pid.kp = parse_f64(value).ok_or_else(invalid)?,
        Setting::SteeringKi => steering.pid.ki = parse_f64(value).ok_or_else(invalid)?,
        Setting::SteeringKd => steering.pid.kd = parse_f64(value).ok_or_else(invalid)?,
        Setting::SteeringOutputLimit => steering.pid.output_limit = parse_positive(value).ok_or_else(invalid)?,
        Setting::SteeringInterval => steering.pid.interval_ms = parse_interval(value).ok_or_else(invalid)?,
    }

    Ok(())
}

fn parse_f64(value: &str) -> Option<f64> {
    value.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn parse_positive(value: &str) -> Option<f64> {
    parse_f64(value).filter(|v| *v > 0.0)
}

fn parse_pin(value: &str) -> Option<u8> {
    value.parse().ok()
}

fn parse_interval(value: &str) -> Option<u64> {
    value
        .parse()
        .ok()
        .filter(|ms| (1..=MAX_CONTROL_INTERVAL_MS).contains(ms))
}

fn parse_range(value: &str) -> Option<i32> {
    value.parse().ok().filter(|deg| *deg >= 0)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.motor.pins.forward_left, 17);
        assert!(config.motor.right_inverted);
        assert_eq!(config.motor.command_timeout_ms, 150);
        assert_eq!(config.steering.center_angle, 90);
        assert_eq!(config.steering.pwm_pin, 18);
    }

    #[test]
    fn test_update_swaps_snapshot() {
        let store = ConfigStore::default();
        let before = store.snapshot();

        let after = store.on_update("steering.sensitivity", "1.2").unwrap();
        assert_eq!(after.steering.sensitivity, 1.2);
        assert_eq!(store.snapshot().steering.sensitivity, 1.2);
        // Old snapshot is never mutated in place
        assert_eq!(before.steering.sensitivity, 1.0);
    }

    #[test]
    fn test_keys_are_case_insensitive_with_legacy_aliases() {
        let store = ConfigStore::default();
        store.on_update("STEERING_COMMAND_STEP", "0.25").unwrap();
        store.on_update("Motor.Left_Inverted", "yes").unwrap();
        store.on_update("motor_pid_kp", "1.5").unwrap();

        let config = store.snapshot();
        assert_eq!(config.steering.command_step, 0.25);
        assert!(config.motor.left_inverted);
        assert_eq!(config.motor.pid.kp, 1.5);
    }

    #[test]
    fn test_rejected_update_keeps_previous() {
        let store = ConfigStore::default();
        let before = store.snapshot();

        assert_eq!(
            store.on_update("steering.bogus", "1"),
            Err(ConfigRejected::UnknownKey("steering.bogus".to_string()))
        );
        assert!(matches!(
            store.on_update("steering.sensitivity", "-1"),
            Err(ConfigRejected::InvalidValue { .. })
        ));
        assert!(store.on_update("steering.center_angle", "200").is_err());
        assert!(store.on_update("motor.command_timeout_ms", "-5").is_err());
        assert!(store.on_update("motor.right_inverted", "maybe").is_err());
        assert!(store.on_update("motor.pid.kp", "NaN").is_err());
        assert!(store.on_update("steering.pid.interval_ms", "0").is_err());

        assert_eq!(*store.snapshot(), *before);
    }

    #[test]
    fn test_interval_beyond_bound_rejected() {
        let store = ConfigStore::default();
        let before = store.snapshot();

        for key in ["motor.pid.interval_ms", "steering.pid.interval_ms"] {
            assert_eq!(
                store.on_update(key, "3000000"),
                Err(ConfigRejected::InvalidValue {
                    key: key.to_string(),
                    value: "3000000".to_string(),
                })
            );
        }
        assert!(store.on_update("motor.pid.interval_ms", "1001").is_err());
        assert_eq!(*store.snapshot(), *before);

        let accepted = store.on_update("motor.pid.interval_ms", "1000").unwrap();
        assert_eq!(accepted.motor.pid.interval_ms, MAX_CONTROL_INTERVAL_MS);
    }

    #[test]
    fn test_command_step_capped() {
        let store = ConfigStore::default();
        store.on_update("steering.command_step", "3").unwrap();
        assert_eq!(store.snapshot().steering.command_step, 1.0);
    }

    #[test]
    fn test_dynamics_are_sanitized() {
        let mut config = RuntimeConfig::default();
        config.motor.pid.interval_ms = 1;
        config.motor.pid.output_limit = 5.0;
        config.steering.pid.output_limit = 0.0001;

        let motor = config.motor_dynamics();
        assert_eq!(motor.pid.interval_ms, MIN_CONTROL_INTERVAL_MS);
        assert_eq!(motor.pid.output_limit, MAX_OUTPUT_LIMIT);
        assert_eq!(config.steering_dynamics().pid.output_limit, MIN_OUTPUT_LIMIT);

        config.steering.pid.interval_ms = 3_000_000;
        assert_eq!(config.steering_dynamics().pid.interval_ms, MAX_CONTROL_INTERVAL_MS);
    }

    #[test]
    fn test_snapshot_serializes() {
        let json = serde_json::to_string(&RuntimeConfig::default()).unwrap();
        assert!(json.contains("\"command_timeout_ms\":150"));
        let back: RuntimeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, RuntimeConfig::default());
    }
}
