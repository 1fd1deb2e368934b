// Actuator collaborator interface
//
// Physical GPIO/PWM driving lives behind this trait. Controllers only ever
// talk to the trait, so a real pin driver and the simulator are
// interchangeable.

/// Logic level of a digital output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

impl From<bool> for Level {
    fn from(high: bool) -> Self {
        if high { Level::High } else { Level::Low }
    }
}

/// Pins an actuator must bring up before any control loop starts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PinSpec {
    pub digital: Vec<u8>,
    pub pwm: Vec<u8>,
}

impl PinSpec {
    pub fn digital(pins: &[u8]) -> Self {
        Self {
            digital: pins.to_vec(),
            pwm: Vec::new(),
        }
    }

    pub fn pwm(pins: &[u8]) -> Self {
        Self {
            digital: Vec::new(),
            pwm: pins.to_vec(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ActuatorError {
    #[error("Failed to configure pin {pin}: {reason}")]
    Configure { pin: u8, reason: String },

    #[error("Write to pin {pin} failed: {reason}")]
    Write { pin: u8, reason: String },
}

/// Hardware output device driven once per channel per control tick.
///
/// Writes must be non-blocking and fast; the controller loops call them
/// without holding any lock.
pub trait Actuator: Send {
    /// Bring up the given pins. Failure here is fatal for the process.
    fn configure(&mut self, pins: &PinSpec) -> Result<(), ActuatorError>;

    fn write_digital(&mut self, pin: u8, level: Level) -> Result<(), ActuatorError>;

    /// Write a duty cycle in `[0, 1]`
    fn write_pwm(&mut self, pin: u8, duty: f64) -> Result<(), ActuatorError>;
}
