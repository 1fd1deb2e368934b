// In-process actuator that records every write
//
// Used when no pin driver is attached (development, CI) and by the tests to
// observe what the control loops actually put on the pins.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use super::actuator::{Actuator, ActuatorError, Level, PinSpec};
use crate::sync::lock;

#[derive(Debug, Default)]
struct Board {
    configured: HashSet<u8>,
    digital: HashMap<u8, Level>,
    pwm: HashMap<u8, f64>,
    writes: HashMap<u8, usize>,
}

/// Simulated pin bank. Clones share the same board.
#[derive(Debug, Clone, Default)]
pub struct SimActuator {
    board: Arc<Mutex<Board>>,
    reject_configure: bool,
}

impl SimActuator {
    pub fn new() -> Self {
        Self::default()
    }

    /// An actuator whose bring-up always fails
    pub fn failing() -> Self {
        Self {
            reject_configure: true,
            ..Self::default()
        }
    }

    /// Read-only view onto the same board
    pub fn probe(&self) -> SimProbe {
        SimProbe {
            board: Arc::clone(&self.board),
        }
    }

    fn board(&self) -> MutexGuard<'_, Board> {
        lock(&self.board)
    }

    fn check_configured(board: &Board, pin: u8) -> Result<(), ActuatorError> {
        if board.configured.contains(&pin) {
            Ok(())
        } else {
            Err(ActuatorError::Write {
                pin,
                reason: "pin not configured".to_string(),
            })
        }
    }
}

impl Actuator for SimActuator {
    fn configure(&mut self, pins: &PinSpec) -> Result<(), ActuatorError> {
        if self.reject_configure {
            let pin = pins.digital.iter().chain(&pins.pwm).copied().next().unwrap_or(0);
            return Err(ActuatorError::Configure {
                pin,
                reason: "simulated bring-up failure".to_string(),
            });
        }

        let mut board = self.board();
        for &pin in &pins.digital {
            board.configured.insert(pin);
            board.digital.insert(pin, Level::Low);
        }
        for &pin in &pins.pwm {
            board.configured.insert(pin);
            board.pwm.insert(pin, 0.0);
        }
        debug!("Sim pins configured: {:?}", pins);
        Ok(())
    }

    fn write_digital(&mut self, pin: u8, level: Level) -> Result<(), ActuatorError> {
        let mut board = self.board();
        Self::check_configured(&board, pin)?;
        board.digital.insert(pin, level);
        *board.writes.entry(pin).or_default() += 1;
        Ok(())
    }

    fn write_pwm(&mut self, pin: u8, duty: f64) -> Result<(), ActuatorError> {
        let mut board = self.board();
        Self::check_configured(&board, pin)?;
        board.pwm.insert(pin, duty.clamp(0.0, 1.0));
        *board.writes.entry(pin).or_default() += 1;
        Ok(())
    }
}

/// Observer for a [`SimActuator`] board
#[derive(Debug, Clone)]
pub struct SimProbe {
    board: Arc<Mutex<Board>>,
}

impl SimProbe {
    fn board(&self) -> MutexGuard<'_, Board> {
        lock(&self.board)
    }

    pub fn is_configured(&self, pin: u8) -> bool {
        self.board().configured.contains(&pin)
    }

    pub fn digital(&self, pin: u8) -> Option<Level> {
        self.board().digital.get(&pin).copied()
    }

    pub fn pwm(&self, pin: u8) -> Option<f64> {
        self.board().pwm.get(&pin).copied()
    }

    /// Number of writes (digital or PWM) seen on `pin` since bring-up
    pub fn writes(&self, pin: u8) -> usize {
        self.board().writes.get(&pin).copied().unwrap_or(0)
    }
}
