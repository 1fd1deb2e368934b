// Command name -> controller action table
//
// Bindings are registered once at startup. Actions receive the normalized
// value, or 1.0 (full scale) when the message carried none.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use crate::motor::{DriveControl, SteeringController};

/// Value handed to an action when the message has no `=<value>`
pub const DEFAULT_COMMAND_VALUE: f64 = 1.0;

pub type Action = Box<dyn Fn(f64) + Send + Sync>;

#[derive(Default)]
pub struct CommandDispatcher {
    actions: BTreeMap<String, Action>,
}

impl CommandDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `name` to `action`, replacing any earlier binding
    pub fn register(&mut self, name: &str, action: Action) {
        if self.actions.insert(name.to_string(), action).is_some() {
            debug!("Command {} rebound", name);
        }
    }

    /// Run the action bound to `name`. Returns false (and does nothing) for unknown names.
    pub fn dispatch(&self, name: &str, value: Option<f64>) -> bool {
        match self.actions.get(name) {
            Some(action) => {
                action(value.unwrap_or(DEFAULT_COMMAND_VALUE));
                true
            }
            None => false,
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.actions.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for CommandDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// The vehicle command set: four drive commands and four steering commands
pub fn vehicle_commands(drive: Arc<dyn DriveControl>, steering: Arc<SteeringController>) -> CommandDispatcher {
    let mut dispatcher = CommandDispatcher::new();

    let motor = Arc::clone(&drive);
    dispatcher.register("forward", Box::new(move |value| motor.forward(value)));
    let motor = Arc::clone(&drive);
    dispatcher.register("backward", Box::new(move |value| motor.backward(value)));
    let motor = Arc::clone(&drive);
    dispatcher.register("stop", Box::new(move |_| motor.stop()));
    let motor = drive;
    dispatcher.register("throttle", Box::new(move |value| motor.set_throttle(value)));

    let servo = Arc::clone(&steering);
    dispatcher.register("left", Box::new(move |value| servo.turn_left(value)));
    let servo = Arc::clone(&steering);
    dispatcher.register("right", Box::new(move |value| servo.turn_right(value)));
    let servo = Arc::clone(&steering);
    dispatcher.register("center", Box::new(move |_| servo.center()));
    let servo = steering;
    dispatcher.register("steering", Box::new(move |value| servo.set_steering(value)));

    dispatcher
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::motor::{SimActuator, SmoothedDrive};
    use std::sync::Mutex;

    fn controllers() -> (Arc<SmoothedDrive>, Arc<SteeringController>) {
        let config = RuntimeConfig::default();
        let drive = SmoothedDrive::start(
            Box::new(SimActuator::new()),
            config.motor.pins,
            config.motor_dynamics(),
        )
        .unwrap();
        let steering = SteeringController::start(
            Box::new(SimActuator::new()),
            config.steering.pwm_pin,
            config.steering_dynamics(),
        )
        .unwrap();
        (Arc::new(drive), Arc::new(steering))
    }

    #[test]
    fn test_missing_value_defaults_to_full_scale() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut dispatcher = CommandDispatcher::new();
        dispatcher.register("horn", Box::new(move |v| sink.lock().unwrap().push(v)));

        assert!(dispatcher.dispatch("horn", None));
        assert!(dispatcher.dispatch("horn", Some(-0.3)));
        assert_eq!(*seen.lock().unwrap(), vec![1.0, -0.3]);
    }

    #[test]
    fn test_vehicle_command_set() {
        let (drive, steering) = controllers();
        let dispatcher = vehicle_commands(drive.clone(), steering.clone());
        let names: Vec<_> = dispatcher.names().collect();
        assert_eq!(
            names,
            ["backward", "center", "forward", "left", "right", "steering", "stop", "throttle"]
        );
        drive.shutdown();
        steering.shutdown();
    }

    #[test]
    fn test_unknown_command_changes_nothing() {
        let (drive, steering) = controllers();
        let dispatcher = vehicle_commands(drive.clone(), steering.clone());
        dispatcher.dispatch("throttle", Some(-0.4));
        dispatcher.dispatch("left", Some(1.0));

        assert!(!dispatcher.dispatch("nonexistent_name", None));
        assert_eq!(drive.setpoint().target, -0.4);
        assert!((steering.setpoint().target + 0.1).abs() < 1e-12);
        drive.shutdown();
        steering.shutdown();
    }

    #[test]
    fn test_steering_value_clamped() {
        let (drive, steering) = controllers();
        let dispatcher = vehicle_commands(drive.clone(), steering.clone());

        assert!(dispatcher.dispatch("steering", Some(1.7)));
        assert_eq!(steering.setpoint().target, 1.0);

        assert!(dispatcher.dispatch("center", None));
        assert_eq!(steering.setpoint().target, 0.0);

        assert!(dispatcher.dispatch("forward", None));
        assert_eq!(drive.setpoint().target, 1.0);
        assert!(dispatcher.dispatch("stop", None));
        assert_eq!(drive.setpoint().target, 0.0);
        drive.shutdown();
        steering.shutdown();
    }
}
