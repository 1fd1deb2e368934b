// Fixed-period control loop thread
//
// The task (and with it the actuator) moves into the loop thread and comes
// back out through the join handle, so the neutral write on teardown happens
// strictly after the loop has stopped touching the hardware.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{error, info};

use super::actuator::ActuatorError;
use crate::sync::lock;

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("Actuator bring-up failed: {0}")]
    Actuator(#[from] ActuatorError),

    #[error("Failed to spawn control loop: {0}")]
    Spawn(#[from] std::io::Error),
}

/// One controller's periodic work
pub trait ControlTask: Send + 'static {
    /// Sleep before the next iteration, re-read every cycle so it can be hot-swapped
    fn period(&self) -> Duration;

    /// Run one iteration; `dt` is the wall-clock time since the previous one
    fn step(&mut self, dt: Duration);

    /// Drive the actuator to its safe idle state
    fn neutralize(&mut self);
}

/// Handle to a running loop thread
pub struct ControlLoop<T: ControlTask> {
    name: String,
    running: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<T>>>,
}

impl<T: ControlTask> ControlLoop<T> {
    pub fn spawn(name: &str, mut task: T) -> std::io::Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);

        let handle = thread::Builder::new().name(name.to_string()).spawn(move || {
            let mut previous = Instant::now();
            while flag.load(Ordering::Acquire) {
                thread::sleep(task.period());

                let now = Instant::now();
                let dt = now - previous;
                previous = now;

                task.step(dt);
            }
            task
        })?;

        info!("{} loop started", name);
        Ok(Self {
            name: name.to_string(),
            running,
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Signal, join, then neutralize exactly once. Later calls are no-ops.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);

        let Some(handle) = lock(&self.handle).take() else {
            return;
        };

        match handle.join() {
            Ok(mut task) => {
                task.neutralize();
                info!("{} loop stopped", self.name);
            }
            Err(_) => error!("{} loop panicked; actuator state unknown", self.name),
        }
    }
}

impl<T: ControlTask> Drop for ControlLoop<T> {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Counter {
        steps: Arc<AtomicUsize>,
        neutralized: Arc<AtomicUsize>,
    }

    impl ControlTask for Counter {
        fn period(&self) -> Duration {
            Duration::from_millis(2)
        }

        fn step(&mut self, dt: Duration) {
            assert!(dt > Duration::ZERO);
            self.steps.fetch_add(1, Ordering::SeqCst);
        }

        fn neutralize(&mut self) {
            self.neutralized.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_stop_joins_then_neutralizes_once() {
        let steps = Arc::new(AtomicUsize::new(0));
        let neutralized = Arc::new(AtomicUsize::new(0));
        let control = ControlLoop::spawn(
            "test",
            Counter {
                steps: Arc::clone(&steps),
                neutralized: Arc::clone(&neutralized),
            },
        )
        .unwrap();

        thread::sleep(Duration::from_millis(50));
        assert!(control.is_running());
        control.stop();
        let after_stop = steps.load(Ordering::SeqCst);
        assert!(after_stop > 0);
        assert_eq!(neutralized.load(Ordering::SeqCst), 1);

        // No more steps once joined, and a second stop (plus drop) is a no-op
        thread::sleep(Duration::from_millis(20));
        control.stop();
        drop(control);
        assert_eq!(steps.load(Ordering::SeqCst), after_stop);
        assert_eq!(neutralized.load(Ordering::SeqCst), 1);
    }
}
