// Normalized setpoint shared by the controllers and the smoothing step

use crate::pid::PidController;

/// Lower/upper bound of every normalized actuator value
pub const NORMALIZED_MIN: f64 = -1.0;
pub const NORMALIZED_MAX: f64 = 1.0;

/// Target written by commands, current written by the control loop
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Setpoint {
    pub target: f64,
    pub current: f64,
}

impl Setpoint {
    pub fn is_converged(&self) -> bool {
        self.target == self.current
    }
}

/// Clamp to `[-1, 1]`; `None` for NaN/inf so callers can ignore the command
pub fn normalize(value: f64) -> Option<f64> {
    value.is_finite().then(|| value.clamp(NORMALIZED_MIN, NORMALIZED_MAX))
}

/// Advance `current` one tick toward `target`.
///
/// The PID correction is clamped to `±limit`. A correction pointing away
/// from the target (integral wind-up) is replaced by the clamped raw
/// difference, and a step never carries `current` past `target`.
pub fn smooth_toward(pid: &mut PidController, target: f64, current: f64, dt: f64, limit: f64) -> f64 {
    let diff = target - current;
    let mut delta = pid.compute(target, current, dt).clamp(-limit, limit);

    if delta * diff < 0.0 {
        delta = diff.clamp(-limit, limit);
    }
    if delta.abs() > diff.abs() {
        delta = diff;
    }

    (current + delta).clamp(NORMALIZED_MIN, NORMALIZED_MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(1.7), Some(1.0));
        assert_eq!(normalize(-3.0), Some(-1.0));
        assert_eq!(normalize(0.25), Some(0.25));
        assert_eq!(normalize(f64::NAN), None);
        assert_eq!(normalize(f64::NEG_INFINITY), None);
    }

    #[test]
    fn test_step_limited_by_output_limit() {
        let mut pid = PidController::new(10.0, 0.0, 0.0);
        pid.set_output_limits(-1.0, 1.0);
        let next = smooth_toward(&mut pid, 1.0, 0.0, 0.02, 0.15);
        assert!((next - 0.15).abs() < 1e-12);
    }

    #[test]
    fn test_wrong_sign_replaced_by_raw_difference() {
        // Large derivative kick pointing away from the target
        let mut pid = PidController::new(0.1, 0.0, 5.0);
        pid.compute(1.0, 0.0, 0.02);
        let next = smooth_toward(&mut pid, 1.0, 0.9, 0.02, 0.2);
        assert!((next - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_never_overshoots_target() {
        let mut pid = PidController::new(2.5, 0.0, 0.0);
        let next = smooth_toward(&mut pid, 0.05, 0.0, 0.02, 0.5);
        assert_eq!(next, 0.05);
    }

    #[test]
    fn test_converges_with_default_style_gains() {
        let mut pid = PidController::new(3.0, 0.0, 0.45);
        pid.set_output_limits(-0.2, 0.2);
        let target = -0.73;
        let mut current = 0.4;
        for _ in 0..200 {
            let next = smooth_toward(&mut pid, target, current, 0.02, 0.2);
            assert!((next - current).abs() <= 0.2 + 1e-12);
            assert!((-1.0..=1.0).contains(&next));
            current = next;
        }
        assert!((current - target).abs() < 1e-9);
    }

    #[test]
    fn test_retargeting_mid_ramp_stays_rate_limited() {
        let mut pid = PidController::new(3.0, 0.0, 0.45);
        pid.set_output_limits(-0.2, 0.2);
        let mut current = 0.0;

        // Short holds switch target before the ramp finishes, long ones settle
        for (target, ticks) in [(0.9, 3), (-0.6, 200), (1.0, 2), (-1.0, 200), (0.35, 200), (0.0, 200)] {
            for _ in 0..ticks {
                let next = smooth_toward(&mut pid, target, current, 0.02, 0.2);
                assert!((next - current).abs() <= 0.2 + 1e-12, "{current} -> {next} toward {target}");
                assert!((-1.0..=1.0).contains(&next));
                current = next;
            }
            if ticks > 10 {
                assert!((current - target).abs() < 1e-9, "stuck at {current} toward {target}");
            }
        }
    }

    #[test]
    fn test_invalid_dt_holds_position() {
        let mut pid = PidController::new(1.0, 0.0, 0.0);
        assert_eq!(smooth_toward(&mut pid, 1.0, 0.3, 0.0, 0.2), 0.3);
    }
}
