// PID engine shared by the smoothed controllers
//
// Each controller loop owns one instance; nothing here is thread-aware.

const DEFAULT_OUTPUT_LIMITS: (f64, f64) = (-1.0, 1.0);
const DEFAULT_INTEGRAL_LIMITS: (f64, f64) = (-1.0, 1.0);

/// Proportional-integral-derivative corrective function
#[derive(Debug, Clone)]
pub struct PidController {
    kp: f64,
    ki: f64,
    kd: f64,
    output_min: f64,
    output_max: f64,
    integral_min: f64,
    integral_max: f64,
    integral: f64,
    previous_error: f64,
    has_previous_error: bool,
}

impl Default for PidController {
    fn default() -> Self {
        Self {
            kp: 0.0,
            ki: 0.0,
            kd: 0.0,
            output_min: DEFAULT_OUTPUT_LIMITS.0,
            output_max: DEFAULT_OUTPUT_LIMITS.1,
            integral_min: DEFAULT_INTEGRAL_LIMITS.0,
            integral_max: DEFAULT_INTEGRAL_LIMITS.1,
            integral: 0.0,
            previous_error: 0.0,
            has_previous_error: false,
        }
    }
}

impl PidController {
    pub fn new(kp: f64, ki: f64, kd: f64) -> Self {
        let mut pid = Self::default();
        pid.set_coefficients(kp, ki, kd);
        pid
    }

    /// Update gains. Non-finite gains are ignored individually.
    pub fn set_coefficients(&mut self, kp: f64, ki: f64, kd: f64) {
        if kp.is_finite() {
            self.kp = kp;
        }
        if ki.is_finite() {
            self.ki = ki;
        }
        if kd.is_finite() {
            self.kd = kd;
        }
    }

    /// Clamp the output to `[min, max]`. Swapped bounds are normalized.
    pub fn set_output_limits(&mut self, min: f64, max: f64) {
        if let Some((min, max)) = ordered_limits(min, max) {
            self.output_min = min;
            self.output_max = max;
        }
    }

    /// Clamp the accumulated integral to `[min, max]`. Swapped bounds are normalized.
    pub fn set_integral_limits(&mut self, min: f64, max: f64) {
        if let Some((min, max)) = ordered_limits(min, max) {
            self.integral_min = min;
            self.integral_max = max;
        }
    }

    /// Clear integral and derivative memory; gains and limits are kept
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.previous_error = 0.0;
        self.has_previous_error = false;
    }

    /// Compute the corrective output for one step.
    ///
    /// Returns `0.0` without touching internal state when `dt` is not a
    /// positive finite number of seconds.
    pub fn compute(&mut self, target: f64, measurement: f64, dt: f64) -> f64 {
        if !dt.is_finite() || dt <= 0.0 {
            return 0.0;
        }

        let error = target - measurement;
        self.integral = (self.integral + error * dt).clamp(self.integral_min, self.integral_max);

        let derivative = if self.has_previous_error {
            (error - self.previous_error) / dt
        } else {
            0.0
        };

        self.previous_error = error;
        self.has_previous_error = true;

        let output = self.kp * error + self.ki * self.integral + self.kd * derivative;
        output.clamp(self.output_min, self.output_max)
    }

    pub fn coefficients(&self) -> (f64, f64, f64) {
        (self.kp, self.ki, self.kd)
    }

    pub fn output_limits(&self) -> (f64, f64) {
        (self.output_min, self.output_max)
    }

    pub fn integral(&self) -> f64 {
        self.integral
    }
}

fn ordered_limits(a: f64, b: f64) -> Option<(f64, f64)> {
    if !a.is_finite() || !b.is_finite() {
        return None;
    }
    Some(if a > b { (b, a) } else { (a, b) })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proportional_only() {
        let mut pid = PidController::new(0.5, 0.0, 0.0);
        // error = 1.0 -> 0.5
        let out = pid.compute(1.0, 0.0, 0.02);
        assert!((out - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_output_clamped() {
        let mut pid = PidController::new(100.0, 0.0, 0.0);
        pid.set_output_limits(-0.2, 0.2);
        assert_eq!(pid.compute(1.0, 0.0, 0.01), 0.2);
        assert_eq!(pid.compute(-1.0, 0.0, 0.01), -0.2);
    }

    #[test]
    fn test_integral_clamped() {
        let mut pid = PidController::new(0.0, 1.0, 0.0);
        pid.set_integral_limits(-0.5, 0.5);
        for _ in 0..100 {
            pid.compute(1.0, 0.0, 0.1);
        }
        assert_eq!(pid.integral(), 0.5);
    }

    #[test]
    fn test_first_tick_has_no_derivative() {
        let mut pid = PidController::new(0.0, 0.0, 1.0);
        assert_eq!(pid.compute(1.0, 0.0, 0.1), 0.0);
        // error 1.0 -> 0.5 over 0.1s -> derivative -5, clamped to -1
        assert_eq!(pid.compute(1.0, 0.5, 0.1), -1.0);
    }

    #[test]
    fn test_invalid_dt_is_a_no_op() {
        let mut pid = PidController::new(1.0, 1.0, 1.0);
        assert_eq!(pid.compute(1.0, 0.0, 0.0), 0.0);
        assert_eq!(pid.compute(1.0, 0.0, -0.5), 0.0);
        assert_eq!(pid.compute(1.0, 0.0, f64::NAN), 0.0);
        assert_eq!(pid.compute(1.0, 0.0, f64::INFINITY), 0.0);
        assert_eq!(pid.integral(), 0.0);

        let mut fresh = PidController::new(1.0, 1.0, 1.0);
        assert_eq!(pid.compute(0.3, 0.0, 0.1), fresh.compute(0.3, 0.0, 0.1));
    }

    #[test]
    fn test_reset_keeps_coefficients() {
        let mut pid = PidController::new(0.2, 0.3, 0.4);
        pid.compute(1.0, 0.0, 0.1);
        pid.compute(1.0, 0.2, 0.1);
        pid.reset();
        assert_eq!(pid.integral(), 0.0);
        assert_eq!(pid.coefficients(), (0.2, 0.3, 0.4));

        let mut fresh = PidController::new(0.2, 0.3, 0.4);
        assert_eq!(pid.compute(0.5, 0.1, 0.1), fresh.compute(0.5, 0.1, 0.1));
    }

    #[test]
    fn test_limits_normalized_and_validated() {
        let mut pid = PidController::default();
        pid.set_output_limits(0.3, -0.3);
        assert_eq!(pid.output_limits(), (-0.3, 0.3));

        pid.set_output_limits(f64::NAN, 1.0);
        assert_eq!(pid.output_limits(), (-0.3, 0.3));

        pid.set_coefficients(f64::INFINITY, 2.0, f64::NAN);
        assert_eq!(pid.coefficients(), (0.0, 2.0, 0.0));
    }
}
