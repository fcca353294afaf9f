/// A scalar PID controller with resettable gains, one instance per axis.
///
/// The correction pipeline negates the controller's output: a positive
/// measured shift must produce a negative correction to oppose it.
#[derive(Debug, Clone, Copy)]
pub struct Pid {
    kp: f64,
    ki: f64,
    kd: f64,
    setpoint: f64,
    integral: f64,
    previous_error: Option<f64>,
}

impl Pid {
    pub fn new(kp: f64, ki: f64, kd: f64, setpoint: f64) -> Self {
        Self { kp, ki, kd, setpoint, integral: 0.0, previous_error: None }
    }

    /// Re-initialises gains and setpoint and clears accumulated state. Used
    /// both when stabilisation is first reached (configured gains) and
    /// while re-attempting stabilisation (pure proportional).
    pub fn reset(&mut self, kp: f64, ki: f64, kd: f64, setpoint: f64) {
        self.kp = kp;
        self.ki = ki;
        self.kd = kd;
        self.setpoint = setpoint;
        self.integral = 0.0;
        self.previous_error = None;
    }

    pub fn update(&mut self, measurement: f64) -> f64 {
        // error tracks the measurement itself (not setpoint - measurement):
        // the single negation that opposes the offset happens once, in the
        // correction pipeline's step 5, not here.
        let error = measurement - self.setpoint;
        self.integral += error;
        let derivative = match self.previous_error {
            Some(previous) => error - previous,
            None => 0.0,
        };
        self.previous_error = Some(error);
        self.kp * error + self.ki * self.integral + self.kd * derivative
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pure_proportional_tracks_the_measurement() {
        let mut pid = Pid::new(1.0, 0.0, 0.0, 0.0);
        let output = pid.update(1.2);
        assert!((output - 1.2).abs() < 1e-9);
    }

    #[test]
    fn reset_clears_integral_history() {
        let mut pid = Pid::new(1.0, 1.0, 0.0, 0.0);
        pid.update(5.0);
        pid.reset(1.0, 0.0, 0.0, 0.0);
        let output = pid.update(2.0);
        assert!((output - 2.0).abs() < 1e-9);
    }
}
