//! Discrete PID controller with a first-order filtered derivative term.
//!
//! Ported from the Simulink-generated step function the machine was tuned
//! with, so the numeric behavior carries over unchanged: the filter
//! coefficient N tames derivative noise, and the integrator input is zeroed
//! only while the summed output is saturated in the same direction.

/// Stateful digital PID. Gains and output limits are fixed at construction;
/// `step` is the only mutator of the carried state.
pub struct DiscretePid {
    p_gain: f64,
    i_gain: f64,
    d_gain: f64,
    filter_coeff_n: f64,
    upper_limit: f64,
    lower_limit: f64,
    integrator_state: f64,
    filter_state: f64,
}

impl DiscretePid {
    pub fn new(
        p_gain: f64,
        i_gain: f64,
        d_gain: f64,
        filter_coeff_n: f64,
        upper_limit: f64,
        lower_limit: f64,
    ) -> Self {
        Self {
            p_gain,
            i_gain,
            d_gain,
            filter_coeff_n,
            upper_limit,
            lower_limit,
            integrator_state: 0.0,
            filter_state: 0.0,
        }
    }

    /// Advance the controller by one sample and return the clamped output.
    pub fn step(&mut self, error: f64, sample_time_s: f64) -> f64 {
        let n_prod_out = (error * self.d_gain - self.filter_state) * self.filter_coeff_n;
        let raw = error * self.p_gain + self.integrator_state + n_prod_out;

        let output = if raw > self.upper_limit {
            self.upper_limit
        } else if raw < self.lower_limit {
            self.lower_limit
        } else {
            raw
        };

        // Saturation-clamped integration: while the pre-clamp sum is pushing
        // past a limit and the integral term pushes the same way, the
        // integrator holds its value.
        let windup = raw - output;
        let mut i_prod = error * self.i_gain;
        if windup != 0.0 && sign(i_prod) == sign(windup) {
            i_prod = 0.0;
        }

        self.integrator_state += i_prod * sample_time_s;
        self.filter_state += n_prod_out * sample_time_s;

        output
    }

    /// Re-initialize the carried state, keeping the gains.
    pub fn reset(&mut self) {
        self.integrator_state = 0.0;
        self.filter_state = 0.0;
    }

    pub fn integrator_state(&self) -> f64 {
        self.integrator_state
    }

    pub fn filter_state(&self) -> f64 {
        self.filter_state
    }
}

fn sign(x: f64) -> f64 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}
