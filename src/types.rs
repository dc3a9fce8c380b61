use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoopState {
    Stopped,
    Running,
    ShuttingDown,
}

/// Runtime-mutable controller configuration, persisted through a
/// [`ConfigStore`](crate::storage::ConfigStore).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    pub brew_setpoint_c: f32,
    pub steam_setpoint_c: f32,
    /// Zero or negative disables the shot-time limiter.
    pub shot_time_limit_s: f32,
    /// Bias added to the PID output while brewing below target.
    pub feedforward_compensation: f32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            brew_setpoint_c: DEFAULT_BREW_SETPOINT_C,
            steam_setpoint_c: DEFAULT_STEAM_SETPOINT_C,
            shot_time_limit_s: 0.0,
            feedforward_compensation: DEFAULT_FEEDFORWARD_COMPENSATION,
        }
    }
}

/// One completed control sample. Built once per accepted sample and handed
/// to the telemetry transport; the control loop keeps no reference to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleRecord {
    pub sample_index: u32,
    pub temperature_c: f32,
    pub steaming_active: bool,
    pub brewing_active: bool,
    /// Clamped 0..=1, as computed before the over-temperature override.
    pub control_output: f32,
    pub setpoint_c: f32,
    pub shot_duration_s: f32,
    pub timestamp_ms: i64,
}

/// Minimum time between successive control computations.
pub const SAMPLING_INTERVAL_S: f64 = 0.5;
pub const SAMPLING_INTERVAL_MS: u64 = 500;
/// Fast polling period; pump-follow reacts at this rate.
pub const POLL_PERIOD_MS: u64 = 10;

pub const PID_P_GAIN: f64 = 0.046;
pub const PID_I_GAIN: f64 = 0.0018;
pub const PID_D_GAIN: f64 = -0.0030;
pub const PID_FILTER_COEFF_N: f64 = 3.168544;
pub const OUTPUT_UPPER_LIMIT: f64 = 1.0;
pub const OUTPUT_LOWER_LIMIT: f64 = 0.0;

pub const DEFAULT_BREW_SETPOINT_C: f32 = 94.0;
pub const DEFAULT_STEAM_SETPOINT_C: f32 = 150.0;
pub const DEFAULT_FEEDFORWARD_COMPENSATION: f32 = 0.14;

pub const BREW_SETPOINT_MIN_C: f32 = 70.0;
pub const BREW_SETPOINT_MAX_C: f32 = 100.0;
pub const STEAM_SETPOINT_MIN_C: f32 = 110.0;
pub const STEAM_SETPOINT_MAX_C: f32 = 165.0;
pub const SHOT_TIME_LIMIT_MAX_S: f32 = 50.0;
pub const FEEDFORWARD_MAX: f32 = 0.3;

/// Feedforward is only added while the boiler is still below
/// setpoint + this margin.
pub const FEEDFORWARD_WINDOW_C: f32 = 6.0;
/// Hard ceiling; the heater is forced off above this regardless of the
/// computed output.
pub const MAX_BOILER_TEMP_C: f32 = 175.0;
/// Consecutive failed sensor reads tolerated before the fault is fatal.
pub const MAX_CONSECUTIVE_SENSOR_FAILURES: u32 = 10;
/// Direct-drive mode zeroes the heater when no duty command has arrived
/// within this window.
pub const COMMAND_TIMEOUT_S: u64 = 3;
