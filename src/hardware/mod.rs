//! Hardware abstraction for the boiler controller.
//!
//! The control loop only ever talks to a [`BoilerBoard`]; the real machine
//! wiring (MAX31855 thermocouple over SPI, active-low panel switches, PWM
//! heater SSR, pump relay) lives behind it.

pub mod sim;

use log::warn;

pub use sim::SimulatedBoiler;

/// Thermocouple read errors, as reported by the MAX31855 fault bits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SensorError {
    OpenCircuit,
    ShortToGround,
    ShortToVcc,
    Bus(String),
}

impl std::fmt::Display for SensorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SensorError::OpenCircuit => write!(f, "thermocouple open circuit"),
            SensorError::ShortToGround => write!(f, "thermocouple shorted to GND"),
            SensorError::ShortToVcc => write!(f, "thermocouple shorted to VCC"),
            SensorError::Bus(msg) => write!(f, "sensor bus error: {}", msg),
        }
    }
}

impl std::error::Error for SensorError {}

#[derive(Debug, Clone)]
pub enum BoardError {
    Gpio(String),
    Pwm(String),
}

impl std::fmt::Display for BoardError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BoardError::Gpio(msg) => write!(f, "GPIO error: {}", msg),
            BoardError::Pwm(msg) => write!(f, "PWM error: {}", msg),
        }
    }
}

impl std::error::Error for BoardError {}

/// The physical I/O consumed by the controllers.
///
/// Switch levels are the raw electrical state; both panel switches are
/// wired active-low (pulled up, asserted when pulled to ground), so callers
/// invert them to get the logical state.
pub trait BoilerBoard: Send {
    fn read_temperature_c(&mut self) -> Result<f32, SensorError>;
    /// Raw brew switch level (true = released, false = pressed).
    fn brew_switch_level(&mut self) -> bool;
    /// Raw steam switch level (true = released, false = pressed).
    fn steam_switch_level(&mut self) -> bool;
    /// Set the heater PWM duty cycle; `fraction` has already been clamped
    /// to 0..=1 by [`clamp_duty`].
    fn set_heater_duty(&mut self, fraction: f32) -> Result<(), BoardError>;
    fn set_pump(&mut self, on: bool) -> Result<(), BoardError>;
    /// Release every controlled pin to a safe high-impedance, pulled-down
    /// input state. Best-effort: each pin is released independently and
    /// failures are logged rather than returned.
    fn release_pins(&mut self);
}

/// Clamp a duty-cycle fraction into 0..=1, logging when a caller handed us
/// something out of range. Kept separate from the control-loop clamp so the
/// actuator path stays safe even if the loop logic regresses.
pub fn clamp_duty(fraction: f32) -> f32 {
    if fraction > 1.0 {
        warn!(
            "heater duty cycle should be between 0 and 1, value was {}. Clamped to 1.",
            fraction
        );
        1.0
    } else if fraction < 0.0 || fraction.is_nan() {
        warn!(
            "heater duty cycle should be between 0 and 1, value was {}. Clamped to 0.",
            fraction
        );
        0.0
    } else {
        fraction
    }
}
