//! First-order thermal model of the boiler, so the whole control stack can
//! run end-to-end on a host without the machine attached.

use crate::hardware::{BoardError, BoilerBoard, SensorError};
use embassy_time::Instant;
use log::{info, warn};

const AMBIENT_C: f32 = 22.0;
/// Heating rate at full duty, degrees per second.
const HEAT_RATE_C_PER_S: f32 = 1.8;
/// Passive loss toward ambient, fraction of the delta per second.
const LOSS_RATE_PER_S: f32 = 0.015;
/// Extra cooling while the pump draws cold water through the boiler.
const PUMP_COOLING_C_PER_S: f32 = 1.2;

pub struct SimulatedBoiler {
    temperature_c: f32,
    heater_duty: f32,
    pump_on: bool,
    brew_switch_pressed: bool,
    steam_switch_pressed: bool,
    last_update: Instant,
    released: bool,
}

impl SimulatedBoiler {
    pub fn new() -> Self {
        info!("Simulated boiler initialized at ambient {:.1}C", AMBIENT_C);
        Self {
            temperature_c: AMBIENT_C,
            heater_duty: 0.0,
            pump_on: false,
            brew_switch_pressed: false,
            steam_switch_pressed: false,
            last_update: Instant::now(),
            released: false,
        }
    }

    pub fn press_brew_switch(&mut self, pressed: bool) {
        self.brew_switch_pressed = pressed;
    }

    pub fn press_steam_switch(&mut self, pressed: bool) {
        self.steam_switch_pressed = pressed;
    }

    fn advance(&mut self, now: Instant) {
        let dt = now.duration_since(self.last_update).as_millis() as f32 / 1000.0;
        self.last_update = now;
        if dt <= 0.0 {
            return;
        }
        let mut rate = self.heater_duty * HEAT_RATE_C_PER_S
            - (self.temperature_c - AMBIENT_C) * LOSS_RATE_PER_S;
        if self.pump_on {
            rate -= PUMP_COOLING_C_PER_S;
        }
        self.temperature_c = (self.temperature_c + rate * dt).max(AMBIENT_C);
    }
}

impl Default for SimulatedBoiler {
    fn default() -> Self {
        Self::new()
    }
}

impl BoilerBoard for SimulatedBoiler {
    fn read_temperature_c(&mut self) -> Result<f32, SensorError> {
        self.advance(Instant::now());
        Ok(self.temperature_c)
    }

    fn brew_switch_level(&mut self) -> bool {
        // Active-low like the real panel wiring.
        !self.brew_switch_pressed
    }

    fn steam_switch_level(&mut self) -> bool {
        !self.steam_switch_pressed
    }

    fn set_heater_duty(&mut self, fraction: f32) -> Result<(), BoardError> {
        if self.released {
            return Err(BoardError::Pwm("heater PWM released".to_string()));
        }
        self.advance(Instant::now());
        self.heater_duty = fraction;
        Ok(())
    }

    fn set_pump(&mut self, on: bool) -> Result<(), BoardError> {
        if self.released {
            return Err(BoardError::Gpio("pump output released".to_string()));
        }
        self.advance(Instant::now());
        self.pump_on = on;
        Ok(())
    }

    fn release_pins(&mut self) {
        if self.released {
            warn!("simulated pins already released");
            return;
        }
        self.heater_duty = 0.0;
        self.pump_on = false;
        self.released = true;
        info!("Simulated pins released to safe input state");
    }
}
