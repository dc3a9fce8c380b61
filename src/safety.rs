//! Terminal shutdown path: zero every actuator and release the pins.
//!
//! Reachable from the fatal-fault paths, the cooperative stop, and the
//! process signal handler; must be safe to hit from all of them, any
//! number of times.

use crate::hardware::BoilerBoard;
use log::{error, info};

pub struct SafetyController {
    shutdown_complete: bool,
}

impl SafetyController {
    pub fn new() -> Self {
        Self {
            shutdown_complete: false,
        }
    }

    /// Disable all outputs and release the hardware. Idempotent; only the
    /// first call touches the board. Each step is attempted independently
    /// so one failed actuator never leaves the next one energized.
    pub fn shutdown<B: BoilerBoard>(&mut self, board: &mut B) {
        if self.shutdown_complete {
            return;
        }
        self.shutdown_complete = true;

        info!("Safety shutdown: disabling all outputs");
        if let Err(e) = board.set_heater_duty(0.0) {
            error!("Failed to zero heater during shutdown: {}", e);
        }
        if let Err(e) = board.set_pump(false) {
            error!("Failed to disable pump during shutdown: {}", e);
        }
        board.release_pins();
        info!("Safety shutdown complete");
    }

    pub fn is_shutdown_complete(&self) -> bool {
        self.shutdown_complete
    }
}

impl Default for SafetyController {
    fn default() -> Self {
        Self::new()
    }
}
