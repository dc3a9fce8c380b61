//! Manual heater mode: duty cycles come from the network instead of the
//! PID, for step-response measurements and tuning runs.
//!
//! The safety envelope stays identical to closed-loop operation, plus a
//! dead-man timeout: if no command arrives for a few seconds the heater
//! is forced off until the next one does.

use crate::{
    hardware::{clamp_duty, BoilerBoard},
    safety::SafetyController,
    telemetry::TelemetryChannel,
    temperature::TemperatureProbe,
    types::{
        LoopState, SampleRecord, COMMAND_TIMEOUT_S, MAX_BOILER_TEMP_C, POLL_PERIOD_MS,
        SAMPLING_INTERVAL_MS,
    },
};
use crate::controller::{ControlFault, StopChannel};
use chrono::Utc;
use embassy_futures::select::{select3, Either3};
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, channel::Channel};
use embassy_time::{Duration, Instant, Timer};
use log::{error, info, warn};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum DirectDriveCommand {
    HeaterDuty(f32),
}

pub type DirectDriveCommandChannel = Channel<CriticalSectionRawMutex, DirectDriveCommand, 8>;

pub struct DirectDriveController<B: BoilerBoard> {
    board: B,
    probe: TemperatureProbe,
    safety: SafetyController,
    command_channel: Arc<DirectDriveCommandChannel>,
    stop_channel: Arc<StopChannel>,
    telemetry_channel: Arc<TelemetryChannel>,
    state: LoopState,
    commanded_duty: f32,
    last_command_at: Instant,
    timeout_tripped: bool,
    last_sample: Instant,
    sample_index: u32,
    pump_on: bool,
}

impl<B: BoilerBoard> DirectDriveController<B> {
    pub fn new(
        board: B,
        command_channel: Arc<DirectDriveCommandChannel>,
        stop_channel: Arc<StopChannel>,
        telemetry_channel: Arc<TelemetryChannel>,
    ) -> Self {
        Self {
            board,
            probe: TemperatureProbe::new(),
            safety: SafetyController::new(),
            command_channel,
            stop_channel,
            telemetry_channel,
            state: LoopState::Stopped,
            commanded_duty: 0.0,
            last_command_at: Instant::from_ticks(0),
            timeout_tripped: false,
            last_sample: Instant::from_ticks(0),
            sample_index: 0,
            pump_on: false,
        }
    }

    pub fn start(&mut self, now: Instant) -> Result<(), ControlFault> {
        if self.state != LoopState::Stopped {
            return Ok(());
        }
        self.last_sample = now;
        self.last_command_at = now;
        self.state = LoopState::Running;
        self.apply_heater_duty(0.0)?;
        info!("Direct drive controller started");
        Ok(())
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub async fn run(&mut self) -> Result<(), ControlFault> {
        if let Err(fault) = self.start(Instant::now()) {
            error!("Failed to start direct drive: {}", fault);
            self.fail_safe();
            return Err(fault);
        }

        let stop = Arc::clone(&self.stop_channel);
        let commands = Arc::clone(&self.command_channel);
        loop {
            let stop_fut = stop.receive();
            let command_fut = commands.receive();
            let poll_timer = Timer::after(Duration::from_millis(POLL_PERIOD_MS));

            match select3(stop_fut, command_fut, poll_timer).await {
                Either3::First(()) => break,
                Either3::Second(command) => {
                    if let Err(fault) = self.handle_command(command, Instant::now()) {
                        self.fail_safe();
                        return Err(fault);
                    }
                }
                Either3::Third(()) => self.tick(Instant::now())?,
            }
        }

        info!("Stop requested, shutting down");
        self.state = LoopState::ShuttingDown;
        self.safety.shutdown(&mut self.board);
        Ok(())
    }

    /// New duty cycles take effect immediately rather than at the next
    /// sample boundary.
    pub fn handle_command(
        &mut self,
        command: DirectDriveCommand,
        now: Instant,
    ) -> Result<(), ControlFault> {
        let DirectDriveCommand::HeaterDuty(duty) = command;
        self.commanded_duty = clamp_duty(duty);
        self.last_command_at = now;
        self.timeout_tripped = false;
        self.apply_heater_duty(self.commanded_duty)
    }

    pub fn tick(&mut self, now: Instant) -> Result<(), ControlFault> {
        if self.state != LoopState::Running {
            return Ok(());
        }
        match self.tick_inner(now) {
            Ok(()) => Ok(()),
            Err(fault) => {
                error!("Fatal fault in direct drive tick: {}", fault);
                self.fail_safe();
                Err(fault)
            }
        }
    }

    fn tick_inner(&mut self, now: Instant) -> Result<(), ControlFault> {
        let brewing = !self.board.brew_switch_level();
        let steaming = !self.board.steam_switch_level();
        self.apply_pump(brewing)?;

        if now.duration_since(self.last_command_at) >= Duration::from_secs(COMMAND_TIMEOUT_S) {
            if !self.timeout_tripped {
                warn!(
                    "No heater command for {}s, forcing heater off",
                    COMMAND_TIMEOUT_S
                );
                self.timeout_tripped = true;
            }
            self.commanded_duty = 0.0;
        }

        if now.duration_since(self.last_sample) < Duration::from_millis(SAMPLING_INTERVAL_MS) {
            return Ok(());
        }
        self.last_sample = now;
        self.sample_index += 1;

        let raw = self.board.read_temperature_c();
        let temperature = match self.probe.update(raw) {
            Ok(reading) => match reading.value() {
                Some(t) => t,
                None => {
                    self.apply_heater_duty(0.0)?;
                    return Ok(());
                }
            },
            Err(fault) => {
                let _ = self.apply_heater_duty(0.0);
                return Err(ControlFault::Sensor(fault));
            }
        };

        self.apply_heater_duty(self.commanded_duty)?;
        if temperature > MAX_BOILER_TEMP_C {
            warn!(
                "Over-temperature: {:.1}C > {:.1}C, forcing heater off",
                temperature, MAX_BOILER_TEMP_C
            );
            self.apply_heater_duty(0.0)?;
        }

        let record = SampleRecord {
            sample_index: self.sample_index,
            temperature_c: temperature,
            steaming_active: steaming,
            brewing_active: brewing,
            control_output: self.commanded_duty,
            setpoint_c: 0.0,
            shot_duration_s: 0.0,
            timestamp_ms: Utc::now().timestamp_millis(),
        };
        if self.telemetry_channel.try_send(record).is_err() {
            warn!("Telemetry channel full - dropping sample");
        }

        Ok(())
    }

    fn apply_heater_duty(&mut self, fraction: f32) -> Result<(), ControlFault> {
        self.board
            .set_heater_duty(clamp_duty(fraction))
            .map_err(ControlFault::Board)
    }

    fn apply_pump(&mut self, on: bool) -> Result<(), ControlFault> {
        if on != self.pump_on {
            self.board.set_pump(on).map_err(ControlFault::Board)?;
            self.pump_on = on;
        }
        Ok(())
    }

    fn fail_safe(&mut self) {
        self.state = LoopState::ShuttingDown;
        self.safety.shutdown(&mut self.board);
        self.commanded_duty = 0.0;
    }
}
