//! The closed-loop boiler controller: fixed-rate sampling, PID plus
//! feedforward, safety override, actuation and telemetry emission.
//!
//! The loop polls fast (10 ms) so the pump follows the brew switch
//! immediately, while thermal control is rate-limited to the 0.5 s
//! sampling interval.

use crate::{
    hardware::{clamp_duty, BoardError, BoilerBoard},
    pid::DiscretePid,
    safety::SafetyController,
    settings::SettingsManager,
    shot_timer::ShotTimer,
    telemetry::TelemetryChannel,
    temperature::{SensorFault, TemperatureProbe},
    types::{
        LoopState, SampleRecord, FEEDFORWARD_WINDOW_C, MAX_BOILER_TEMP_C, OUTPUT_LOWER_LIMIT,
        OUTPUT_UPPER_LIMIT, PID_D_GAIN, PID_FILTER_COEFF_N, PID_I_GAIN, PID_P_GAIN,
        POLL_PERIOD_MS, SAMPLING_INTERVAL_MS, SAMPLING_INTERVAL_S,
    },
};
use chrono::Utc;
use embassy_futures::select::{select3, Either3};
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, channel::Channel};
use embassy_time::{Duration, Instant, Timer};
use log::{error, info, warn};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum ControllerCommand {
    SetBrewSetpoint(f32),
    SetSteamSetpoint(f32),
    SetShotTimeLimit(f32),
    SetFeedforwardCompensation(f32),
}

pub type CommandChannel = Channel<CriticalSectionRawMutex, ControllerCommand, 8>;

/// One-slot termination signal. Kept separate from the command stream so a
/// full command channel can never crowd out a stop request.
pub type StopChannel = Channel<CriticalSectionRawMutex, (), 1>;

/// Fatal conditions; each one terminates the control loop through the
/// safety shutdown path.
#[derive(Debug)]
pub enum ControlFault {
    Sensor(SensorFault),
    Board(BoardError),
}

impl std::fmt::Display for ControlFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControlFault::Sensor(fault) => write!(f, "sensor fault: {}", fault),
            ControlFault::Board(err) => write!(f, "hardware fault: {}", err),
        }
    }
}

impl std::error::Error for ControlFault {}

pub struct GaggiaController<B: BoilerBoard> {
    board: B,
    settings: Arc<SettingsManager>,
    pid: DiscretePid,
    probe: TemperatureProbe,
    shot_timer: ShotTimer,
    safety: SafetyController,
    command_channel: Arc<CommandChannel>,
    stop_channel: Arc<StopChannel>,
    telemetry_channel: Arc<TelemetryChannel>,
    state: LoopState,
    last_sample: Instant,
    sample_index: u32,
    pump_on: bool,
    heater_duty: f32,
}

impl<B: BoilerBoard> GaggiaController<B> {
    pub fn new(
        board: B,
        settings: Arc<SettingsManager>,
        command_channel: Arc<CommandChannel>,
        stop_channel: Arc<StopChannel>,
        telemetry_channel: Arc<TelemetryChannel>,
    ) -> Self {
        Self {
            board,
            settings,
            pid: DiscretePid::new(
                PID_P_GAIN,
                PID_I_GAIN,
                PID_D_GAIN,
                PID_FILTER_COEFF_N,
                OUTPUT_UPPER_LIMIT,
                OUTPUT_LOWER_LIMIT,
            ),
            probe: TemperatureProbe::new(),
            shot_timer: ShotTimer::new(),
            safety: SafetyController::new(),
            command_channel,
            stop_channel,
            telemetry_channel,
            state: LoopState::Stopped,
            last_sample: Instant::from_ticks(0),
            sample_index: 0,
            pump_on: false,
            heater_duty: 0.0,
        }
    }

    /// Stopped -> Running. Forces the heater off before the first tick.
    pub fn start(&mut self, now: Instant) -> Result<(), ControlFault> {
        if self.state != LoopState::Stopped {
            return Ok(());
        }
        self.last_sample = now;
        self.state = LoopState::Running;
        self.apply_heater_duty(0.0)?;
        info!("Gaggia controller started");
        Ok(())
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn heater_duty(&self) -> f32 {
        self.heater_duty
    }

    /// Run until a `Stop` command or a fatal fault. The safety shutdown has
    /// already executed by the time this returns, on either path.
    pub async fn run(&mut self) -> Result<(), ControlFault> {
        if let Err(fault) = self.start(Instant::now()) {
            error!("Failed to start controller: {}", fault);
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
                Either3::Second(command) => self.handle_command(command),
                Either3::Third(()) => self.tick(Instant::now())?,
            }
        }

        info!("Stop requested, shutting down");
        self.state = LoopState::ShuttingDown;
        self.safety.shutdown(&mut self.board);
        Ok(())
    }

    fn handle_command(&mut self, command: ControllerCommand) {
        match command {
            ControllerCommand::SetBrewSetpoint(v) => {
                self.settings.set_brew_setpoint(v);
            }
            ControllerCommand::SetSteamSetpoint(v) => {
                self.settings.set_steam_setpoint(v);
            }
            ControllerCommand::SetShotTimeLimit(v) => {
                self.settings.set_shot_time_limit(v);
            }
            ControllerCommand::SetFeedforwardCompensation(v) => {
                self.settings.set_feedforward_compensation(v);
            }
        }
    }

    /// One poll tick. Fatal faults flip the controller into `ShuttingDown`
    /// and perform the safety shutdown before returning; later ticks are
    /// no-ops.
    pub fn tick(&mut self, now: Instant) -> Result<(), ControlFault> {
        if self.state != LoopState::Running {
            return Ok(());
        }
        match self.tick_inner(now) {
            Ok(()) => Ok(()),
            Err(fault) => {
                error!("Fatal fault in control tick: {}", fault);
                self.fail_safe();
                Err(fault)
            }
        }
    }

    fn tick_inner(&mut self, now: Instant) -> Result<(), ControlFault> {
        // Logical sense is inverted: the panel switches are active-low.
        let brewing = !self.board.brew_switch_level();
        let steaming = !self.board.steam_switch_level();

        self.shot_timer.observe(brewing, now);
        if self.shot_limit_reached(steaming, now) {
            self.apply_pump(false)?;
            self.shot_timer.force_close(now);
        } else {
            // The pump mirrors the brew switch every tick, never waiting
            // for the sampling interval.
            self.apply_pump(brewing)?;
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
                    // Sensor down before any valid reading: keep the heater
                    // off and skip this sample.
                    self.apply_heater_duty(0.0)?;
                    return Ok(());
                }
            },
            Err(fault) => {
                let _ = self.apply_heater_duty(0.0);
                return Err(ControlFault::Sensor(fault));
            }
        };

        let setpoint = self.settings.active_setpoint(steaming);
        let pid_output = self
            .pid
            .step((setpoint - temperature) as f64, SAMPLING_INTERVAL_S) as f32;

        // Counteracts the cold-water draw while brewing. Skipped at or above
        // setpoint + window so the bias cannot cause overshoot, and skipped
        // when the brew switch is being used to cool the boiler down.
        let feedforward =
            if self.pump_on && !steaming && temperature < setpoint + FEEDFORWARD_WINDOW_C {
                self.settings.feedforward_compensation()
            } else {
                0.0
            };

        let output = (pid_output + feedforward).clamp(0.0, 1.0);
        self.apply_heater_duty(output)?;

        // Hard ceiling, checked after normal actuation so it overrides the
        // computed output within the same tick.
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
            control_output: output,
            setpoint_c: setpoint,
            shot_duration_s: self.shot_timer.elapsed_seconds(now),
            timestamp_ms: Utc::now().timestamp_millis(),
        };
        if self.telemetry_channel.try_send(record).is_err() {
            warn!("Telemetry channel full - dropping sample");
        }

        Ok(())
    }

    fn shot_limit_reached(&self, steaming: bool, now: Instant) -> bool {
        let limit = self.settings.shot_time_limit();
        limit > 0.0 && !steaming && self.shot_timer.seconds_since_start(now) >= limit
    }

    fn apply_heater_duty(&mut self, fraction: f32) -> Result<(), ControlFault> {
        let duty = clamp_duty(fraction);
        self.board
            .set_heater_duty(duty)
            .map_err(ControlFault::Board)?;
        self.heater_duty = duty;
        Ok(())
    }

    fn apply_pump(&mut self, on: bool) -> Result<(), ControlFault> {
        self.board.set_pump(on).map_err(ControlFault::Board)?;
        self.pump_on = on;
        Ok(())
    }

    fn fail_safe(&mut self) {
        self.state = LoopState::ShuttingDown;
        self.safety.shutdown(&mut self.board);
        self.heater_duty = 0.0;
        self.pump_on = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::SensorError;
    use crate::storage::MemoryStore;
    use crate::types::DEFAULT_FEEDFORWARD_COMPENSATION;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct MockState {
        temperature: Option<Result<f32, SensorError>>,
        brew_pressed: bool,
        steam_pressed: bool,
        fail_heater: bool,
        duties: Vec<f32>,
        pump_states: Vec<bool>,
        releases: u32,
    }

    #[derive(Clone, Default)]
    struct MockBoard(Arc<StdMutex<MockState>>);

    impl MockBoard {
        fn set_temperature(&self, t: f32) {
            self.0.lock().unwrap().temperature = Some(Ok(t));
        }

        fn fail_sensor(&self) {
            self.0.lock().unwrap().temperature = Some(Err(SensorError::OpenCircuit));
        }

        fn press_brew(&self, pressed: bool) {
            self.0.lock().unwrap().brew_pressed = pressed;
        }

        fn press_steam(&self, pressed: bool) {
            self.0.lock().unwrap().steam_pressed = pressed;
        }

        fn fail_heater(&self, fail: bool) {
            self.0.lock().unwrap().fail_heater = fail;
        }

        fn last_duty(&self) -> f32 {
            *self.0.lock().unwrap().duties.last().expect("no duty written")
        }

        fn last_pump(&self) -> bool {
            *self
                .0
                .lock()
                .unwrap()
                .pump_states
                .last()
                .expect("no pump state written")
        }

        fn duty_count(&self) -> usize {
            self.0.lock().unwrap().duties.len()
        }

        fn releases(&self) -> u32 {
            self.0.lock().unwrap().releases
        }
    }

    impl BoilerBoard for MockBoard {
        fn read_temperature_c(&mut self) -> Result<f32, SensorError> {
            self.0
                .lock()
                .unwrap()
                .temperature
                .clone()
                .unwrap_or(Err(SensorError::OpenCircuit))
        }

        fn brew_switch_level(&mut self) -> bool {
            !self.0.lock().unwrap().brew_pressed
        }

        fn steam_switch_level(&mut self) -> bool {
            !self.0.lock().unwrap().steam_pressed
        }

        fn set_heater_duty(&mut self, fraction: f32) -> Result<(), BoardError> {
            let mut state = self.0.lock().unwrap();
            if state.fail_heater {
                return Err(BoardError::Pwm("heater PWM unresponsive".to_string()));
            }
            state.duties.push(fraction);
            Ok(())
        }

        fn set_pump(&mut self, on: bool) -> Result<(), BoardError> {
            self.0.lock().unwrap().pump_states.push(on);
            Ok(())
        }

        fn release_pins(&mut self) {
            self.0.lock().unwrap().releases += 1;
        }
    }

    fn controller(board: &MockBoard) -> (GaggiaController<MockBoard>, Arc<SettingsManager>) {
        let settings = Arc::new(SettingsManager::load(Box::new(MemoryStore::new())));
        let ctrl = GaggiaController::new(
            board.clone(),
            Arc::clone(&settings),
            Arc::new(Channel::new()),
            Arc::new(Channel::new()),
            Arc::new(Channel::new()),
        );
        (ctrl, settings)
    }

    fn at(ms: u64) -> Instant {
        Instant::from_millis(ms)
    }

    fn tuned_pid() -> DiscretePid {
        DiscretePid::new(
            PID_P_GAIN,
            PID_I_GAIN,
            PID_D_GAIN,
            PID_FILTER_COEFF_N,
            OUTPUT_UPPER_LIMIT,
            OUTPUT_LOWER_LIMIT,
        )
    }

    #[test]
    fn test_pump_follows_brew_switch_without_waiting_for_sample() {
        let board = MockBoard::default();
        board.set_temperature(90.0);
        let (mut ctrl, _) = controller(&board);
        ctrl.start(at(0)).unwrap();

        board.press_brew(true);
        ctrl.tick(at(10)).unwrap();
        assert!(board.last_pump());
        // No control sample yet: only the start() zero has been written.
        assert_eq!(board.duty_count(), 1);

        board.press_brew(false);
        ctrl.tick(at(20)).unwrap();
        assert!(!board.last_pump());
    }

    #[test]
    fn test_sampling_is_rate_limited() {
        let board = MockBoard::default();
        board.set_temperature(80.0);
        let (mut ctrl, _) = controller(&board);
        ctrl.start(at(0)).unwrap();

        ctrl.tick(at(100)).unwrap();
        ctrl.tick(at(400)).unwrap();
        assert_eq!(board.duty_count(), 1);

        ctrl.tick(at(500)).unwrap();
        assert_eq!(board.duty_count(), 2);
    }

    #[test]
    fn test_feedforward_added_only_below_threshold() {
        // Brew setpoint 94, window +6: bias applies at 85, not at 101.
        for (temperature, biased) in [(85.0f32, true), (101.0f32, false)] {
            let board = MockBoard::default();
            board.set_temperature(temperature);
            board.press_brew(true);
            let (mut ctrl, _) = controller(&board);
            ctrl.start(at(0)).unwrap();
            ctrl.tick(at(500)).unwrap();

            let mut reference = tuned_pid();
            let pid_only = reference.step((94.0 - temperature) as f64, SAMPLING_INTERVAL_S) as f32;
            let expected = if biased {
                (pid_only + DEFAULT_FEEDFORWARD_COMPENSATION).clamp(0.0, 1.0)
            } else {
                pid_only.clamp(0.0, 1.0)
            };
            assert!(
                (board.last_duty() - expected).abs() < 1e-6,
                "temperature {}: duty {} != expected {}",
                temperature,
                board.last_duty(),
                expected
            );
        }
    }

    #[test]
    fn test_no_feedforward_without_pump() {
        let board = MockBoard::default();
        board.set_temperature(85.0);
        let (mut ctrl, _) = controller(&board);
        ctrl.start(at(0)).unwrap();
        ctrl.tick(at(500)).unwrap();

        let mut reference = tuned_pid();
        let pid_only = reference.step(9.0, SAMPLING_INTERVAL_S) as f32;
        assert!((board.last_duty() - pid_only.clamp(0.0, 1.0)).abs() < 1e-6);
    }

    #[test]
    fn test_over_temperature_always_wins() {
        let board = MockBoard::default();
        board.set_temperature(176.0);
        board.press_brew(true);
        let (mut ctrl, _) = controller(&board);
        ctrl.start(at(0)).unwrap();
        ctrl.tick(at(500)).unwrap();

        assert_eq!(board.last_duty(), 0.0);
        assert_eq!(ctrl.heater_duty(), 0.0);
        // start zero, computed output, then the override write.
        assert_eq!(board.duty_count(), 3);
        assert_eq!(ctrl.state(), LoopState::Running);
    }

    #[test]
    fn test_persistent_sensor_fault_shuts_down_exactly_once() {
        let board = MockBoard::default();
        board.fail_sensor();
        let (mut ctrl, _) = controller(&board);
        ctrl.start(at(0)).unwrap();

        // Ten consecutive failures ride through on the (absent) last-known
        // value with the heater held off.
        for i in 1..=10u64 {
            ctrl.tick(at(i * 500)).unwrap();
            assert_eq!(ctrl.state(), LoopState::Running);
            assert_eq!(board.last_duty(), 0.0);
        }

        let fault = ctrl.tick(at(11 * 500)).expect_err("11th failure is fatal");
        assert!(matches!(fault, ControlFault::Sensor(_)));
        assert_eq!(ctrl.state(), LoopState::ShuttingDown);
        assert_eq!(board.last_duty(), 0.0);
        assert_eq!(board.releases(), 1);

        // Later ticks are no-ops; the shutdown never runs twice.
        ctrl.tick(at(12 * 500)).unwrap();
        ctrl.tick(at(13 * 500)).unwrap();
        assert_eq!(board.releases(), 1);
    }

    #[test]
    fn test_fault_after_valid_readings_holds_last_value_then_trips() {
        let board = MockBoard::default();
        board.set_temperature(91.0);
        let (mut ctrl, _) = controller(&board);
        ctrl.start(at(0)).unwrap();
        ctrl.tick(at(500)).unwrap();

        board.fail_sensor();
        // Control keeps running on 91.0 for ten more samples.
        for i in 2..=11u64 {
            ctrl.tick(at(i * 500)).unwrap();
            assert_eq!(ctrl.state(), LoopState::Running);
        }
        assert!(ctrl.tick(at(12 * 500)).is_err());
        assert_eq!(ctrl.state(), LoopState::ShuttingDown);
    }

    #[test]
    fn test_shot_limit_forces_pump_off() {
        let board = MockBoard::default();
        board.set_temperature(90.0);
        let (mut ctrl, settings) = controller(&board);
        assert!(settings.set_shot_time_limit(2.0));
        ctrl.start(at(0)).unwrap();

        board.press_brew(true);
        ctrl.tick(at(10)).unwrap();
        assert!(board.last_pump());

        ctrl.tick(at(1010)).unwrap();
        assert!(board.last_pump());

        // 2.0s since the shot started: pump forced off with the switch
        // still held.
        ctrl.tick(at(2010)).unwrap();
        assert!(!board.last_pump());

        // Releasing and re-engaging the switch starts a fresh shot.
        board.press_brew(false);
        ctrl.tick(at(2500)).unwrap();
        board.press_brew(true);
        ctrl.tick(at(3000)).unwrap();
        assert!(board.last_pump());
    }

    #[test]
    fn test_steam_mode_ignores_shot_limit() {
        let board = MockBoard::default();
        board.set_temperature(90.0);
        let (mut ctrl, settings) = controller(&board);
        assert!(settings.set_shot_time_limit(1.0));
        ctrl.start(at(0)).unwrap();

        board.press_brew(true);
        board.press_steam(true);
        ctrl.tick(at(10)).unwrap();
        ctrl.tick(at(5000)).unwrap();
        assert!(board.last_pump());
    }

    #[test]
    fn test_heater_actuation_failure_is_fatal() {
        let board = MockBoard::default();
        board.set_temperature(80.0);
        let (mut ctrl, _) = controller(&board);
        ctrl.start(at(0)).unwrap();

        board.fail_heater(true);
        let fault = ctrl
            .tick(at(500))
            .expect_err("failed heater actuation must be fatal");
        assert!(matches!(fault, ControlFault::Board(_)));
        assert_eq!(ctrl.state(), LoopState::ShuttingDown);
        assert_eq!(board.releases(), 1);

        // Later ticks are no-ops; the shutdown never runs twice.
        ctrl.tick(at(1000)).unwrap();
        assert_eq!(board.releases(), 1);
    }

    #[test]
    fn test_stop_signal_unaffected_by_full_command_channel() {
        let commands: Arc<CommandChannel> = Arc::new(Channel::new());
        while commands
            .try_send(ControllerCommand::SetBrewSetpoint(93.0))
            .is_ok()
        {}

        // The command stream is saturated, but the stop slot is its own
        // channel and still accepts the signal.
        let stop: Arc<StopChannel> = Arc::new(Channel::new());
        assert!(stop.try_send(()).is_ok());
    }

    #[test]
    fn test_commands_update_settings() {
        let board = MockBoard::default();
        let (mut ctrl, settings) = controller(&board);
        ctrl.handle_command(ControllerCommand::SetBrewSetpoint(92.0));
        ctrl.handle_command(ControllerCommand::SetSteamSetpoint(999.0));
        assert_eq!(settings.brew_setpoint(), 92.0);
        assert_eq!(settings.steam_setpoint(), 150.0);
    }
}
