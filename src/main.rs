use embassy_executor::Spawner;
use gaggia_rs::controller::{CommandChannel, GaggiaController, StopChannel};
use gaggia_rs::direct_drive::{DirectDriveCommandChannel, DirectDriveController};
use gaggia_rs::hardware::sim::SimulatedBoiler;
use gaggia_rs::settings::SettingsManager;
use gaggia_rs::storage::open_default_store;
use gaggia_rs::telemetry::{
    spawn_override_listener, telemetry_task, TelemetryChannel, UdpTelemetrySender,
};
use log::{error, info, warn};
use std::sync::Arc;

const DEFAULT_CONFIG_PATH: &str = "gaggia-config.json";
const DEFAULT_OVERRIDE_BIND: &str = "0.0.0.0:5005";

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("Starting Gaggia boiler controller");

    let telemetry_channel: Arc<TelemetryChannel> = Arc::new(TelemetryChannel::new());

    // Telemetry is optional: without a target address the channel simply
    // fills once and drops samples from then on.
    if let Ok(addr) = std::env::var("GAGGIA_TELEMETRY_ADDR") {
        match addr.parse() {
            Ok(target) => match UdpTelemetrySender::new(target) {
                Ok(sender) => {
                    if spawner
                        .spawn(telemetry_task(Arc::clone(&telemetry_channel), sender))
                        .is_err()
                    {
                        warn!("Failed to spawn telemetry task");
                    }
                }
                Err(e) => warn!("Telemetry disabled: {}", e),
            },
            Err(e) => warn!("Invalid GAGGIA_TELEMETRY_ADDR {:?}: {}", addr, e),
        }
    }

    let board = SimulatedBoiler::new();

    let direct_mode = std::env::var("GAGGIA_MODE").as_deref() == Ok("direct");
    let result = if direct_mode {
        run_direct_drive(board, telemetry_channel).await
    } else {
        run_closed_loop(board, telemetry_channel).await
    };

    match result {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            error!("Controller terminated: {}", e);
            std::process::exit(1);
        }
    }
}

async fn run_closed_loop(
    board: SimulatedBoiler,
    telemetry_channel: Arc<TelemetryChannel>,
) -> anyhow::Result<()> {
    let config_path =
        std::env::var("GAGGIA_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let settings = Arc::new(SettingsManager::load(open_default_store(config_path)));

    let command_channel: Arc<CommandChannel> = Arc::new(CommandChannel::new());
    let stop_channel: Arc<StopChannel> = Arc::new(StopChannel::new());
    install_stop_handler(Arc::clone(&stop_channel));

    let mut controller = GaggiaController::new(
        board,
        settings,
        command_channel,
        stop_channel,
        telemetry_channel,
    );
    controller.run().await?;
    Ok(())
}

async fn run_direct_drive(
    board: SimulatedBoiler,
    telemetry_channel: Arc<TelemetryChannel>,
) -> anyhow::Result<()> {
    let command_channel: Arc<DirectDriveCommandChannel> =
        Arc::new(DirectDriveCommandChannel::new());

    let bind = std::env::var("GAGGIA_OVERRIDE_ADDR")
        .unwrap_or_else(|_| DEFAULT_OVERRIDE_BIND.to_string())
        .parse()?;
    spawn_override_listener(bind, Arc::clone(&command_channel))?;

    let stop_channel: Arc<StopChannel> = Arc::new(StopChannel::new());
    install_stop_handler(Arc::clone(&stop_channel));

    let mut drive =
        DirectDriveController::new(board, command_channel, stop_channel, telemetry_channel);
    drive.run().await?;
    Ok(())
}

// The stop signal rides its own one-slot channel so a saturated command
// stream can never crowd it out.
fn install_stop_handler(stop: Arc<StopChannel>) {
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = stop.try_send(());
    }) {
        warn!("Failed to install Ctrl-C handler: {}", e);
    }
}
