//! UDP telemetry egress and the direct-drive override listener.
//!
//! Samples flow out of the control loop through a bounded channel so a
//! slow or absent receiver can never stall a tick; overflow drops the
//! sample at the sender.

use crate::direct_drive::{DirectDriveCommand, DirectDriveCommandChannel};
use crate::protocol;
use crate::types::SampleRecord;
use anyhow::Context;
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, channel::Channel};
use log::{debug, info, warn};
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;

pub type TelemetryChannel = Channel<CriticalSectionRawMutex, SampleRecord, 16>;

pub struct UdpTelemetrySender {
    socket: UdpSocket,
    target: SocketAddr,
}

impl UdpTelemetrySender {
    pub fn new(target: SocketAddr) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").context("Failed to bind telemetry socket")?;
        info!("Telemetry streaming to {}", target);
        Ok(Self { socket, target })
    }

    /// Best-effort datagram send; telemetry loss is logged, never fatal.
    pub fn send(&self, record: &SampleRecord) {
        let buf = protocol::encode_sample(record);
        if let Err(e) = self.socket.send_to(&buf, self.target) {
            warn!("Failed to send telemetry datagram: {}", e);
        }
    }
}

#[embassy_executor::task]
pub async fn telemetry_task(channel: Arc<TelemetryChannel>, sender: UdpTelemetrySender) {
    info!("Telemetry task started");
    loop {
        let record = channel.receive().await;
        sender.send(&record);
    }
}

/// Listen for heater-override datagrams on a dedicated thread. The socket
/// read is blocking, so this stays off the executor entirely; decoded
/// commands are handed over through the (non-blocking) command channel.
pub fn spawn_override_listener(
    bind_addr: SocketAddr,
    commands: Arc<DirectDriveCommandChannel>,
) -> anyhow::Result<()> {
    let socket =
        UdpSocket::bind(bind_addr).context("Failed to bind override command socket")?;
    info!("Listening for heater override commands on {}", bind_addr);

    std::thread::Builder::new()
        .name("override-listener".to_string())
        .spawn(move || {
            let mut buf = [0u8; 64];
            loop {
                match socket.recv_from(&mut buf) {
                    Ok((len, peer)) => {
                        if let Some(duty) = protocol::decode_duty_command(&buf[..len]) {
                            debug!("Override duty {:.3} from {}", duty, peer);
                            if commands
                                .try_send(DirectDriveCommand::HeaterDuty(duty))
                                .is_err()
                            {
                                warn!("Override command channel full - dropping command");
                            }
                        }
                    }
                    Err(e) => {
                        warn!("Override socket receive failed: {}", e);
                    }
                }
            }
        })
        .context("Failed to spawn override listener thread")?;
    Ok(())
}
