//! Legacy UDP wire format.
//!
//! Telemetry record, little-endian, packed with no padding:
//! `i32` sample index, `f32` temperature C, `u8` steaming, `u8` brewing,
//! `f32` control output. Inbound heater-override commands are a single
//! little-endian `f32` duty-cycle fraction.

use crate::types::SampleRecord;
use log::warn;

pub const TELEMETRY_RECORD_LEN: usize = 14;
pub const DUTY_COMMAND_LEN: usize = 4;

pub fn encode_sample(record: &SampleRecord) -> [u8; TELEMETRY_RECORD_LEN] {
    let mut buf = [0u8; TELEMETRY_RECORD_LEN];
    buf[0..4].copy_from_slice(&(record.sample_index as i32).to_le_bytes());
    buf[4..8].copy_from_slice(&record.temperature_c.to_le_bytes());
    buf[8] = record.steaming_active as u8;
    buf[9] = record.brewing_active as u8;
    buf[10..14].copy_from_slice(&record.control_output.to_le_bytes());
    buf
}

pub fn decode_duty_command(data: &[u8]) -> Option<f32> {
    if data.len() != DUTY_COMMAND_LEN {
        warn!(
            "Invalid duty command length: expected {}, got {}",
            DUTY_COMMAND_LEN,
            data.len()
        );
        return None;
    }
    Some(f32::from_le_bytes([data[0], data[1], data[2], data[3]]))
}
