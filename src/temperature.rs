//! Fault-tolerant wrapper around the thermocouple read path.
//!
//! Transient read errors are bridged with the last-known-good value so the
//! control loop keeps running through brief faults; a run of more than
//! [`MAX_CONSECUTIVE_SENSOR_FAILURES`] failures means the sensor is presumed
//! dead and heating must stop.

use crate::hardware::SensorError;
use crate::types::MAX_CONSECUTIVE_SENSOR_FAILURES;
use log::warn;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProbeReading {
    /// Fresh value straight from the sensor.
    Fresh(f32),
    /// Sensor read failed; this is the last-known-good value.
    Held(f32),
    /// Sensor read failed and no valid reading has ever been seen.
    Unavailable,
}

impl ProbeReading {
    pub fn value(&self) -> Option<f32> {
        match self {
            ProbeReading::Fresh(v) | ProbeReading::Held(v) => Some(*v),
            ProbeReading::Unavailable => None,
        }
    }
}

/// Raised once the consecutive-failure threshold is exceeded. There is no
/// recovery path within a probe instance.
#[derive(Debug, Clone)]
pub struct SensorFault {
    pub consecutive_failures: u32,
    pub last_error: SensorError,
}

impl std::fmt::Display for SensorFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "too many consecutive temperature read failures ({}): {}",
            self.consecutive_failures, self.last_error
        )
    }
}

impl std::error::Error for SensorFault {}

pub struct TemperatureProbe {
    last_valid: Option<f32>,
    consecutive_failures: u32,
}

impl TemperatureProbe {
    pub fn new() -> Self {
        Self {
            last_valid: None,
            consecutive_failures: 0,
        }
    }

    /// Fold one raw sensor read result into the probe state.
    pub fn update(&mut self, raw: Result<f32, SensorError>) -> Result<ProbeReading, SensorFault> {
        match raw {
            Ok(value) => {
                self.last_valid = Some(value);
                self.consecutive_failures = 0;
                Ok(ProbeReading::Fresh(value))
            }
            Err(err) => {
                self.consecutive_failures += 1;
                warn!(
                    "Error during temperature read: {}. Returning latest valid temperature: {:?}",
                    err, self.last_valid
                );
                if self.consecutive_failures > MAX_CONSECUTIVE_SENSOR_FAILURES {
                    return Err(SensorFault {
                        consecutive_failures: self.consecutive_failures,
                        last_error: err,
                    });
                }
                match self.last_valid {
                    Some(value) => Ok(ProbeReading::Held(value)),
                    None => Ok(ProbeReading::Unavailable),
                }
            }
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn last_valid(&self) -> Option<f32> {
        self.last_valid
    }
}

impl Default for TemperatureProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_to_last_known_good() {
        let mut probe = TemperatureProbe::new();
        assert_eq!(probe.update(Ok(91.0)).unwrap(), ProbeReading::Fresh(91.0));

        for expected_failures in 1..=3 {
            let reading = probe.update(Err(SensorError::OpenCircuit)).unwrap();
            assert_eq!(reading, ProbeReading::Held(91.0));
            assert_eq!(probe.consecutive_failures(), expected_failures);
        }

        assert_eq!(probe.update(Ok(92.5)).unwrap(), ProbeReading::Fresh(92.5));
        assert_eq!(probe.consecutive_failures(), 0);
    }

    #[test]
    fn test_unavailable_before_first_valid_reading() {
        let mut probe = TemperatureProbe::new();
        let reading = probe.update(Err(SensorError::ShortToGround)).unwrap();
        assert_eq!(reading, ProbeReading::Unavailable);
        assert_eq!(reading.value(), None);
    }

    #[test]
    fn test_fault_after_threshold_exceeded() {
        let mut probe = TemperatureProbe::new();
        probe.update(Ok(90.0)).unwrap();

        for _ in 0..MAX_CONSECUTIVE_SENSOR_FAILURES {
            assert!(probe.update(Err(SensorError::OpenCircuit)).is_ok());
        }
        let fault = probe
            .update(Err(SensorError::OpenCircuit))
            .expect_err("11th consecutive failure must be fatal");
        assert_eq!(fault.consecutive_failures, 11);
    }
}
