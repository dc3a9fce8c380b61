//! Setpoint policy: active-target selection plus validated, persisted
//! runtime configuration.
//!
//! Shared between the control task and the command handlers; every access
//! is a brief config-wide lock around a single scalar read or write, so a
//! blocking mutex is sufficient.

use crate::storage::{keys, ConfigStore, StoreError};
use crate::types::{
    ControllerConfig, BREW_SETPOINT_MAX_C, BREW_SETPOINT_MIN_C, FEEDFORWARD_MAX,
    SHOT_TIME_LIMIT_MAX_S, STEAM_SETPOINT_MAX_C, STEAM_SETPOINT_MIN_C,
};
use core::cell::RefCell;
use embassy_sync::blocking_mutex::{raw::CriticalSectionRawMutex, Mutex};
use log::{info, warn};

pub struct SettingsManager {
    config: Mutex<CriticalSectionRawMutex, RefCell<ControllerConfig>>,
    store: Mutex<CriticalSectionRawMutex, RefCell<Box<dyn ConfigStore + Send>>>,
}

impl SettingsManager {
    /// Load persisted settings, falling back to defaults for missing keys.
    /// The control loop can therefore never observe an absent setpoint.
    pub fn load(mut store: Box<dyn ConfigStore + Send>) -> Self {
        let mut config = ControllerConfig::default();
        if let Some(v) = store.get_f32(keys::BREW_SETPOINT) {
            config.brew_setpoint_c = v;
        }
        if let Some(v) = store.get_f32(keys::STEAM_SETPOINT) {
            config.steam_setpoint_c = v;
        }
        if let Some(v) = store.get_f32(keys::SHOT_TIME_LIMIT) {
            config.shot_time_limit_s = v;
        }
        if let Some(v) = store.get_f32(keys::FEEDFORWARD_COMPENSATION) {
            config.feedforward_compensation = v;
        }
        info!(
            "Settings loaded: brew {:.1}C, steam {:.1}C, shot limit {:.1}s, feedforward {:.2}",
            config.brew_setpoint_c,
            config.steam_setpoint_c,
            config.shot_time_limit_s,
            config.feedforward_compensation
        );
        Self {
            config: Mutex::new(RefCell::new(config)),
            store: Mutex::new(RefCell::new(store)),
        }
    }

    /// Target temperature for the current mode.
    pub fn active_setpoint(&self, steaming: bool) -> f32 {
        self.config.lock(|c| {
            let c = c.borrow();
            if steaming {
                c.steam_setpoint_c
            } else {
                c.brew_setpoint_c
            }
        })
    }

    pub fn brew_setpoint(&self) -> f32 {
        self.config.lock(|c| c.borrow().brew_setpoint_c)
    }

    pub fn steam_setpoint(&self) -> f32 {
        self.config.lock(|c| c.borrow().steam_setpoint_c)
    }

    pub fn shot_time_limit(&self) -> f32 {
        self.config.lock(|c| c.borrow().shot_time_limit_s)
    }

    pub fn feedforward_compensation(&self) -> f32 {
        self.config.lock(|c| c.borrow().feedforward_compensation)
    }

    pub fn snapshot(&self) -> ControllerConfig {
        self.config.lock(|c| *c.borrow())
    }

    /// Validate-and-apply; `false` leaves the prior value untouched.
    pub fn set_brew_setpoint(&self, setpoint: f32) -> bool {
        if !in_range(setpoint, BREW_SETPOINT_MIN_C, BREW_SETPOINT_MAX_C) {
            warn!(
                "Rejected brew setpoint {}: valid range {}..={}",
                setpoint, BREW_SETPOINT_MIN_C, BREW_SETPOINT_MAX_C
            );
            return false;
        }
        self.config.lock(|c| c.borrow_mut().brew_setpoint_c = setpoint);
        self.persist(keys::BREW_SETPOINT, setpoint);
        info!("Brew setpoint set to {:.1}", setpoint);
        true
    }

    pub fn set_steam_setpoint(&self, setpoint: f32) -> bool {
        if !in_range(setpoint, STEAM_SETPOINT_MIN_C, STEAM_SETPOINT_MAX_C) {
            warn!(
                "Rejected steam setpoint {}: valid range {}..={}",
                setpoint, STEAM_SETPOINT_MIN_C, STEAM_SETPOINT_MAX_C
            );
            return false;
        }
        self.config.lock(|c| c.borrow_mut().steam_setpoint_c = setpoint);
        self.persist(keys::STEAM_SETPOINT, setpoint);
        info!("Steam setpoint set to {:.1}", setpoint);
        true
    }

    /// Zero or negative disables the limiter; anything above the maximum
    /// (or non-finite) is rejected.
    pub fn set_shot_time_limit(&self, limit_seconds: f32) -> bool {
        if !limit_seconds.is_finite() || limit_seconds > SHOT_TIME_LIMIT_MAX_S {
            warn!(
                "Rejected shot time limit {}: maximum {}s",
                limit_seconds, SHOT_TIME_LIMIT_MAX_S
            );
            return false;
        }
        self.config
            .lock(|c| c.borrow_mut().shot_time_limit_s = limit_seconds);
        self.persist(keys::SHOT_TIME_LIMIT, limit_seconds);
        info!("Shot time limit set to {:.1}", limit_seconds);
        true
    }

    pub fn set_feedforward_compensation(&self, compensation: f32) -> bool {
        if !in_range(compensation, 0.0, FEEDFORWARD_MAX) {
            warn!(
                "Rejected feedforward compensation {}: valid range 0..={}",
                compensation, FEEDFORWARD_MAX
            );
            return false;
        }
        self.config
            .lock(|c| c.borrow_mut().feedforward_compensation = compensation);
        self.persist(keys::FEEDFORWARD_COMPENSATION, compensation);
        info!("Brew feedforward compensation set to {:.2}", compensation);
        true
    }

    /// Persistence failures never reach the control path; the in-memory
    /// value has already been accepted.
    fn persist(&self, key: &str, value: f32) {
        let result: Result<(), StoreError> =
            self.store.lock(|s| s.borrow_mut().set_f32(key, value));
        if let Err(e) = result {
            warn!("Failed to persist {}: {}", key, e);
        }
    }
}

fn in_range(value: f32, min: f32, max: f32) -> bool {
    // NaN fails both comparisons, so non-finite input is always rejected.
    value >= min && value <= max
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::types::{DEFAULT_BREW_SETPOINT_C, DEFAULT_STEAM_SETPOINT_C};
    use std::sync::Arc;

    fn manager() -> SettingsManager {
        SettingsManager::load(Box::new(MemoryStore::new()))
    }

    #[test]
    fn test_defaults_applied_for_missing_keys() {
        let settings = manager();
        let config = settings.snapshot();
        assert_eq!(config.brew_setpoint_c, DEFAULT_BREW_SETPOINT_C);
        assert_eq!(config.steam_setpoint_c, DEFAULT_STEAM_SETPOINT_C);
        assert_eq!(config.shot_time_limit_s, 0.0);
        assert_eq!(config.feedforward_compensation, 0.14);
    }

    #[test]
    fn test_persisted_values_override_defaults() {
        let mut store = MemoryStore::new();
        store.set_f32(keys::BREW_SETPOINT, 92.0).unwrap();
        store.set_f32(keys::SHOT_TIME_LIMIT, 27.0).unwrap();
        let settings = SettingsManager::load(Box::new(store));
        assert_eq!(settings.brew_setpoint(), 92.0);
        assert_eq!(settings.shot_time_limit(), 27.0);
        assert_eq!(settings.steam_setpoint(), DEFAULT_STEAM_SETPOINT_C);
    }

    #[test]
    fn test_out_of_range_setpoint_rejected() {
        let settings = manager();
        assert!(!settings.set_brew_setpoint(150.0));
        assert_eq!(settings.brew_setpoint(), DEFAULT_BREW_SETPOINT_C);

        assert!(settings.set_brew_setpoint(95.0));
        assert_eq!(settings.brew_setpoint(), 95.0);
    }

    #[test]
    fn test_nan_rejected_everywhere() {
        let settings = manager();
        assert!(!settings.set_brew_setpoint(f32::NAN));
        assert!(!settings.set_steam_setpoint(f32::NAN));
        assert!(!settings.set_shot_time_limit(f32::NAN));
        assert!(!settings.set_feedforward_compensation(f32::NAN));
        assert_eq!(settings.snapshot(), ControllerConfig::default());
    }

    #[test]
    fn test_negative_shot_limit_accepted_as_disabled() {
        let settings = manager();
        assert!(settings.set_shot_time_limit(-1.0));
        assert_eq!(settings.shot_time_limit(), -1.0);
        assert!(!settings.set_shot_time_limit(51.0));
        assert_eq!(settings.shot_time_limit(), -1.0);
    }

    /// Test store sharing its backing map, so persistence is observable
    /// after the manager has taken ownership.
    struct SharedStore(Arc<std::sync::Mutex<std::collections::HashMap<String, f32>>>);

    impl ConfigStore for SharedStore {
        fn get_f32(&mut self, key: &str) -> Option<f32> {
            self.0.lock().unwrap().get(key).copied()
        }

        fn set_f32(&mut self, key: &str, value: f32) -> Result<(), StoreError> {
            self.0.lock().unwrap().insert(key.to_string(), value);
            Ok(())
        }
    }

    #[test]
    fn test_accepted_change_is_persisted() {
        let backing = Arc::new(std::sync::Mutex::new(std::collections::HashMap::new()));
        let settings = SettingsManager::load(Box::new(SharedStore(Arc::clone(&backing))));

        assert!(settings.set_steam_setpoint(155.0));
        assert_eq!(
            backing.lock().unwrap().get(keys::STEAM_SETPOINT).copied(),
            Some(155.0)
        );

        // Rejected writes must not touch the store.
        assert!(!settings.set_steam_setpoint(500.0));
        assert_eq!(
            backing.lock().unwrap().get(keys::STEAM_SETPOINT).copied(),
            Some(155.0)
        );
    }

    #[test]
    fn test_active_setpoint_follows_steam_mode() {
        let settings = Arc::new(manager());
        assert_eq!(settings.active_setpoint(false), DEFAULT_BREW_SETPOINT_C);
        assert_eq!(settings.active_setpoint(true), DEFAULT_STEAM_SETPOINT_C);
    }
}
