pub mod controller;
pub mod direct_drive;
pub mod hardware;
pub mod pid;
pub mod protocol;
pub mod safety;
pub mod settings;
pub mod shot_timer;
pub mod storage;
pub mod telemetry;
pub mod temperature;
pub mod types;

pub use types::*;
pub use controller::*;
