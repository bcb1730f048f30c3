pub mod apps;
pub mod client;
pub mod device_tracking;
pub mod locator;
pub mod parse;
pub mod runner;
pub mod track_devices;
