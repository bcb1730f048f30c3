pub mod adb;
pub mod bridge;
pub mod cancel;
pub mod config;
pub mod console;
pub mod coordinator;
pub mod dispatcher;
pub mod error;
pub mod guard;
pub mod lifecycle;
pub mod logging;
pub mod models;
pub mod registry;

#[cfg(test)]
mod testing;
