pub mod app;
pub mod bus;
pub mod config;
pub mod error;
pub mod ipc;
#[cfg(target_os = "macos")]
pub mod macos;
pub mod mirror;
pub mod monitors;
pub mod platform;
pub mod runner;
pub mod switcher;
