// Library surface for the binary, headless runs and integration tests.
pub mod app;
pub mod app_dirs;
pub mod audio;
pub mod config;
pub mod engine;
pub mod logging;
pub mod offline;
pub mod page;
pub mod pattern;
pub mod runtime;
pub mod session;
pub mod ui;

/// Nominal session tick
pub const TICK_RATE_MS: u64 = 50;

/// How often the running app re-reads its config file for a new shell version
pub const CONFIG_RECHECK_SECS: u64 = 60;
