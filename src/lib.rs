// Library surface for headless/integration tests and reuse.
// Terminal setup lives in main.rs; everything here runs without a TTY.
pub mod app;
pub mod app_dirs;
pub mod clock;
pub mod config;
pub mod execution;
pub mod exercise;
pub mod format;
pub mod runtime;
pub mod session;
pub mod store;
pub mod telemetry;
pub mod ui;
