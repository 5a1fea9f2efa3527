// DbgMux - app/mod.rs
//
// Application layer: executors, throttling, process monitoring, sources and
// the orchestrator that multiplexes them.
// Dependencies: core, platform, util.

pub mod console;
pub mod executor;
pub mod host_executor;
pub mod log_sources;
pub mod process_monitor;
pub mod sources;
pub mod throttle;
