// DbgMux - lib.rs
//
// Library entry point, exposing the capture core for the `dbgmux` binary,
// integration tests and embedding in other front ends.

pub mod app;
pub mod core;
pub mod platform;
pub mod util;
