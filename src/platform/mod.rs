// DbgMux - platform/mod.rs
//
// Platform abstraction layer.
// Dependencies: standard library, directories crate, core process handles.
// Must NOT depend on: app.

pub mod config;
pub mod process;
