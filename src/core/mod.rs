// DbgMux - core/mod.rs
//
// Core layer: data structures, wait primitives and pure line processing.
// Dependencies: standard library plus chrono, regex, crossbeam-channel and
// parking_lot for the primitives themselves.
// Must NOT depend on: app, platform, or any thread-spawning code.

pub mod clock;
pub mod filter;
pub mod line_buffer;
pub mod merge;
pub mod model;
pub mod newline_filter;
pub mod process;
pub mod ring_buffer;
pub mod signal;
pub mod timer_queue;
