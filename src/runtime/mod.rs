//! Single-writer async runtime, long-poll waits and event stream APIs.

/// Event stream types emitted by the runtime.
pub mod events;
/// Handle and command loop implementation.
pub mod handle;
/// Long-poll outcome types.
pub mod wait;
