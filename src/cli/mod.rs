//! Command-line surface: argument parsing, telemetry bootstrap and dispatch
//! into the server action.

pub mod actions;
pub mod commands;
pub mod dispatch;
pub mod telemetry;

mod start;

pub use self::start::start;
