//! Subcommand implementations

pub mod scaler;
pub mod spread;
pub mod status;
pub mod teardown;
