//! Infrastructure layer: concrete adapters for the ports the coordination
//! core depends on (logging, configuration, wall-clock time).

pub mod clock;
pub mod config;
pub mod logging;
