//! Utils module - logging setup and the `log_component!` macro

pub mod logging;

pub use logging::init_logging;
