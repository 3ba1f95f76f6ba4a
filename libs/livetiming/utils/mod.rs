//! Common utilities for the recorder

mod logging;
mod shutdown;

pub use logging::init_tracing;
pub use shutdown::ShutdownManager;
