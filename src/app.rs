//! The long-running daemon: cycle loop, status document, signal handling.

pub mod orchestrator;
pub mod shutdown;
pub mod status;
