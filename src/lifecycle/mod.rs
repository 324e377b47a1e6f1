//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger shutdown
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Tasks wind down → Exit
//! ```
//!
//! # Design Decisions
//! - Connections and bridges end on natural EOF, error, or shutdown;
//!   there are no idle timeouts

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
