//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     trigger() → subscribers wake → server stops accepting → in-flight requests drain
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//! ```
//!
//! # Design Decisions
//! - One coordinator shared by every long-running task
//! - Triggering is sticky: late subscribers still observe it

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::forward_signals;
