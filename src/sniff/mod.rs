//! Protocol sniffing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → server.rs (accept loop, per-connection task)
//!     → classifier.rs (HTTP-or-not verdict over buffered bytes)
//!     → HTTP: hyper serves the connection, requests reach the handler
//!     → not HTTP: stream.rs replays the buffered bytes, connection is
//!       emitted to the fallback consumer (or rejected)
//! ```
//!
//! # Design Decisions
//! - Bytes are read into an explicit buffer and classified from there, so
//!   the fallback path can always replay them verbatim
//! - Fallback, rejection, and upgrade are distinct named channels; a
//!   consumer can never see a rejection for a connection that fell back

pub mod classifier;
pub mod server;
pub mod stream;

pub use classifier::{classify, ParseFailure, Verdict};
pub use server::{
    ConnectionId, FallbackConnection, HandlerFuture, RejectReason, RejectedConnection,
    RequestHandler, SniffServer, UpgradedConnection,
};
pub use stream::ReplayStream;
