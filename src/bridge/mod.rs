//! Fallback bridging subsystem.
//!
//! # Data Flow
//! ```text
//! Fallback connection (raw socket, original bytes intact)
//!     → tcp.rs (outbound connect, pending-write queue, two-way relay)
//!     → backend TCP
//!
//! Client datagram → shared inbound socket
//!     → udp.rs (binding lookup by client address)
//!     → dedicated outbound socket, co-located with the TCP endpoint
//!     → backend UDP (and back, via the shared socket)
//! ```
//!
//! # Design Decisions
//! - One bridge pair per fallback connection; torn down on EOF or error
//! - The datagram binding's lifetime is owned by the TCP pair

pub mod tcp;
pub mod udp;

pub use tcp::{BridgeError, ConnectionBridge, EstablishedBridge};
pub use udp::{BindingTable, DatagramBridge};
