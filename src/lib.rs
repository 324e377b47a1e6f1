//! Port-sharing proxy for HTTP and a legacy binary game protocol.
//!
//! One listening port serves ordinary HTTP traffic and, for clients that
//! turn out not to speak HTTP at all (such as classic BZFlag-style game
//! clients), relays the raw byte stream to a single fixed backend over TCP
//! while bridging a correlated UDP channel.
//!
//! # Architecture Overview
//!
//! ```text
//!                    ┌──────────────────────────────────────────────────┐
//!                    │                 FALLBACK PROXY                    │
//!                    │                                                   │
//!   TCP connection   │  ┌─────────┐  HTTP   ┌─────────────────────────┐ │
//!   ─────────────────┼─▶│  sniff  │────────▶│ request handler (hyper) │ │
//!                    │  └────┬────┘         └─────────────────────────┘ │
//!                    │       │ not HTTP                                  │
//!                    │       ▼                                           │
//!                    │  ┌─────────────┐   queued-then-direct   ┌───────┐ │
//!                    │  │ bridge::tcp │───────────────────────▶│backend│ │
//!                    │  └──────┬──────┘                        │  TCP  │ │
//!                    │         │ local addr                    └───────┘ │
//!                    │         ▼                                         │
//!   UDP datagram     │  ┌─────────────┐   co-located socket    ┌───────┐ │
//!   ─────────────────┼─▶│ bridge::udp │◀──────────────────────▶│backend│ │
//!                    │  └─────────────┘                        │  UDP  │ │
//!                    │                                                   │
//!                    │  ┌─────────────────────────────────────────────┐ │
//!                    │  │  config · observability · lifecycle         │ │
//!                    │  └─────────────────────────────────────────────┘ │
//!                    └──────────────────────────────────────────────────┘
//! ```

pub mod bridge;
pub mod config;
pub mod lifecycle;
pub mod observability;
pub mod proxy;
pub mod sniff;

pub use config::schema::ProxyConfig;
pub use lifecycle::Shutdown;
pub use proxy::Proxy;
pub use sniff::SniffServer;
