//! # tabletmaster
//!
//! Leader-gated control plane for a fleet of tablet servers:
//! - Every RPC is admitted only once the catalog is initialized and, for
//!   catalog operations, only on the leader
//! - Tablet servers register and heartbeat; the master answers with
//!   directives (re-register, send a full tablet report, new master config)
//! - Catalog operations are forwarded to a pluggable catalog store
//! - Master membership, discovery and coordinated state dumps
//! - Load balancer control
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │            Master group                  │
//! │  leader: answers heartbeats + catalog    │
//! │  followers: refuse with NOT_THE_LEADER   │
//! └───────────┬──────────────────────────────┘
//!             │ HTTP/JSON heartbeats
//!   ┌─────────┴──────────┬──────────────┐
//!   │                    │              │
//! ┌─▼──────────┐   ┌─────▼──────┐   ┌───▼────────┐
//! │ TServer 1  │   │ TServer 2  │   │ TServer 3  │
//! └────────────┘   └────────────┘   └────────────┘
//! ```
//!
//! ## Usage
//!
//! ### Start a master
//! ```bash
//! tabletmaster-master serve \
//!   --id m1 \
//!   --bind 0.0.0.0:7100 \
//!   --masters m1@127.0.0.1:7100,m2@127.0.0.1:7101 \
//!   --leader
//! ```
//!
//! ### Start a tablet server
//! ```bash
//! tabletmaster-tserver serve \
//!   --id ts-1 \
//!   --bind 0.0.0.0:9100 \
//!   --masters 127.0.0.1:7100,127.0.0.1:7101
//! ```
//!
//! ### Use the CLI
//! ```bash
//! tabletmaster list-tservers --master 127.0.0.1:7100
//! tabletmaster dump --peers
//! tabletmaster set-load-balancer off
//! ```

#![allow(clippy::result_large_err)]

pub mod common;
pub mod master;
pub mod tserver;

// Re-export commonly used types
pub use common::{Config, Error, Result};
pub use master::{Master, MasterClient, MasterService};
pub use tserver::Heartbeater;

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");
