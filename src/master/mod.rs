//! Master control plane
//!
//! The master is responsible for:
//! - Gating every RPC on catalog initialization and leadership
//! - Tablet server registration and heartbeats
//! - Forwarding catalog operations to the catalog store
//! - Master membership, discovery and coordinated state dumps
//! - Load balancer control

pub mod balancer;
pub mod catalog;
pub mod client;
pub mod gate;
pub mod heartbeat;
pub mod http;
pub mod leadership;
pub mod mem_catalog;
pub mod messages;
pub mod raft_node;
pub mod server;
pub mod service;
pub mod topology;
pub mod ts_registry;

pub use client::MasterClient;
pub use server::Master;
pub use service::MasterService;
