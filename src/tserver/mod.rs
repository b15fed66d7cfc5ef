//! Tablet server side of the heartbeat protocol

pub mod heartbeater;

pub use heartbeater::{Heartbeater, HttpMasterProxy, LocalTablets, MasterProxy};
