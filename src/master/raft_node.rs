//! Consensus group handle
//!
//! Leader election and log replication live outside this crate. The master
//! only needs a view of the group: its own role and term, the replicated
//! master configuration, and a way to be told about role changes.
//! `RaftNode` is the local holder of that view.

use crate::common::{Error, Result};
use crate::master::messages::{HostPort, MemberType, RaftConfig, RaftPeer, RaftRole};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

/// Role and term as observed by the local process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleChange {
    pub role: RaftRole,
    pub term: u64,
}

/// What the master needs from the consensus layer
pub trait ConsensusGroup: Send + Sync {
    fn role(&self) -> RaftRole;

    fn term(&self) -> u64;

    /// Committed master configuration, `None` while it is not yet known.
    fn current_config(&self) -> Result<Option<RaftConfig>>;

    /// Consensus membership including the local process.
    fn peers(&self) -> Result<Vec<RaftPeer>>;

    /// Stream of role transitions.
    fn subscribe(&self) -> watch::Receiver<RoleChange>;

    /// Leave the group after being removed from its configuration.
    fn enter_shell_mode(&self) -> Result<()>;
}

struct RaftState {
    role: RaftRole,
    term: u64,
    config: Option<RaftConfig>,
}

/// Raft node state
pub struct RaftNode {
    node_id: String,
    state: Mutex<RaftState>,
    role_tx: watch::Sender<RoleChange>,
}

impl RaftNode {
    pub fn new(node_id: String) -> Self {
        let (role_tx, _) = watch::channel(RoleChange {
            role: RaftRole::Follower,
            term: 0,
        });
        Self {
            node_id,
            state: Mutex::new(RaftState {
                role: RaftRole::Follower,
                term: 0,
                config: None,
            }),
            role_tx,
        }
    }

    /// Node whose committed configuration lists `peers` (uuid, address).
    pub fn with_peers(node_id: String, peers: Vec<(String, Option<HostPort>)>) -> Self {
        let node = Self::new(node_id);
        node.set_config(
            peers
                .into_iter()
                .map(|(permanent_uuid, last_known_addr)| RaftPeer {
                    permanent_uuid,
                    member_type: MemberType::Voter,
                    last_known_addr,
                })
                .collect(),
        );
        node
    }

    fn state(&self) -> MutexGuard<'_, RaftState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, role: RaftRole, term: u64) {
        self.role_tx.send_replace(RoleChange { role, term });
    }

    /// Take leadership in a new term.
    pub fn become_leader(&self) {
        let term = {
            let mut state = self.state();
            if state.role == RaftRole::NonParticipant {
                tracing::warn!("Node {} is in shell mode, refusing leadership", self.node_id);
                return;
            }
            state.term += 1;
            state.role = RaftRole::Leader;
            state.term
        };
        tracing::info!("Node {} became leader at term {}", self.node_id, term);
        self.publish(RaftRole::Leader, term);
    }

    /// Replace the committed membership, bumping the config version.
    pub fn set_config(&self, peers: Vec<RaftPeer>) -> i64 {
        let mut state = self.state();
        let opid_index = state.config.as_ref().map_or(1, |c| c.opid_index + 1);
        state.config = Some(RaftConfig { opid_index, peers });
        opid_index
    }
}

impl ConsensusGroup for RaftNode {
    fn role(&self) -> RaftRole {
        self.state().role
    }

    fn term(&self) -> u64 {
        self.state().term
    }

    fn current_config(&self) -> Result<Option<RaftConfig>> {
        let state = self.state();
        if state.role == RaftRole::NonParticipant {
            return Err(Error::IllegalState(format!(
                "node {} is not part of a raft group",
                self.node_id
            )));
        }
        Ok(state.config.clone())
    }

    fn peers(&self) -> Result<Vec<RaftPeer>> {
        self.current_config()?
            .map(|config| config.peers)
            .ok_or_else(|| Error::ServiceUnavailable("raft config not yet committed".into()))
    }

    fn subscribe(&self) -> watch::Receiver<RoleChange> {
        self.role_tx.subscribe()
    }

    fn enter_shell_mode(&self) -> Result<()> {
        let term = {
            let mut state = self.state();
            if state.role == RaftRole::NonParticipant {
                return Err(Error::IllegalState(format!(
                    "node {} is already in shell mode",
                    self.node_id
                )));
            }
            state.role = RaftRole::NonParticipant;
            state.config = None;
            state.term
        };
        tracing::warn!("Node {} removed from raft group, entering shell mode", self.node_id);
        self.publish(RaftRole::NonParticipant, term);
        Ok(())
    }
}
