//! Leadership gate
//!
//! Every RPC passes through here before touching the catalog. A failed check
//! never surfaces as a transport error: the error is written into the
//! response envelope and the caller answers normally.

use crate::common::{Error, Result};
use crate::master::leadership::{LeadershipSnapshot, LeadershipState};
use crate::master::messages::{MasterErrorCode, MasterResponse};

/// Which checks an operation requires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateMode {
    /// Catalog bootstrapped; leadership not required (heartbeats, registration, dumps)
    InitializedOnly,
    /// Catalog bootstrapped and this process is the leader (all catalog operations)
    InitializedAndLeader,
}

#[derive(Debug)]
pub enum GateDecision {
    Proceed,
    RespondNotInitialized(Error),
    RespondNotLeader(Error),
}

impl LeadershipSnapshot {
    pub fn check(&self, mode: GateMode) -> GateDecision {
        if let Err(e) = self.catalog_status() {
            return GateDecision::RespondNotInitialized(e);
        }
        if mode == GateMode::InitializedAndLeader {
            if let Err(e) = self.leader_status() {
                return GateDecision::RespondNotLeader(e);
            }
        }
        GateDecision::Proceed
    }

    /// Run the check; on failure fill the response error and return false.
    pub fn check_or_respond<R: MasterResponse>(&self, mode: GateMode, resp: &mut R) -> bool {
        match self.check(mode) {
            GateDecision::Proceed => true,
            GateDecision::RespondNotInitialized(e) => {
                resp.set_error(MasterErrorCode::CatalogManagerNotInitialized, &e);
                false
            }
            GateDecision::RespondNotLeader(e) => {
                resp.set_error(MasterErrorCode::NotTheLeader, &e);
                false
            }
        }
    }
}

/// Runs gated operations: check, delegate, normalize errors.
#[derive(Clone)]
pub struct Gate {
    leadership: LeadershipState,
}

impl Gate {
    pub fn new(leadership: LeadershipState) -> Self {
        Self { leadership }
    }

    pub fn leadership(&self) -> &LeadershipState {
        &self.leadership
    }

    /// Check `mode`, then run `op` on a blocking worker while holding the
    /// snapshot. An `Err` from `op` becomes UNKNOWN_ERROR unless `op` already
    /// set a specific error. Only a failed dispatch is returned as `Err`.
    pub async fn run<R, F>(&self, mode: GateMode, op: F) -> Result<R>
    where
        R: MasterResponse,
        F: FnOnce(&LeadershipSnapshot, &mut R) -> Result<()> + Send + 'static,
    {
        let snapshot = self.leadership.snapshot().await;
        let mut resp = R::default();
        if !snapshot.check_or_respond(mode, &mut resp) {
            return Ok(resp);
        }

        tokio::task::spawn_blocking(move || {
            if let Err(e) = op(&snapshot, &mut resp) {
                tracing::debug!("Gated operation failed: {}", e);
                resp.set_unknown_error_if_unset(&e);
            }
            drop(snapshot);
            resp
        })
        .await
        .map_err(|e| Error::Internal(format!("dispatch failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::master::messages::{ListTablesResponse, RaftRole, StatusCode};
    use crate::master::raft_node::RoleChange;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    async fn leadership(initialized: bool, role: RaftRole) -> LeadershipState {
        let state = LeadershipState::new(Duration::from_millis(100));
        if initialized {
            state.mark_initialized().await;
        }
        state.apply(RoleChange { role, term: 1 }).await;
        state
    }

    #[tokio::test]
    async fn test_not_leader_never_runs_delegate() {
        let gate = Gate::new(leadership(true, RaftRole::Follower).await);
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let resp: ListTablesResponse = gate
            .run(GateMode::InitializedAndLeader, move |_, _| {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap();
        assert!(!ran.load(Ordering::SeqCst));
        let err = resp.error.unwrap();
        assert_eq!(err.code, MasterErrorCode::NotTheLeader);
        assert_eq!(err.status.code, StatusCode::IllegalState);
    }

    #[tokio::test]
    async fn test_not_initialized() {
        let gate = Gate::new(leadership(false, RaftRole::Leader).await);
        let resp: ListTablesResponse = gate
            .run(GateMode::InitializedOnly, |_, _| Ok(()))
            .await
            .unwrap();
        assert_eq!(
            resp.error.unwrap().code,
            MasterErrorCode::CatalogManagerNotInitialized
        );
    }

    #[tokio::test]
    async fn test_initialized_only_ignores_leadership() {
        let gate = Gate::new(leadership(true, RaftRole::Follower).await);
        let resp: ListTablesResponse = gate
            .run(GateMode::InitializedOnly, |snap, _| {
                assert_eq!(snap.role(), Some(RaftRole::Follower));
                Ok(())
            })
            .await
            .unwrap();
        assert!(resp.is_ok());
    }

    #[tokio::test]
    async fn test_delegate_error_normalized_to_unknown() {
        let gate = Gate::new(leadership(true, RaftRole::Leader).await);
        let resp: ListTablesResponse = gate
            .run(GateMode::InitializedAndLeader, |_, _| {
                Err(Error::Catalog("disk full".into()))
            })
            .await
            .unwrap();
        let err = resp.error.unwrap();
        assert_eq!(err.code, MasterErrorCode::UnknownError);
        assert!(err.status.message.contains("disk full"));
    }
}
