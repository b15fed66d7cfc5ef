//! Process-wide leadership state
//!
//! Whether the catalog finished loading and whether this process is the
//! leader are held behind one fair reader/writer lock. Requests take a
//! [`LeadershipSnapshot`] (shared guard) for their whole lifetime; a role
//! transition takes the exclusive side and therefore waits for in-flight
//! requests, while new requests queue behind the pending transition.

use crate::common::{Error, Result};
use crate::master::messages::RaftRole;
use crate::master::raft_node::{ConsensusGroup, RoleChange};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedRwLockReadGuard, RwLock};

#[derive(Debug, Clone)]
struct LeaderState {
    initialized: bool,
    init_error: Option<String>,
    role: RaftRole,
    term: u64,
    /// Term in which the leader finished taking over; requests are refused until then
    leader_ready_term: Option<u64>,
    /// Bumped on every transition
    version: u64,
}

/// Shared leadership context, passed explicitly to every gate check.
#[derive(Clone)]
pub struct LeadershipState {
    inner: Arc<RwLock<LeaderState>>,
    wait: Duration,
}

impl LeadershipState {
    /// `wait` bounds how long a request may queue behind a transition.
    pub fn new(wait: Duration) -> Self {
        Self {
            inner: Arc::new(RwLock::new(LeaderState {
                initialized: false,
                init_error: None,
                role: RaftRole::Follower,
                term: 0,
                leader_ready_term: None,
                version: 0,
            })),
            wait,
        }
    }

    /// Acquire a read token; never blocks longer than the configured wait.
    pub async fn snapshot(&self) -> LeadershipSnapshot {
        match tokio::time::timeout(self.wait, self.inner.clone().read_owned()).await {
            Ok(guard) => LeadershipSnapshot {
                guard: Some(guard),
                wait: self.wait,
            },
            Err(_) => {
                tracing::warn!(
                    "Timed out after {:?} waiting for leadership state",
                    self.wait
                );
                LeadershipSnapshot {
                    guard: None,
                    wait: self.wait,
                }
            }
        }
    }

    /// Catalog bootstrap completed.
    pub async fn mark_initialized(&self) {
        let mut state = self.inner.write().await;
        state.initialized = true;
        state.init_error = None;
        state.version += 1;
        tracing::info!("Catalog manager initialized");
    }

    /// Catalog bootstrap failed; every request reports `reason`.
    pub async fn mark_init_failed(&self, reason: String) {
        let mut state = self.inner.write().await;
        tracing::error!("Catalog manager failed to initialize: {}", reason);
        state.initialized = false;
        state.init_error = Some(reason);
        state.version += 1;
    }

    /// Apply a role change published by the consensus layer.
    pub async fn apply(&self, change: RoleChange) {
        let mut state = self.inner.write().await;
        if state.role == change.role && state.term == change.term {
            return;
        }
        tracing::info!(
            "Leadership transition: {} (term {}) -> {} (term {})",
            state.role,
            state.term,
            change.role,
            change.term
        );
        state.role = change.role;
        state.term = change.term;
        state.leader_ready_term = (change.role == RaftRole::Leader).then_some(change.term);
        state.version += 1;
    }
}

/// Follow role changes from the consensus layer until it goes away.
pub fn spawn_role_watcher(
    consensus: &dyn ConsensusGroup,
    leadership: LeadershipState,
) -> tokio::task::JoinHandle<()> {
    let mut rx = consensus.subscribe();
    tokio::spawn(async move {
        let initial = *rx.borrow_and_update();
        leadership.apply(initial).await;
        while rx.changed().await.is_ok() {
            let change = *rx.borrow_and_update();
            leadership.apply(change).await;
        }
        tracing::debug!("Role watcher stopped");
    })
}

/// Point-in-time view of leadership, held for the duration of one request.
pub struct LeadershipSnapshot {
    guard: Option<OwnedRwLockReadGuard<LeaderState>>,
    wait: Duration,
}

impl LeadershipSnapshot {
    /// Ok once the catalog finished bootstrapping.
    pub fn catalog_status(&self) -> Result<()> {
        let state = self.guard.as_ref().ok_or_else(|| {
            Error::ServiceUnavailable(format!(
                "leadership transition in progress, gave up after {:?}",
                self.wait
            ))
        })?;
        if state.initialized {
            return Ok(());
        }
        Err(Error::NotInitialized(
            state
                .init_error
                .clone()
                .unwrap_or_else(|| "catalog manager is still loading".to_string()),
        ))
    }

    /// Ok when initialized and this process is the ready leader.
    pub fn leader_status(&self) -> Result<()> {
        self.catalog_status()?;
        let state = self
            .guard
            .as_ref()
            .ok_or_else(|| Error::Internal("leadership guard missing".into()))?;
        if state.role != RaftRole::Leader {
            return Err(Error::NotLeader(format!(
                "this master is a {} at term {}",
                state.role, state.term
            )));
        }
        if state.leader_ready_term != Some(state.term) {
            return Err(Error::ServiceUnavailable(format!(
                "leader not yet ready to serve requests at term {}",
                state.term
            )));
        }
        Ok(())
    }

    pub fn is_leader(&self) -> bool {
        self.leader_status().is_ok()
    }

    pub fn role(&self) -> Option<RaftRole> {
        self.guard.as_ref().map(|s| s.role)
    }

    pub fn term(&self) -> Option<u64> {
        self.guard.as_ref().map(|s| s.term)
    }

    pub fn version(&self) -> Option<u64> {
        self.guard.as_ref().map(|s| s.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::master::raft_node::RaftNode;

    fn leader(term: u64) -> RoleChange {
        RoleChange {
            role: RaftRole::Leader,
            term,
        }
    }

    #[tokio::test]
    async fn test_uninitialized_snapshot() {
        let state = LeadershipState::new(Duration::from_millis(100));
        let snap = state.snapshot().await;
        assert!(matches!(snap.catalog_status(), Err(Error::NotInitialized(_))));
        assert!(matches!(snap.leader_status(), Err(Error::NotInitialized(_))));
    }

    #[tokio::test]
    async fn test_leader_snapshot() {
        let state = LeadershipState::new(Duration::from_millis(100));
        state.mark_initialized().await;
        assert!(matches!(
            state.snapshot().await.leader_status(),
            Err(Error::NotLeader(_))
        ));

        state.apply(leader(2)).await;
        let snap = state.snapshot().await;
        assert!(snap.is_leader());
        assert_eq!(snap.term(), Some(2));
        assert_eq!(snap.version(), Some(2));
    }

    #[tokio::test]
    async fn test_init_failure_reason_is_reported() {
        let state = LeadershipState::new(Duration::from_millis(100));
        state.mark_init_failed("sys catalog corrupted".into()).await;
        let err = state.snapshot().await.catalog_status().unwrap_err();
        assert!(err.to_string().contains("sys catalog corrupted"));
    }

    #[tokio::test]
    async fn test_snapshot_times_out_behind_transition() {
        let state = LeadershipState::new(Duration::from_millis(20));
        let writer = state.inner.clone().write_owned().await;
        let snap = state.snapshot().await;
        assert!(matches!(
            snap.catalog_status(),
            Err(Error::ServiceUnavailable(_))
        ));
        drop(writer);
        assert!(state.snapshot().await.role().is_some());
    }

    #[tokio::test]
    async fn test_transition_waits_for_readers() {
        let state = LeadershipState::new(Duration::from_millis(500));
        state.mark_initialized().await;
        state.apply(leader(1)).await;

        let reader = state.snapshot().await;
        let transition = {
            let state = state.clone();
            tokio::spawn(async move {
                state
                    .apply(RoleChange {
                        role: RaftRole::Follower,
                        term: 2,
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!transition.is_finished());
        assert!(reader.is_leader());

        drop(reader);
        transition.await.unwrap();
        assert!(!state.snapshot().await.is_leader());
    }

    #[tokio::test]
    async fn test_role_watcher_follows_raft() {
        let raft = RaftNode::new("m1".into());
        let state = LeadershipState::new(Duration::from_millis(100));
        state.mark_initialized().await;
        let handle = spawn_role_watcher(&raft, state.clone());

        raft.become_leader();
        for _ in 0..50 {
            if state.snapshot().await.is_leader() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(state.snapshot().await.is_leader());
        handle.abort();
    }
}
