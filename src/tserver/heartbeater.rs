//! Worker-side heartbeat loop
//!
//! Heartbeats every configured master and follows the directives in the
//! answers: re-register, resend a full tablet report, adopt a newer master
//! config. Only the leader acts on a heartbeat; followers answer with
//! `leader_master = false`, which is how the worker finds the leader.

use crate::common::Result;
use crate::master::client::MasterClient;
use crate::master::messages::*;
use async_trait::async_trait;
use futures_util::future::join_all;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Heartbeat transport to one master
#[async_trait]
pub trait MasterProxy: Send + Sync {
    async fn heartbeat(&self, master: &str, req: TsHeartbeatRequest) -> Result<TsHeartbeatResponse>;
}

pub struct HttpMasterProxy {
    client: MasterClient,
}

impl HttpMasterProxy {
    pub fn new(client: MasterClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MasterProxy for HttpMasterProxy {
    async fn heartbeat(&self, master: &str, req: TsHeartbeatRequest) -> Result<TsHeartbeatResponse> {
        self.client.heartbeat(master, &req).await
    }
}

#[derive(Default)]
struct TabletsState {
    tablets: BTreeMap<String, ReportedTablet>,
    /// Changed since the last acknowledged report, with the change number
    dirty: BTreeMap<String, i64>,
    removed: BTreeMap<String, i64>,
    /// Shared by changes and reports; a report covers every change numbered
    /// below its sequence number.
    sequence_number: i64,
}

impl TabletsState {
    fn next_sequence_number(&mut self) -> i64 {
        self.sequence_number += 1;
        self.sequence_number
    }
}

/// Tablets hosted by this worker, with the changes not yet reported.
#[derive(Default)]
pub struct LocalTablets {
    state: Mutex<TabletsState>,
}

impl LocalTablets {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, TabletsState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn upsert(&self, tablet_id: impl Into<String>, state: TabletState, role: Option<RaftRole>) {
        let tablet_id = tablet_id.into();
        let mut guard = self.state();
        let change = guard.next_sequence_number();
        guard.removed.remove(&tablet_id);
        guard.dirty.insert(tablet_id.clone(), change);
        guard.tablets.insert(
            tablet_id.clone(),
            ReportedTablet {
                tablet_id,
                state,
                role,
            },
        );
    }

    pub fn remove(&self, tablet_id: &str) {
        let mut guard = self.state();
        if guard.tablets.remove(tablet_id).is_some() {
            let change = guard.next_sequence_number();
            guard.dirty.remove(tablet_id);
            guard.removed.insert(tablet_id.to_string(), change);
        }
    }

    pub fn num_live(&self) -> i32 {
        self.state()
            .tablets
            .values()
            .filter(|t| t.state == TabletState::Running)
            .count() as i32
    }

    /// Every hosted tablet.
    pub fn full_report(&self) -> TabletReport {
        let mut guard = self.state();
        TabletReport {
            sequence_number: guard.next_sequence_number(),
            is_incremental: false,
            updated_tablets: guard.tablets.values().cloned().collect(),
            removed_tablet_ids: Vec::new(),
        }
    }

    /// Only what changed since the last acknowledged report.
    pub fn incremental_report(&self) -> TabletReport {
        let mut guard = self.state();
        TabletReport {
            sequence_number: guard.next_sequence_number(),
            is_incremental: true,
            updated_tablets: guard
                .dirty
                .keys()
                .filter_map(|id| guard.tablets.get(id).cloned())
                .collect(),
            removed_tablet_ids: guard.removed.keys().cloned().collect(),
        }
    }

    /// The master applied `report`; forget the changes it carried. Changes
    /// made after the report was built stay pending.
    pub fn acknowledge(&self, report: &TabletReport) {
        let covered = report.sequence_number;
        let mut guard = self.state();
        guard.dirty.retain(|_, change| *change > covered);
        guard.removed.retain(|_, change| *change > covered);
    }
}

/// What the worker knows about one master
#[derive(Debug, Clone)]
pub struct MasterSession {
    pub master_instance: Option<NodeInstance>,
    pub is_leader: bool,
    pub needs_register: bool,
    pub needs_full_report: bool,
}

impl Default for MasterSession {
    fn default() -> Self {
        Self {
            master_instance: None,
            is_leader: false,
            needs_register: true,
            needs_full_report: true,
        }
    }
}

#[derive(Default)]
struct HeartbeaterState {
    sessions: HashMap<String, MasterSession>,
    config_index: i64,
    master_config: Option<RaftConfig>,
    leader: Option<String>,
}

pub struct Heartbeater {
    instance: NodeInstance,
    registration: TsRegistration,
    masters: Vec<String>,
    proxy: Arc<dyn MasterProxy>,
    tablets: Arc<LocalTablets>,
    state: Mutex<HeartbeaterState>,
    heartbeat_seqno: AtomicU64,
}

impl Heartbeater {
    pub fn new(
        instance: NodeInstance,
        registration: TsRegistration,
        masters: Vec<String>,
        proxy: Arc<dyn MasterProxy>,
        tablets: Arc<LocalTablets>,
    ) -> Self {
        Self {
            instance,
            registration,
            masters,
            proxy,
            tablets,
            state: Mutex::new(HeartbeaterState {
                config_index: -1,
                ..Default::default()
            }),
            heartbeat_seqno: AtomicU64::new(0),
        }
    }

    fn state(&self) -> MutexGuard<'_, HeartbeaterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn instance(&self) -> &NodeInstance {
        &self.instance
    }

    /// Address of the master that last claimed leadership.
    pub fn leader(&self) -> Option<String> {
        self.state().leader.clone()
    }

    /// Newest master config version seen.
    pub fn config_index(&self) -> i64 {
        self.state().config_index
    }

    pub fn master_config(&self) -> Option<RaftConfig> {
        self.state().master_config.clone()
    }

    pub fn session(&self, master: &str) -> Option<MasterSession> {
        self.state().sessions.get(master).cloned()
    }

    fn build_request(&self, master: &str) -> TsHeartbeatRequest {
        let (needs_register, needs_full_report, config_index) = {
            let mut state = self.state();
            let config_index = state.config_index;
            let session = state.sessions.entry(master.to_string()).or_default();
            (session.needs_register, session.needs_full_report, config_index)
        };
        let tablet_report = if needs_full_report {
            self.tablets.full_report()
        } else {
            self.tablets.incremental_report()
        };
        TsHeartbeatRequest {
            ts_instance: self.instance.clone(),
            registration: needs_register.then(|| self.registration.clone()),
            tablet_report: Some(tablet_report),
            config_index,
            num_live_tablets: self.tablets.num_live(),
            heartbeat_seqno: Some(self.heartbeat_seqno.fetch_add(1, Ordering::SeqCst) + 1),
        }
    }

    /// One exchange with `master`. Transport failures leave the session as
    /// it was, so the next attempt resends the same directives.
    pub async fn heartbeat_once(&self, master: &str) -> Result<TsHeartbeatResponse> {
        let req = self.build_request(master);
        let sent_registration = req.registration.is_some();
        let report = req.tablet_report.clone();

        let resp = match self.proxy.heartbeat(master, req).await {
            Ok(resp) => resp,
            Err(e) => {
                warn!("Heartbeat to master {} failed: {}", master, e);
                return Err(e);
            }
        };

        if let Some(err) = &resp.error {
            debug!("Master {} declined heartbeat: {}", master, err.status.message);
            return Ok(resp);
        }

        let mut state = self.state();
        if resp.leader_master {
            if state.leader.as_deref() != Some(master) {
                info!("Master {} is the leader", master);
            }
            state.leader = Some(master.to_string());
        } else if state.leader.as_deref() == Some(master) {
            info!("Master {} is no longer the leader", master);
            state.leader = None;
        }

        if let Some(config) = &resp.master_config {
            if config.opid_index > state.config_index {
                info!(
                    "Adopting master config {} ({} peers)",
                    config.opid_index,
                    config.peers.len()
                );
                state.config_index = config.opid_index;
                state.master_config = Some(config.clone());
            }
        }

        let session = state.sessions.entry(master.to_string()).or_default();
        session.master_instance = resp.master_instance.clone();
        session.is_leader = resp.leader_master;
        if !resp.leader_master {
            return Ok(resp);
        }

        if resp.needs_reregister {
            info!("Master {} asked {} to re-register", master, self.instance);
            session.needs_register = true;
        } else if sent_registration {
            session.needs_register = false;
        }

        if resp.needs_full_tablet_report {
            session.needs_full_report = true;
        } else if let (Some(report), Some(_)) = (&report, &resp.tablet_report) {
            session.needs_full_report = false;
            self.tablets.acknowledge(report);
        }
        drop(state);

        if let Some(ack) = &resp.tablet_report {
            for update in ack.tablets.iter().filter(|u| u.state_msg.is_some()) {
                debug!(
                    "Master {} on tablet {}: {:?}",
                    master, update.tablet_id, update.state_msg
                );
            }
        }
        Ok(resp)
    }

    /// Heartbeat every configured master concurrently.
    pub async fn heartbeat_all(&self) -> usize {
        let results = join_all(self.masters.iter().map(|m| self.heartbeat_once(m))).await;
        results.iter().filter(|r| r.is_ok()).count()
    }

    /// Start the periodic heartbeat task; each period gets up to 10% jitter.
    pub fn start(self: Arc<Self>, period: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let jitter_ms = (period.as_millis() as u64 / 10).max(1);
            loop {
                let jitter = Duration::from_millis(rand::random::<u64>() % jitter_ms);
                tokio::time::sleep(period + jitter).await;
                let reached = self.heartbeat_all().await;
                if reached == 0 && !self.masters.is_empty() {
                    warn!("No master reachable from {}", self.instance);
                }
            }
        })
    }
}
