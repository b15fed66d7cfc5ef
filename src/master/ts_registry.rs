//! Tablet server registry
//!
//! In-memory table of tablet server descriptors keyed by permanent uuid.
//! The map lock is only held to insert or fetch a descriptor; each
//! descriptor guards its own mutable state, so heartbeats from different
//! servers never contend with each other.

use crate::common::{Error, Result};
use crate::master::messages::{NodeInstance, TabletServerEntry, TsInfo, TsRegistration};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};

#[derive(Debug)]
struct DescriptorState {
    latest_seqno: i64,
    registration: TsRegistration,
    last_heartbeat: Instant,
    last_heartbeat_seqno: Option<u64>,
    num_live_replicas: i32,
    has_tablet_report: bool,
}

/// One registered tablet server
#[derive(Debug)]
pub struct TsDescriptor {
    permanent_uuid: String,
    state: Mutex<DescriptorState>,
}

impl TsDescriptor {
    fn new(instance: &NodeInstance, registration: TsRegistration) -> Self {
        Self {
            permanent_uuid: instance.permanent_uuid.clone(),
            state: Mutex::new(DescriptorState {
                latest_seqno: instance.instance_seqno,
                registration,
                last_heartbeat: Instant::now(),
                last_heartbeat_seqno: None,
                num_live_replicas: 0,
                has_tablet_report: false,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, DescriptorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Re-register: overwrite the registration. A retry from the same
    /// incarnation keeps heartbeat and report history; a newer incarnation
    /// starts its heartbeat sequence over and owes a full report.
    fn register(&self, instance: &NodeInstance, registration: TsRegistration) -> Result<()> {
        let mut state = self.state();
        if instance.instance_seqno < state.latest_seqno {
            return Err(Error::IllegalState(format!(
                "cannot register {} with sequence number {}: already have a registration from sequence number {}",
                self.permanent_uuid, instance.instance_seqno, state.latest_seqno
            )));
        }
        if instance.instance_seqno == state.latest_seqno {
            tracing::info!(
                "Processing retry of registration from tablet server {}",
                instance
            );
        } else {
            tracing::info!(
                "Tablet server {} restarted (previous sequence number {})",
                instance,
                state.latest_seqno
            );
            state.last_heartbeat_seqno = None;
            state.has_tablet_report = false;
        }
        state.latest_seqno = instance.instance_seqno;
        state.registration = registration;
        Ok(())
    }

    pub fn permanent_uuid(&self) -> &str {
        &self.permanent_uuid
    }

    pub fn latest_seqno(&self) -> i64 {
        self.state().latest_seqno
    }

    pub fn instance(&self) -> NodeInstance {
        NodeInstance::new(self.permanent_uuid.clone(), self.latest_seqno())
    }

    pub fn registration(&self) -> TsRegistration {
        self.state().registration.clone()
    }

    pub fn ts_info(&self) -> TsInfo {
        TsInfo {
            permanent_uuid: self.permanent_uuid.clone(),
            rpc_addresses: self.state().registration.rpc_addresses.clone(),
        }
    }

    /// Record liveness. Last write wins, except that a heartbeat carrying a
    /// sequence number not newer than the last applied one is dropped.
    /// Returns whether the update was applied.
    pub fn update_heartbeat(&self, num_live_replicas: i32, heartbeat_seqno: Option<u64>) -> bool {
        let mut state = self.state();
        if let (Some(seqno), Some(last)) = (heartbeat_seqno, state.last_heartbeat_seqno) {
            if seqno <= last {
                return false;
            }
        }
        if heartbeat_seqno.is_some() {
            state.last_heartbeat_seqno = heartbeat_seqno;
        }
        state.last_heartbeat = Instant::now();
        state.num_live_replicas = num_live_replicas;
        true
    }

    pub fn time_since_heartbeat(&self) -> Duration {
        self.state().last_heartbeat.elapsed()
    }

    pub fn num_live_replicas(&self) -> i32 {
        self.state().num_live_replicas
    }

    pub fn has_tablet_report(&self) -> bool {
        self.state().has_tablet_report
    }

    pub fn set_has_tablet_report(&self, has_report: bool) {
        self.state().has_tablet_report = has_report;
    }

    pub fn to_entry(&self) -> TabletServerEntry {
        let state = self.state();
        TabletServerEntry {
            instance_id: NodeInstance::new(self.permanent_uuid.clone(), state.latest_seqno),
            registration: state.registration.clone(),
            millis_since_heartbeat: state.last_heartbeat.elapsed().as_millis() as u64,
            num_live_replicas: state.num_live_replicas,
        }
    }
}

/// Registry of known tablet servers
#[derive(Default)]
pub struct TabletServerRegistry {
    servers: RwLock<HashMap<String, Arc<TsDescriptor>>>,
}

impl TabletServerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or re-register; duplicates overwrite rather than fail.
    pub fn register(
        &self,
        instance: &NodeInstance,
        registration: TsRegistration,
    ) -> Result<Arc<TsDescriptor>> {
        if instance.permanent_uuid.is_empty() {
            return Err(Error::InvalidArgument(
                "tablet server registration without permanent uuid".into(),
            ));
        }

        let existing = self
            .servers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&instance.permanent_uuid)
            .cloned();
        if let Some(desc) = existing {
            desc.register(instance, registration)?;
            return Ok(desc);
        }

        // Lost a race with a concurrent first registration: fall back to re-register.
        let raced = {
            let mut servers = self.servers.write().unwrap_or_else(PoisonError::into_inner);
            match servers.entry(instance.permanent_uuid.clone()) {
                Entry::Occupied(entry) => entry.get().clone(),
                Entry::Vacant(entry) => {
                    let desc = Arc::new(TsDescriptor::new(instance, registration.clone()));
                    entry.insert(desc.clone());
                    tracing::info!("Registered new tablet server {}", instance);
                    return Ok(desc);
                }
            }
        };
        raced.register(instance, registration)?;
        Ok(raced)
    }

    /// Find the descriptor for this exact incarnation.
    pub fn lookup(&self, instance: &NodeInstance) -> Result<Arc<TsDescriptor>> {
        let desc = self.get(&instance.permanent_uuid).ok_or_else(|| {
            Error::NotFound(format!("unknown tablet server {}", instance.permanent_uuid))
        })?;
        let latest = desc.latest_seqno();
        if instance.instance_seqno != latest {
            return Err(Error::NotFound(format!(
                "mismatched instance sequence number {} for tablet server {}, expected {}",
                instance.instance_seqno, instance.permanent_uuid, latest
            )));
        }
        Ok(desc)
    }

    pub fn get(&self, permanent_uuid: &str) -> Option<Arc<TsDescriptor>> {
        self.servers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(permanent_uuid)
            .cloned()
    }

    /// Every descriptor, in no particular order.
    pub fn list_all(&self) -> Vec<Arc<TsDescriptor>> {
        self.servers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.servers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
