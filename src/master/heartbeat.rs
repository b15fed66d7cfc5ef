//! Tablet server heartbeat protocol
//!
//! One exchange combines registration, lookup, liveness and tablet report
//! reconciliation. A fresh tablet server converges in at most two round
//! trips: the first heartbeat is answered with re-register and full-report
//! directives, the second carries both.
//!
//! Only two failures abort an exchange at the transport level: a rejected
//! registration and a tablet report the catalog could not apply. Everything
//! else is answered with a normal response.

use crate::common::{Error, Result};
use crate::master::catalog::{CatalogFacade, StepOutcome};
use crate::master::gate::GateMode;
use crate::master::leadership::LeadershipState;
use crate::master::messages::{NodeInstance, RaftConfig, TsHeartbeatRequest, TsHeartbeatResponse};
use crate::master::raft_node::ConsensusGroup;
use crate::master::ts_registry::TabletServerRegistry;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct HeartbeatCoordinator {
    instance: NodeInstance,
    leadership: LeadershipState,
    registry: Arc<TabletServerRegistry>,
    catalog: CatalogFacade,
    consensus: Arc<dyn ConsensusGroup>,
}

impl HeartbeatCoordinator {
    pub fn new(
        instance: NodeInstance,
        leadership: LeadershipState,
        registry: Arc<TabletServerRegistry>,
        catalog: CatalogFacade,
        consensus: Arc<dyn ConsensusGroup>,
    ) -> Self {
        Self {
            instance,
            leadership,
            registry,
            catalog,
            consensus,
        }
    }

    /// Newer master config than the one the tablet server last saw, if any.
    fn config_update(&self, seen_index: i64) -> StepOutcome<Option<RaftConfig>> {
        match self.consensus.current_config() {
            Ok(Some(config)) if config.opid_index > seen_index => StepOutcome::Done(Some(config)),
            Ok(_) => StepOutcome::Done(None),
            Err(e) => StepOutcome::Degraded(e.prepend("Unable to fetch master config")),
        }
    }

    /// Process one heartbeat.
    pub async fn heartbeat(&self, req: TsHeartbeatRequest) -> Result<TsHeartbeatResponse> {
        let snapshot = self.leadership.snapshot().await;
        let mut resp = TsHeartbeatResponse::default();
        if !snapshot.check_or_respond(GateMode::InitializedOnly, &mut resp) {
            return Ok(resp);
        }

        resp.master_instance = Some(self.instance.clone());
        resp.leader_master = snapshot.is_leader();
        if !resp.leader_master {
            warn!(
                "Tablet server {} sent a heartbeat, but this master is not the leader",
                req.ts_instance
            );
            return Ok(resp);
        }

        match self.config_update(req.config_index) {
            StepOutcome::Done(config) => resp.master_config = config,
            StepOutcome::Degraded(e) => warn!("{}; will retry on the next heartbeat", e),
            StepOutcome::Abort(e) => return Err(e),
        }

        let ts_instance = req.ts_instance;
        if let Some(registration) = req.registration {
            if let Err(e) = self.registry.register(&ts_instance, registration) {
                warn!("Unable to register tablet server {}: {}", ts_instance, e);
                return Err(e.prepend("Unable to register tablet server"));
            }
        }

        let desc = match self.registry.lookup(&ts_instance) {
            Ok(desc) => desc,
            Err(e) if e.is_not_found() => {
                info!(
                    "Got heartbeat from unknown tablet server {}, asking it to re-register: {}",
                    ts_instance, e
                );
                resp.needs_reregister = true;
                resp.needs_full_tablet_report = true;
                return Ok(resp);
            }
            Err(e) => {
                warn!("Unable to lookup tablet server {}: {}", ts_instance, e);
                return Err(e.prepend("Unable to lookup TS"));
            }
        };

        let fresh = desc.update_heartbeat(req.num_live_tablets, req.heartbeat_seqno);
        if !fresh {
            debug!(
                "Skipping stale heartbeat #{:?} from {}",
                req.heartbeat_seqno, ts_instance
            );
        }

        if let Some(report) = req.tablet_report.filter(|_| fresh) {
            let catalog = self.catalog.clone();
            let report_desc = desc.clone();
            let outcome =
                tokio::task::spawn_blocking(move || catalog.apply_tablet_report(&report_desc, &report))
                    .await
                    .map_err(|e| Error::Internal(format!("tablet report dispatch failed: {}", e)))?;
            match outcome {
                StepOutcome::Done(updates) => resp.tablet_report = Some(updates),
                StepOutcome::Degraded(e) => warn!("Tablet report from {}: {}", ts_instance, e),
                StepOutcome::Abort(e) => {
                    warn!("Rejecting heartbeat from {}: {}", ts_instance, e);
                    return Err(e);
                }
            }
        }

        if !desc.has_tablet_report() {
            resp.needs_full_tablet_report = true;
        }

        drop(snapshot);
        Ok(resp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::master::catalog::CatalogStore;
    use crate::master::mem_catalog::MemCatalog;
    use crate::master::messages::*;
    use crate::master::raft_node::{RaftNode, RoleChange};
    use std::time::Duration;

    struct Fixture {
        coordinator: HeartbeatCoordinator,
        leadership: LeadershipState,
        registry: Arc<TabletServerRegistry>,
        store: Arc<MemCatalog>,
        raft: Arc<RaftNode>,
    }

    async fn fixture(leader: bool) -> Fixture {
        let raft = Arc::new(RaftNode::with_peers(
            "m1".into(),
            vec![("m1".into(), Some(HostPort::new("127.0.0.1", 7100)))],
        ));
        let leadership = LeadershipState::new(Duration::from_millis(200));
        leadership.mark_initialized().await;
        if leader {
            raft.become_leader();
            leadership
                .apply(RoleChange {
                    role: RaftRole::Leader,
                    term: raft.term(),
                })
                .await;
        }
        let registry = Arc::new(TabletServerRegistry::new());
        let store = Arc::new(MemCatalog::default());
        let coordinator = HeartbeatCoordinator::new(
            NodeInstance::new("m1", 1),
            leadership.clone(),
            registry.clone(),
            CatalogFacade::new(store.clone()),
            raft.clone(),
        );
        Fixture {
            coordinator,
            leadership,
            registry,
            store,
            raft,
        }
    }

    fn registration() -> TsRegistration {
        TsRegistration {
            rpc_addresses: vec![HostPort::new("10.0.0.1", 9100)],
            ..Default::default()
        }
    }

    fn heartbeat(ts: &NodeInstance) -> TsHeartbeatRequest {
        TsHeartbeatRequest {
            ts_instance: ts.clone(),
            config_index: -1,
            ..Default::default()
        }
    }

    fn create_table(store: &MemCatalog) -> Vec<String> {
        let mut resp = CreateTableResponse::default();
        store
            .create_table(
                &CreateTableRequest {
                    name: "t".into(),
                    namespace: None,
                    schema: Schema {
                        columns: vec![ColumnSchema {
                            name: "k".into(),
                            data_type: "int64".into(),
                            is_key: true,
                            is_nullable: false,
                        }],
                    },
                    num_tablets: 2,
                },
                &mut resp,
            )
            .unwrap();
        let mut locs = GetTableLocationsResponse::default();
        store
            .get_table_locations(
                &GetTableLocationsRequest {
                    table: TableIdentifier::by_id(resp.table_id.unwrap()),
                    max_returned_locations: None,
                },
                &mut locs,
            )
            .unwrap();
        locs.tablet_locations.into_iter().map(|l| l.tablet_id).collect()
    }

    fn report(tablets: &[String], incremental: bool) -> TabletReport {
        TabletReport {
            sequence_number: 1,
            is_incremental: incremental,
            updated_tablets: tablets
                .iter()
                .map(|id| ReportedTablet {
                    tablet_id: id.clone(),
                    state: TabletState::Running,
                    role: Some(RaftRole::Leader),
                })
                .collect(),
            removed_tablet_ids: vec![],
        }
    }

    #[tokio::test]
    async fn test_unknown_server_is_told_to_reregister() {
        let f = fixture(true).await;
        let tablets = create_table(&f.store);
        let mut req = heartbeat(&NodeInstance::new("ts-1", 1));
        req.tablet_report = Some(report(&tablets, false));

        let resp = f.coordinator.heartbeat(req).await.unwrap();
        assert!(resp.is_ok());
        assert!(resp.leader_master);
        assert!(resp.needs_reregister);
        assert!(resp.needs_full_tablet_report);
        assert!(resp.tablet_report.is_none());
        assert!(f.registry.is_empty());
        assert!(f.store.get_tablet_locations(&tablets[0]).unwrap().replicas.is_empty());
    }

    #[tokio::test]
    async fn test_registration_then_lookup_in_one_call() {
        let f = fixture(true).await;
        let ts = NodeInstance::new("ts-1", 1);
        let mut req = heartbeat(&ts);
        req.registration = Some(registration());
        req.num_live_tablets = 4;

        let resp = f.coordinator.heartbeat(req).await.unwrap();
        assert!(!resp.needs_reregister);
        assert!(resp.needs_full_tablet_report);
        assert_eq!(resp.master_instance, Some(NodeInstance::new("m1", 1)));

        let listed = f.registry.list_all();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].num_live_replicas(), 4);
    }

    #[tokio::test]
    async fn test_full_report_required_until_accepted() {
        let f = fixture(true).await;
        let tablets = create_table(&f.store);
        let ts = NodeInstance::new("ts-1", 1);
        let mut req = heartbeat(&ts);
        req.registration = Some(registration());
        f.coordinator.heartbeat(req).await.unwrap();

        for _ in 0..3 {
            let resp = f.coordinator.heartbeat(heartbeat(&ts)).await.unwrap();
            assert!(resp.needs_full_tablet_report);
        }

        // incremental reports are not trusted before the first full one
        let mut req = heartbeat(&ts);
        req.tablet_report = Some(report(&tablets, true));
        let resp = f.coordinator.heartbeat(req).await.unwrap();
        assert!(resp.needs_full_tablet_report);
        assert!(f.store.get_tablet_locations(&tablets[0]).unwrap().replicas.is_empty());

        let mut req = heartbeat(&ts);
        req.tablet_report = Some(report(&tablets, false));
        let resp = f.coordinator.heartbeat(req).await.unwrap();
        assert!(!resp.needs_full_tablet_report);
        assert_eq!(resp.tablet_report.unwrap().tablets.len(), 2);
        assert_eq!(f.store.get_tablet_locations(&tablets[0]).unwrap().replicas.len(), 1);

        let resp = f.coordinator.heartbeat(heartbeat(&ts)).await.unwrap();
        assert!(!resp.needs_full_tablet_report);
    }

    #[tokio::test]
    async fn test_non_leader_acknowledges_without_processing() {
        let f = fixture(false).await;
        let mut req = heartbeat(&NodeInstance::new("ts-1", 1));
        req.registration = Some(registration());

        let resp = f.coordinator.heartbeat(req).await.unwrap();
        assert!(resp.is_ok());
        assert!(!resp.leader_master);
        assert!(!resp.needs_reregister);
        assert!(resp.master_instance.is_some());
        assert!(f.registry.is_empty());
    }

    #[tokio::test]
    async fn test_uninitialized_master_rejects() {
        let raft = Arc::new(RaftNode::new("m1".into()));
        let registry = Arc::new(TabletServerRegistry::new());
        let coordinator = HeartbeatCoordinator::new(
            NodeInstance::new("m1", 1),
            LeadershipState::new(Duration::from_millis(50)),
            registry.clone(),
            CatalogFacade::new(Arc::new(MemCatalog::default())),
            raft,
        );
        let resp = coordinator
            .heartbeat(heartbeat(&NodeInstance::new("ts-1", 1)))
            .await
            .unwrap();
        assert_eq!(
            resp.error.unwrap().code,
            MasterErrorCode::CatalogManagerNotInitialized
        );
        assert!(resp.master_instance.is_none());
    }

    #[tokio::test]
    async fn test_config_only_sent_when_newer() {
        let f = fixture(true).await;
        let ts = NodeInstance::new("ts-1", 1);

        let resp = f.coordinator.heartbeat(heartbeat(&ts)).await.unwrap();
        let config = resp.master_config.unwrap();
        assert_eq!(config.opid_index, 1);

        let mut req = heartbeat(&ts);
        req.config_index = 1;
        assert!(f.coordinator.heartbeat(req).await.unwrap().master_config.is_none());

        let mut peers = f.raft.peers().unwrap();
        peers.push(RaftPeer {
            permanent_uuid: "m2".into(),
            ..Default::default()
        });
        f.raft.set_config(peers);
        let mut req = heartbeat(&ts);
        req.config_index = 1;
        let resp = f.coordinator.heartbeat(req).await.unwrap();
        assert_eq!(resp.master_config.unwrap().peers.len(), 2);
    }

    #[tokio::test]
    async fn test_config_fetch_failure_is_not_fatal() {
        let f = fixture(true).await;
        f.raft.enter_shell_mode().unwrap();
        // leadership context has not observed the change yet
        let resp = f
            .coordinator
            .heartbeat(heartbeat(&NodeInstance::new("ts-1", 1)))
            .await
            .unwrap();
        assert!(resp.is_ok());
        assert!(resp.master_config.is_none());
        assert!(resp.needs_reregister);
    }

    #[tokio::test]
    async fn test_stale_incarnation_registration_fails_exchange() {
        let f = fixture(true).await;
        let mut req = heartbeat(&NodeInstance::new("ts-1", 5));
        req.registration = Some(registration());
        f.coordinator.heartbeat(req).await.unwrap();

        let mut req = heartbeat(&NodeInstance::new("ts-1", 4));
        req.registration = Some(registration());
        let err = f.coordinator.heartbeat(req).await.unwrap_err();
        assert!(matches!(err, Error::IllegalState(_)));
    }

    #[tokio::test]
    async fn test_restarted_server_rediscovered() {
        let f = fixture(true).await;
        let mut req = heartbeat(&NodeInstance::new("ts-1", 1));
        req.registration = Some(registration());
        f.coordinator.heartbeat(req).await.unwrap();

        let restarted = NodeInstance::new("ts-1", 2);
        let resp = f.coordinator.heartbeat(heartbeat(&restarted)).await.unwrap();
        assert!(resp.needs_reregister);

        let mut req = heartbeat(&restarted);
        req.registration = Some(registration());
        let resp = f.coordinator.heartbeat(req).await.unwrap();
        assert!(!resp.needs_reregister);
        assert_eq!(f.registry.len(), 1);
    }

    #[tokio::test]
    async fn test_stale_heartbeat_seqno_skips_update() {
        let f = fixture(true).await;
        let ts = NodeInstance::new("ts-1", 1);
        let mut req = heartbeat(&ts);
        req.registration = Some(registration());
        req.num_live_tablets = 3;
        req.heartbeat_seqno = Some(10);
        f.coordinator.heartbeat(req).await.unwrap();

        let mut req = heartbeat(&ts);
        req.num_live_tablets = 1;
        req.heartbeat_seqno = Some(9);
        let resp = f.coordinator.heartbeat(req).await.unwrap();
        assert!(resp.is_ok());
        assert_eq!(f.registry.lookup(&ts).unwrap().num_live_replicas(), 3);
    }

    #[tokio::test]
    async fn test_restarted_server_heartbeat_seqno_starts_over() {
        let f = fixture(true).await;
        let tablets = create_table(&f.store);
        let old = NodeInstance::new("ts-1", 1);
        let mut req = heartbeat(&old);
        req.registration = Some(registration());
        req.tablet_report = Some(report(&tablets, false));
        req.heartbeat_seqno = Some(1);
        f.coordinator.heartbeat(req).await.unwrap();
        for seqno in 2..=100 {
            let mut req = heartbeat(&old);
            req.num_live_tablets = 5;
            req.heartbeat_seqno = Some(seqno);
            f.coordinator.heartbeat(req).await.unwrap();
        }
        assert_eq!(f.registry.lookup(&old).unwrap().num_live_replicas(), 5);

        let restarted = NodeInstance::new("ts-1", 2);
        let mut req = heartbeat(&restarted);
        req.registration = Some(registration());
        req.heartbeat_seqno = Some(1);
        let resp = f.coordinator.heartbeat(req).await.unwrap();
        assert!(resp.needs_full_tablet_report);
        assert_eq!(f.registry.lookup(&restarted).unwrap().num_live_replicas(), 0);

        let mut req = heartbeat(&restarted);
        req.tablet_report = Some(report(&tablets, false));
        req.num_live_tablets = 2;
        req.heartbeat_seqno = Some(2);
        let resp = f.coordinator.heartbeat(req).await.unwrap();
        assert!(resp.tablet_report.is_some());
        assert!(!resp.needs_full_tablet_report);
        assert_eq!(f.registry.lookup(&restarted).unwrap().num_live_replicas(), 2);
    }

    #[tokio::test]
    async fn test_demoted_leader_stops_processing() {
        let f = fixture(true).await;
        let ts = NodeInstance::new("ts-1", 1);
        let mut req = heartbeat(&ts);
        req.registration = Some(registration());
        f.coordinator.heartbeat(req).await.unwrap();

        f.leadership
            .apply(RoleChange {
                role: RaftRole::Follower,
                term: 2,
            })
            .await;
        let resp = f.coordinator.heartbeat(heartbeat(&ts)).await.unwrap();
        assert!(!resp.leader_master);
    }
}
