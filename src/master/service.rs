//! Master RPC operations
//!
//! Catalog operations require an initialized leader, membership operations
//! only an initialized catalog. Master discovery (ListMasters, consensus
//! peers, registration identity) answers before initialization. `Err` is
//! reserved for transport-level failures.

use crate::common::Result;
use crate::master::balancer::LoadBalancerControl;
use crate::master::catalog::{CatalogFacade, CatalogStore};
use crate::master::gate::{Gate, GateMode};
use crate::master::heartbeat::HeartbeatCoordinator;
use crate::master::leadership::LeadershipState;
use crate::master::messages::*;
use crate::master::raft_node::ConsensusGroup;
use crate::master::topology::{ClusterTopologyService, PeerClient};
use crate::master::ts_registry::TabletServerRegistry;
use std::sync::Arc;
use std::time::Duration;

pub struct MasterService {
    gate: Gate,
    catalog: CatalogFacade,
    registry: Arc<TabletServerRegistry>,
    consensus: Arc<dyn ConsensusGroup>,
    heartbeats: HeartbeatCoordinator,
    topology: ClusterTopologyService,
    balancer: LoadBalancerControl,
    tablet_lookup_latency: Option<Duration>,
}

impl MasterService {
    pub fn new(
        instance: NodeInstance,
        registration: MasterRegistration,
        leadership: LeadershipState,
        consensus: Arc<dyn ConsensusGroup>,
        store: Arc<dyn CatalogStore>,
        peers: Arc<dyn PeerClient>,
    ) -> Self {
        let gate = Gate::new(leadership.clone());
        let catalog = CatalogFacade::new(store);
        let registry = Arc::new(TabletServerRegistry::new());
        Self {
            heartbeats: HeartbeatCoordinator::new(
                instance.clone(),
                leadership,
                registry.clone(),
                catalog.clone(),
                consensus.clone(),
            ),
            topology: ClusterTopologyService::new(
                instance,
                registration,
                Vec::new(),
                consensus.clone(),
                catalog.clone(),
                peers,
            ),
            balancer: LoadBalancerControl::new(gate.clone(), catalog.clone()),
            gate,
            catalog,
            registry,
            consensus,
            tablet_lookup_latency: None,
        }
    }

    /// Other masters to probe in ListMasters.
    pub fn with_master_addresses(mut self, master_addresses: Vec<String>) -> Self {
        self.topology = self.topology.with_master_addresses(master_addresses);
        self
    }

    /// Fault injection: stall tablet and table location lookups.
    pub fn with_tablet_lookup_latency(mut self, latency: Option<Duration>) -> Self {
        self.tablet_lookup_latency = latency;
        self
    }

    pub fn leadership(&self) -> &LeadershipState {
        self.gate.leadership()
    }

    pub fn registry(&self) -> &Arc<TabletServerRegistry> {
        &self.registry
    }

    pub fn instance(&self) -> &NodeInstance {
        self.topology.instance()
    }

    pub fn consensus(&self) -> &Arc<dyn ConsensusGroup> {
        &self.consensus
    }

    async fn inject_lookup_latency(&self) {
        if let Some(latency) = self.tablet_lookup_latency {
            tracing::debug!("Injecting {:?} of latency into location lookup", latency);
            tokio::time::sleep(latency).await;
        }
    }

    // ------------------------------------------------------------------
    // Tablet servers
    // ------------------------------------------------------------------

    pub async fn heartbeat(&self, req: TsHeartbeatRequest) -> Result<TsHeartbeatResponse> {
        self.heartbeats.heartbeat(req).await
    }

    pub async fn list_tablet_servers(
        &self,
        _req: ListTabletServersRequest,
    ) -> Result<ListTabletServersResponse> {
        let registry = self.registry.clone();
        self.gate
            .run(
                GateMode::InitializedAndLeader,
                move |_, resp: &mut ListTabletServersResponse| {
                    resp.servers = registry.list_all().iter().map(|d| d.to_entry()).collect();
                    resp.servers.sort_by(|a, b| {
                        a.instance_id
                            .permanent_uuid
                            .cmp(&b.instance_id.permanent_uuid)
                    });
                    Ok(())
                },
            )
            .await
    }

    pub async fn get_tablet_locations(
        &self,
        req: GetTabletLocationsRequest,
    ) -> Result<GetTabletLocationsResponse> {
        self.inject_lookup_latency().await;
        let catalog = self.catalog.clone();
        self.gate
            .run(
                GateMode::InitializedAndLeader,
                move |_, resp: &mut GetTabletLocationsResponse| {
                    let (locations, errors) = catalog.lookup_tablets(&req.tablet_ids);
                    resp.tablet_locations = locations;
                    resp.errors = errors;
                    Ok(())
                },
            )
            .await
    }

    pub async fn get_table_locations(
        &self,
        req: GetTableLocationsRequest,
    ) -> Result<GetTableLocationsResponse> {
        self.inject_lookup_latency().await;
        let catalog = self.catalog.clone();
        self.gate
            .run(
                GateMode::InitializedAndLeader,
                move |_, resp: &mut GetTableLocationsResponse| {
                    catalog.get_table_locations(&req, resp)
                },
            )
            .await
    }

    // ------------------------------------------------------------------
    // Masters
    // ------------------------------------------------------------------

    /// Identity is filled in even before the catalog is ready.
    pub async fn get_master_registration(
        &self,
        _req: GetMasterRegistrationRequest,
    ) -> Result<GetMasterRegistrationResponse> {
        let mut resp = GetMasterRegistrationResponse {
            instance_id: Some(self.topology.instance().clone()),
            ..Default::default()
        };
        let snapshot = self.gate.leadership().snapshot().await;
        if !snapshot.check_or_respond(GateMode::InitializedOnly, &mut resp) {
            return Ok(resp);
        }
        resp.registration = Some(self.topology.registration().clone());
        resp.role = Some(self.consensus.role());
        Ok(resp)
    }

    /// Ungated: clients use it to find the leader while masters bootstrap.
    pub async fn list_masters(&self, _req: ListMastersRequest) -> Result<ListMastersResponse> {
        Ok(ListMastersResponse {
            masters: self.topology.list_masters().await,
            ..Default::default()
        })
    }

    pub async fn list_master_raft_peers(
        &self,
        _req: ListMasterRaftPeersRequest,
    ) -> Result<ListMasterRaftPeersResponse> {
        let mut resp = ListMasterRaftPeersResponse::default();
        match self.topology.list_peers() {
            Ok(peers) => resp.masters = peers,
            Err(e) => resp.set_unknown_error_if_unset(&e),
        }
        Ok(resp)
    }

    pub async fn dump_master_state(
        &self,
        req: DumpMasterStateRequest,
    ) -> Result<DumpMasterStateResponse> {
        let mut resp = DumpMasterStateResponse::default();
        let snapshot = self.gate.leadership().snapshot().await;
        if !snapshot.check_or_respond(GateMode::InitializedOnly, &mut resp) {
            return Ok(resp);
        }
        match self
            .topology
            .coordinated_state_dump(snapshot, req.on_disk, req.peers_also)
            .await
        {
            Ok(outcome) => {
                resp.peers_dumped = outcome.peers_dumped;
                resp.peer_errors = outcome.peer_errors;
            }
            Err(e) => resp.set_unknown_error_if_unset(&e),
        }
        Ok(resp)
    }

    /// This master was removed from the consensus config.
    pub async fn removed_master_update(
        &self,
        _req: RemovedMasterUpdateRequest,
    ) -> Result<RemovedMasterUpdateResponse> {
        let consensus = self.consensus.clone();
        self.gate
            .run(GateMode::InitializedOnly, move |_, _| {
                consensus
                    .enter_shell_mode()
                    .map_err(|e| e.prepend("Failed to go into shell mode"))
            })
            .await
    }

    pub async fn is_master_leader_service_ready(
        &self,
        _req: IsMasterLeaderReadyRequest,
    ) -> Result<IsMasterLeaderReadyResponse> {
        let mut resp = IsMasterLeaderReadyResponse::default();
        let snapshot = self.gate.leadership().snapshot().await;
        snapshot.check_or_respond(GateMode::InitializedAndLeader, &mut resp);
        Ok(resp)
    }

    // ------------------------------------------------------------------
    // Cluster config & load balancer
    // ------------------------------------------------------------------

    pub async fn get_master_cluster_config(
        &self,
        _req: GetMasterClusterConfigRequest,
    ) -> Result<GetMasterClusterConfigResponse> {
        let catalog = self.catalog.clone();
        self.gate
            .run(
                GateMode::InitializedAndLeader,
                move |_, resp: &mut GetMasterClusterConfigResponse| {
                    resp.cluster_config = Some(catalog.get_cluster_config()?);
                    Ok(())
                },
            )
            .await
    }

    pub async fn change_load_balancer_state(
        &self,
        req: ChangeLoadBalancerStateRequest,
    ) -> Result<ChangeLoadBalancerStateResponse> {
        self.balancer.change_state(req).await
    }

    pub async fn get_load_move_completion(
        &self,
        _req: GetLoadMovePercentRequest,
    ) -> Result<GetLoadMovePercentResponse> {
        self.balancer.load_move_percent().await
    }

    pub async fn is_load_balanced(
        &self,
        req: IsLoadBalancedRequest,
    ) -> Result<IsLoadBalancedResponse> {
        self.balancer.is_load_balanced(req).await
    }
}

/// Catalog operations that only gate and delegate.
macro_rules! catalog_rpc {
    ($($method:ident => $store_method:ident($req:ty) -> $resp:ty;)*) => {
        impl MasterService {
            $(
                pub async fn $method(&self, req: $req) -> Result<$resp> {
                    let catalog = self.catalog.clone();
                    self.gate
                        .run(GateMode::InitializedAndLeader, move |_, resp: &mut $resp| {
                            catalog.$store_method(&req, resp)
                        })
                        .await
                }
            )*
        }
    };
}

catalog_rpc! {
    create_table => create_table(CreateTableRequest) -> CreateTableResponse;
    is_create_table_done => is_create_table_done(IsCreateTableDoneRequest) -> IsCreateTableDoneResponse;
    delete_table => delete_table(DeleteTableRequest) -> DeleteTableResponse;
    is_delete_table_done => is_delete_table_done(IsDeleteTableDoneRequest) -> IsDeleteTableDoneResponse;
    alter_table => alter_table(AlterTableRequest) -> AlterTableResponse;
    is_alter_table_done => is_alter_table_done(IsAlterTableDoneRequest) -> IsAlterTableDoneResponse;
    list_tables => list_tables(ListTablesRequest) -> ListTablesResponse;
    get_table_schema => get_table_schema(GetTableSchemaRequest) -> GetTableSchemaResponse;
    create_namespace => create_namespace(CreateNamespaceRequest) -> CreateNamespaceResponse;
    delete_namespace => delete_namespace(DeleteNamespaceRequest) -> DeleteNamespaceResponse;
    list_namespaces => list_namespaces(ListNamespacesRequest) -> ListNamespacesResponse;
    change_master_cluster_config => set_cluster_config(ChangeMasterClusterConfigRequest) -> ChangeMasterClusterConfigResponse;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Error;
    use crate::master::mem_catalog::MemCatalog;
    use crate::master::raft_node::{RaftNode, RoleChange};
    use async_trait::async_trait;
    use std::time::Instant;

    struct NoPeers;

    #[async_trait]
    impl PeerClient for NoPeers {
        async fn get_master_registration(
            &self,
            addr: &str,
        ) -> Result<GetMasterRegistrationResponse> {
            Err(Error::Network(format!("no route to {}", addr)))
        }

        async fn dump_state(&self, _peer: &RaftPeer, _on_disk: bool) -> Result<()> {
            Ok(())
        }
    }

    struct Fixture {
        service: MasterService,
        store: Arc<MemCatalog>,
        raft: Arc<RaftNode>,
        leadership: LeadershipState,
    }

    async fn fixture(initialized: bool, role: RaftRole) -> Fixture {
        let raft = Arc::new(RaftNode::with_peers(
            "m1".into(),
            vec![("m1".into(), Some(HostPort::new("127.0.0.1", 7100)))],
        ));
        let leadership = LeadershipState::new(Duration::from_millis(100));
        if initialized {
            leadership.mark_initialized().await;
        }
        leadership.apply(RoleChange { role, term: 1 }).await;
        let store = Arc::new(MemCatalog::default());
        let service = MasterService::new(
            NodeInstance::new("m1", 1),
            MasterRegistration {
                rpc_addresses: vec![HostPort::new("127.0.0.1", 7100)],
                http_addresses: vec![],
            },
            leadership.clone(),
            raft.clone(),
            store.clone(),
            Arc::new(NoPeers),
        );
        Fixture {
            service,
            store,
            raft,
            leadership,
        }
    }

    fn create_req(name: &str) -> CreateTableRequest {
        CreateTableRequest {
            name: name.into(),
            namespace: None,
            schema: Schema {
                columns: vec![ColumnSchema {
                    name: "k".into(),
                    data_type: "int64".into(),
                    is_key: true,
                    is_nullable: false,
                }],
            },
            num_tablets: 1,
        }
    }

    async fn one_tablet(service: &MasterService) -> String {
        let table_id = service
            .create_table(create_req("t"))
            .await
            .unwrap()
            .table_id
            .unwrap();
        let resp = service
            .get_table_locations(GetTableLocationsRequest {
                table: TableIdentifier::by_id(table_id),
                max_returned_locations: None,
            })
            .await
            .unwrap();
        resp.tablet_locations[0].tablet_id.clone()
    }

    #[tokio::test]
    async fn test_follower_never_runs_catalog_operation() {
        let f = fixture(true, RaftRole::Follower).await;
        let resp = f.service.create_table(create_req("t")).await.unwrap();
        assert_eq!(resp.error.unwrap().code, MasterErrorCode::NotTheLeader);
        let mut list = ListTablesResponse::default();
        f.store
            .list_tables(&ListTablesRequest::default(), &mut list)
            .unwrap();
        assert!(list.tables.is_empty());
    }

    #[tokio::test]
    async fn test_catalog_error_codes_pass_through() {
        let f = fixture(true, RaftRole::Leader).await;
        assert!(f.service.create_table(create_req("t")).await.unwrap().is_ok());
        let resp = f.service.create_table(create_req("t")).await.unwrap();
        assert_eq!(resp.error.unwrap().code, MasterErrorCode::TableAlreadyPresent);

        let resp = f
            .service
            .get_table_schema(GetTableSchemaRequest {
                table: TableIdentifier::by_name("default", "missing"),
            })
            .await
            .unwrap();
        assert_eq!(resp.error.unwrap().code, MasterErrorCode::TableNotFound);
    }

    #[tokio::test]
    async fn test_tablet_locations_with_partial_errors() {
        let f = fixture(true, RaftRole::Leader).await;
        let tablet = one_tablet(&f.service).await;
        let resp = f
            .service
            .get_tablet_locations(GetTabletLocationsRequest {
                tablet_ids: vec![tablet.clone(), "missing".into()],
            })
            .await
            .unwrap();
        assert!(resp.is_ok());
        assert_eq!(resp.tablet_locations.len(), 1);
        assert_eq!(resp.tablet_locations[0].tablet_id, tablet);
        assert_eq!(resp.errors.len(), 1);
        assert_eq!(resp.errors[0].tablet_id, "missing");
        assert_eq!(resp.errors[0].status.code, StatusCode::NotFound);
    }

    #[tokio::test]
    async fn test_injected_lookup_latency() {
        let f = fixture(true, RaftRole::Leader).await;
        let tablet = one_tablet(&f.service).await;
        let req = GetTabletLocationsRequest {
            tablet_ids: vec![tablet],
        };
        let baseline = f.service.get_tablet_locations(req.clone()).await.unwrap();

        let service = f
            .service
            .with_tablet_lookup_latency(Some(Duration::from_millis(50)));
        let start = Instant::now();
        let delayed = service.get_tablet_locations(req).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert_eq!(delayed, baseline);
    }

    #[tokio::test]
    async fn test_registration_available_before_init() {
        let f = fixture(false, RaftRole::Follower).await;
        let resp = f
            .service
            .get_master_registration(GetMasterRegistrationRequest {})
            .await
            .unwrap();
        assert_eq!(resp.instance_id, Some(NodeInstance::new("m1", 1)));
        assert_eq!(
            resp.error.unwrap().code,
            MasterErrorCode::CatalogManagerNotInitialized
        );

        f.leadership.mark_initialized().await;
        let resp = f
            .service
            .get_master_registration(GetMasterRegistrationRequest {})
            .await
            .unwrap();
        assert!(resp.is_ok());
        assert_eq!(resp.role, Some(RaftRole::Follower));
    }

    #[tokio::test]
    async fn test_leader_ready() {
        let f = fixture(true, RaftRole::Leader).await;
        let resp = f
            .service
            .is_master_leader_service_ready(IsMasterLeaderReadyRequest {})
            .await
            .unwrap();
        assert!(resp.is_ok());

        f.leadership
            .apply(RoleChange {
                role: RaftRole::Follower,
                term: 2,
            })
            .await;
        let resp = f
            .service
            .is_master_leader_service_ready(IsMasterLeaderReadyRequest {})
            .await
            .unwrap();
        assert_eq!(resp.error.unwrap().code, MasterErrorCode::NotTheLeader);
    }

    #[tokio::test]
    async fn test_list_tablet_servers_after_heartbeat() {
        let f = fixture(true, RaftRole::Leader).await;
        f.service
            .heartbeat(TsHeartbeatRequest {
                ts_instance: NodeInstance::new("ts-1", 1),
                registration: Some(TsRegistration::default()),
                config_index: -1,
                ..Default::default()
            })
            .await
            .unwrap();
        let resp = f
            .service
            .list_tablet_servers(ListTabletServersRequest {})
            .await
            .unwrap();
        assert_eq!(resp.servers.len(), 1);
        assert_eq!(resp.servers[0].instance_id.permanent_uuid, "ts-1");
    }

    #[tokio::test]
    async fn test_list_masters_with_unreachable_peer() {
        let f = fixture(true, RaftRole::Follower).await;
        let service = f
            .service
            .with_master_addresses(vec!["10.0.0.2:7100".into()]);
        let resp = service.list_masters(ListMastersRequest {}).await.unwrap();
        assert!(resp.is_ok());
        assert_eq!(resp.masters.len(), 2);
        assert!(resp.masters[0].error.is_none());
        assert!(resp.masters[1].error.is_some());
    }

    #[tokio::test]
    async fn test_list_masters_before_init() {
        let f = fixture(false, RaftRole::Follower).await;
        let resp = f.service.list_masters(ListMastersRequest {}).await.unwrap();
        assert!(resp.is_ok());
        assert_eq!(resp.masters.len(), 1);
        assert_eq!(
            resp.masters[0].instance_id,
            Some(NodeInstance::new("m1", 1))
        );

        let resp = f
            .service
            .list_master_raft_peers(ListMasterRaftPeersRequest {})
            .await
            .unwrap();
        assert!(resp.is_ok());
        assert_eq!(resp.masters.len(), 1);
        assert_eq!(resp.masters[0].permanent_uuid, "m1");
    }

    #[tokio::test]
    async fn test_removed_master_enters_shell_mode() {
        let f = fixture(true, RaftRole::Leader).await;
        let resp = f
            .service
            .removed_master_update(RemovedMasterUpdateRequest {})
            .await
            .unwrap();
        assert!(resp.is_ok());
        assert_eq!(f.raft.role(), RaftRole::NonParticipant);

        let resp = f
            .service
            .removed_master_update(RemovedMasterUpdateRequest {})
            .await
            .unwrap();
        assert_eq!(resp.error.unwrap().code, MasterErrorCode::UnknownError);
    }

    #[tokio::test]
    async fn test_cluster_config_round_trip() {
        let f = fixture(true, RaftRole::Leader).await;
        let mut config = f
            .service
            .get_master_cluster_config(GetMasterClusterConfigRequest {})
            .await
            .unwrap()
            .cluster_config
            .unwrap();
        config.num_replicas = 5;
        let resp = f
            .service
            .change_master_cluster_config(ChangeMasterClusterConfigRequest {
                cluster_config: config,
            })
            .await
            .unwrap();
        assert!(resp.is_ok());
        let config = f
            .service
            .get_master_cluster_config(GetMasterClusterConfigRequest {})
            .await
            .unwrap()
            .cluster_config
            .unwrap();
        assert_eq!(config.num_replicas, 5);
        assert_eq!(config.version, 2);
    }

    #[tokio::test]
    async fn test_dump_state_local() {
        let f = fixture(true, RaftRole::Follower).await;
        let resp = f
            .service
            .dump_master_state(DumpMasterStateRequest {
                on_disk: false,
                peers_also: true,
            })
            .await
            .unwrap();
        assert!(resp.is_ok());
        assert!(resp.peers_dumped.is_empty());
    }
}
