//! Integration tests for tabletmaster: real masters on loopback ports

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tabletmaster::master::http::create_router;
use tabletmaster::master::leadership::LeadershipState;
use tabletmaster::master::mem_catalog::MemCatalog;
use tabletmaster::master::messages::*;
use tabletmaster::master::raft_node::{ConsensusGroup, RaftNode, RoleChange};
use tabletmaster::master::topology::HttpPeerClient;
use tabletmaster::tserver::{Heartbeater, HttpMasterProxy, LocalTablets};
use tabletmaster::{MasterClient, MasterService};
use tokio::net::TcpListener;

const TIMEOUT: Duration = Duration::from_secs(2);

struct TestMaster {
    addr: SocketAddr,
    service: Arc<MasterService>,
}

impl TestMaster {
    fn addr(&self) -> String {
        self.addr.to_string()
    }
}

/// Start one master per uuid; the first one leads. Every master knows the
/// full group.
async fn start_cluster(uuids: &[&str]) -> Vec<TestMaster> {
    let mut listeners = Vec::new();
    for _ in uuids {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listeners.push(listener);
    }
    let addrs: Vec<SocketAddr> = listeners.iter().map(|l| l.local_addr().unwrap()).collect();
    let peers: Vec<(String, Option<HostPort>)> = uuids
        .iter()
        .zip(&addrs)
        .map(|(uuid, addr)| (uuid.to_string(), Some(HostPort::from(*addr))))
        .collect();

    let mut masters = Vec::new();
    for (i, listener) in listeners.into_iter().enumerate() {
        let raft = Arc::new(RaftNode::with_peers(uuids[i].to_string(), peers.clone()));
        if i == 0 {
            raft.become_leader();
        }
        let leadership = LeadershipState::new(Duration::from_millis(500));
        leadership.mark_initialized().await;
        leadership
            .apply(RoleChange {
                role: raft.role(),
                term: raft.term(),
            })
            .await;

        let service = MasterService::new(
            NodeInstance::new(uuids[i], 1),
            MasterRegistration {
                rpc_addresses: vec![HostPort::from(addrs[i])],
                http_addresses: vec![HostPort::from(addrs[i])],
            },
            leadership,
            raft,
            Arc::new(MemCatalog::default()),
            Arc::new(HttpPeerClient::new(MasterClient::new(TIMEOUT).unwrap())),
        )
        .with_master_addresses(addrs.iter().map(|a| a.to_string()).collect());
        let service = Arc::new(service);

        let router = create_router(service.clone());
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        masters.push(TestMaster {
            addr: addrs[i],
            service,
        });
    }
    masters
}

#[tokio::test]
async fn test_tserver_heartbeats_find_the_leader() {
    let cluster = start_cluster(&["m1", "m2", "m3"]).await;
    let tablets = Arc::new(LocalTablets::new());
    tablets.upsert("t-1", TabletState::Running, Some(RaftRole::Leader));

    let heartbeater = Heartbeater::new(
        NodeInstance::new("ts-1", 1),
        TsRegistration {
            rpc_addresses: vec![HostPort::new("127.0.0.1", 9100)],
            ..Default::default()
        },
        cluster.iter().map(|m| m.addr()).collect(),
        Arc::new(HttpMasterProxy::new(MasterClient::new(TIMEOUT).unwrap())),
        tablets,
    );

    assert_eq!(heartbeater.heartbeat_all().await, 3);
    assert_eq!(heartbeater.leader(), Some(cluster[0].addr()));
    assert!(heartbeater.config_index() >= 0);

    let client = MasterClient::new(TIMEOUT).unwrap();
    let resp: ListTabletServersResponse = client
        .call(&cluster[0].addr(), "list_tablet_servers", &ListTabletServersRequest {})
        .await
        .unwrap();
    assert!(resp.error.is_none());
    assert_eq!(resp.servers.len(), 1);
    assert_eq!(resp.servers[0].instance_id.permanent_uuid, "ts-1");
    assert_eq!(resp.servers[0].num_live_replicas, 1);

    // Followers never register anyone
    assert!(cluster[1].service.registry().is_empty());
    assert!(cluster[2].service.registry().is_empty());
}

#[tokio::test]
async fn test_follower_answers_with_envelope_not_transport_error() {
    let cluster = start_cluster(&["m1", "m2"]).await;
    let client = MasterClient::new(TIMEOUT).unwrap();

    let resp: ListTablesResponse = client
        .call(&cluster[1].addr(), "list_tables", &ListTablesRequest::default())
        .await
        .unwrap();
    let err = resp.error.unwrap();
    assert_eq!(err.code, MasterErrorCode::NotTheLeader);

    let resp: ListTablesResponse = client
        .call(&cluster[0].addr(), "list_tables", &ListTablesRequest::default())
        .await
        .unwrap();
    assert!(resp.error.is_none());
}

#[tokio::test]
async fn test_list_masters_includes_every_member_once() {
    let cluster = start_cluster(&["m1", "m2", "m3"]).await;
    let client = MasterClient::new(TIMEOUT).unwrap();

    let resp: ListMastersResponse = client
        .call(&cluster[1].addr(), "list_masters", &ListMastersRequest {})
        .await
        .unwrap();
    assert!(resp.error.is_none());
    let mut uuids: Vec<String> = resp
        .masters
        .iter()
        .map(|m| m.instance_id.as_ref().unwrap().permanent_uuid.clone())
        .collect();
    uuids.sort();
    assert_eq!(uuids, vec!["m1", "m2", "m3"]);
    let leader = resp
        .masters
        .iter()
        .find(|m| m.instance_id.as_ref().unwrap().permanent_uuid == "m1")
        .unwrap();
    assert_eq!(leader.role, Some(RaftRole::Leader));
}

#[tokio::test]
async fn test_coordinated_dump_reaches_every_peer() {
    let cluster = start_cluster(&["m1", "m2", "m3"]).await;
    let client = MasterClient::new(TIMEOUT).unwrap();

    let resp = client
        .dump_master_state(
            &cluster[0].addr(),
            &DumpMasterStateRequest {
                on_disk: false,
                peers_also: true,
            },
        )
        .await
        .unwrap();
    assert!(resp.error.is_none());
    let mut dumped = resp.peers_dumped.clone();
    dumped.sort();
    assert_eq!(dumped, vec!["m2", "m3"]);
    assert!(resp.peer_errors.is_empty());
}

#[tokio::test]
async fn test_lookup_latency_does_not_block_failover() {
    let raft = Arc::new(RaftNode::with_peers(
        "m1".into(),
        vec![("m1".into(), Some(HostPort::new("127.0.0.1", 7100)))],
    ));
    raft.become_leader();
    let leadership = LeadershipState::new(Duration::from_millis(500));
    leadership.mark_initialized().await;
    leadership
        .apply(RoleChange {
            role: raft.role(),
            term: raft.term(),
        })
        .await;
    let service = Arc::new(
        MasterService::new(
            NodeInstance::new("m1", 1),
            MasterRegistration::default(),
            leadership.clone(),
            raft,
            Arc::new(MemCatalog::default()),
            Arc::new(HttpPeerClient::new(MasterClient::new(TIMEOUT).unwrap())),
        )
        .with_tablet_lookup_latency(Some(Duration::from_millis(300))),
    );

    let lookup = {
        let service = service.clone();
        tokio::spawn(async move {
            service
                .get_tablet_locations(GetTabletLocationsRequest {
                    tablet_ids: vec!["t-1".into()],
                })
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let start = Instant::now();
    leadership
        .apply(RoleChange {
            role: RaftRole::Follower,
            term: 2,
        })
        .await;
    assert!(start.elapsed() < Duration::from_millis(200));

    let resp = lookup.await.unwrap().unwrap();
    assert_eq!(resp.error.unwrap().code, MasterErrorCode::NotTheLeader);
}

#[tokio::test]
async fn test_unreachable_master_is_a_transport_error() {
    let client = MasterClient::new(Duration::from_millis(500)).unwrap();
    let err = client
        .get_master_registration("127.0.0.1:1")
        .await
        .unwrap_err();
    assert!(err.is_retryable());
}
