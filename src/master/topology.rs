//! Cluster topology
//!
//! Master membership comes from the consensus layer on every call; nothing
//! here is cached. Fan-out to other masters happens after the leadership
//! snapshot is released.

use crate::common::{Error, Result};
use crate::master::catalog::CatalogFacade;
use crate::master::client::MasterClient;
use crate::master::leadership::LeadershipSnapshot;
use crate::master::messages::*;
use crate::master::raft_node::ConsensusGroup;
use async_trait::async_trait;
use futures_util::future::join_all;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Calls made to other masters
#[async_trait]
pub trait PeerClient: Send + Sync {
    async fn get_master_registration(&self, addr: &str) -> Result<GetMasterRegistrationResponse>;

    /// Ask `peer` to dump its local state (never its peers').
    async fn dump_state(&self, peer: &RaftPeer, on_disk: bool) -> Result<()>;
}

pub struct HttpPeerClient {
    client: MasterClient,
}

impl HttpPeerClient {
    pub fn new(client: MasterClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PeerClient for HttpPeerClient {
    async fn get_master_registration(&self, addr: &str) -> Result<GetMasterRegistrationResponse> {
        self.client.get_master_registration(addr).await
    }

    async fn dump_state(&self, peer: &RaftPeer, on_disk: bool) -> Result<()> {
        let addr = peer.last_known_addr.as_ref().ok_or_else(|| {
            Error::InvalidArgument(format!("peer {} has no known address", peer.permanent_uuid))
        })?;
        let req = DumpMasterStateRequest {
            on_disk,
            peers_also: false,
        };
        let resp = self
            .client
            .dump_master_state(&addr.to_string(), &req)
            .await?;
        match resp.error {
            Some(err) => Err(err.to_error()),
            None => Ok(()),
        }
    }
}

/// Outcome of a coordinated dump; per-peer failures do not fail the call.
#[derive(Debug, Default)]
pub struct DumpOutcome {
    pub local: String,
    pub peers_dumped: Vec<String>,
    pub peer_errors: Vec<PeerDumpError>,
}

pub struct ClusterTopologyService {
    instance: NodeInstance,
    registration: MasterRegistration,
    master_addresses: Vec<String>,
    consensus: Arc<dyn ConsensusGroup>,
    catalog: CatalogFacade,
    peers: Arc<dyn PeerClient>,
}

impl ClusterTopologyService {
    pub fn new(
        instance: NodeInstance,
        registration: MasterRegistration,
        master_addresses: Vec<String>,
        consensus: Arc<dyn ConsensusGroup>,
        catalog: CatalogFacade,
        peers: Arc<dyn PeerClient>,
    ) -> Self {
        Self {
            instance,
            registration,
            master_addresses,
            consensus,
            catalog,
            peers,
        }
    }

    pub fn with_master_addresses(mut self, master_addresses: Vec<String>) -> Self {
        self.master_addresses = master_addresses;
        self
    }

    pub fn instance(&self) -> &NodeInstance {
        &self.instance
    }

    pub fn registration(&self) -> &MasterRegistration {
        &self.registration
    }

    pub fn local_entry(&self) -> ServerEntry {
        ServerEntry {
            instance_id: Some(self.instance.clone()),
            registration: Some(self.registration.clone()),
            role: Some(self.consensus.role()),
            error: None,
        }
    }

    /// Every configured master, whatever its role. The local entry comes
    /// first; unreachable masters are listed with their error.
    pub async fn list_masters(&self) -> Vec<ServerEntry> {
        let probes = self.master_addresses.iter().map(|addr| async move {
            (addr, self.peers.get_master_registration(addr).await)
        });
        let results = join_all(probes).await;

        let mut entries = vec![self.local_entry()];
        for (addr, result) in results {
            let entry = match result {
                Ok(resp) => {
                    let is_self = resp
                        .instance_id
                        .as_ref()
                        .is_some_and(|id| id.permanent_uuid == self.instance.permanent_uuid);
                    if is_self {
                        continue;
                    }
                    ServerEntry {
                        instance_id: resp.instance_id,
                        registration: resp.registration,
                        role: resp.role,
                        error: resp.error.map(|e| e.status),
                    }
                }
                Err(e) => {
                    warn!("Unable to get registration of master {}: {}", addr, e);
                    ServerEntry {
                        instance_id: None,
                        registration: addr.parse::<HostPort>().ok().map(|hp| MasterRegistration {
                            rpc_addresses: vec![hp],
                            http_addresses: Vec::new(),
                        }),
                        role: None,
                        error: Some(AppStatus::from(&e)),
                    }
                }
            };
            entries.push(entry);
        }
        entries
    }

    /// Consensus membership including the local process.
    pub fn list_peers(&self) -> Result<Vec<RaftPeer>> {
        self.consensus.peers()
    }

    /// Dump local state and, with `include_peers`, forward the dump to every
    /// other consensus member. `snapshot` covers only the local part.
    pub async fn coordinated_state_dump(
        &self,
        snapshot: LeadershipSnapshot,
        on_disk: bool,
        include_peers: bool,
    ) -> Result<DumpOutcome> {
        let catalog = self.catalog.clone();
        let local = tokio::task::spawn_blocking(move || catalog.dump_state(on_disk))
            .await
            .map_err(|e| Error::Internal(format!("state dump dispatch failed: {}", e)))??;
        info!("Dumped local master state ({} bytes)", local.len());

        let mut outcome = DumpOutcome {
            local,
            ..Default::default()
        };
        if !include_peers {
            return Ok(outcome);
        }

        let mut peers = self.consensus.peers()?;
        drop(snapshot);

        let before = peers.len();
        peers.retain(|p| p.permanent_uuid != self.instance.permanent_uuid);
        if peers.len() == before {
            let err = Error::IllegalState(format!(
                "local master {} is not in its own consensus config",
                self.instance.permanent_uuid
            ));
            error!("Aborting coordinated state dump: {}", err);
            return Err(err);
        }

        let forwards = peers.iter().map(|peer| async move {
            (peer, self.peers.dump_state(peer, on_disk).await)
        });
        for (peer, result) in join_all(forwards).await {
            match result {
                Ok(()) => outcome.peers_dumped.push(peer.permanent_uuid.clone()),
                Err(e) => {
                    warn!("State dump on peer {} failed: {}", peer.permanent_uuid, e);
                    outcome.peer_errors.push(PeerDumpError {
                        permanent_uuid: peer.permanent_uuid.clone(),
                        status: AppStatus::from(&e),
                    });
                }
            }
        }
        Ok(outcome)
    }
}
