//! Master server

use crate::common::utils::timestamp_now_millis;
use crate::common::{MasterConfig, Result};
use crate::master::client::MasterClient;
use crate::master::http::create_router;
use crate::master::leadership::{spawn_role_watcher, LeadershipState};
use crate::master::mem_catalog::MemCatalog;
use crate::master::messages::{HostPort, MasterRegistration, NodeInstance};
use crate::master::raft_node::RaftNode;
use crate::master::service::MasterService;
use crate::master::topology::HttpPeerClient;
use std::sync::Arc;

pub struct Master {
    config: MasterConfig,
    node_id: String,
}

impl Master {
    pub fn new(config: MasterConfig, node_id: String) -> Self {
        Self { config, node_id }
    }

    /// Consensus membership from the configured addresses; the local node is
    /// added when the list does not name it.
    fn raft_peers(&self) -> Vec<(String, Option<HostPort>)> {
        let mut peers: Vec<(String, Option<HostPort>)> = self
            .config
            .master_entries()
            .into_iter()
            .map(|(uuid, addr)| {
                let host_port = addr.parse::<HostPort>().ok();
                (uuid.unwrap_or(addr), host_port)
            })
            .collect();
        if !peers.iter().any(|(uuid, _)| uuid == &self.node_id) {
            peers.push((
                self.node_id.clone(),
                Some(HostPort::from(self.config.bind_addr)),
            ));
        }
        peers
    }

    /// Wire the control plane without starting the listener.
    pub fn build(&self, leadership: LeadershipState) -> Result<(Arc<MasterService>, Arc<RaftNode>)> {
        let instance = NodeInstance::new(self.node_id.clone(), timestamp_now_millis() as i64);
        let registration = MasterRegistration {
            rpc_addresses: vec![HostPort::from(self.config.bind_addr)],
            http_addresses: vec![HostPort::from(self.config.bind_addr)],
        };
        let raft = Arc::new(RaftNode::with_peers(self.node_id.clone(), self.raft_peers()));
        let store = Arc::new(MemCatalog::new(self.config.dump_dir.clone()));
        let peers = Arc::new(HttpPeerClient::new(MasterClient::new(
            self.config.peer_rpc_timeout(),
        )?));
        let probe_addrs = self
            .config
            .master_entries()
            .into_iter()
            .map(|(_, addr)| addr)
            .collect();

        let service = MasterService::new(
            instance,
            registration,
            leadership,
            raft.clone(),
            store,
            peers,
        )
        .with_master_addresses(probe_addrs)
        .with_tablet_lookup_latency(self.config.tablet_lookup_latency());
        Ok((Arc::new(service), raft))
    }

    /// Prepare what the catalog needs on local disk. The in-memory catalog
    /// itself has nothing to load.
    fn bootstrap_catalog(&self) -> Result<()> {
        if let Some(dir) = &self.config.dump_dir {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    pub async fn serve(self) -> Result<()> {
        tracing::info!("Starting master: {}", self.node_id);
        tracing::info!("  HTTP/RPC: {}", self.config.bind_addr);
        tracing::info!("  Masters: {:?}", self.config.master_addresses);
        if let Some(latency) = self.config.tablet_lookup_latency() {
            tracing::warn!(
                "Injecting {:?} of latency into tablet lookups; for testing only",
                latency
            );
        }

        let leadership = LeadershipState::new(self.config.leader_lock_timeout());
        let (service, raft) = self.build(leadership.clone())?;
        let watcher = spawn_role_watcher(raft.as_ref(), leadership.clone());

        // A failed bootstrap keeps serving: discovery still answers and every
        // gated request reports the reason.
        match self.bootstrap_catalog() {
            Ok(()) => leadership.mark_initialized().await,
            Err(e) => leadership.mark_init_failed(e.to_string()).await,
        }
        if self.config.leader {
            raft.become_leader();
        }

        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!("✓ Master ready ({})", service.instance());

        axum::serve(listener, create_router(service))
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        watcher.abort();
        tracing::info!("Master {} stopped", self.node_id);
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Unable to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::master::raft_node::ConsensusGroup;
    use std::time::Duration;

    #[test]
    fn test_local_node_added_to_peers() {
        let master = Master::new(
            MasterConfig {
                master_addresses: vec!["m2@10.0.0.2:7100".into(), "m3@10.0.0.3:7100".into()],
                ..Default::default()
            },
            "m1".into(),
        );
        let peers = master.raft_peers();
        assert_eq!(peers.len(), 3);
        assert!(peers.iter().any(|(uuid, _)| uuid == "m1"));
    }

    #[test]
    fn test_bootstrap_creates_dump_dir() {
        let dir = tempfile::tempdir().unwrap();
        let dump_dir = dir.path().join("dumps");
        let master = Master::new(
            MasterConfig {
                dump_dir: Some(dump_dir.clone()),
                ..Default::default()
            },
            "m1".into(),
        );
        master.bootstrap_catalog().unwrap();
        assert!(dump_dir.is_dir());
    }

    #[test]
    fn test_bootstrap_fails_on_unusable_dump_dir() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("not-a-dir");
        std::fs::write(&file, b"x").unwrap();
        let master = Master::new(
            MasterConfig {
                dump_dir: Some(file.join("dumps")),
                ..Default::default()
            },
            "m1".into(),
        );
        assert!(master.bootstrap_catalog().is_err());
    }

    #[tokio::test]
    async fn test_build_wires_consensus_config() {
        let master = Master::new(
            MasterConfig {
                master_addresses: vec!["m1@127.0.0.1:7100".into(), "m2@127.0.0.1:7101".into()],
                ..Default::default()
            },
            "m1".into(),
        );
        let (service, raft) = master
            .build(LeadershipState::new(Duration::from_millis(100)))
            .unwrap();
        assert_eq!(raft.peers().unwrap().len(), 2);
        assert_eq!(service.instance().permanent_uuid, "m1");
    }
}
