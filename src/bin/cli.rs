//! CLI for cluster operations

use clap::{Parser, Subcommand, ValueEnum};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tabletmaster::common::parse_duration;
use tabletmaster::common::utils::retry_with_backoff;
use tabletmaster::master::messages::*;
use tabletmaster::MasterClient;

#[derive(Parser)]
#[command(name = "tabletmaster")]
#[command(about = "tabletmaster cluster administration CLI")]
#[command(version)]
struct Cli {
    /// Master address
    #[arg(long, default_value = "127.0.0.1:7100")]
    master: String,

    /// Per-call timeout (e.g. 500ms, 5s)
    #[arg(long, default_value = "5s")]
    timeout: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Toggle {
    On,
    Off,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered tablet servers
    ListTservers,

    /// List every master with its role
    ListMasters,

    /// List consensus peers
    ListPeers,

    /// Dump master state
    Dump {
        /// Write the dump to the master's dump directory
        #[arg(long)]
        on_disk: bool,

        /// Forward the dump to every other master
        #[arg(long)]
        peers: bool,
    },

    /// Enable or disable the load balancer
    SetLoadBalancer {
        #[arg(value_enum)]
        state: Toggle,
    },

    /// Show load balancing progress
    LoadStatus {
        /// Expected number of tablet servers
        #[arg(long)]
        expected_servers: Option<u32>,
    },

    /// Show the cluster config
    ClusterConfig,

    /// Check that the master is a ready leader
    LeaderReady {
        /// Keep retrying for this many attempts
        #[arg(long, default_value = "1")]
        attempts: usize,
    },
}

/// Call `rpc` and turn an application error into a failure.
async fn rpc<Req, Resp>(client: &MasterClient, master: &str, name: &str, req: &Req) -> tabletmaster::Result<Resp>
where
    Req: Serialize,
    Resp: MasterResponse + DeserializeOwned,
{
    let resp: Resp = client.call(master, name, req).await?;
    match resp.error() {
        Some(err) => Err(err.to_error()),
        None => Ok(resp),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let client = MasterClient::new(parse_duration(&cli.timeout)?)?;
    let master = cli.master.as_str();

    match cli.command {
        Commands::ListTservers => {
            let resp: ListTabletServersResponse =
                rpc(&client, master, "list_tablet_servers", &ListTabletServersRequest {}).await?;
            println!("Tablet servers ({}):", resp.servers.len());
            for ts in resp.servers {
                let addr = ts
                    .registration
                    .rpc_addresses
                    .first()
                    .map(|hp| hp.to_string())
                    .unwrap_or_default();
                println!(
                    "  {}  {}  last heartbeat {}ms ago  {} live replicas",
                    ts.instance_id, addr, ts.millis_since_heartbeat, ts.num_live_replicas
                );
            }
        }

        Commands::ListMasters => {
            let resp: ListMastersResponse =
                rpc(&client, master, "list_masters", &ListMastersRequest {}).await?;
            println!("Masters ({}):", resp.masters.len());
            for entry in resp.masters {
                let uuid = entry
                    .instance_id
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "?".into());
                let addr = entry
                    .registration
                    .and_then(|r| r.rpc_addresses.into_iter().next())
                    .map(|hp| hp.to_string())
                    .unwrap_or_default();
                match (entry.role, entry.error) {
                    (_, Some(status)) => println!("  {}  {}  ERROR: {}", uuid, addr, status.message),
                    (Some(role), None) => println!("  {}  {}  {}", uuid, addr, role),
                    (None, None) => println!("  {}  {}", uuid, addr),
                }
            }
        }

        Commands::ListPeers => {
            let resp: ListMasterRaftPeersResponse = rpc(
                &client,
                master,
                "list_master_raft_peers",
                &ListMasterRaftPeersRequest {},
            )
            .await?;
            println!("Consensus peers ({}):", resp.masters.len());
            for peer in resp.masters {
                let addr = peer
                    .last_known_addr
                    .map(|hp| hp.to_string())
                    .unwrap_or_else(|| "unknown".into());
                println!("  {}  {}  {:?}", peer.permanent_uuid, addr, peer.member_type);
            }
        }

        Commands::Dump { on_disk, peers } => {
            let req = DumpMasterStateRequest {
                on_disk,
                peers_also: peers,
            };
            let resp: DumpMasterStateResponse = rpc(&client, master, "dump_master_state", &req).await?;
            println!("State dumped");
            if peers {
                println!("  Peers dumped: {}", resp.peers_dumped.join(", "));
                for err in resp.peer_errors {
                    println!("  Peer {} failed: {}", err.permanent_uuid, err.status.message);
                }
            }
        }

        Commands::SetLoadBalancer { state } => {
            let req = ChangeLoadBalancerStateRequest {
                is_enabled: Some(matches!(state, Toggle::On)),
            };
            let _: ChangeLoadBalancerStateResponse =
                rpc(&client, master, "change_load_balancer_state", &req).await?;
            println!("Load balancer {}", if matches!(state, Toggle::On) { "enabled" } else { "disabled" });
        }

        Commands::LoadStatus { expected_servers } => {
            let moved: GetLoadMovePercentResponse =
                rpc(&client, master, "get_load_move_completion", &GetLoadMovePercentRequest {})
                    .await?;
            let balanced: IsLoadBalancedResponse = rpc(
                &client,
                master,
                "is_load_balanced",
                &IsLoadBalancedRequest {
                    expected_num_servers: expected_servers,
                },
            )
            .await?;
            println!("Load status:");
            println!("  Blacklist move completion: {:.1}%", moved.percent);
            println!("  Balanced: {}", balanced.is_balanced);
        }

        Commands::ClusterConfig => {
            let resp: GetMasterClusterConfigResponse = rpc(
                &client,
                master,
                "get_master_cluster_config",
                &GetMasterClusterConfigRequest {},
            )
            .await?;
            let config = resp.cluster_config.unwrap_or_default();
            println!("Cluster config:");
            println!("  UUID: {}", config.cluster_uuid);
            println!("  Version: {}", config.version);
            println!("  Replicas: {}", config.num_replicas);
            for host in config.blacklisted_hosts {
                println!("  Blacklisted: {}", host);
            }
        }

        Commands::LeaderReady { attempts } => {
            let req = IsMasterLeaderReadyRequest {};
            let _: IsMasterLeaderReadyResponse = retry_with_backoff(
                || rpc(&client, master, "is_master_leader_service_ready", &req),
                attempts.max(1),
                std::time::Duration::from_millis(200),
            )
            .await?;
            println!("{} is a ready leader", master);
        }
    }

    Ok(())
}
