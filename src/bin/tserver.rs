//! Tablet server binary: heartbeats the masters

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tabletmaster::common::{generate_permanent_uuid, timestamp_now_millis, Config, TServerConfig};
use tabletmaster::master::messages::{HostPort, NodeInstance, RaftRole, TabletState, TsRegistration};
use tabletmaster::tserver::{Heartbeater, HttpMasterProxy, LocalTablets};
use tabletmaster::MasterClient;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "tabletmaster-tserver")]
#[command(about = "tabletmaster tablet server")]
#[command(version)]
struct Cli {
    /// Config file
    #[arg(long, default_value = tabletmaster::common::config::DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start heartbeating
    Serve {
        /// Permanent node ID (generated when absent)
        #[arg(long)]
        id: Option<String>,

        /// Advertised RPC address
        #[arg(long)]
        bind: Option<String>,

        /// Masters to heartbeat (comma-separated)
        #[arg(long, value_delimiter = ',')]
        masters: Vec<String>,

        /// Tablets hosted by this server (comma-separated)
        #[arg(long, value_delimiter = ',')]
        tablets: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            id,
            bind,
            masters,
            tablets,
        } => {
            let config = Config::load_from(&cli.config)?;
            let mut ts_config: TServerConfig = config.tserver.unwrap_or_default();
            if let Some(bind) = bind {
                ts_config.bind_addr = bind.parse()?;
            }
            if !masters.is_empty() {
                ts_config.master_addresses = masters;
            }
            if ts_config.master_addresses.is_empty() {
                anyhow::bail!("no master addresses configured");
            }

            let node_id = id
                .or(config.node_id)
                .unwrap_or_else(generate_permanent_uuid);
            let instance = NodeInstance::new(node_id, timestamp_now_millis() as i64);
            let registration = TsRegistration {
                rpc_addresses: vec![HostPort::from(ts_config.bind_addr)],
                ..Default::default()
            };

            let local = Arc::new(LocalTablets::new());
            for tablet_id in tablets {
                local.upsert(tablet_id, TabletState::Running, Some(RaftRole::Leader));
            }

            let proxy = Arc::new(HttpMasterProxy::new(MasterClient::new(
                ts_config.heartbeat_timeout(),
            )?));
            tracing::info!("Starting tablet server: {}", instance);
            tracing::info!("  Masters: {:?}", ts_config.master_addresses);
            let heartbeater = Arc::new(Heartbeater::new(
                instance,
                registration,
                ts_config.master_addresses.clone(),
                proxy,
                local,
            ));
            let handle = heartbeater.start(ts_config.heartbeat_interval());

            tokio::signal::ctrl_c().await?;
            tracing::info!("Shutdown signal received");
            handle.abort();
        }
    }

    Ok(())
}
