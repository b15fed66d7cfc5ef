//! Master binary

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tabletmaster::common::{generate_permanent_uuid, Config, MasterConfig};
use tabletmaster::Master;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "tabletmaster-master")]
#[command(about = "tabletmaster master: leader-gated control plane")]
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
    /// Start master server
    Serve {
        /// Permanent node ID (generated when absent)
        #[arg(long)]
        id: Option<String>,

        /// Bind address for RPC and HTTP
        #[arg(long)]
        bind: Option<String>,

        /// All masters, self included (comma-separated host:port or uuid@host:port)
        #[arg(long, value_delimiter = ',')]
        masters: Vec<String>,

        /// Start as leader
        #[arg(long)]
        leader: bool,

        /// Directory for on-disk state dumps
        #[arg(long)]
        dump_dir: Option<PathBuf>,
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
            leader,
            dump_dir,
        } => {
            // File and environment first, CLI arguments win
            let config = Config::load_from(&cli.config)?;
            let mut master_config: MasterConfig = config.master.unwrap_or_default();
            if let Some(bind) = bind {
                master_config.bind_addr = bind.parse()?;
            }
            if !masters.is_empty() {
                master_config.master_addresses = masters;
            }
            if leader {
                master_config.leader = true;
            }
            if dump_dir.is_some() {
                master_config.dump_dir = dump_dir;
            }

            let node_id = id
                .or(config.node_id)
                .unwrap_or_else(generate_permanent_uuid);
            let master = Master::new(master_config, node_id);
            master.serve().await?;
        }
    }

    Ok(())
}
