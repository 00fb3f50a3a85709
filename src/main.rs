// src/main.rs

//! The operator command line for rebooting clusters and restoring quorum.

use anyhow::Context;
use clap::{Parser, Subcommand};
use groupwarden::config::AdminConfig;
use groupwarden::core::admin::{ClusterAdmin, RebootOptions, RemoveOptions};
use groupwarden::core::errors::ClusterAdminError;
use groupwarden::core::instance::{Address, RespConnector};
use groupwarden::core::metadata::MemberRef;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(
        long,
        short,
        default_value = "groupwarden.toml",
        env = "GROUPWARDEN_CONFIG"
    )]
    config: PathBuf,

    /// Extra member address to read the catalog from (repeatable)
    #[arg(long = "seed", global = true)]
    seeds: Vec<Address>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Restart a cluster after every member has left the group
    Reboot {
        cluster: String,
        /// Rejoin only these members (UUID or address)
        #[arg(long = "rejoin")]
        rejoin: Vec<MemberRef>,
        /// Remove these members from the catalog while rebooting
        #[arg(long = "remove")]
        remove: Vec<MemberRef>,
        /// Bootstrap the group from this member
        #[arg(long)]
        primary: Option<Address>,
        /// Proceed without unreachable members or with a lagging primary
        #[arg(long)]
        force: bool,
        /// Print the plan and change nothing
        #[arg(long)]
        dry_run: bool,
    },
    /// Restore quorum through a member of the surviving partition
    ForceQuorum { cluster: String, member: MemberRef },
    /// Bring a member back into the running group
    Rejoin { cluster: String, member: MemberRef },
    /// Take a member out of the group and the catalog
    Remove {
        cluster: String,
        member: MemberRef,
        #[arg(long)]
        force: bool,
    },
    /// Show the catalog next to what every member reports
    Status { cluster: String },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e:#}");
            std::process::exit(2);
        }
    };

    // RUST_LOG wins over the configured level.
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_writer(std::io::stderr)
        .compact()
        .with_ansi(true)
        .init();

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling the running operation");
            on_interrupt.cancel();
        }
    });

    let admin = ClusterAdmin::new(
        Arc::new(RespConnector::new(config.recovery.query_timeout)),
        config.connection.clone(),
        config.recovery.clone(),
        config.seeds.clone(),
    )
    .with_cancellation(cancel);

    match run(&admin, cli.command).await {
        Ok(output) => println!("{output}"),
        Err(e) => {
            error!("{}", e);
            eprintln!("{e}");
            std::process::exit(e.exit_code());
        }
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<AdminConfig> {
    let mut config = if cli.config.exists() {
        AdminConfig::read(&cli.config)?
    } else {
        let mut config = AdminConfig::default();
        config.apply_env();
        config.connection.user = std::env::var("GROUPWARDEN_USER").with_context(|| {
            format!(
                "no configuration at '{}' and GROUPWARDEN_USER is not set",
                cli.config.display()
            )
        })?;
        config
    };
    config.add_seeds(cli.seeds.iter().cloned());
    config.validate()?;
    Ok(config)
}

async fn run(admin: &ClusterAdmin, command: Command) -> Result<String, ClusterAdminError> {
    match command {
        Command::Reboot {
            cluster,
            rejoin,
            remove,
            primary,
            force,
            dry_run,
        } => {
            let options = RebootOptions {
                rejoin_members: rejoin,
                remove_members: remove,
                primary,
                force,
                dry_run,
                ..RebootOptions::default()
            };
            let (_, report) = admin.reboot_with_report(&cluster, options).await?;
            render(&report)
        }
        Command::ForceQuorum { cluster, member } => {
            let mut handle = admin.get_cluster(&cluster).await?;
            let report = handle.force_quorum_using_partition_of(&member).await?;
            render(&report)
        }
        Command::Rejoin { cluster, member } => {
            let mut handle = admin.get_cluster(&cluster).await?;
            handle.rejoin_instance(&member).await?;
            info!("{} rejoined cluster '{}'", member, cluster);
            render(&handle.status().await?)
        }
        Command::Remove {
            cluster,
            member,
            force,
        } => {
            let mut handle = admin.get_cluster(&cluster).await?;
            handle
                .remove_instance(&member, RemoveOptions { force })
                .await?;
            render(&handle.status().await?)
        }
        Command::Status { cluster } => {
            let handle = admin.get_cluster(&cluster).await?;
            render(&handle.status().await?)
        }
    }
}

fn render<T: Serialize>(value: &T) -> Result<String, ClusterAdminError> {
    Ok(serde_json::to_string_pretty(value)?)
}
