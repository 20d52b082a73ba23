use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

use kldfs_gateway::config::{self, DEFAULT_BLOCK_SIZE, DEFAULT_PORT};
use kldfs_gateway::{GatewayConfig, InstanceRegistry, LocalityMonitor};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Comma-separated gateway hosts, `host` or `host:port`
    #[arg(long, env = "GATEWAY_HOSTS")]
    hosts: String,

    /// Port for hosts given without one
    #[arg(long, env = "GATEWAY_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Block size used for locality hints
    #[arg(long, env = "GATEWAY_BLOCK_SIZE", default_value_t = DEFAULT_BLOCK_SIZE)]
    block_size: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Stat a path on the first gateway
    Stat { path: String },
    /// List a directory on the first gateway
    Ls { path: String },
    /// List extended attributes on every gateway, or fetch one by name
    Xattr { path: String, name: Option<String> },
    /// Show which gateways cache each block of a byte range
    Blocks {
        path: String,
        #[arg(long, default_value_t = 0)]
        start: u64,
        /// Bytes to cover; defaults to the rest of the file
        #[arg(long)]
        len: Option<u64>,
    },
}

async fn run(args: Args) -> Result<()> {
    let hosts = config::parse_host_list(&args.hosts);
    if hosts.is_empty() {
        bail!("no gateway hosts given");
    }
    let config = GatewayConfig::default()
        .with_hosts(hosts.clone())
        .with_default_port(args.port)
        .with_block_size(args.block_size);
    let registry = Arc::new(InstanceRegistry::new(config));

    match args.command {
        Command::Stat { path } => {
            let client = registry.get_instance(&hosts[0]).await?;
            let stat = client.get_stat(&path).await?;
            println!("path:    {}", path);
            println!("size:    {}", stat.size);
            println!("mode:    {:o}", stat.mode);
            println!("owner:   {}:{}", stat.uid, stat.gid);
            println!("links:   {}", stat.nlink);
            println!("inode:   {} (dev {})", stat.ino, stat.dev);
            println!("blocks:  {} x {}", stat.blocks, stat.blksize);
            if let Some(mtime) = stat.modified() {
                println!("mtime:   {}", mtime.to_rfc3339());
            }
        }
        Command::Ls { path } => {
            let client = registry.get_instance(&hosts[0]).await?;
            for name in client.read_directory_entries(&path).await? {
                println!("{}", name);
            }
        }
        Command::Xattr { path, name } => {
            let monitor = LocalityMonitor::new(Arc::clone(&registry))?;
            match name {
                Some(name) => {
                    for entry in monitor.get_extended_attrs(&path, &name).await {
                        match entry.value {
                            Some(value) => {
                                println!("{}: {}", entry.host, String::from_utf8_lossy(&value))
                            }
                            None => println!("{}: -", entry.host),
                        }
                    }
                }
                None => {
                    for entry in monitor.list_extended_attrs(&path).await {
                        match entry.value {
                            Some(names) => println!("{}: {}", entry.host, names.join(", ")),
                            None => println!("{}: -", entry.host),
                        }
                    }
                }
            }
        }
        Command::Blocks { path, start, len } => {
            let monitor = LocalityMonitor::new(Arc::clone(&registry))?;
            let locations = monitor
                .block_locations(&path, start, len.unwrap_or(u64::MAX))
                .await;
            if locations.is_empty() {
                println!("no blocks in range");
            }
            for location in locations {
                println!(
                    "{:>12} +{:<10} {}",
                    location.offset,
                    location.length,
                    location.hosts.join(",")
                );
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with_target(true)
        .init();

    let args = Args::parse();
    let result = run(args).await.context("gateway command failed");
    if let Err(e) = &result {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
    result
}
