//! clouddetect - resolve an IP against public cloud provider ranges
//!
//! CLI entry point: parse the IP, resolve it, print the provider.

use clap::{ArgAction, Parser};
use clouddetect::{Client, Config, DetectResult};
use console::style;
use std::net::IpAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Detect whether an IP belongs to a public cloud provider's published ranges
#[derive(Parser, Debug)]
#[command(name = "clouddetect")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// IP address to look up
    ip: IpAddr,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Snapshot file shared with other clouddetect processes
    #[arg(long, env = "CLOUDDETECT_CACHE_FILE")]
    cache_file: Option<PathBuf>,

    /// Keep the cache purely in memory (no snapshot, no lease file)
    #[arg(long, conflicts_with = "cache_file")]
    no_cache_file: bool,

    /// Cache lifetime in hours
    #[arg(long, default_value_t = 12)]
    ttl_hours: u64,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> DetectResult<()> {
    let cli = Cli::parse();

    // Initialize logging: 0 = warn, 1 = info, 2+ = debug
    let filter = match cli.verbose {
        0 => EnvFilter::new("clouddetect=warn"),
        1 => EnvFilter::new("clouddetect=info"),
        _ => EnvFilter::new("clouddetect=debug"),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();

    let cache_file_path = if cli.no_cache_file {
        None
    } else {
        Some(cli.cache_file.unwrap_or_else(Config::default_cache_path))
    };

    if let Some(parent) = cache_file_path.as_deref().and_then(|p| p.parent()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| clouddetect::DetectError::io("creating cache directory", e))?;
    }

    let config = Config {
        ttl: Duration::from_secs(cli.ttl_hours * 60 * 60),
        cache_file_path,
        ..Default::default()
    };

    let client = Client::new(config);
    let record = client.resolve(cli.ip).await?;

    match record.region.as_deref() {
        Some(region) => println!("{} ({})", record.provider, region),
        None => println!("{}", record.provider),
    }
    Ok(())
}
