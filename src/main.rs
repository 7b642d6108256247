use std::error::Error;
use std::sync::Arc;
use clap::Parser;
use sshy_tunnel::logging::{self, LogLevel};
use sshy_tunnel::tunnel_stats::TunnelStats;
use sshy_tunnel::{ListenerMode, SshProvider, TunnelConfig, TunnelListener};

/// Relay a local port to HOST:PORT through the SSH endpoint in SSHY_HOST.
#[derive(Parser, Debug)]
#[command(name = "sshy-tunnel")]
#[command(version)]
struct Args {
    /// Destination host, as seen from the SSH endpoint
    host: String,

    /// Destination port
    port: u16,

    /// Serve a single client and exit afterwards
    #[arg(long)]
    single_shot: bool,

    /// Log level (error, warn, info, debug, trace); overrides SSHY_LOG
    #[arg(short = 'v', long)]
    log_level: Option<LogLevel>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    logging::init(args.log_level.unwrap_or_else(LogLevel::from_env));

    let mut config = TunnelConfig::from_env()?;
    config.mode = if args.single_shot {
        ListenerMode::SingleShot
    } else {
        ListenerMode::Sequential
    };

    let stats = TunnelStats::new();
    let listener = TunnelListener::new(Arc::new(SshProvider::new()), config).with_stats(Arc::clone(&stats));
    let handle = listener.start(&args.host, args.port)?;
    println!("{}", handle.port());

    if args.single_shot {
        tokio::task::spawn_blocking(move || handle.join())
            .await?
            .map_err(|_| "tunnel worker panicked")?;
    } else {
        tokio::signal::ctrl_c().await?;
    }

    stats.log_stats();
    Ok(())
}
