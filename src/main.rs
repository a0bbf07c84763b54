use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stalker_proxy::{config::Config, web::WebServer};

#[derive(Parser)]
#[command(name = "stalker-proxy")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "An HLS proxy that adapts Stalker-style IPTV portals into a stable playlist endpoint")]
#[command(long_about = None)]
struct Cli {
    /// TCP port to listen on (falls back to $PORT, then the config file)
    port: Option<u16>,

    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Listening IP address
    #[arg(short = 'H', long, value_name = "IP")]
    host: Option<String>,

    /// Log level
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_filter = format!("stalker_proxy={}", cli.log_level);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Stalker proxy v{}", env!("CARGO_PKG_VERSION"));

    std::env::set_var("CONFIG_FILE", &cli.config);
    let mut config = Config::load()?;
    config.validate()?;
    info!("Configuration loaded from: {}", cli.config);

    if let Some(host) = cli.host {
        config.web.host = host;
    }
    let env_port = std::env::var("PORT").ok().and_then(|p| p.parse().ok());
    if let Some(port) = cli.port.or(env_port) {
        config.web.port = port;
    }

    info!(
        "Proxy ready: {} portals, playlist TTL={}s, segment TTL={}s",
        config.upstream.portals.len(),
        config.upstream.playlist_ttl_secs,
        config.upstream.segment_ttl_secs
    );

    let server = WebServer::new(config).await?;
    info!(
        "Starting web server on {}:{}",
        server.host(),
        server.port()
    );
    server.serve().await
}
