//! Rift Relay Server
//!
//! Pairs mobile peers with desktop Conduits by code and relays their traffic.

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use rift_relay::notifications::PushGatewayConfig;
use rift_relay::storage::RelayDatabase;
use rift_relay::{build_router, AppState, RelayConfig};

#[derive(Parser, Debug)]
#[command(name = "rift-relay")]
#[command(version, about = "Rift relay server - rendezvous and relay for Conduits")]
struct Args {
    /// Address to listen on.
    #[arg(long, env = "RIFT_ADDR", default_value = "0.0.0.0:51001")]
    addr: SocketAddr,

    /// Path to SQLite database file.
    #[arg(long, env = "RIFT_DB_PATH")]
    db_path: Option<PathBuf>,

    /// Secret used to sign every token.
    #[arg(long, env = "RIFT_JWT_SECRET", hide_env_values = true)]
    jwt_secret: String,

    /// Seconds between liveness pings on each socket.
    #[arg(long, default_value_t = 10)]
    ping_interval: u64,

    /// Push gateway endpoint. Notifications are dropped when unset.
    #[arg(long, env = "RIFT_PUSH_GATEWAY_URL")]
    push_gateway_url: Option<String>,

    /// Bearer token for the push gateway.
    #[arg(long, env = "RIFT_PUSH_GATEWAY_TOKEN", hide_env_values = true)]
    push_gateway_token: Option<String>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    rift_core::tracing_init::init_tracing("rift_relay=info", args.log_json)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %args.addr,
        "Starting rift-relay"
    );

    let config = RelayConfig {
        ping_interval: Duration::from_secs(args.ping_interval),
        push_gateway: args.push_gateway_url.map(|url| PushGatewayConfig {
            url,
            token: args.push_gateway_token,
        }),
        ..RelayConfig::new(args.jwt_secret)
    };
    config.validate()?;

    let db_path = match args.db_path {
        Some(path) => path,
        None => default_db_path()?,
    };
    info!(path = %db_path.display(), "Opening relay database");
    let db = RelayDatabase::open(&db_path).await?;

    let state = AppState::new(db, &config)?;
    if config.push_gateway.is_none() {
        info!("No push gateway configured; notifications will be dropped");
    }

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(args.addr).await?;
    info!(addr = %args.addr, "Relay server listening");

    tokio::select! {
        result = axum::serve(listener, app).into_future() => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    info!("Relay stopped");
    Ok(())
}

fn default_db_path() -> anyhow::Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Cannot determine home directory"))?;
    Ok(home.join(".rift").join("rift.db"))
}
