use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use dotenv::dotenv;
use tracing::{error, info};
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use pushgate::channels::ChannelRegistry;
use pushgate::config::Config;
use pushgate::db;
use pushgate::dispatch::{queue, service::DispatchService};
use pushgate::web::{self, AppState};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to listen on, overrides LISTEN_ADDR
    #[arg(short, long)]
    listen: Option<String>,
}

fn init_logging() {
    // Log to a file: JSON format, daily rotation
    let file_appender = rolling::daily("logs", "pushgate.log");
    let file_layer = fmt::layer().with_writer(file_appender).with_ansi(false).json();

    // Log to stdout: human-readable format
    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx::query=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    init_logging();
    dotenv().ok();
    let args = Args::parse();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("failed to load configuration: {e}");
            return Err(e.into());
        }
    };

    let pool = db::connect(&config.database_url).await?;
    db::init_schema(&pool).await?;

    let registry = Arc::new(ChannelRegistry::standard(pool.clone(), &config));
    let (async_queue, rx) = queue::async_queue(config.async_queue_capacity, config.enqueue_timeout);
    queue::spawn_workers(config.async_workers, rx, pool.clone(), registry.clone());

    let dispatch = Arc::new(DispatchService::new(
        pool.clone(),
        registry,
        async_queue,
        config.server_address.clone(),
        config.message_persistence_enabled,
    ));
    if config.requeue_on_start {
        if let Err(e) = dispatch.requeue_pending_async().await {
            error!("failed to requeue pending async messages: {e}");
        }
    }

    let listen_addr = args.listen.unwrap_or_else(|| config.listen_addr.clone());
    let http_addr: SocketAddr = listen_addr.parse()?;
    let state = Arc::new(AppState { pool, dispatch, config });

    info!("starting pushgate");
    web::run_http_server(state, http_addr).await
}
