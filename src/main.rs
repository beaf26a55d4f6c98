use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use minisqs::{create_router, Clock, DelayDispatcher, QueueManager};

#[derive(Parser, Debug)]
#[command(name = "minisqs")]
#[command(about = "In-process, SQS wire-compatible message broker", long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "9324", env = "MINISQS_PORT")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "0.0.0.0", env = "MINISQS_HOST")]
    host: String,

    /// Account id used in queue URLs
    #[arg(long, default_value = "000000000000", env = "MINISQS_ACCOUNT_ID")]
    account_id: String,

    /// Directory for the optional snapshot; omit to run purely in memory
    #[arg(long, env = "MINISQS_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "MINISQS_LOG_LEVEL")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("minisqs={}", args.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let base_url = format!("http://{}:{}", args.host, args.port);
    let manager = Arc::new(QueueManager::new(
        base_url,
        args.account_id.clone(),
        Clock::system(),
    ));

    if let Some(ref dir) = args.data_dir {
        match minisqs::snapshot::load(&manager, dir).await {
            Ok(0) => {}
            Ok(count) => info!(queues = count, "restored queues from snapshot"),
            Err(err) => {
                tracing::warn!(error = %err, "failed to load snapshot, starting empty")
            }
        }
    }

    let dispatcher = DelayDispatcher::spawn(manager.clone());
    let app = create_router(manager.clone());

    let addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap();
    info!("minisqs listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap();

    dispatcher.shutdown();
    if let Some(ref dir) = args.data_dir {
        if let Err(err) = minisqs::snapshot::save(&manager, dir).await {
            tracing::error!(error = %err, "failed to save snapshot");
        }
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutting down");
}
