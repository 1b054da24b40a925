//! Signaling relay binary entry point
//!
//! # Usage
//!
//! ```bash
//! # Listen on the default address (0.0.0.0:8080)
//! cargo run -p meetmesh-relay-server
//!
//! # Custom address and session cap
//! RELAY_LISTEN_ADDRESS=127.0.0.1:9000 cargo run -p meetmesh-relay-server --bin relay-server -- --max-sessions 64
//! ```

use clap::Parser;
use meetmesh_relay_server::{RelayServer, DEFAULT_MAX_SESSIONS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// MeetMesh signaling relay
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0:8080", env = "RELAY_LISTEN_ADDRESS")]
    listen: String,

    /// Maximum concurrently open sessions
    #[arg(long, default_value_t = DEFAULT_MAX_SESSIONS, env = "RELAY_MAX_SESSIONS")]
    max_sessions: usize,

    /// Emit logs as JSON
    #[arg(long, default_value_t = false, env = "RELAY_LOG_JSON")]
    log_json: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let shutdown_flag_handler = Arc::clone(&shutdown_flag);
    ctrlc::set_handler(move || {
        if shutdown_flag_handler.swap(true, Ordering::SeqCst) {
            eprintln!("Shutdown already in progress, forcing exit");
            std::process::exit(0);
        }
        eprintln!("Ctrl+C received, shutting down");
    })?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .thread_name("relay-worker")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(args, shutdown_flag))
}

async fn async_main(
    args: Args,
    shutdown_flag: Arc<AtomicBool>,
) -> Result<(), Box<dyn std::error::Error>> {
    init_tracing(args.log_json)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        listen = %args.listen,
        max_sessions = args.max_sessions,
        "MeetMesh relay starting"
    );

    let server = RelayServer::bind(&args.listen, args.max_sessions).await?;
    let shutdown = async move {
        while !shutdown_flag.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    };
    server.run(shutdown).await?;

    info!("MeetMesh relay stopped");
    Ok(())
}

fn init_tracing(json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()?;
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()?;
    }
    Ok(())
}
