use anyhow::Result;
use axum::serve;
use clap::{Parser, Subcommand};
use gate_core::{
    authority::{Authority, RateLimiter, StateAuthority},
    cache::BlockCache,
    config::{AppConfig, LoggingConfig},
    ipc::IpcClient,
    supervisor::{WorkerCommand, WorkerSupervisor},
    upstream::HttpClient,
};
use rustls::crypto::{ring::default_provider, CryptoProvider};
use server::{router, state::ProxyState, ws};
use std::{future::Future, io, net::SocketAddr, path::PathBuf, sync::Arc};
use tokio::{
    net::{TcpListener, TcpSocket},
    signal,
    sync::broadcast,
};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{
    fmt::writer::BoxMakeWriter, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

#[derive(Debug, Parser)]
#[command(name = "server", version, about = "JSON-RPC admission proxy")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, env = "GATE_CONFIG", default_value = "config/config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve traffic as a supervised worker. Started by the supervisor, not by hand.
    Worker {
        #[arg(long, env = "GATE_FORK_ID", default_value_t = 0)]
        fork_id: usize,
    },
}

/// Initializes the logging system based on the configuration.
///
/// Workers write to stderr: their stdout carries the supervisor protocol.
fn init_logging(logging: &LoggingConfig, to_stderr: bool) {
    let filter = EnvFilter::try_from_env("RUST_LOG").unwrap_or_else(|_| {
        EnvFilter::new(format!("warn,gate_core={level},server={level}", level = logging.level))
    });

    let writer = if to_stderr { BoxMakeWriter::new(io::stderr) } else { BoxMakeWriter::new(io::stdout) };
    let registry = tracing_subscriber::registry().with(filter);

    if logging.format.as_str() == "json" {
        registry.with(tracing_subscriber::fmt::layer().json().with_writer(writer)).init();
    } else {
        // "pretty" and any other format default to pretty logging
        let fmt_layer = tracing_subscriber::fmt::layer()
            .pretty()
            .with_file(true)
            .with_line_number(true)
            .with_target(false)
            .with_writer(writer);
        registry.with(fmt_layer).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    CryptoProvider::install_default(default_provider())
        .map_err(|e| anyhow::anyhow!("Failed to install crypto provider: {e:?}"))?;

    let cli = Cli::parse();
    let config = AppConfig::from_file(&cli.config)
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {e}"))?;
    config.validate().map_err(|e| anyhow::anyhow!("Configuration validation failed: {e}"))?;

    match cli.command {
        Some(Command::Worker { fork_id }) => {
            init_logging(&config.logging, true);
            run_worker(Arc::new(config), fork_id).await
        }
        None => {
            init_logging(&config.logging, false);
            run_primary(Arc::new(config), cli.config).await
        }
    }
}

/// Owns the authority. Serves directly when `workers = 0`, otherwise supervises workers.
async fn run_primary(config: Arc<AppConfig>, config_path: PathBuf) -> Result<()> {
    info!(workers = config.workers, chains = config.backend_groups().len(), "starting rpc proxy");
    let addr = config.socket_addr().map_err(|e| anyhow::anyhow!(e))?;
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let client = HttpClient::new()?;
    let rate_limiter = Arc::new(RateLimiter::new(&config.limits));
    let limiter_handle = rate_limiter.start_with_shutdown(shutdown_tx.subscribe());

    let block_cache = Arc::new(BlockCache::new(config.backend_groups(), client.clone()));
    let cache_handle = config
        .block_refresh()
        .map(|interval| block_cache.start_with_shutdown(interval, shutdown_tx.subscribe()));
    if cache_handle.is_some() {
        block_cache.wait_ready().await;
        debug!(chains = block_cache.len(), "block numbers loaded");
    }

    let authority = Arc::new(Authority::new(rate_limiter, block_cache));

    if config.workers == 0 {
        let state = Arc::new(ProxyState::new(Arc::clone(&config), authority, client));
        let listener = bind(addr, false)?;
        info!(address = %addr, "rpc server listening");
        serve_state(state, listener, &shutdown_tx, shutdown_signal()).await?;
    } else {
        let program = std::env::current_exe()?;
        let args = vec!["--config".to_string(), config_path.display().to_string(), "worker".to_string()];
        let supervisor =
            Arc::new(WorkerSupervisor::new(authority, WorkerCommand::new(program, args), config.workers));
        let handles = supervisor.start_with_shutdown(&shutdown_tx);
        info!(address = %addr, workers = config.workers, "supervising workers");

        shutdown_signal().await;
        let _ = shutdown_tx.send(());
        futures_util::future::join_all(handles).await;
    }

    let _ = shutdown_tx.send(());
    limiter_handle.abort();
    if let Some(handle) = cache_handle {
        handle.abort();
    }
    info!("server shutdown complete");

    Ok(())
}

/// Serves traffic against the supervisor's authority over stdin/stdout.
async fn run_worker(config: Arc<AppConfig>, fork_id: usize) -> Result<()> {
    let addr = config.socket_addr().map_err(|e| anyhow::anyhow!(e))?;
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let ipc = Arc::new(IpcClient::stdio());
    let authority: Arc<dyn StateAuthority> = ipc.clone();
    let state = Arc::new(ProxyState::new(Arc::clone(&config), authority, HttpClient::new()?));

    let listener = bind(addr, true)?;
    debug!(fork_id, address = %addr, "worker listening");

    let stop = async move {
        tokio::select! {
            () = shutdown_signal() => {}
            () = ipc.closed() => warn!(fork_id, "supervisor pipe closed"),
        }
    };
    serve_state(state, listener, &shutdown_tx, stop).await?;
    debug!(fork_id, "worker stopped");

    Ok(())
}

async fn serve_state<F>(
    state: Arc<ProxyState>,
    listener: TcpListener,
    shutdown_tx: &broadcast::Sender<()>,
    stop: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let sweep = ws::start_liveness_sweep(
        Arc::clone(&state.sockets),
        state.config.ping_interval(),
        shutdown_tx.subscribe(),
    );

    let app = router::create_router(state);
    let result = serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(stop)
        .await;

    let _ = shutdown_tx.send(());
    let _ = sweep.await;
    if let Err(e) = &result {
        error!(error = %e, "server error occurred");
    }
    result.map_err(Into::into)
}

/// Binds the listener. Workers share one port through `SO_REUSEPORT`.
fn bind(addr: SocketAddr, reuse_port: bool) -> io::Result<TcpListener> {
    let socket = if addr.is_ipv4() { TcpSocket::new_v4()? } else { TcpSocket::new_v6()? };
    socket.set_reuseaddr(true)?;
    if reuse_port {
        set_reuse_port(&socket)?;
    }
    socket.bind(addr)?;
    socket.listen(1024)
}

#[cfg(unix)]
fn set_reuse_port(socket: &TcpSocket) -> io::Result<()> {
    socket.set_reuseport(true)
}

#[cfg(not(unix))]
fn set_reuse_port(_socket: &TcpSocket) -> io::Result<()> {
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install signal handler");
                () = std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("shutdown signal received");
}
