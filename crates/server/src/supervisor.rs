//! Listener lifecycle: startup, merged failure handling, ordered
//! shutdown.

use std::sync::Arc;
use std::time::Duration;

use clamgate_core::{Config, Result};
use eyre::WrapErr;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::grpc::ScannerService;
use crate::{http, AppState, SharedState};

/// Grace period between stop-accepting and force-stop.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Run the gateway until a shutdown signal or a fatal listener failure.
///
/// Both transports stop accepting as soon as shutdown starts; in-flight
/// requests get [`SHUTDOWN_GRACE`] to finish before their scans are
/// canceled and the serve tasks aborted.
///
/// # Errors
///
/// Returns an error on invalid configuration, bind failure, or when a
/// listener fails at runtime.
pub async fn run(config: Config) -> Result<()> {
    config.validate()?;
    info!(
        socket = %config.socket.display(),
        max_size = config.max_size,
        scan_timeout_secs = config.scan_timeout.as_secs(),
        host = %config.host,
        http_port = config.http_port,
        grpc_port = config.grpc_port,
        enable_grpc = config.enable_grpc,
        "starting clamgate"
    );

    let shutdown = CancellationToken::new();
    let abort = CancellationToken::new();
    let state: SharedState = Arc::new(AppState {
        config: config.clone(),
        abort: abort.clone(),
    });

    let (err_tx, mut err_rx) = mpsc::channel::<eyre::Report>(2);

    let http_addr = config.http_addr()?;
    let http_listener = TcpListener::bind(http_addr)
        .await
        .wrap_err_with(|| format!("failed to listen on {http_addr}"))?;
    info!(addr = %http_addr, "http server listening");
    let http_task = spawn_http(
        http_listener,
        Arc::clone(&state),
        shutdown.clone(),
        err_tx.clone(),
    );

    let grpc_task = if config.enable_grpc {
        let grpc_addr = config.grpc_addr()?;
        let grpc_listener = TcpListener::bind(grpc_addr)
            .await
            .wrap_err_with(|| format!("failed to listen on {grpc_addr}"))?;
        info!(addr = %grpc_addr, "grpc server listening");
        Some(spawn_grpc(grpc_listener, state, shutdown.clone(), err_tx))
    } else {
        None
    };

    let mut failure = None;
    tokio::select! {
        signal = wait_for_signal() => {
            info!(signal, "shutdown signal received");
        }
        Some(err) = err_rx.recv() => {
            error!(error = %err, "server failed, shutting down");
            failure = Some(err);
        }
    }

    shutdown.cancel();
    info!(
        grace_secs = SHUTDOWN_GRACE.as_secs(),
        "waiting for in-flight requests"
    );
    let deadline = tokio::time::Instant::now() + SHUTDOWN_GRACE;
    join_with_deadline("http", http_task, deadline, &abort).await;
    if let Some(task) = grpc_task {
        join_with_deadline("grpc", task, deadline, &abort).await;
    }
    info!("all servers stopped");

    failure.map_or(Ok(()), Err)
}

fn spawn_http(
    listener: TcpListener,
    state: SharedState,
    shutdown: CancellationToken,
    err_tx: mpsc::Sender<eyre::Report>,
) -> JoinHandle<()> {
    let app = http::router(state);
    tokio::spawn(async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await;
        if let Err(e) = result {
            let _ = err_tx
                .send(eyre::Report::new(e).wrap_err("http server error"))
                .await;
        }
    })
}

fn spawn_grpc(
    listener: TcpListener,
    state: SharedState,
    shutdown: CancellationToken,
    err_tx: mpsc::Sender<eyre::Report>,
) -> JoinHandle<()> {
    let service = ScannerService::new(state).into_server();
    tokio::spawn(async move {
        let result = tonic::transport::Server::builder()
            .add_service(service)
            .serve_with_incoming_shutdown(
                TcpListenerStream::new(listener),
                shutdown.cancelled_owned(),
            )
            .await;
        if let Err(e) = result {
            let _ = err_tx
                .send(eyre::Report::new(e).wrap_err("grpc server error"))
                .await;
        }
    })
}

/// Await a serve task until the shared deadline; past it, cancel
/// in-flight scans and abort the task.
async fn join_with_deadline(
    name: &str,
    mut task: JoinHandle<()>,
    deadline: tokio::time::Instant,
    abort: &CancellationToken,
) {
    match tokio::time::timeout_at(deadline, &mut task).await {
        Ok(Ok(())) => info!(server = name, "server stopped"),
        Ok(Err(e)) => warn!(server = name, error = %e, "serve task failed to join"),
        Err(_) => {
            warn!(server = name, "graceful shutdown timed out, forcing stop");
            abort.cancel();
            task.abort();
            let _ = task.await;
        }
    }
}

/// Wait for SIGINT or SIGTERM, returning which one arrived.
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(terminate) => terminate,
        Err(e) => {
            error!(error = %e, "failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return "SIGINT";
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => "SIGINT",
        _ = terminate.recv() => "SIGTERM",
    }
}
