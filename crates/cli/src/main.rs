//! Clamgate - ClamAV scanning gateway over HTTP and gRPC.

mod cli;

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

fn init_tracing() {
    let filter =
        EnvFilter::try_from_env("CLAMGATE_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();
}

fn main() -> ExitCode {
    init_tracing();

    let config = cli::Cli::parse().into_config();

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_io()
        .enable_time()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!(%e, "failed to build tokio runtime");
            eprintln!("runtime error: {e}");
            return ExitCode::FAILURE;
        }
    };

    match rt.block_on(clamgate_server::run(config)) {
        Ok(()) => {
            info!("gateway shutdown cleanly");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "gateway error");
            eprintln!("clamgate: {e}");
            ExitCode::FAILURE
        }
    }
}
