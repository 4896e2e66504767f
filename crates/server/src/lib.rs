//! HTTP and gRPC transports for the clamgate scan gateway.
//!
//! Both transports funnel every payload through the same executor, so
//! deadlines, cancellation, metrics, and error classification behave
//! identically regardless of how a file arrives.

pub mod executor;
pub mod grpc;
pub mod http;
pub mod ingest;
pub mod metrics;
mod supervisor;

pub use supervisor::run;

use std::sync::Arc;

use clamgate_core::Config;
use tokio_util::sync::CancellationToken;

/// Generated protobuf types for the `clamgate.v1` service.
pub mod proto {
    tonic::include_proto!("clamgate.v1");
}

/// Build-time metadata served by the version endpoint.
pub mod build {
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");
    /// Commit hash injected by CI, `unknown` for local builds.
    pub const COMMIT: &str = match option_env!("CLAMGATE_COMMIT") {
        Some(commit) => commit,
        None => "unknown",
    };
    pub const BUILD_TIME: &str = env!("VERGEN_BUILD_TIMESTAMP");
}

/// State shared by every transport handler.
#[derive(Debug)]
pub struct AppState {
    pub config: Config,
    /// Canceled on force-stop only; resolves in-flight scans as canceled.
    pub abort: CancellationToken,
}

pub type SharedState = Arc<AppState>;
