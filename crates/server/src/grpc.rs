//! gRPC transport for the `clamgate.v1.Scanner` service.

use std::io::Cursor;
use std::sync::Arc;

use bytes::Bytes;
use clamgate_clamd::handle;
use clamgate_core::ScanError;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, info, warn};

use crate::ingest::{Chunk, Ingested, StreamAccumulator};
use crate::proto::scanner_server::{Scanner, ScannerServer};
use crate::proto::{
    HealthCheckRequest, HealthCheckResponse, ScanChunk, ScanFileRequest, ScanReply,
};
use crate::{executor, metrics, SharedState};

/// Headroom over the ceiling for protobuf framing.
const GRPC_SLACK: usize = 1024 * 1024;

/// gRPC transport handler.
#[derive(Debug)]
pub struct ScannerService {
    state: SharedState,
}

impl ScannerService {
    #[must_use]
    pub fn new(state: SharedState) -> Self {
        Self { state }
    }

    /// Tonic service wrapper with message size limits derived from the
    /// configured ceiling.
    #[must_use]
    pub fn into_server(self) -> ScannerServer<Self> {
        let limit = message_limit(self.state.config.max_size);
        ScannerServer::new(self)
            .max_decoding_message_size(limit)
            .max_encoding_message_size(limit)
    }
}

fn message_limit(ceiling: u64) -> usize {
    usize::try_from(ceiling)
        .unwrap_or(usize::MAX)
        .saturating_add(GRPC_SLACK)
}

#[tonic::async_trait]
impl Scanner for ScannerService {
    async fn health_check(
        &self,
        _request: Request<HealthCheckRequest>,
    ) -> Result<Response<HealthCheckResponse>, Status> {
        match handle::ping(&self.state.config).await {
            Ok(()) => {
                metrics::set_health(true);
                debug!("health check passed");
                Ok(Response::new(HealthCheckResponse {
                    status: "healthy".to_string(),
                    message: "ok".to_string(),
                }))
            }
            Err(e) => {
                metrics::set_health(false);
                warn!(error = %e, "health check failed");
                Ok(Response::new(HealthCheckResponse {
                    status: "unhealthy".to_string(),
                    message: format!("ClamAV service unavailable: {e}"),
                }))
            }
        }
    }

    async fn scan_file(
        &self,
        request: Request<ScanFileRequest>,
    ) -> Result<Response<ScanReply>, Status> {
        let req = request.into_inner();
        if req.data.is_empty() {
            warn!("scan rejected: empty file data");
            return Err(Status::invalid_argument("file data is required"));
        }
        let ceiling = self.state.config.max_size;
        if req.data.len() as u64 > ceiling {
            warn!(
                size = req.data.len(),
                max_allowed = ceiling,
                filename = %req.filename,
                "scan rejected: file too large"
            );
            return Err(Status::resource_exhausted(too_large_message(ceiling)));
        }

        debug!(filename = %req.filename, size = req.data.len(), "unary scan started");
        let source = Cursor::new(req.data);
        match executor::run_scan(&self.state, "grpc_scan", source).await {
            Ok(outcome) => {
                info!(
                    filename = %req.filename,
                    status = outcome.status_label(),
                    result = %outcome.description,
                    elapsed_seconds = outcome.elapsed_secs,
                    "unary scan completed"
                );
                Ok(Response::new(reply(&outcome, req.filename)))
            }
            Err(err) => Err(map_scan_error(&err)),
        }
    }

    async fn scan_stream(
        &self,
        request: Request<Streaming<ScanChunk>>,
    ) -> Result<Response<ScanReply>, Status> {
        let mut inbound = request.into_inner();
        let mut accumulator = StreamAccumulator::new(self.state.config.max_size);
        let mut got_chunks = false;

        let file = loop {
            let message = inbound
                .message()
                .await
                .map_err(|e| Status::internal(format!("failed to receive chunk: {e}")))?;
            let Some(chunk) = message else {
                return Err(if got_chunks {
                    Status::invalid_argument("stream closed before final chunk")
                } else {
                    Status::invalid_argument("no file data received")
                });
            };
            got_chunks = true;
            match accumulator.ingest(to_chunk(chunk)) {
                Ok(Ingested::Pending) => {}
                Ok(Ingested::Complete(file)) => break file,
                Err(err) => {
                    warn!(
                        received = accumulator.received(),
                        "stream scan rejected: file too large"
                    );
                    return Err(map_scan_error(&err));
                }
            }
        };

        let filename = file.filename.unwrap_or_default();
        debug!(filename = %filename, size = file.data.len(), "stream scan assembled");
        match executor::run_scan(&self.state, "grpc_stream_scan", Cursor::new(file.data)).await {
            Ok(outcome) => {
                info!(
                    filename = %filename,
                    status = outcome.status_label(),
                    result = %outcome.description,
                    elapsed_seconds = outcome.elapsed_secs,
                    "stream scan completed"
                );
                Ok(Response::new(reply(&outcome, filename)))
            }
            Err(err) => Err(map_scan_error(&err)),
        }
    }

    type ScanMultipleStream = ReceiverStream<Result<ScanReply, Status>>;

    async fn scan_multiple(
        &self,
        request: Request<Streaming<ScanChunk>>,
    ) -> Result<Response<Self::ScanMultipleStream>, Status> {
        let mut inbound = request.into_inner();
        let state = Arc::clone(&self.state);
        let (tx, rx) = mpsc::channel(4);

        tokio::spawn(async move {
            let mut accumulator = StreamAccumulator::new(state.config.max_size);
            loop {
                let chunk = match inbound.message().await {
                    Ok(Some(chunk)) => chunk,
                    // Stream closed; pending bytes of an unterminated
                    // trailing file are dropped.
                    Ok(None) => break,
                    Err(e) => {
                        let status = Status::internal(format!("failed to receive chunk: {e}"));
                        let _ = tx.send(Err(status)).await;
                        break;
                    }
                };
                match accumulator.ingest(to_chunk(chunk)) {
                    Ok(Ingested::Pending) => {}
                    Ok(Ingested::Complete(file)) => {
                        let filename = file.filename.unwrap_or_default();
                        let outcome = executor::run_scan(
                            &state,
                            "grpc_scan_multiple",
                            Cursor::new(file.data),
                        )
                        .await;
                        let message = match outcome {
                            Ok(outcome) => Ok(reply(&outcome, filename)),
                            Err(err @ ScanError::Canceled) => Err(map_scan_error(&err)),
                            Err(err) => Ok(in_band_error(&err, filename)),
                        };
                        let terminal = message.is_err();
                        if tx.send(message).await.is_err() || terminal {
                            break;
                        }
                    }
                    Err(err) => {
                        warn!(
                            received = accumulator.received(),
                            "multi scan rejected: file too large"
                        );
                        let _ = tx.send(Err(map_scan_error(&err))).await;
                        break;
                    }
                }
            }
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }
}

fn to_chunk(chunk: ScanChunk) -> Chunk {
    Chunk {
        data: Bytes::from(chunk.chunk),
        filename: (!chunk.filename.is_empty()).then_some(chunk.filename),
        is_last: chunk.is_last,
    }
}

fn reply(outcome: &clamgate_core::ScanOutcome, filename: String) -> ScanReply {
    ScanReply {
        status: outcome.status_label().to_string(),
        message: outcome.description.clone(),
        scan_time: outcome.elapsed_secs,
        filename,
    }
}

/// Per-file failure reported in-band so a multi-file session survives
/// it.
fn in_band_error(err: &ScanError, filename: String) -> ScanReply {
    ScanReply {
        status: "ERROR".to_string(),
        message: err.to_string(),
        scan_time: 0.0,
        filename,
    }
}

/// Mechanical `ScanError` to gRPC status mapping.
fn map_scan_error(err: &ScanError) -> Status {
    match err {
        ScanError::Canceled => Status::cancelled("request canceled by client"),
        ScanError::Timeout { .. } => Status::deadline_exceeded(err.to_string()),
        ScanError::Engine { .. } => Status::internal(format!("scan error: {err}")),
        ScanError::Unavailable(_) => Status::unavailable(err.to_string()),
        ScanError::TooLarge { ceiling } => Status::resource_exhausted(too_large_message(*ceiling)),
    }
}

fn too_large_message(ceiling: u64) -> String {
    format!("file too large, maximum size is {ceiling} bytes")
}
