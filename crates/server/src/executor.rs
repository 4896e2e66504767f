//! Scan execution: races the daemon verdict against the configured
//! deadline and cancellation.

use std::time::Instant;

use clamgate_clamd::{handle, ClamdError, Completion, EngineReply, EngineVerdict};
use clamgate_core::{Config, ScanError, ScanOutcome, ScanVerdict};
use tokio::io::AsyncRead;
use tokio::sync::oneshot::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::{metrics, SharedState};

/// Run one scan attempt under the in-flight gauge and record its
/// metrics under the transport's method label.
#[instrument(skip(state, source))]
pub async fn run_scan<R>(
    state: &SharedState,
    method: &'static str,
    source: R,
) -> Result<ScanOutcome, ScanError>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let _guard = metrics::in_flight();
    let outcome = perform_scan(&state.abort, source, &state.config).await;
    metrics::record_scan(method, &outcome);
    outcome
}

/// Stream `source` to the daemon and wait for the verdict, the deadline,
/// or cancellation, whichever comes first. A pre-canceled token wins over
/// an already-available verdict. On deadline or cancellation the daemon
/// session keeps running detached.
///
/// # Errors
///
/// Any [`ScanError`] variant except `TooLarge`.
pub async fn perform_scan<R>(
    cancel: &CancellationToken,
    source: R,
    config: &Config,
) -> Result<ScanOutcome, ScanError>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let client = handle::get(config);
    let started = Instant::now();

    let mut completion = match client.scan_stream(source).await {
        Ok(completion) => completion,
        Err(e) => return Err(ScanError::Unavailable(e.to_string())),
    };

    tokio::select! {
        biased;
        () = cancel.cancelled() => {
            detach(completion);
            Err(ScanError::Canceled)
        }
        () = tokio::time::sleep(config.scan_timeout) => {
            warn!(
                timeout_secs = config.scan_timeout.as_secs(),
                "scan timed out, detaching session"
            );
            detach(completion);
            Err(ScanError::Timeout {
                configured: config.scan_timeout,
            })
        }
        verdict = &mut completion => finish(verdict, started),
    }
}

fn finish(
    verdict: Result<Result<EngineReply, ClamdError>, RecvError>,
    started: Instant,
) -> Result<ScanOutcome, ScanError> {
    let elapsed_secs = started.elapsed().as_secs_f64();
    let reply = match verdict {
        Ok(Ok(reply)) => reply,
        Ok(Err(e)) => {
            return Err(ScanError::Engine {
                description: e.to_string(),
                elapsed_secs,
            });
        }
        Err(_) => {
            return Err(ScanError::Engine {
                description: "scan session ended without a verdict".to_string(),
                elapsed_secs,
            });
        }
    };

    match reply.verdict {
        EngineVerdict::Clean => Ok(ScanOutcome {
            verdict: ScanVerdict::Clean,
            description: reply.description,
            elapsed_secs,
        }),
        EngineVerdict::Found => Ok(ScanOutcome {
            verdict: ScanVerdict::Infected,
            description: reply.description,
            elapsed_secs,
        }),
        EngineVerdict::Error => Err(ScanError::Engine {
            description: reply.description,
            elapsed_secs,
        }),
    }
}

/// Drain an abandoned session in the background so its upload task can
/// finish.
fn detach(completion: Completion) {
    tokio::spawn(async move {
        match completion.await {
            Ok(Ok(reply)) => debug!(raw = %reply.raw, "detached scan finished"),
            Ok(Err(e)) => debug!(error = %e, "detached scan failed"),
            Err(_) => debug!("detached scan dropped its verdict"),
        }
    });
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::path::Path;
    use std::time::Duration;

    use clamgate_clamd::mock::{MockBehavior, MockDaemon, EICAR};

    use super::*;

    fn config_for(socket: &Path, timeout: Duration) -> Config {
        Config {
            socket: socket.to_path_buf(),
            scan_timeout: timeout,
            ..Config::default()
        }
    }

    /// All cases run in a single test because the daemon handle is
    /// process-global.
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn race_outcomes() {
        let cancel = CancellationToken::new();

        // ── clean verdict ──
        let daemon = MockDaemon::spawn().await;
        handle::reset();
        let config = config_for(daemon.socket(), Duration::from_secs(30));
        let outcome = perform_scan(&cancel, Cursor::new(b"plain bytes".to_vec()), &config)
            .await
            .expect("clean scan");
        assert_eq!(outcome.verdict, ScanVerdict::Clean);
        assert!(outcome.description.is_empty());
        assert!(outcome.elapsed_secs >= 0.0);

        // ── infected verdict carries the signature name ──
        let outcome = perform_scan(&cancel, Cursor::new(EICAR.to_vec()), &config)
            .await
            .expect("infected scan still succeeds");
        assert_eq!(outcome.verdict, ScanVerdict::Infected);
        assert!(outcome.description.contains("Eicar-Test-Signature"));

        // ── pre-canceled token wins over a fast daemon ──
        let canceled = CancellationToken::new();
        canceled.cancel();
        let err = perform_scan(&canceled, Cursor::new(b"x".to_vec()), &config)
            .await
            .unwrap_err();
        assert_eq!(err, ScanError::Canceled);

        // ── timeout returns promptly while the session drains detached ──
        let slow = MockDaemon::with_behavior(MockBehavior {
            reply_delay: Duration::from_secs(5),
            ..MockBehavior::default()
        })
        .await;
        handle::reset();
        let config = config_for(slow.socket(), Duration::from_millis(100));
        let started = Instant::now();
        let err = perform_scan(&cancel, Cursor::new(b"x".to_vec()), &config)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ScanError::Timeout {
                configured: Duration::from_millis(100),
            }
        );
        assert!(started.elapsed() < Duration::from_secs(2));

        // ── cancellation mid-wait ──
        handle::reset();
        let config = config_for(slow.socket(), Duration::from_secs(30));
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });
        let err = perform_scan(&token, Cursor::new(b"x".to_vec()), &config)
            .await
            .unwrap_err();
        assert_eq!(err, ScanError::Canceled);

        // ── daemon-reported error becomes an engine error ──
        let broken = MockDaemon::with_behavior(MockBehavior {
            forced_reply: Some("stream: Out of memory ERROR".to_string()),
            ..MockBehavior::default()
        })
        .await;
        handle::reset();
        let config = config_for(broken.socket(), Duration::from_secs(30));
        let err = perform_scan(&cancel, Cursor::new(b"x".to_vec()), &config)
            .await
            .unwrap_err();
        match err {
            ScanError::Engine {
                description,
                elapsed_secs,
            } => {
                assert_eq!(description, "Out of memory");
                assert!(elapsed_secs >= 0.0);
            }
            other => panic!("expected engine error, got {other:?}"),
        }

        // ── unreachable socket ──
        handle::reset();
        let config = config_for(
            Path::new("/nonexistent/clamd.ctl"),
            Duration::from_secs(30),
        );
        let err = perform_scan(&cancel, Cursor::new(b"x".to_vec()), &config)
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::Unavailable(_)));

        handle::reset();
    }
}
