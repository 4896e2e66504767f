//! In-process clamd stand-in for tests.
//!
//! Speaks just enough of the real protocol: z-framed `PING` and
//! `INSTREAM` commands, NUL-terminated replies, and an EICAR substring
//! check to decide verdicts.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinHandle;

/// EICAR test signature payload; every engine flags it.
pub const EICAR: &[u8] = br"X5O!P%@AP[4\PZX54(P^)7CC)7}$EICAR-STANDARD-ANTIVIRUS-TEST-FILE!$H+H*";

const FOUND_REPLY: &str = "stream: Eicar-Test-Signature FOUND";
const CLEAN_REPLY: &str = "stream: OK";

/// Tunable behavior for a [`MockDaemon`].
#[derive(Debug, Clone, Default)]
pub struct MockBehavior {
    /// Pause before each `INSTREAM` verdict.
    pub reply_delay: Duration,
    /// Fixed `INSTREAM` reply overriding the EICAR check.
    pub forced_reply: Option<String>,
}

/// Listening mock daemon. Dropping it stops the accept loop and removes
/// the socket directory.
pub struct MockDaemon {
    socket: PathBuf,
    _dir: TempDir,
    task: JoinHandle<()>,
}

impl MockDaemon {
    /// Start a mock with default behavior.
    ///
    /// # Panics
    ///
    /// Panics if the socket cannot be created.
    pub async fn spawn() -> Self {
        Self::with_behavior(MockBehavior::default()).await
    }

    /// Start a mock with the given behavior.
    ///
    /// # Panics
    ///
    /// Panics if the socket cannot be created.
    pub async fn with_behavior(behavior: MockBehavior) -> Self {
        let dir = tempfile::tempdir().expect("create socket dir");
        let socket = dir.path().join("clamd.ctl");
        let listener = UnixListener::bind(&socket).expect("bind mock socket");
        let task = tokio::spawn(accept_loop(listener, behavior));
        Self {
            socket,
            _dir: dir,
            task,
        }
    }

    #[must_use]
    pub fn socket(&self) -> &Path {
        &self.socket
    }
}

impl Drop for MockDaemon {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn accept_loop(listener: UnixListener, behavior: MockBehavior) {
    loop {
        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        tokio::spawn(serve_connection(stream, behavior.clone()));
    }
}

async fn serve_connection(stream: UnixStream, behavior: MockBehavior) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let mut command = Vec::new();
    if reader.read_until(0, &mut command).await.unwrap_or(0) == 0 {
        return;
    }

    match command.as_slice() {
        b"zPING\0" => {
            let _ = write_half.write_all(b"PONG\0").await;
        }
        b"zINSTREAM\0" => {
            let Some(payload) = read_instream_payload(&mut reader).await else {
                return;
            };
            tokio::time::sleep(behavior.reply_delay).await;
            let reply = behavior.forced_reply.unwrap_or_else(|| {
                if contains(&payload, EICAR) {
                    FOUND_REPLY.to_string()
                } else {
                    CLEAN_REPLY.to_string()
                }
            });
            let _ = write_half.write_all(reply.as_bytes()).await;
            let _ = write_half.write_all(&[0]).await;
        }
        _ => {}
    }
}

/// Collect chunk payloads until the zero-length terminator.
async fn read_instream_payload<R: AsyncRead + Unpin>(reader: &mut R) -> Option<Vec<u8>> {
    let mut payload = Vec::new();
    loop {
        let mut len_buf = [0u8; 4];
        reader.read_exact(&mut len_buf).await.ok()?;
        let len = u32::from_be_bytes(len_buf) as usize;
        if len == 0 {
            return Some(payload);
        }
        let start = payload.len();
        payload.resize(start + len, 0);
        reader.read_exact(&mut payload[start..]).await.ok()?;
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}
