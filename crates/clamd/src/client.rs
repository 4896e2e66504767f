//! Connection handling and the detached `INSTREAM` session.

use std::path::{Path, PathBuf};

use bytes::BytesMut;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::sync::oneshot;
use tracing::debug;

use crate::protocol::{self, EngineReply};
use crate::ClamdError;

/// Verdict channel for a detached `INSTREAM` session. Yields exactly one
/// result; dropping it leaves the session running to completion.
pub type Completion = oneshot::Receiver<Result<EngineReply, ClamdError>>;

/// Client bound to one daemon socket path.
#[derive(Debug, Clone)]
pub struct ClamdClient {
    socket: PathBuf,
}

impl ClamdClient {
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self {
            socket: socket.into(),
        }
    }

    #[must_use]
    pub fn socket(&self) -> &Path {
        &self.socket
    }

    async fn connect(&self) -> Result<UnixStream, ClamdError> {
        UnixStream::connect(&self.socket)
            .await
            .map_err(|source| ClamdError::Connect {
                path: self.socket.clone(),
                source,
            })
    }

    /// Round-trip a `PING` to verify the daemon is reachable.
    ///
    /// # Errors
    ///
    /// Returns an error if the daemon cannot be reached or replies with
    /// anything but `PONG`.
    pub async fn ping(&self) -> Result<(), ClamdError> {
        let mut stream = self.connect().await?;
        stream.write_all(protocol::PING).await?;
        let reply = read_reply(&mut stream).await?;
        if reply == protocol::PONG {
            Ok(())
        } else {
            Err(ClamdError::UnexpectedPingReply(reply))
        }
    }

    /// Open an `INSTREAM` session and upload `source` from a background
    /// task, returning the verdict channel immediately.
    ///
    /// # Errors
    ///
    /// Returns an error if the initial connection fails. Upload and reply
    /// failures arrive through the channel instead.
    pub async fn scan_stream<R>(&self, source: R) -> Result<Completion, ClamdError>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let stream = self.connect().await?;
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let result = drive_instream(stream, source).await;
            if tx.send(result).is_err() {
                debug!("scan verdict arrived after the caller detached");
            }
        });
        Ok(rx)
    }
}

/// Upload `source` chunk by chunk, then read the single verdict reply.
async fn drive_instream<R>(
    mut stream: UnixStream,
    mut source: R,
) -> Result<EngineReply, ClamdError>
where
    R: AsyncRead + Unpin,
{
    stream.write_all(protocol::INSTREAM).await?;

    let mut payload = vec![0u8; protocol::CHUNK_SIZE];
    let mut frame = BytesMut::with_capacity(4 + protocol::CHUNK_SIZE);
    loop {
        let n = source.read(&mut payload).await?;
        if n == 0 {
            break;
        }
        frame.clear();
        protocol::encode_chunk(&payload[..n], &mut frame)?;
        if let Err(e) = stream.write_all(&frame).await {
            // The daemon aborts mid-upload when its own limits trip; its
            // reply carries more than the broken pipe does.
            if let Ok(reply) = read_reply(&mut stream).await {
                return protocol::parse_reply(&reply);
            }
            return Err(e.into());
        }
    }
    stream.write_all(&protocol::STREAM_END).await?;

    let reply = read_reply(&mut stream).await?;
    protocol::parse_reply(&reply)
}

/// Read one NUL-terminated reply off the stream.
async fn read_reply(stream: &mut UnixStream) -> Result<String, ClamdError> {
    let max = protocol::MAX_REPLY_LEN as u64;
    let mut reader = BufReader::new(stream).take(max + 1);
    let mut line = Vec::new();
    let n = reader
        .read_until(protocol::REPLY_TERMINATOR, &mut line)
        .await?;
    if n == 0 {
        return Err(ClamdError::ConnectionClosed);
    }
    if line.last() != Some(&protocol::REPLY_TERMINATOR) {
        if line.len() > protocol::MAX_REPLY_LEN {
            return Err(ClamdError::ReplyTooLong);
        }
        return Err(ClamdError::ConnectionClosed);
    }
    line.pop();
    String::from_utf8(line).map_err(|e| {
        ClamdError::MalformedReply(String::from_utf8_lossy(e.as_bytes()).into_owned())
    })
}
