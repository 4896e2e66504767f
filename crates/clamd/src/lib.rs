//! Async client for the clamd antivirus daemon.
//!
//! Speaks the z-framed command protocol over the daemon's unix socket:
//! `PING` for liveness and `INSTREAM` for chunked payload scanning. Each
//! operation opens a fresh connection; clamd closes the stream after a
//! reply anyway.

pub mod client;
pub mod handle;
#[cfg(feature = "mock")]
pub mod mock;
pub mod protocol;

pub use client::{ClamdClient, Completion};
pub use protocol::{EngineReply, EngineVerdict};

use std::path::PathBuf;

/// Failure talking to the daemon.
#[derive(Debug, thiserror::Error)]
pub enum ClamdError {
    /// The socket could not be reached at all.
    #[error("failed to connect to clamd at {}: {source}", .path.display())]
    Connect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("clamd io: {0}")]
    Io(#[from] std::io::Error),

    /// A single `INSTREAM` chunk would overflow its length prefix.
    #[error("chunk of {0} bytes exceeds the u32 length prefix")]
    ChunkTooLarge(usize),

    #[error("unexpected ping reply {0:?}")]
    UnexpectedPingReply(String),

    /// The reply matched none of the known verdict shapes.
    #[error("malformed clamd reply {0:?}")]
    MalformedReply(String),

    #[error("clamd closed the connection before replying")]
    ConnectionClosed,

    #[error("clamd reply exceeded {} bytes", protocol::MAX_REPLY_LEN)]
    ReplyTooLong,
}
