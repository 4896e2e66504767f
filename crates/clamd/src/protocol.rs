//! Wire protocol for the clamd unix socket.
//!
//! Commands are z-framed: a `z` prefix and a NUL terminator, which makes
//! the daemon NUL-terminate its replies too. `INSTREAM` payloads follow
//! the command as `[4B len BE][data]` chunks ending with a zero-length
//! chunk.

use bytes::{BufMut, BytesMut};

use crate::ClamdError;

/// `PING` command, z-framed.
pub const PING: &[u8] = b"zPING\0";
/// `INSTREAM` command, z-framed.
pub const INSTREAM: &[u8] = b"zINSTREAM\0";
/// Reply to a successful ping, terminator already stripped.
pub const PONG: &str = "PONG";
/// Payload bytes per `INSTREAM` chunk.
pub const CHUNK_SIZE: usize = 2048;
/// Zero-length chunk closing an `INSTREAM` session.
pub const STREAM_END: [u8; 4] = [0, 0, 0, 0];
/// Reply delimiter under z-framing.
pub const REPLY_TERMINATOR: u8 = 0;
/// Ceiling on a single reply; anything longer is a protocol breach.
pub const MAX_REPLY_LEN: usize = 4096;

/// Append one length-prefixed `INSTREAM` chunk to `buf`.
///
/// # Errors
///
/// Returns an error if `payload` does not fit the u32 length prefix.
pub fn encode_chunk(payload: &[u8], buf: &mut BytesMut) -> Result<(), ClamdError> {
    let len =
        u32::try_from(payload.len()).map_err(|_| ClamdError::ChunkTooLarge(payload.len()))?;
    buf.reserve(4 + payload.len());
    buf.put_u32(len);
    buf.put_slice(payload);
    Ok(())
}

/// Daemon verdict extracted from an `INSTREAM` reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineVerdict {
    Clean,
    Found,
    Error,
}

/// Parsed `INSTREAM` reply.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineReply {
    pub raw: String,
    pub verdict: EngineVerdict,
    /// Signature name for `Found`, failure text for `Error`, empty for
    /// `Clean`.
    pub description: String,
}

/// Parse a reply line with its terminator already stripped.
///
/// Replies carry an optional `path: ` prefix (`stream: ` for `INSTREAM`)
/// followed by `OK`, `<signature> FOUND` or `<message> ERROR`.
///
/// # Errors
///
/// Returns [`ClamdError::MalformedReply`] when no verdict suffix matches.
pub fn parse_reply(line: &str) -> Result<EngineReply, ClamdError> {
    let body = line.split_once(": ").map_or(line, |(_, rest)| rest);

    let (verdict, description) = if body == "OK" {
        (EngineVerdict::Clean, String::new())
    } else if let Some(signature) = body.strip_suffix(" FOUND") {
        (EngineVerdict::Found, signature.to_string())
    } else if let Some(message) = body.strip_suffix("ERROR") {
        let message = message.trim_end();
        let description = if message.is_empty() { line } else { message };
        (EngineVerdict::Error, description.to_string())
    } else {
        return Err(ClamdError::MalformedReply(line.to_string()));
    };

    Ok(EngineReply {
        raw: line.to_string(),
        verdict,
        description,
    })
}
