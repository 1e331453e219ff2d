//! Parent → child handshake over the inherited IPC channel.
//!
//! # Framing
//!
//! One newline-delimited JSON message:
//! ```text
//! {"SOCKET_IPC_HANDSHAKE":{"bin":"…","apiToken":"…","safeMode":true,"progress":false}}\n
//! ```
//! The child reads exactly one line. Anything after it is not part of the
//! protocol and is discarded.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::debug;

use crate::domain::error::ShadowError;
use crate::domain::handshake::{Handshake, HandshakeEnvelope};

/// Environment variable carrying the child's end of the IPC channel.
pub const IPC_FD_ENV: &str = "SOCKET_SHADOW_IPC_FD";

/// Upper bound on the handshake line.
pub const MAX_HANDSHAKE_BYTES: usize = 64 * 1024;

/// Write the handshake envelope and flush.
pub async fn send_handshake<W>(writer: &mut W, handshake: &Handshake) -> Result<(), ShadowError>
where
    W: AsyncWrite + Unpin,
{
    let envelope = HandshakeEnvelope {
        handshake: handshake.clone(),
    };
    let mut line = serde_json::to_vec(&envelope).map_err(|e| ShadowError::Handshake(e.to_string()))?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    debug!(bin = %handshake.bin, "handshake sent");
    Ok(())
}

/// Block until the first message arrives and decode it.
pub async fn recv_handshake<R>(reader: R) -> Result<Handshake, ShadowError>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    let read = reader.read_line(&mut line).await?;
    if read == 0 {
        return Err(ShadowError::Handshake("channel closed before the handshake arrived".into()));
    }
    if line.len() > MAX_HANDSHAKE_BYTES {
        return Err(ShadowError::Handshake(format!("handshake exceeds {MAX_HANDSHAKE_BYTES} bytes")));
    }
    let envelope: HandshakeEnvelope =
        serde_json::from_str(line.trim_end()).map_err(|e| ShadowError::Handshake(e.to_string()))?;
    debug!(bin = %envelope.handshake.bin, "handshake received");
    Ok(envelope.handshake)
}

/// Child side: receive the handshake on the channel advertised in
/// `SOCKET_SHADOW_IPC_FD`.
///
/// Returns `Ok(None)` when the process was not started by the harness. The
/// descriptor is taken at most once per process; later calls see `None`.
#[cfg(unix)]
pub async fn recv_handshake_from_env() -> Result<Option<Handshake>, ShadowError> {
    use std::os::unix::io::{FromRawFd, RawFd};
    use std::sync::atomic::{AtomicBool, Ordering};

    static TAKEN: AtomicBool = AtomicBool::new(false);

    let Some(raw) = std::env::var_os(IPC_FD_ENV) else {
        return Ok(None);
    };
    if TAKEN.swap(true, Ordering::SeqCst) {
        return Ok(None);
    }
    std::env::remove_var(IPC_FD_ENV);

    let fd: RawFd = raw
        .to_str()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ShadowError::Handshake(format!("{IPC_FD_ENV} is not a file descriptor")))?;
    if nix::fcntl::fcntl(fd, nix::fcntl::FcntlArg::F_GETFD).is_err() {
        return Err(ShadowError::Handshake(format!("{IPC_FD_ENV}={fd} is not open")));
    }

    // SAFETY: the descriptor was opened by the parent for this process, is
    // verified open above, and `TAKEN` guarantees a single owner.
    let std_stream = unsafe { std::os::unix::net::UnixStream::from_raw_fd(fd) };
    std_stream.set_nonblocking(true)?;
    let stream = tokio::net::UnixStream::from_std(std_stream)?;
    recv_handshake(stream).await.map(Some)
}
