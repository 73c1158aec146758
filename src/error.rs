/// Top-level crate error.
///
/// The fatal kinds (`Protocol`, `AuthFailure`, `Transport`, `Cancelled`)
/// leave the session in its failed state; the remaining kinds describe the
/// session contract (`NotEstablished`, `Closed`) or cooperative I/O
/// (`WouldBlock`, never fatal — retry when the transport is ready).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Malformed or unexpected peer message — fatal, an alert is sent.
    Protocol,
    /// AEAD tag or signature verification failed — fatal, no retry.
    AuthFailure,
    /// Transport fault propagated from the byte stream — the session fails,
    /// the caller may reconnect.
    Transport,
    /// Caller-initiated abort via the cancel token — no alert is sent.
    Cancelled,
    /// `send`/`receive` before the handshake completed.
    NotEstablished,
    /// Session is closed.
    Closed,
    /// Would block — retry once the transport can make progress.
    WouldBlock,
    /// Caller-provided buffer too small.
    BufferTooSmall { needed: usize },
    /// Engine invariant or crypto backend failure — fatal, an
    /// `internal_error` alert is sent.
    Internal,
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::Protocol => write!(f, "protocol error"),
            Error::AuthFailure => write!(f, "authentication failure"),
            Error::Transport => write!(f, "transport error"),
            Error::Cancelled => write!(f, "cancelled"),
            Error::NotEstablished => write!(f, "session not established"),
            Error::Closed => write!(f, "session closed"),
            Error::WouldBlock => write!(f, "would block"),
            Error::BufferTooSmall { needed } => {
                write!(f, "buffer too small, need {needed} bytes")
            }
            Error::Internal => write!(f, "internal error"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}
