//! Running transcript hash for the TLS 1.3 handshake.
//!
//! Maintains a SHA-256 hash state that is updated with each handshake
//! message. Intermediate hashes are obtained by cloning the state.
//!
//! Two checkpoints are recorded along the way: the hash after
//! ClientHello..ServerHello (feeds the handshake traffic secrets) and the
//! hash after the server Finished (feeds the application traffic secrets).
//! Once the transcript advances past a checkpoint, the snapshot is the only
//! way back to that state.

use sha2::{Digest, Sha256};

/// Running SHA-256 transcript hash over TLS handshake messages.
pub struct TranscriptHash {
    hasher: Sha256,
    hello_hash: Option<[u8; 32]>,
    server_finished_hash: Option<[u8; 32]>,
}

impl TranscriptHash {
    /// Create a new empty transcript hash.
    pub fn new() -> Self {
        Self {
            hasher: Sha256::new(),
            hello_hash: None,
            server_finished_hash: None,
        }
    }

    /// Feed handshake message bytes into the transcript.
    pub fn update(&mut self, message: &[u8]) {
        self.hasher.update(message);
    }

    /// Get the current transcript hash without consuming the state.
    ///
    /// Clones the internal hasher, finalizes the clone, and returns
    /// the 32-byte SHA-256 digest.
    pub fn current_hash(&self) -> [u8; 32] {
        let clone = self.hasher.clone();
        let result = clone.finalize();
        let mut out = [0u8; 32];
        out.copy_from_slice(&result);
        out
    }

    /// Snapshot the ClientHello..ServerHello hash.
    pub fn checkpoint_hello(&mut self) {
        self.hello_hash = Some(self.current_hash());
    }

    /// Snapshot the ClientHello..server Finished hash.
    pub fn checkpoint_server_finished(&mut self) {
        self.server_finished_hash = Some(self.current_hash());
    }

    /// Hash recorded at [`checkpoint_hello`](Self::checkpoint_hello).
    pub fn hello_hash(&self) -> Option<&[u8; 32]> {
        self.hello_hash.as_ref()
    }

    /// Hash recorded at [`checkpoint_server_finished`](Self::checkpoint_server_finished).
    pub fn server_finished_hash(&self) -> Option<&[u8; 32]> {
        self.server_finished_hash.as_ref()
    }
}
