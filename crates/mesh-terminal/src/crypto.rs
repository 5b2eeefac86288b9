//! Per-Terminal encryption session (spec.md §3 invariant 7, §9 "Encryption
//! sessions are single-writer").
//!
//! Identity issuance, key publication, and the forward-secret handshake
//! that negotiates a session key are explicitly out of scope (spec.md §1);
//! a [`CryptoSession`] here is constructed from an already-agreed key and
//! only owns the per-message seal/open step. [`ChaChaSession`] is a
//! concrete AEAD session; [`NullSession`] is used when a Terminal
//! negotiates `encrypt: false`.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use mesh_core::{ErrorId, MeshError};
use std::sync::atomic::{AtomicU64, Ordering};

/// A Terminal's inner encryption session: exactly one encrypt and one
/// decrypt may run at a time (enforced by the caller holding a lock around
/// each call, per the single-writer design note).
pub trait CryptoSession: Send + Sync {
    fn seal(&self, plaintext: &[u8]) -> Vec<u8>;
    fn open(&self, ciphertext: &[u8]) -> mesh_core::Result<Vec<u8>>;
}

/// No-op session for Terminals negotiated with `encrypt: false`.
pub struct NullSession;

impl CryptoSession for NullSession {
    fn seal(&self, plaintext: &[u8]) -> Vec<u8> {
        plaintext.to_vec()
    }

    fn open(&self, ciphertext: &[u8]) -> mesh_core::Result<Vec<u8>> {
        Ok(ciphertext.to_vec())
    }
}

/// ChaCha20-Poly1305 session keyed by a 32-byte key agreed out of band. A
/// monotonic counter supplies the nonce, matching the "single writer"
/// invariant: two concurrent seals from the same session would otherwise
/// risk nonce reuse, so callers must serialize access (a `Mutex<dyn
/// CryptoSession>` at the Terminal, per spec.md §5).
pub struct ChaChaSession {
    cipher: ChaCha20Poly1305,
    send_counter: AtomicU64,
}

impl ChaChaSession {
    pub fn new(key: [u8; 32]) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(&key)),
            send_counter: AtomicU64::new(0),
        }
    }

    fn nonce_for(counter: u64) -> Nonce {
        let mut bytes = [0u8; 12];
        bytes[..8].copy_from_slice(&counter.to_le_bytes());
        *Nonce::from_slice(&bytes)
    }
}

impl CryptoSession for ChaChaSession {
    fn seal(&self, plaintext: &[u8]) -> Vec<u8> {
        let counter = self.send_counter.fetch_add(1, Ordering::AcqRel);
        let nonce = Self::nonce_for(counter);
        let mut ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .expect("chacha20poly1305 encryption is infallible for well-formed input");
        let mut out = Vec::with_capacity(8 + ciphertext.len());
        out.extend_from_slice(&counter.to_le_bytes());
        out.append(&mut ciphertext);
        out
    }

    fn open(&self, ciphertext: &[u8]) -> mesh_core::Result<Vec<u8>> {
        if ciphertext.len() < 8 {
            return Err(MeshError::local(ErrorId::Integrity));
        }
        let mut counter_bytes = [0u8; 8];
        counter_bytes.copy_from_slice(&ciphertext[..8]);
        let nonce = Self::nonce_for(u64::from_le_bytes(counter_bytes));
        self.cipher
            .decrypt(&nonce, &ciphertext[8..])
            .map_err(|_| MeshError::local(ErrorId::Integrity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chacha_session_round_trips() {
        let session = ChaChaSession::new([7u8; 32]);
        let sealed = session.seal(b"hello mesh");
        let opened = session.open(&sealed).unwrap();
        assert_eq!(opened, b"hello mesh");
    }

    #[test]
    fn tampered_ciphertext_fails_integrity_check() {
        let session = ChaChaSession::new([9u8; 32]);
        let mut sealed = session.seal(b"payload");
        let last = sealed.len() - 1;
        sealed[last] ^= 0xff;
        assert!(matches!(
            session.open(&sealed),
            Err(e) if e.id() == ErrorId::Integrity
        ));
    }

    #[test]
    fn null_session_is_a_pass_through() {
        let session = NullSession;
        let sealed = session.seal(b"plain");
        assert_eq!(sealed, b"plain");
        assert_eq!(session.open(&sealed).unwrap(), b"plain");
    }
}
