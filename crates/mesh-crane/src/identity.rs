//! The Hub-identity seam. Identity issuance, key publication, and the
//! forward-secret handshake that would normally negotiate a Crane's outer
//! session key are explicitly out of scope (spec.md §1), mirroring
//! `mesh_terminal::crypto`'s own simplification one layer down. A
//! [`HubIdentity`] is how a concrete deployment plugs in whatever identity
//! system it actually has; [`StaticHubIdentity`] is a pre-shared-key stand-in
//! good enough to drive the handshake state machine end to end.

use mesh_core::CraneId;

/// What a Crane asks its embedder for while running the init handshake
/// (spec.md §4.4): its own announcement/status to hand a peer, signatures
/// over a peer's challenge, and the outer session key once a peer is
/// resolved.
pub trait HubIdentity: Send + Sync {
    fn hub_id(&self) -> CraneId;

    /// Opaque announcement block sent in reply to `HubInfoRequest`.
    fn announcement(&self) -> Vec<u8>;

    /// Opaque status block sent alongside the announcement.
    fn status(&self) -> Vec<u8>;

    fn sign(&self, challenge: &[u8]) -> Vec<u8>;

    fn verify(&self, challenge: &[u8], signature: &[u8]) -> bool;

    /// The key an outer [`mesh_terminal::ChaChaSession`] will be built from
    /// once a peer is resolved.
    fn outer_session_key(&self) -> [u8; 32];

    /// Recover the peer's [`CraneId`] from the announcement/status it sent
    /// back during the dialer-side handshake.
    fn resolve_peer(&self, announcement: &[u8], status: &[u8]) -> Option<CraneId>;
}

/// A pre-shared symmetric key stand-in for real identity issuance. The
/// announcement is just the hub's ID as hex; `sign`/`verify` XOR the
/// challenge with the key rather than perform real asymmetric crypto — a
/// documented placeholder, not a security claim.
pub struct StaticHubIdentity {
    hub_id: CraneId,
    shared_key: [u8; 32],
}

impl StaticHubIdentity {
    pub fn new(hub_id: CraneId, shared_key: [u8; 32]) -> Self {
        Self { hub_id, shared_key }
    }

    fn xor_with_key(&self, data: &[u8]) -> Vec<u8> {
        data.iter()
            .enumerate()
            .map(|(i, byte)| byte ^ self.shared_key[i % self.shared_key.len()])
            .collect()
    }
}

impl HubIdentity for StaticHubIdentity {
    fn hub_id(&self) -> CraneId {
        self.hub_id
    }

    fn announcement(&self) -> Vec<u8> {
        self.hub_id.as_hex().into_bytes()
    }

    fn status(&self) -> Vec<u8> {
        Vec::new()
    }

    fn sign(&self, challenge: &[u8]) -> Vec<u8> {
        self.xor_with_key(challenge)
    }

    fn verify(&self, challenge: &[u8], signature: &[u8]) -> bool {
        self.xor_with_key(challenge) == signature
    }

    fn outer_session_key(&self) -> [u8; 32] {
        self.shared_key
    }

    fn resolve_peer(&self, announcement: &[u8], _status: &[u8]) -> Option<CraneId> {
        let hex_str = std::str::from_utf8(announcement).ok()?;
        let bytes = hex::decode(hex_str).ok()?;
        let bytes: [u8; 3] = bytes.try_into().ok()?;
        Some(CraneId::from_bytes(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify_round_trip() {
        let identity = StaticHubIdentity::new(CraneId::random(), [9u8; 32]);
        let challenge = b"are you really hub abc123";
        let sig = identity.sign(challenge);
        assert!(identity.verify(challenge, &sig));
    }

    #[test]
    fn announcement_round_trips_through_resolve_peer() {
        let hub_id = CraneId::from_bytes([1, 2, 3]);
        let identity = StaticHubIdentity::new(hub_id, [0u8; 32]);
        let resolved = identity.resolve_peer(&identity.announcement(), &identity.status());
        assert_eq!(resolved, Some(hub_id));
    }
}
