//! The Crane init handshake (spec.md §4.4): a short run of one-shot request
//! frames exchanged directly over the physical stream, before either side
//! has a Crane (or its steady-state loops) to speak of. Ends once a `Start`
//! frame hands over the controller Terminal's [`TerminalOpts`].

use crate::error::CraneError;
use crate::identity::HubIdentity;
use mesh_core::{CraneId, ErrorId, MeshError};
use mesh_terminal::{ChaChaSession, CryptoSession, NullSession};
use mesh_wire::{read_frame, write_frame, PhysicalStream, TerminalOpts, SUPPORTED_VERSION};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub mod frame_type {
    pub const END: u8 = 0;
    pub const INFO: u8 = 1;
    pub const HUB_INFO_REQUEST: u8 = 2;
    pub const VERIFY: u8 = 3;
    pub const START_ENCRYPTED: u8 = 4;
    pub const START_UNENCRYPTED: u8 = 5;
}

#[derive(Debug, Serialize, Deserialize)]
struct VersionInfo {
    supported_versions: Vec<u8>,
}

/// What the handshake hands off to `Crane::launch` once it completes.
pub struct HandshakeOutcome {
    pub controller_opts: TerminalOpts,
    pub peer_hub_id: Option<CraneId>,
    pub outer_session: Box<dyn CryptoSession>,
    pub outer_key: Option<[u8; 32]>,
}

async fn send_init_frame<S: PhysicalStream>(stream: &mut S, payload: &[u8]) -> mesh_core::Result<()> {
    write_frame(stream, payload)
        .await
        .map_err(|err| MeshError::new(ErrorId::ConnectionError, err.to_string()))
}

async fn recv_init_frame<S: PhysicalStream>(stream: &mut S) -> mesh_core::Result<Vec<u8>> {
    read_frame(stream)
        .await
        .map_err(|err| MeshError::new(ErrorId::ConnectionError, err.to_string()))?
        .ok_or_else(|| MeshError::from(CraneError::HandshakeIncomplete))
}

fn write_length_prefixed(out: &mut Vec<u8>, block: &[u8]) {
    mesh_core::varint::encode_into(block.len() as u64, out);
    out.extend_from_slice(block);
}

fn read_length_prefixed(buf: &[u8]) -> mesh_core::Result<(&[u8], &[u8])> {
    let (len, consumed) = mesh_core::varint::decode(buf).map_err(|_| MeshError::local(ErrorId::MalformedData))?;
    let len = len as usize;
    let body_end = consumed
        .checked_add(len)
        .filter(|&end| end <= buf.len())
        .ok_or_else(|| MeshError::local(ErrorId::MalformedData))?;
    Ok((&buf[consumed..body_end], &buf[body_end..]))
}

/// Run the listener side of the handshake (spec.md §4.4's listener table):
/// loop on one-shot requests until a `Start` frame arrives.
pub async fn run_listener<S: PhysicalStream>(
    stream: &mut S,
    identity: Option<&Arc<dyn HubIdentity>>,
) -> mesh_core::Result<HandshakeOutcome> {
    loop {
        let frame = recv_init_frame(stream).await?;
        let (&tag, rest) = frame.split_first().ok_or_else(|| MeshError::local(ErrorId::MalformedData))?;

        match tag {
            frame_type::END => return Err(MeshError::local(ErrorId::Stopping)),

            frame_type::INFO => {
                let info = VersionInfo {
                    supported_versions: vec![SUPPORTED_VERSION],
                };
                let body = serde_json::to_vec(&info).expect("VersionInfo always serializes");
                send_init_frame(stream, &body).await?;
            }

            frame_type::HUB_INFO_REQUEST => {
                let identity = identity.ok_or_else(|| MeshError::from(CraneError::IdentityRequired))?;
                let mut body = Vec::new();
                write_length_prefixed(&mut body, &identity.announcement());
                write_length_prefixed(&mut body, &identity.status());
                send_init_frame(stream, &body).await?;
            }

            frame_type::VERIFY => {
                let identity = identity.ok_or_else(|| MeshError::from(CraneError::IdentityRequired))?;
                let signature = identity.sign(rest);
                send_init_frame(stream, &signature).await?;
            }

            frame_type::START_UNENCRYPTED => {
                let controller_opts = TerminalOpts::decode(rest).map_err(MeshError::from)?;
                return Ok(HandshakeOutcome {
                    controller_opts,
                    peer_hub_id: None,
                    outer_session: Box::new(NullSession),
                    outer_key: None,
                });
            }

            frame_type::START_ENCRYPTED => {
                let identity = identity.ok_or_else(|| MeshError::from(CraneError::IdentityRequired))?;
                let key = identity.outer_session_key();
                let session = ChaChaSession::new(key);
                let plaintext = session.open(rest)?;
                let controller_opts = TerminalOpts::decode(&plaintext).map_err(MeshError::from)?;
                return Ok(HandshakeOutcome {
                    controller_opts,
                    peer_hub_id: None,
                    outer_session: Box::new(session),
                    outer_key: Some(key),
                });
            }

            other => return Err(MeshError::from(CraneError::UnknownFrameType(other))),
        }
    }
}

/// Run the dialer side of the handshake. TTL-based IP verification
/// (spec.md's parenthetical) is out of scope here; the dialer never sends a
/// `Verify` frame of its own, though a listener it talks to still answers
/// one from another dialer.
pub async fn run_dialer<S: PhysicalStream>(
    stream: &mut S,
    already_secure: bool,
    identity: Option<&Arc<dyn HubIdentity>>,
    controller_opts: TerminalOpts,
) -> mesh_core::Result<HandshakeOutcome> {
    if already_secure {
        let mut frame = vec![frame_type::START_UNENCRYPTED];
        frame.extend_from_slice(&controller_opts.encode());
        send_init_frame(stream, &frame).await?;
        return Ok(HandshakeOutcome {
            controller_opts,
            peer_hub_id: None,
            outer_session: Box::new(NullSession),
            outer_key: None,
        });
    }

    let identity = identity.ok_or_else(|| MeshError::from(CraneError::IdentityRequired))?;

    send_init_frame(stream, &[frame_type::HUB_INFO_REQUEST]).await?;
    let reply = recv_init_frame(stream).await?;
    let (announcement, rest) = read_length_prefixed(&reply)?;
    let (status, _) = read_length_prefixed(rest)?;
    let peer_hub_id = identity
        .resolve_peer(announcement, status)
        .ok_or_else(|| MeshError::from(CraneError::UnresolvedPeer))?;

    let key = identity.outer_session_key();
    let session = ChaChaSession::new(key);
    let sealed = session.seal(&controller_opts.encode());

    let mut frame = vec![frame_type::START_ENCRYPTED];
    frame.extend_from_slice(&sealed);
    send_init_frame(stream, &frame).await?;

    Ok(HandshakeOutcome {
        controller_opts,
        peer_hub_id: Some(peer_hub_id),
        outer_session: Box::new(session),
        outer_key: Some(key),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::StaticHubIdentity;

    #[tokio::test(flavor = "multi_thread")]
    async fn unencrypted_start_round_trips_controller_opts() {
        let (mut dialer_stream, mut listener_stream) = tokio::io::duplex(4096);

        let opts = TerminalOpts::default();
        let dialer_opts = opts;
        let dialer = tokio::spawn(async move { run_dialer(&mut dialer_stream, true, None, dialer_opts).await });
        let outcome = run_listener(&mut listener_stream, None).await.unwrap();

        assert_eq!(outcome.controller_opts, opts);
        dialer.await.unwrap().unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn encrypted_start_resolves_peer_and_opts() {
        let (mut dialer_stream, mut listener_stream) = tokio::io::duplex(4096);
        let key = [3u8; 32];
        let listener_identity: Arc<dyn HubIdentity> = Arc::new(StaticHubIdentity::new(CraneId::random(), key));
        let dialer_identity: Arc<dyn HubIdentity> = Arc::new(StaticHubIdentity::new(CraneId::random(), key));
        let listener_hub_id = listener_identity.hub_id();

        let opts = TerminalOpts {
            padding: 32,
            ..TerminalOpts::default()
        };
        let dialer_opts = opts;
        let dialer_id = dialer_identity.clone();
        let dialer = tokio::spawn(async move { run_dialer(&mut dialer_stream, false, Some(&dialer_id), dialer_opts).await });
        let outcome = run_listener(&mut listener_stream, Some(&listener_identity)).await.unwrap();

        assert_eq!(outcome.controller_opts, opts);
        let dialer_outcome = dialer.await.unwrap().unwrap();
        assert_eq!(dialer_outcome.peer_hub_id, Some(listener_hub_id));
    }
}
