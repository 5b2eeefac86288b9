//! `expand` (spec.md §4.5): relay a request on to a Hub this process has
//! already reached through a different Crane. Establishes a sub-Terminal
//! toward the target Hub, starts the *real* requested operation there, and
//! splices the two Operation contexts together so Data/Stop traffic flows
//! through transparently — the relaying Crane never interprets the nested
//! operation's payload, only forwards it.

use crate::directory::CraneDirectory;
use async_trait::async_trait;
use mesh_core::{CraneId, ErrorId, MeshError};
use mesh_terminal::{FactoryOutcome, Operation, OperationContext, Permissions, Registry};
use mesh_wire::{MsgType, TerminalOpts};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const RELAY_SEND_TIMEOUT: Duration = Duration::from_secs(30);
const BRIDGE_CHANNEL_SIZE: usize = 64;

#[derive(Debug, Serialize, Deserialize)]
struct ExpandRequest {
    target_hub: [u8; 3],
    sub_opts: Vec<u8>,
    relay_type_tag: String,
    #[serde(default)]
    relay_init_payload: Vec<u8>,
}

/// CBOR-encode an `expand` Init payload — the counterpart callers outside
/// this module use to start an `expand` operation, since [`ExpandRequest`]
/// itself stays private to keep its decoding (and the directory lookup it
/// feeds) an internal concern of the factory in [`register`].
pub fn encode_request(target_hub: CraneId, sub_opts: Vec<u8>, relay_type_tag: impl Into<String>, relay_init_payload: Vec<u8>) -> mesh_core::Result<Vec<u8>> {
    let request = ExpandRequest {
        target_hub: target_hub.to_bytes(),
        sub_opts,
        relay_type_tag: relay_type_tag.into(),
        relay_init_payload,
    };
    let mut payload = Vec::new();
    ciborium::ser::into_writer(&request, &mut payload).map_err(|err| MeshError::new(ErrorId::Internal, err.to_string()))?;
    Ok(payload)
}

/// One end of the splice: receives Data/Stop for one Operation, forwards
/// the bytes into a channel the other end's pump loop drains.
struct Bridge {
    to_peer: mpsc::Sender<(Vec<u8>, bool)>,
}

#[async_trait]
impl Operation for Bridge {
    async fn deliver(&self, payload: Vec<u8>, is_priority: bool) {
        let _ = self.to_peer.send((payload, is_priority)).await;
    }

    async fn stop(&self, _err: MeshError) {}
}

fn new_bridge() -> (Arc<Bridge>, mpsc::Receiver<(Vec<u8>, bool)>) {
    let (tx, rx) = mpsc::channel(BRIDGE_CHANNEL_SIZE);
    (Arc::new(Bridge { to_peer: tx }), rx)
}

/// Drain `rx` and forward each chunk onto `ctx`'s own Operation, stopping
/// once the other side's channel closes.
async fn pump(ctx: OperationContext, mut rx: mpsc::Receiver<(Vec<u8>, bool)>) {
    while let Some((payload, is_priority)) = rx.recv().await {
        let msg_type = if is_priority { MsgType::PriorityData } else { MsgType::Data };
        if ctx.send(msg_type, payload, RELAY_SEND_TIMEOUT).await.is_err() {
            break;
        }
    }
}

async fn run_expand(local_ctx: OperationContext, directory: Arc<dyn CraneDirectory>, request: ExpandRequest, local_rx: mpsc::Receiver<(Vec<u8>, bool)>) {
    let target_hub = CraneId::from_bytes(request.target_hub);
    let Some(target_crane) = directory.crane_for_hub(target_hub) else {
        local_ctx.stop(Some(MeshError::local(ErrorId::HubUnavailable)));
        return;
    };
    let sub_opts = match TerminalOpts::decode(&request.sub_opts) {
        Ok(opts) => opts,
        Err(err) => {
            local_ctx.stop(Some(MeshError::from(err)));
            return;
        }
    };

    let sub_terminal = match mesh_crane::establish_terminal(&target_crane, sub_opts, Permissions::default()).await {
        Ok(terminal) => terminal,
        Err(err) => {
            local_ctx.stop(Some(err));
            return;
        }
    };

    let (remote_bridge, remote_rx) = new_bridge();
    let remote_op_id = match sub_terminal
        .start_operation(&request.relay_type_tag, remote_bridge, request.relay_init_payload, RELAY_SEND_TIMEOUT)
        .await
    {
        Ok(id) => id,
        Err(err) => {
            local_ctx.stop(Some(err));
            return;
        }
    };
    let remote_ctx = OperationContext::new(remote_op_id, sub_terminal);

    let forward_to_remote = tokio::spawn(pump(remote_ctx, local_rx));
    pump(local_ctx, remote_rx).await;
    let _ = forward_to_remote.await;
}

pub fn register(registry: &Registry, directory: Arc<dyn CraneDirectory>) {
    registry.register("expand", Permissions::default(), move |ctx, init_payload| {
        let request: ExpandRequest = match ciborium::de::from_reader(init_payload.as_slice()) {
            Ok(request) => request,
            Err(err) => return FactoryOutcome::Failed(MeshError::new(ErrorId::InvalidOptions, err.to_string())),
        };

        let (local_bridge, local_rx) = new_bridge();
        let directory = directory.clone();
        tokio::spawn(run_expand(ctx, directory, request, local_rx));

        FactoryOutcome::Created(local_bridge)
    });
}
