//! Operation & type registry (spec.md §4.5): a process-wide map from type
//! tag to factory, frozen once the first Crane starts, plus the per-op
//! handle ([`OperationContext`]) an Operation uses to talk back to its
//! Terminal.

use crate::terminal::Terminal;
use async_trait::async_trait;
use mesh_core::MeshError;
use mesh_wire::MsgType;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// The permission bit-set a Terminal carries (spec.md §4.4: the controller
/// Terminal has `IsCraneController`). Extend here if future operations
/// need finer-grained gates; for now one bit suffices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Permissions {
    pub is_crane_controller: bool,
}

impl Permissions {
    pub fn satisfies(&self, required: Permissions) -> bool {
        !required.is_crane_controller || self.is_crane_controller
    }
}

/// What an Init message's factory call produced.
pub enum FactoryOutcome {
    /// The operation is live and will receive further Data/Stop messages.
    Created(Arc<dyn Operation>),
    /// The operation already ran to completion synchronously; the Terminal
    /// should emit a Stop with `ExplicitAck` and not register anything.
    Done,
    /// The factory itself failed (bad payload, resource unavailable, ...).
    Failed(MeshError),
}

/// A live Operation inside a Terminal (spec.md §3 "Operation").
#[async_trait]
pub trait Operation: Send + Sync {
    /// A Data or PriorityData message arrived for this operation.
    async fn deliver(&self, payload: Vec<u8>, is_priority: bool);

    /// The operation is being stopped, locally or by a peer `Stop` frame.
    /// Idempotent; implementations should make a best effort even if
    /// called twice.
    async fn stop(&self, err: MeshError);
}

/// Handle an [`Operation`] implementation uses to act on its own Terminal.
#[derive(Clone)]
pub struct OperationContext {
    op_id: u32,
    terminal: Arc<Terminal>,
}

impl OperationContext {
    pub fn new(op_id: u32, terminal: Arc<Terminal>) -> Self {
        Self { op_id, terminal }
    }

    pub fn op_id(&self) -> u32 {
        self.op_id
    }

    pub fn terminal_id(&self) -> u32 {
        self.terminal.id()
    }

    pub async fn send(&self, msg_type: MsgType, payload: Vec<u8>, timeout: Duration) -> mesh_core::Result<()> {
        self.terminal.send_operation_msg(self.op_id, msg_type, payload, timeout).await
    }

    /// Schedule `stop_operation` without blocking the caller (useful from
    /// inside a synchronous factory or a `deliver` callback).
    pub fn stop(&self, err: Option<MeshError>) {
        let terminal = self.terminal.clone();
        let op_id = self.op_id;
        tokio::spawn(async move {
            terminal.stop_operation(op_id, err).await;
        });
    }

    pub fn cancellation(&self) -> mesh_core::CancellationToken {
        self.terminal.cancellation()
    }
}

type Factory = Arc<dyn Fn(OperationContext, Vec<u8>) -> FactoryOutcome + Send + Sync>;

struct RegistryEntry {
    required_permission: Permissions,
    factory: Factory,
}

/// Process-wide operation-type registry (spec.md §4.5: "must be locked
/// before any Crane is started"). Registrations after [`Registry::freeze`]
/// are rejected with a warning rather than an error, matching "subsequent
/// registrations are silently rejected" in the spec.
pub struct Registry {
    entries: RwLock<HashMap<String, RegistryEntry>>,
    frozen: AtomicBool,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            frozen: AtomicBool::new(false),
        }
    }

    pub fn register(
        &self,
        type_tag: impl Into<String>,
        required_permission: Permissions,
        factory: impl Fn(OperationContext, Vec<u8>) -> FactoryOutcome + Send + Sync + 'static,
    ) {
        let type_tag = type_tag.into();
        if self.frozen.load(Ordering::Acquire) {
            warn!(type_tag, "operation registry is frozen; ignoring late registration");
            return;
        }
        self.entries.write().insert(
            type_tag,
            RegistryEntry {
                required_permission,
                factory: Arc::new(factory),
            },
        );
    }

    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::Release);
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }

    /// Whether `type_tag` is registered, and if so, the permission it
    /// requires. Split out from [`Registry::invoke`] so callers (and
    /// tests) can check registration/permissions without constructing an
    /// [`OperationContext`].
    pub fn required_permission(&self, type_tag: &str) -> Option<Permissions> {
        self.entries.read().get(type_tag).map(|e| e.required_permission)
    }

    /// Look up the factory for `type_tag`, checking `caller_permissions`
    /// against what's required. `Ok(None)` means unregistered; `Err` means
    /// registered but not permitted.
    pub fn invoke(
        &self,
        type_tag: &str,
        caller_permissions: Permissions,
        ctx: OperationContext,
        init_payload: Vec<u8>,
    ) -> Result<Option<FactoryOutcome>, crate::error::TerminalError> {
        let factory = {
            let entries = self.entries.read();
            match entries.get(type_tag) {
                Some(entry) => {
                    if !caller_permissions.satisfies(entry.required_permission) {
                        return Err(crate::error::TerminalError::PermissionDenied);
                    }
                    entry.factory.clone()
                }
                None => return Ok(None),
            }
        };
        Ok(Some(factory(ctx, init_payload)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_after_freeze_is_ignored() {
        let registry = Registry::new();
        registry.register("a", Permissions::default(), |_, _| FactoryOutcome::Done);
        registry.freeze();
        registry.register("b", Permissions::default(), |_, _| FactoryOutcome::Done);
        assert!(registry.required_permission("b").is_none());
    }

    #[test]
    fn permission_check_rejects_unprivileged_callers() {
        let registry = Registry::new();
        registry.register(
            "controller-only",
            Permissions { is_crane_controller: true },
            |_, _| FactoryOutcome::Done,
        );
        let required = registry.required_permission("controller-only").unwrap();
        assert!(!Permissions::default().satisfies(required));
        assert!(Permissions { is_crane_controller: true }.satisfies(required));
    }
}
