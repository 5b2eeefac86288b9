//! Seam between `expand` and whatever this process uses to track which
//! Crane already reaches which Hub. A gossiping, persistent Hub directory
//! is out of scope (spec.md §1); a real deployment implements this trait
//! over its own directory instead.

use mesh_core::CraneId;
use mesh_crane::Crane;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

pub trait CraneDirectory: Send + Sync {
    fn crane_for_hub(&self, hub: CraneId) -> Option<Arc<Crane>>;
}

/// An in-memory directory good enough for tests and small fixed
/// deployments: Cranes are registered explicitly, never discovered.
#[derive(Default)]
pub struct StaticCraneDirectory {
    by_hub: RwLock<HashMap<CraneId, Arc<Crane>>>,
}

impl StaticCraneDirectory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, hub: CraneId, crane: Arc<Crane>) {
        self.by_hub.write().insert(hub, crane);
    }
}

impl CraneDirectory for StaticCraneDirectory {
    fn crane_for_hub(&self, hub: CraneId) -> Option<Arc<Crane>> {
        self.by_hub.read().get(&hub).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_crane::test_support::{launch_loopback_pair, test_registry};

    #[tokio::test(flavor = "multi_thread")]
    async fn unregistered_hub_resolves_to_nothing() {
        let directory = StaticCraneDirectory::new();
        assert!(directory.crane_for_hub(CraneId::random()).is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn registered_hub_resolves_to_its_crane() {
        let registry = test_registry();
        registry.freeze();
        let (dialer, _listener) = launch_loopback_pair(registry).await;
        let hub = CraneId::random();

        let directory = StaticCraneDirectory::new();
        directory.insert(hub, dialer.clone());

        assert!(Arc::ptr_eq(&directory.crane_for_hub(hub).unwrap(), &dialer));
    }
}
