//! mesh-ops: the standard operation set every Mesh process registers before
//! its first Crane starts (spec.md §4.5) — `connect`, `expand`, the
//! diagnostic operations (`ping`/`latency`/`capacity`/`whoami`/`sync/state`),
//! and the test-only `counter`.

pub mod connect;
pub mod counter;
pub mod diagnostics;
pub mod directory;
pub mod expand;

pub use counter::CounterHandle;
pub use diagnostics::{measure_capacity, measure_latency, send_sync_state, CraneHandle, Measurement, MeasurementStore};
pub use directory::{CraneDirectory, StaticCraneDirectory};

use mesh_terminal::Registry;
use std::sync::Arc;

/// Register every standard operation on `registry`, wiring `expand` to
/// `directory`. Returns the [`CraneHandle`] `whoami`/`sync/state` capture —
/// bind it to the real Crane (`handle.bind(&crane)`) right after
/// `Crane::launch` returns, since the registry has to exist (and usually be
/// frozen) before that Crane does.
pub fn register_standard_operations(registry: &Registry, directory: Arc<dyn CraneDirectory>) -> CraneHandle {
    let handle = CraneHandle::new();
    connect::register(registry);
    expand::register(registry, directory);
    diagnostics::register_all(registry, handle.clone());
    counter::register(registry);
    handle
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_crane::test_support::{launch_loopback_pair, test_registry};

    #[tokio::test(flavor = "multi_thread")]
    async fn counter_scenario_reaches_target_on_both_sides() {
        let registry = test_registry();
        counter::register(&registry);
        registry.freeze();

        let (dialer, _listener) = launch_loopback_pair(registry).await;
        let controller = dialer.controller();
        let handle = counter::start_client(&controller, 20, 20).await.unwrap();

        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(2);
        while !handle.finished() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert!(handle.finished(), "counter exchange did not reach target within 2s");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn whoami_handle_binds_to_its_own_crane() {
        // Each Crane in a real deployment gets its own Registry (and hence
        // its own CraneHandle); sharing one Registry across two Cranes
        // would make `whoami` answer for whichever Crane happened to bind
        // last, which is why this builds one registry per side.
        let dialer_registry = test_registry();
        let dialer_handle = CraneHandle::new();
        diagnostics::register_whoami(&dialer_registry, dialer_handle.clone());
        dialer_registry.freeze();

        let listener_registry = test_registry();
        let listener_handle = CraneHandle::new();
        diagnostics::register_whoami(&listener_registry, listener_handle.clone());
        listener_registry.freeze();

        let (dialer, _dialer_listener) = launch_loopback_pair(dialer_registry).await;
        dialer_handle.bind(&dialer);
        let (_listener_dialer, listener) = launch_loopback_pair(listener_registry).await;
        listener_handle.bind(&listener);

        assert!(dialer.is_mine());
        assert!(!listener.is_mine());
    }
}
