//! A loopback harness for tests that need two live Cranes talking to each
//! other without a real transport. The rest of the workspace's integration
//! tests (the `counter`/`connect` scenarios) build on this rather than
//! standing up an actual TCP listener.

use crate::{Crane, CraneConfig, Role};
use mesh_core::config::{BatchingConfig, RoleTimeouts, SchedulerConfig};
use mesh_scheduler::Scheduler;
use mesh_terminal::Registry;
use mesh_wire::TerminalOpts;
use std::sync::Arc;

pub fn test_scheduler() -> Scheduler {
    Scheduler::new(SchedulerConfig::client_default())
}

pub fn test_registry() -> Arc<Registry> {
    Arc::new(Registry::new())
}

fn loopback_config(registry: Arc<Registry>, scheduler: Scheduler, mine: bool) -> CraneConfig {
    CraneConfig {
        public: false,
        mine,
        mtu: 1400,
        shipment_padding: 16,
        scheduler,
        registry,
        timeouts: RoleTimeouts::client(),
        batching: BatchingConfig::default(),
        identity: None,
        controller_opts: TerminalOpts::default(),
        already_secure: true,
    }
}

/// Launch a dialer/listener pair of Cranes over an in-process duplex pipe,
/// sharing one operation registry. Mirrors how a real process launches a
/// Crane for each end of a physical connection, minus the socket; both
/// sides run `already_secure` since there's no identity to negotiate over
/// a loopback pipe.
pub async fn launch_loopback_pair(registry: Arc<Registry>) -> (Arc<Crane>, Arc<Crane>) {
    let (dialer_stream, listener_stream) = tokio::io::duplex(64 * 1024);
    let scheduler = test_scheduler();

    let dialer_config = loopback_config(registry.clone(), scheduler.clone(), true);
    let listener_config = loopback_config(registry, scheduler, false);

    let dialer = tokio::spawn(async move { Crane::launch(dialer_stream, Role::Dialer, dialer_config).await });
    let listener = tokio::spawn(async move { Crane::launch(listener_stream, Role::Listener, listener_config).await });

    let (dialer, listener) = tokio::join!(dialer, listener);
    (
        dialer.expect("dialer task panicked").expect("dialer handshake failed"),
        listener.expect("listener task panicked").expect("listener handshake failed"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn loopback_pair_establishes_controller_terminals() {
        let registry = test_registry();
        registry.freeze();
        let (dialer, listener) = launch_loopback_pair(registry).await;

        assert!(dialer.terminal(0).is_some());
        assert!(listener.terminal(0).is_some());
        assert!(dialer.is_mine());
        assert!(!listener.is_mine());
    }
}
