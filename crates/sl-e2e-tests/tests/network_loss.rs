//! E2E tests for connectivity loss and recovery.

mod helpers;

use helpers::TestHarness;
use sl_edge_agent::supervisor::SupervisorState;

/// Losing the network mid-session destroys the session once and publishes
/// nothing until the full pipeline has run again.
#[tokio::test(start_paused = true)]
async fn e2e_network_loss_tears_down_once() {
    let mut h = TestHarness::new();
    h.bring_up().await;

    h.network.set_connected(false);
    h.push_scan(-50, &[0x01]).await;
    h.supervisor.tick().await;

    assert_eq!(h.supervisor.state(), SupervisorState::Disconnected);
    assert!(h.supervisor.session().is_none());
    let first = h.connector.channels()[0].clone();
    assert_eq!(first.disconnect_count(), 1);
    assert!(first.published().is_empty());

    // Still down: the wait times out and backs off, nothing else happens.
    h.supervisor.step().await;
    assert_eq!(h.supervisor.state(), SupervisorState::Disconnected);
    assert_eq!(first.disconnect_count(), 1);
    assert_eq!(h.connector.connect_count(), 1);

    h.network.set_connected(true);
    h.supervisor.step().await;
    assert_eq!(h.supervisor.state(), SupervisorState::ClockSyncing);
    h.supervisor.step().await;
    assert_eq!(h.supervisor.state(), SupervisorState::Provisioning);
    assert!(h.all_telemetry().is_empty());

    h.supervisor.step().await;
    h.supervisor.process_pending_events().await;
    h.supervisor.tick().await;

    assert_eq!(h.connector.connect_count(), 2);
    assert_eq!(h.connector.channels()[1].published().len(), 1);
    assert_eq!(h.supervisor.stats().sessions_destroyed, 1);
}

/// The supervisor asks the link to join while waiting.
#[tokio::test(start_paused = true)]
async fn e2e_join_requested_when_link_down() {
    let mut h = TestHarness::new();
    h.network.set_connected(false);
    h.network.connect_on_join(true);

    h.supervisor.step().await;
    assert_eq!(h.network.join_count(), 1);
    assert_eq!(h.supervisor.state(), SupervisorState::ClockSyncing);
}

/// A clock that never reaches the trusted epoch sends the device back to
/// `Disconnected` without issuing a credential.
#[tokio::test(start_paused = true)]
async fn e2e_untrusted_clock_blocks_provisioning() {
    let mut h = TestHarness::new();
    h.clock
        .set(chrono::DateTime::from_timestamp(0, 0).unwrap());

    h.supervisor.step().await;
    h.supervisor.step().await;
    assert_eq!(h.supervisor.state(), SupervisorState::Disconnected);
    assert!(h.connector.attempts().is_empty());
}
