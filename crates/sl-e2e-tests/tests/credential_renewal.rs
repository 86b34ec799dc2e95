//! E2E tests for token expiry and session renewal.

mod helpers;

use helpers::{TELEMETRY_TOPIC, TestHarness};
use sl_edge_agent::supervisor::SupervisorState;

/// One second before expiry the session keeps publishing; at expiry the
/// next tick renews before anything is published.
#[tokio::test(start_paused = true)]
async fn e2e_expiry_boundary_triggers_renewal() {
    let mut h = TestHarness::new();
    h.bring_up().await;
    let first_password = h.connector.attempts()[0].password.clone();

    h.advance_clock_secs(59 * 60 + 59);
    h.push_scan(-50, &[0x01]).await;
    h.supervisor.tick().await;
    assert_eq!(h.supervisor.state(), SupervisorState::SessionActive);
    assert_eq!(h.channel().published_to(TELEMETRY_TOPIC).len(), 1);

    h.advance_clock_secs(1);
    h.push_scan(-50, &[0x02]).await;
    h.supervisor.tick().await;
    assert_eq!(h.supervisor.state(), SupervisorState::Renewing);
    assert_eq!(h.all_telemetry().len(), 1);

    h.supervisor.step().await;
    assert_eq!(h.supervisor.state(), SupervisorState::SessionActive);
    assert_eq!(h.supervisor.stats().renewals, 1);

    let attempts = h.connector.attempts();
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[1].generation, 2);
    assert_ne!(attempts[1].password, first_password);

    // The record held back by the expiry goes out on the new session.
    h.supervisor.process_pending_events().await;
    h.supervisor.tick().await;
    let telemetry = h.all_telemetry();
    assert_eq!(telemetry.len(), 2);
    assert_eq!(telemetry[1]["payloadString"], "02");
    assert_eq!(h.channel().published_to(TELEMETRY_TOPIC).len(), 1);
}

/// Renewal destroys the old session wholesale and subscribes again on the new one.
#[tokio::test(start_paused = true)]
async fn e2e_renewal_rebuilds_session() {
    let mut h = TestHarness::new();
    h.bring_up().await;

    h.advance_clock_secs(60 * 60);
    h.supervisor.tick().await;
    h.supervisor.step().await;
    h.supervisor.process_pending_events().await;

    let channels = h.connector.channels();
    assert_eq!(channels.len(), 2);
    assert_eq!(channels[0].disconnect_count(), 1);
    assert_eq!(channels[1].disconnect_count(), 0);
    assert_eq!(channels[0].subscriptions().len(), 1);
    assert_eq!(channels[1].subscriptions().len(), 1);

    let stats = h.supervisor.stats();
    assert_eq!(stats.sessions_created, 2);
    assert_eq!(stats.sessions_destroyed, 1);
    assert_eq!(stats.subscribe_calls, 2);
}

/// A failed renewal falls back to provisioning and retries after the backoff.
#[tokio::test(start_paused = true)]
async fn e2e_failed_renewal_falls_back_to_provisioning() {
    let mut h = TestHarness::new();
    h.bring_up().await;

    h.advance_clock_secs(60 * 60);
    h.supervisor.tick().await;
    h.connector.fail_next(1);
    h.supervisor.step().await;
    assert_eq!(h.supervisor.state(), SupervisorState::Provisioning);
    assert!(h.supervisor.session().is_none());
    assert_eq!(h.supervisor.stats().provisioning_failures, 1);

    h.supervisor.step().await;
    assert_eq!(h.supervisor.state(), SupervisorState::SessionActive);
    assert_eq!(h.connector.connect_count(), 2);
}
