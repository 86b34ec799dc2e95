//! Broker event-loop driver.
//!
//! Polls the rumqttc event loop on its own task and forwards classified
//! events to the supervisor. Never touches session state itself.
//!
//! The driver must keep polling for the request queue to drain, so it never
//! waits on the sink for acknowledgements: a full sink drops them instead.

use std::time::Duration;

use rumqttc::EventLoop;
use tokio::sync::mpsc::error::TrySendError;

use crate::handler::{EventSink, InboundEvent, SessionEvent, classify};

/// Drive `eventloop` until the sink closes or the task is aborted.
///
/// A poll error is reported as `InboundEvent::Error`; the next poll
/// reconnects the transport after `reconnect_delay`.
pub async fn drive(
    mut eventloop: EventLoop,
    generation: u64,
    sink: EventSink,
    reconnect_delay: Duration,
) {
    let mut dropped: u64 = 0;
    loop {
        let (event, failed) = match eventloop.poll().await {
            Ok(event) => {
                tracing::trace!(generation, event = ?event, "MQTT event");
                (classify(&event), false)
            }
            Err(e) => {
                tracing::warn!(
                    generation,
                    error = %e,
                    delay_secs = reconnect_delay.as_secs(),
                    "MQTT event loop error, transport will reconnect"
                );
                (Some(InboundEvent::Error(e.to_string())), true)
            }
        };

        if let Some(event) = event {
            if !forward(&sink, SessionEvent::new(generation, event), &mut dropped).await {
                tracing::debug!(generation, dropped, "event sink closed, stopping driver");
                return;
            }
        }

        if failed {
            tokio::time::sleep(reconnect_delay).await;
        }
    }
}

/// Hand one event to the sink. Returns `false` once the sink is closed.
async fn forward(sink: &EventSink, event: SessionEvent, dropped: &mut u64) -> bool {
    if !event.event.is_informational() {
        return sink.send(event).await.is_ok();
    }
    match sink.try_send(event) {
        Ok(()) => true,
        Err(TrySendError::Full(event)) => {
            *dropped += 1;
            tracing::debug!(
                generation = event.generation,
                event = ?event.event,
                dropped = *dropped,
                "event sink full, dropping acknowledgement"
            );
            true
        }
        Err(TrySendError::Closed(_)) => false,
    }
}
