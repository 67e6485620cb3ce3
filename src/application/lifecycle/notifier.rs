//! Cancellation notices
//!
//! The reconciler tells subscribers about automatic cancellations through
//! [`CancellationNotifier`]. Delivery is best-effort: a failed notice is
//! logged by the caller and never undoes the cancellation.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::application::events::{Event, ReservationCancelledEvent, SharedEventBus};
use crate::domain::{DomainError, DomainResult};
use crate::shared::shutdown::ShutdownSignal;
use crate::shared::types::{SharedClock, SystemClock};

#[async_trait]
pub trait CancellationNotifier: Send + Sync {
    async fn notify_cancelled(
        &self,
        recipient_contact: &str,
        recipient_name: &str,
        reservation_id: i32,
    ) -> DomainResult<()>;
}

/// Publishes notices on the event bus for delivery tasks to pick up.
pub struct EventBusNotifier {
    event_bus: SharedEventBus,
    clock: SharedClock,
}

impl EventBusNotifier {
    pub fn new(event_bus: SharedEventBus) -> Self {
        Self {
            event_bus,
            clock: Arc::new(SystemClock),
        }
    }

    /// Stamp notices with `clock` instead of wall time.
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }
}

#[async_trait]
impl CancellationNotifier for EventBusNotifier {
    async fn notify_cancelled(
        &self,
        recipient_contact: &str,
        recipient_name: &str,
        reservation_id: i32,
    ) -> DomainResult<()> {
        let delivered = self
            .event_bus
            .publish(Event::ReservationAutoCancelled(ReservationCancelledEvent {
                reservation_id,
                recipient_contact: recipient_contact.to_string(),
                recipient_name: recipient_name.to_string(),
                timestamp: self.clock.now(),
            }));

        if delivered == 0 {
            return Err(DomainError::Notification(format!(
                "no delivery channel listening for reservation {reservation_id}"
            )));
        }
        Ok(())
    }
}

/// Drain cancellation notices from the bus and log each one as sent.
///
/// Stands in for the outbound mail channel; runs until `shutdown` fires.
pub fn start_notification_delivery_task(event_bus: SharedEventBus, shutdown: ShutdownSignal) {
    let mut subscriber = event_bus.subscribe();

    tokio::spawn(async move {
        info!("✉️ Notification delivery task started");

        loop {
            tokio::select! {
                message = subscriber.recv() => {
                    let Some(message) = message else { break };
                    match message.event {
                        Event::ReservationAutoCancelled(notice) => {
                            info!(
                                reservation_id = notice.reservation_id,
                                recipient = %notice.recipient_contact,
                                name = %notice.recipient_name,
                                "✉️ Reservation cancellation notice sent"
                            );
                        }
                        other => {
                            debug!(event_type = other.event_type(), "Ignoring event");
                        }
                    }
                }
                _ = shutdown.notified().wait() => {
                    break;
                }
            }
        }

        info!("✉️ Notification delivery task stopped");
    });
}
