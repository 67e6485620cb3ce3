//! Lifecycle events
//!
//! Facts published on the event bus. Notification delivery subscribes to
//! these.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event types for notifications
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Event {
    /// A late preorder was cancelled by the reconciler
    ReservationAutoCancelled(ReservationCancelledEvent),
    /// A reconciliation pass finished and cancelled at least one reservation
    ReconciliationCompleted(ReconciliationCompletedEvent),
}

impl Event {
    /// Get the event type name
    pub fn event_type(&self) -> &'static str {
        match self {
            Event::ReservationAutoCancelled(_) => "reservation_auto_cancelled",
            Event::ReconciliationCompleted(_) => "reconciliation_completed",
        }
    }

    /// Get the reservation ID if applicable
    pub fn reservation_id(&self) -> Option<i32> {
        match self {
            Event::ReservationAutoCancelled(e) => Some(e.reservation_id),
            Event::ReconciliationCompleted(_) => None,
        }
    }
}

/// Cancellation notice addressed to a subscriber
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReservationCancelledEvent {
    pub reservation_id: i32,
    pub recipient_contact: String,
    pub recipient_name: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconciliationCompletedEvent {
    pub scanned: usize,
    pub cancelled: usize,
    pub failed: usize,
    pub timestamp: DateTime<Utc>,
}

/// Envelope carried on the bus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMessage {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: Event,
}

impl EventMessage {
    pub fn new(event: Event) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event,
        }
    }
}
