//! Reservation domain entity

use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveTime, Utc};

use crate::shared::errors::DomainError;

/// Reservation status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReservationStatus {
    /// Booked in advance, spot held until the subscriber arrives
    Preorder,
    /// Subscriber is parked
    Active,
    /// Subscriber left, spot released
    Finished,
    /// Cancelled manually or for late arrival, spot released
    Cancelled,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Preorder => "preorder",
            Self::Active => "active",
            Self::Finished => "finished",
            Self::Cancelled => "cancelled",
        }
    }

    /// Allowed edges of the lifecycle. Nothing moves backwards and terminal
    /// states have no way out.
    pub fn can_transition_to(self, target: ReservationStatus) -> bool {
        use ReservationStatus::*;
        matches!(
            (self, target),
            (Preorder, Active) | (Preorder, Cancelled) | (Active, Finished) | (Active, Cancelled)
        )
    }

    /// Whether a reservation in this state keeps its spot occupied.
    pub fn holds_spot(self) -> bool {
        matches!(self, Self::Preorder | Self::Active)
    }

    pub fn is_terminal(self) -> bool {
        !self.holds_spot()
    }
}

impl FromStr for ReservationStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "preorder" => Ok(Self::Preorder),
            "active" => Ok(Self::Active),
            "finished" => Ok(Self::Finished),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(DomainError::Validation(format!(
                "unknown reservation status '{other}'"
            ))),
        }
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Parking reservation
#[derive(Debug, Clone, PartialEq)]
pub struct Reservation {
    pub id: i32,
    pub subscriber_id: i32,
    /// Assigned spot, `None` until assignment
    pub spot_id: Option<i32>,
    pub status: ReservationStatus,
    pub estimated_arrival: Option<DateTime<Utc>>,
    /// Stamped on activation
    pub actual_arrival: Option<DateTime<Utc>>,
    /// Stamped on finish
    pub actual_departure: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Parking spot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spot {
    pub id: i32,
    pub is_occupied: bool,
}

/// Subscriber details needed to tell them about a cancellation
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SubscriberContact {
    pub username: String,
    pub name: Option<String>,
    pub email: Option<String>,
}

/// A preorder whose subscriber is past the grace period, as read by the
/// late scan.
#[derive(Debug, Clone, PartialEq)]
pub struct LatePreorder {
    pub reservation_id: i32,
    pub subscriber_id: i32,
    pub spot_id: i32,
    pub estimated_arrival: DateTime<Utc>,
    pub minutes_late: i64,
    /// `None` when the subscriber row is gone
    pub contact: Option<SubscriberContact>,
}

/// Time window of the late scan.
///
/// A preorder is late when its estimated arrival falls on the same UTC day
/// as `now` and at least `threshold` has elapsed since it. Elapsed time is
/// counted in whole minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatenessWindow {
    pub now: DateTime<Utc>,
    pub threshold: Duration,
}

impl LatenessWindow {
    pub fn new(now: DateTime<Utc>, threshold_minutes: i64) -> Self {
        Self {
            now,
            threshold: Duration::minutes(threshold_minutes),
        }
    }

    /// Midnight UTC of the current day
    pub fn day_start(&self) -> DateTime<Utc> {
        self.now.date_naive().and_time(NaiveTime::MIN).and_utc()
    }

    /// Latest estimated arrival that counts as late
    pub fn cutoff(&self) -> DateTime<Utc> {
        self.now - self.threshold
    }

    pub fn minutes_late(&self, estimated_arrival: DateTime<Utc>) -> i64 {
        self.now
            .signed_duration_since(estimated_arrival)
            .num_minutes()
    }

    pub fn is_late(&self, estimated_arrival: DateTime<Utc>) -> bool {
        estimated_arrival >= self.day_start() && estimated_arrival <= self.cutoff()
    }
}

/// Requested change of a reservation's status plus the stamps that go with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    pub target: ReservationStatus,
    pub actual_arrival: Option<DateTime<Utc>>,
    pub actual_departure: Option<DateTime<Utc>>,
}

impl StatusChange {
    /// Build the change for `target`, stamping `at` where the target needs it.
    pub fn to(target: ReservationStatus, at: DateTime<Utc>) -> Self {
        Self {
            target,
            actual_arrival: (target == ReservationStatus::Active).then_some(at),
            actual_departure: (target == ReservationStatus::Finished).then_some(at),
        }
    }

    /// Apply to an in-memory reservation.
    pub fn apply(&self, reservation: &mut Reservation) {
        reservation.status = self.target;
        if let Some(at) = self.actual_arrival {
            reservation.actual_arrival = Some(at);
        }
        if let Some(at) = self.actual_departure {
            reservation.actual_departure = Some(at);
        }
    }
}

/// Input of reservation opening. The spot was already chosen upstream.
#[derive(Debug, Clone, PartialEq)]
pub struct NewReservation {
    pub subscriber_id: i32,
    pub spot_id: i32,
    /// `Preorder` or `Active`
    pub status: ReservationStatus,
    pub estimated_arrival: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl NewReservation {
    pub fn preorder(
        subscriber_id: i32,
        spot_id: i32,
        estimated_arrival: DateTime<Utc>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            subscriber_id,
            spot_id,
            status: ReservationStatus::Preorder,
            estimated_arrival: Some(estimated_arrival),
            created_at,
        }
    }

    /// Drive-in without a prior preorder.
    pub fn walk_in(subscriber_id: i32, spot_id: i32, arrived_at: DateTime<Utc>) -> Self {
        Self {
            subscriber_id,
            spot_id,
            status: ReservationStatus::Active,
            estimated_arrival: None,
            created_at: arrived_at,
        }
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if !self.status.holds_spot() {
            return Err(DomainError::Validation(format!(
                "a reservation cannot be opened as {}",
                self.status
            )));
        }
        Ok(())
    }

    pub(crate) fn into_reservation(self, id: i32) -> Reservation {
        let actual_arrival = (self.status == ReservationStatus::Active).then_some(self.created_at);
        Reservation {
            id,
            subscriber_id: self.subscriber_id,
            spot_id: Some(self.spot_id),
            status: self.status,
            estimated_arrival: self.estimated_arrival,
            actual_arrival,
            actual_departure: None,
            created_at: self.created_at,
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────
