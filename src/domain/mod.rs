//! Domain layer
//!
//! Reservation and spot entities, lifecycle events, and the store
//! interface the rest of the crate programs against.

pub mod events;
pub mod reservation;

pub use reservation::{
    LatePreorder, LatenessWindow, NewReservation, Reservation, ReservationStatus, ResourceStore,
    Spot, StatusChange, SubscriberContact, UnitOfWork,
};

pub use crate::shared::errors::DomainError;

/// Result type for domain operations
pub type DomainResult<T> = Result<T, DomainError>;
