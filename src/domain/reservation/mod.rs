//! Reservation aggregate
//!
//! Contains the Reservation and Spot entities, related types, and the
//! store interface.

pub mod model;
pub mod repository;

pub use model::{
    LatePreorder, LatenessWindow, NewReservation, Reservation, ReservationStatus, Spot,
    StatusChange, SubscriberContact,
};
pub use repository::{ResourceStore, UnitOfWork};
