//! # Parking Reservation Lifecycle
//!
//! Reservation state machine for a parking facility, with automatic
//! reclamation of spots held by subscribers who do not show up.
//!
//! ## Architecture
//!
//! - **domain**: reservation model, lateness window, store interface, events
//! - **application**: transition executor, reconciler, scheduler, lifecycle
//!   service and the event bus
//! - **infrastructure**: SeaORM (SQLite) and in-memory stores
//! - **shared**: errors, clock, retry and shutdown primitives
//! - **server**: runtime wiring used by the binary

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod server;
pub mod shared;

pub use config::{default_config_path, AppConfig};

pub use application::{
    create_event_bus, Event, EventBus, LateReservationReconciler, ReconcileReport,
    ReconciliationScheduler, ReservationLifecycleService, SharedEventBus, TransitionExecutor,
};
pub use domain::{DomainError, DomainResult, Reservation, ReservationStatus, Spot};
pub use infrastructure::{init_database, DatabaseConfig, InMemoryResourceStore, SeaOrmResourceStore};
