//! Reservation lifecycle engine
//!
//! - `executor`: atomic compare-and-set transitions that release spots
//! - `reconciler`: cancels preorders whose subscriber is late
//! - `scheduler`: runs the reconciler periodically, one pass at a time
//! - `service`: arrival, departure and manual cancellation
//! - `notifier`: cancellation notices

pub mod executor;
pub mod notifier;
pub mod reconciler;
pub mod scheduler;
pub mod service;

pub use executor::{TransitionExecutor, TransitionOutcome, TransitionRequest};
pub use notifier::{start_notification_delivery_task, CancellationNotifier, EventBusNotifier};
pub use reconciler::{LateReservationReconciler, ReconcileReport, DEFAULT_LATE_THRESHOLD_MINUTES};
pub use scheduler::{ReconciliationScheduler, SchedulerConfig, SchedulerSnapshot, StopOutcome};
pub use service::{CancelFrom, ReservationLifecycleService};
