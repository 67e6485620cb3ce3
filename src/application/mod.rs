pub mod events;
pub mod lifecycle;

// Re-export key types for convenience
pub use events::{create_event_bus, Event, EventBus, EventSubscriber, SharedEventBus};
pub use lifecycle::{
    CancelFrom, CancellationNotifier, EventBusNotifier, LateReservationReconciler,
    ReconcileReport, ReconciliationScheduler, ReservationLifecycleService, SchedulerConfig,
    StopOutcome, TransitionExecutor, TransitionOutcome, TransitionRequest,
};
