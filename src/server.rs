//! Reusable service runtime.
//!
//! Provides [`ServiceHandle`] that encapsulates the full service lifecycle:
//! database init, migrations, notification delivery, the late-arrival
//! scheduler and graceful shutdown.

use std::sync::Arc;

use sea_orm::DatabaseConnection;
use sea_orm_migration::MigratorTrait;
use tracing::{info, warn};

use crate::application::events::{create_event_bus, SharedEventBus};
use crate::application::lifecycle::{
    start_notification_delivery_task, EventBusNotifier, LateReservationReconciler,
    ReconciliationScheduler, ReservationLifecycleService, StopOutcome, TransitionExecutor,
};
use crate::config::AppConfig;
use crate::domain::ResourceStore;
use crate::infrastructure::database::migrator::Migrator;
use crate::infrastructure::{init_database, SeaOrmResourceStore};
use crate::shared::shutdown::{ShutdownCoordinator, ShutdownSignal};
use crate::shared::types::{SharedClock, SystemClock};

// ── Options ────────────────────────────────────────────────────────

/// Options for starting the service.
pub struct ServiceOptions {
    /// Application configuration.
    pub config: AppConfig,
    /// Run database migrations on startup (default: true).
    pub auto_migrate: bool,
    /// Start the periodic late-arrival scheduler (default: true).
    pub start_scheduler: bool,
    /// Time source for transitions and the late scan.
    pub clock: SharedClock,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            config: AppConfig::default(),
            auto_migrate: true,
            start_scheduler: true,
            clock: Arc::new(SystemClock),
        }
    }
}

// ── ServiceHandle ──────────────────────────────────────────────────

/// Handle to a running reservation service.
///
/// # Examples
///
/// ```rust,no_run
/// use parking_lifecycle::server::{ServiceHandle, ServiceOptions};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let handle = ServiceHandle::start(ServiceOptions::default()).await?;
///     // ... wait for shutdown signal ...
///     handle.shutdown().await;
///     Ok(())
/// }
/// ```
pub struct ServiceHandle {
    /// Shared event bus carrying cancellation notices and pass summaries.
    pub event_bus: SharedEventBus,
    /// Backing store.
    pub store: Arc<dyn ResourceStore>,
    /// Arrival, departure and manual cancellation.
    pub lifecycle: Arc<ReservationLifecycleService>,
    /// Late-arrival reconciler, also usable for one-off passes.
    pub reconciler: Arc<LateReservationReconciler>,
    /// Periodic driver of the reconciler.
    pub scheduler: Arc<ReconciliationScheduler>,
    /// The configuration the service was started with.
    pub config: AppConfig,

    db: DatabaseConnection,
    shutdown: ShutdownCoordinator,
}

impl ServiceHandle {
    /// Start the service with the given options.
    ///
    /// This will:
    /// 1. Install the Prometheus exporter (if enabled)
    /// 2. Connect to the database and run migrations
    /// 3. Start the notification delivery task
    /// 4. Build the transition executor, reconciler and lifecycle service
    /// 5. Start the reconciliation scheduler (if enabled)
    pub async fn start(opts: ServiceOptions) -> Result<Self, Box<dyn std::error::Error>> {
        let app_cfg = opts.config;
        app_cfg.validate()?;

        info!("Starting parking reservation service...");

        if app_cfg.metrics.enabled {
            install_metrics_exporter(&app_cfg.metrics.listen_addr);
        }

        // ── Database ───────────────────────────────────────────
        let db = init_database(&app_cfg.database_config()).await?;

        if opts.auto_migrate {
            info!("Running database migrations...");
            Migrator::up(&db, None).await?;
            info!("Migrations completed");
        }

        let store: Arc<dyn ResourceStore> = Arc::new(SeaOrmResourceStore::new(db.clone()));

        // ── Shutdown coordinator ───────────────────────────────
        let shutdown = ShutdownCoordinator::new(app_cfg.shutdown_timeout_secs);
        let shutdown_signal = shutdown.signal();

        // ── Event Bus & notices ────────────────────────────────
        let event_bus = create_event_bus();
        start_notification_delivery_task(event_bus.clone(), shutdown_signal.clone());
        info!("🔔 Event bus initialized for cancellation notices");

        // ── Lifecycle engine ───────────────────────────────────
        let executor = Arc::new(
            TransitionExecutor::new(store.clone()).with_retry(app_cfg.retry_config()),
        );
        let lifecycle = Arc::new(ReservationLifecycleService::new(
            executor.clone(),
            opts.clock.clone(),
        ));
        let reconciler = Arc::new(
            LateReservationReconciler::new(
                executor,
                Arc::new(
                    EventBusNotifier::new(event_bus.clone()).with_clock(opts.clock.clone()),
                ),
                opts.clock,
            )
            .with_threshold_minutes(app_cfg.reconciler.late_threshold_minutes)
            .with_event_bus(event_bus.clone()),
        );
        let scheduler = Arc::new(ReconciliationScheduler::new(
            reconciler.clone(),
            app_cfg.scheduler_config(),
        ));

        if opts.start_scheduler {
            scheduler.start();
        }

        info!(
            threshold_minutes = app_cfg.reconciler.late_threshold_minutes,
            period_secs = app_cfg.reconciler.period_secs,
            "🚀 Reservation service started"
        );

        Ok(Self {
            event_bus,
            store,
            lifecycle,
            reconciler,
            scheduler,
            config: app_cfg,
            db,
            shutdown,
        })
    }

    /// Get a cloneable shutdown signal.
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.signal()
    }

    /// Install OS signal listeners (SIGTERM, SIGINT) that trigger shutdown.
    pub fn install_signal_handler(&self) {
        self.shutdown.spawn_os_listener();
    }

    /// Trigger graceful shutdown (non-blocking).
    pub fn trigger_shutdown(&self) {
        self.shutdown.signal().trigger();
    }

    pub fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Wait for shutdown to be triggered, then stop the scheduler and close
    /// the database, bounded by `shutdown_timeout_secs`.
    pub async fn wait(self) {
        let Self {
            scheduler,
            db,
            shutdown,
            ..
        } = self;

        let completed = shutdown
            .shutdown_with_cleanup(|| async move {
                match scheduler.stop().await {
                    StopOutcome::Forced => warn!("Reconciliation pass aborted during shutdown"),
                    outcome => info!(?outcome, "Reconciliation scheduler stopped"),
                }

                if let Err(e) = db.close().await {
                    warn!("Error closing database connection: {}", e);
                } else {
                    info!("✅ Database connection closed");
                }
            })
            .await;

        if !completed {
            warn!("Shutdown cleanup did not finish in time");
        }
        info!("👋 Parking reservation service shutdown complete");
    }

    /// Trigger shutdown and wait for completion.
    pub async fn shutdown(self) {
        info!("🛑 Shutting down parking reservation service...");
        self.trigger_shutdown();
        self.wait().await;
    }
}

/// Install the Prometheus exporter with its own HTTP listener.
///
/// The global recorder can only be installed once per process; later calls
/// (a restart within the same process) are no-ops.
fn install_metrics_exporter(listen_addr: &str) {
    use std::net::SocketAddr;
    use std::sync::OnceLock;

    static INSTALLED: OnceLock<()> = OnceLock::new();
    if INSTALLED.get().is_some() {
        return;
    }

    let addr: SocketAddr = match listen_addr.parse() {
        Ok(addr) => addr,
        Err(e) => {
            warn!("Invalid metrics listen address {}: {}", listen_addr, e);
            return;
        }
    };

    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => {
            let _ = INSTALLED.set(());
            info!("📊 Prometheus metrics exporter listening on http://{}", addr);
        }
        Err(e) => warn!("Failed to install Prometheus metrics exporter: {}", e),
    }
}

/// Initialize tracing (logging) from the application config.
///
/// Call this once at process startup (before [`ServiceHandle::start`]).
pub fn init_tracing(config: &AppConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    match config.logging.format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }
}
