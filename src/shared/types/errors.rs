use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("Not found: {entity} with {field}={value}")]
    NotFound {
        entity: &'static str,
        field: &'static str,
        value: String,
    },

    #[error("Validation: {0}")]
    Validation(String),

    #[error("Transition {from} -> {to} is not allowed")]
    InvalidTransition { from: String, to: String },

    #[error("Reservation {reservation_id} needs a spot to move to {target}")]
    MissingSpot { reservation_id: i32, target: String },

    #[error("Spot {0} is already occupied")]
    SpotOccupied(i32),

    /// The store could not open a unit of work at all.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// A fault inside an open unit of work; the unit was rolled back.
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Notification error: {0}")]
    Notification(String),
}

impl DomainError {
    /// Whether this error is likely transient (e.g. DB connection lost)
    /// and the operation may succeed if retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, DomainError::StoreUnavailable(_) | DomainError::Storage(_))
    }

    /// Whether the store itself is unreachable, as opposed to a single
    /// reservation failing.
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, DomainError::StoreUnavailable(_))
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid config: {0}")]
    Invalid(String),
}
