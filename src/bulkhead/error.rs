use thiserror::Error;

// ── Config errors ───────────────────────────────────────────────────

/// Construction-time faults. Raised when a config is built, registered or
/// resolved; never produced by a call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid bulkhead config '{config}': {field} {reason}")]
    Invalid {
        config: String,
        field: &'static str,
        reason: String,
    },

    #[error("unknown bulkhead config '{name}'")]
    Unknown { name: String },
}

impl ConfigError {
    pub(crate) fn invalid(config: &str, field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            config: config.to_string(),
            field,
            reason: reason.into(),
        }
    }
}

// ── Admission errors ────────────────────────────────────────────────

/// Admission denied: the permit wait expired, or the pool and its queue are
/// saturated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Bulkhead '{name}' is full and does not permit further calls")]
pub struct BulkheadFullError {
    pub name: String,
}

impl BulkheadFullError {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Outcome of a protected call that did not produce a value.
#[derive(Debug, Error)]
pub enum CallError<E> {
    /// The bulkhead refused the call; the work never ran.
    #[error(transparent)]
    Full(#[from] BulkheadFullError),

    /// The work ran and failed with its own error.
    #[error("{0}")]
    Failed(E),
}

impl<E> CallError<E> {
    pub fn is_full(&self) -> bool {
        matches!(self, Self::Full(_))
    }

    /// The work's own error, if the work ran.
    pub fn into_failure(self) -> Option<E> {
        match self {
            Self::Failed(err) => Some(err),
            Self::Full(_) => None,
        }
    }

    /// Name of the bulkhead that refused the call.
    pub fn rejected_by(&self) -> Option<&str> {
        match self {
            Self::Full(full) => Some(&full.name),
            Self::Failed(_) => None,
        }
    }
}
