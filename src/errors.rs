use rust_decimal::Decimal;
use sea_orm::error::DbErr;

/// Error returned by every service operation.
///
/// Ledger-mutating operations run inside a single transaction, so any of
/// these errors means nothing was written.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[source] DbErr),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error(
        "Insufficient stock for item {item_id} ({item_name}): requested {requested}, available {available}"
    )]
    InsufficientStock {
        item_id: i32,
        item_name: String,
        requested: Decimal,
        available: Decimal,
    },

    #[error("Inventory item {0} not found")]
    ItemNotFound(i32),

    #[error("Recipe {0} not found")]
    RecipeNotFound(i32),

    #[error("WIP batch {0} not found")]
    BatchNotFound(i32),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Cyclic recipe reference: {}", format_chain(.chain))]
    CyclicRecipe { chain: Vec<i32> },

    #[error("WIP batch {0} has no allocations and cannot be completed")]
    EmptyBatchCompletion(i32),

    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    #[error("Concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub(crate) fn format_chain(chain: &[i32]) -> String {
    chain
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Driver messages that indicate the row or database lock could not be taken.
const LOCK_CONTENTION_MARKERS: &[&str] = &[
    "database is locked",
    "database table is locked",
    "sqlite_busy",
    "could not obtain lock",
    "lock timeout",
    "deadlock detected",
    "could not serialize access",
];

fn is_lock_contention(err: &DbErr) -> bool {
    let message = err.to_string().to_ascii_lowercase();
    LOCK_CONTENTION_MARKERS
        .iter()
        .any(|marker| message.contains(marker))
}

impl From<DbErr> for ServiceError {
    fn from(err: DbErr) -> Self {
        if is_lock_contention(&err) {
            ServiceError::ConcurrencyConflict(err.to_string())
        } else {
            ServiceError::DatabaseError(err)
        }
    }
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

pub trait IntoDbErr {
    fn into_db_err(self) -> DbErr;
}

impl IntoDbErr for DbErr {
    fn into_db_err(self) -> DbErr {
        self
    }
}

impl IntoDbErr for String {
    fn into_db_err(self) -> DbErr {
        DbErr::Custom(self)
    }
}

impl IntoDbErr for &str {
    fn into_db_err(self) -> DbErr {
        DbErr::Custom(self.to_string())
    }
}

impl ServiceError {
    /// Normalizes any supported database error input, classifying lock contention.
    pub fn db_error<E: IntoDbErr>(error: E) -> Self {
        ServiceError::from(error.into_db_err())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        ServiceError::ValidationError(message.into())
    }

    /// A quantity computed from valid inputs fell outside the decimal range.
    pub fn quantity_overflow(context: impl std::fmt::Display) -> Self {
        ServiceError::ValidationError(format!("Quantity overflow {}", context))
    }

    /// Stable machine-readable code for the calling layer.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::DatabaseError(_) => "database_error",
            Self::ValidationError(_) => "validation_error",
            Self::InsufficientStock { .. } => "insufficient_stock",
            Self::ItemNotFound(_) => "item_not_found",
            Self::RecipeNotFound(_) => "recipe_not_found",
            Self::BatchNotFound(_) => "batch_not_found",
            Self::NotFound(_) => "not_found",
            Self::CyclicRecipe { .. } => "cyclic_recipe",
            Self::EmptyBatchCompletion(_) => "empty_batch_completion",
            Self::InvalidStatus(_) => "invalid_status",
            Self::ConcurrencyConflict(_) => "concurrency_conflict",
            Self::InternalError(_) | Self::Other(_) => "internal_error",
        }
    }

    /// True for errors caused by the caller's input rather than the system.
    pub fn is_client_error(&self) -> bool {
        !matches!(
            self,
            Self::DatabaseError(_)
                | Self::ConcurrencyConflict(_)
                | Self::InternalError(_)
                | Self::Other(_)
        )
    }
}
