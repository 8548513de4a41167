use std::path::PathBuf;

use thiserror::Error;

/// Application-wide error types.
///
/// Scan-level problems (unparseable or empty directories) are *not* errors:
/// they are collected on the [`Snapshot`](crate::scanner::Snapshot) and turn a
/// run into a partial one. Everything here aborts the current operation.
///
/// # Error Conversion
///
/// - `sqlx::Error` → `AppError::DatabaseError`
/// - `serde_json::Error` → `AppError::SerializationError`
/// - `std::io::Error` → `AppError::Io`
///
/// # Examples
///
/// ```no_run
/// use kuro_core::error::AppError;
///
/// fn example() -> Result<(), AppError> {
///     Err(AppError::RootUnavailable("/srv/manga".into()))
/// }
/// ```
#[derive(Error, Debug)]
pub enum AppError {
    /// Writing to or reading from the relational index failed.
    ///
    /// A reconciliation that hits this is aborted, recorded as failed in the
    /// run ledger and the error is handed back to the caller. Steps committed
    /// before the failure stay applied.
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    /// The configured content root is missing or not a directory.
    #[error("Content root unavailable: {}", .0.display())]
    RootUnavailable(PathBuf),

    /// Filesystem operation failed outside of scanning.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Configuration file could not be read or parsed.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl AppError {
    /// Returns a user-friendly error message suitable for CLI output.
    pub fn user_message(&self) -> String {
        match self {
            AppError::DatabaseError(e) => {
                if e.to_string().contains("unable to open database file") {
                    "Cannot open the index database.\n   Check DATABASE_URL and that its directory exists."
                        .to_string()
                } else {
                    format!("Database error: {}", e)
                }
            }
            AppError::RootUnavailable(path) => {
                format!(
                    "Content root not found: {}\n   Set KURO_CONTENT_ROOT or --content-root to an existing directory.",
                    path.display()
                )
            }
            AppError::Config(msg) => {
                format!("Invalid configuration: {}\n   Check your config.toml.", msg)
            }
            _ => self.to_string(),
        }
    }

    /// Returns true if this error is retryable.
    ///
    /// # Examples
    ///
    /// ```
    /// use kuro_core::error::AppError;
    ///
    /// // A locked database may free up
    /// let err = AppError::DatabaseError(sqlx::Error::PoolTimedOut);
    /// assert!(err.is_retryable());
    ///
    /// // A missing root will not fix itself
    /// let err = AppError::RootUnavailable("/srv/manga".into());
    /// assert!(!err.is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::DatabaseError(sqlx::Error::PoolTimedOut) | AppError::Io(_)
        )
    }
}
