//! Store error taxonomy, grounded on the relayer's convention of wrapping `sqlx::Error`
//! behind a small set of named, matchable variants instead of leaking database internals.

/// Errors surfaced by the durable store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The row was not found.
    #[error("transfer not found")]
    NotFound,

    /// `nonce` violates the unique constraint.
    #[error("nonce already used")]
    DuplicateNonce,

    /// The pool is unreachable; callers should degrade rather than crash.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Any other database failure.
    #[error("database error: {0}")]
    Database(sqlx::Error),
}

impl StoreError {
    /// Maps a raw `sqlx::Error` into `DuplicateNonce` when it is a unique-constraint
    /// violation on the `nonce` column, otherwise wraps it as-is.
    #[must_use]
    pub fn from_insert(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() {
                return Self::DuplicateNonce;
            }
        }
        Self::from(err)
    }

    /// Connection/pool-exhaustion failures degrade to [`Self::Unavailable`] rather than
    /// the opaque [`Self::Database`] variant, since they mean the database is unreachable,
    /// not that the query itself was wrong.
    fn is_connectivity(err: &sqlx::Error) -> bool {
        matches!(err, sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed)
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if Self::is_connectivity(&err) {
            return Self::Unavailable(err.to_string());
        }
        Self::Database(err)
    }
}

impl From<StoreError> for relayer_core::error::ChainOracleError {
    fn from(err: StoreError) -> Self {
        Self(err.to_string())
    }
}
