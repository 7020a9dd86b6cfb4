use thiserror::Error;

pub type CoreResult<T> = Result<T, CoreError>;

/// Error kinds surfaced by the core subsystems.
///
/// `Validation` covers bad client input, `Conflict` covers unique-key
/// violations and state-machine-illegal transitions, `Transient` covers
/// retryable storage failures. Nothing is silently swallowed; the web layer
/// maps each kind to a status code.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("rate limited")]
    RateLimited { retry_after_secs: u64 },

    #[error("transient storage failure: {0}")]
    Transient(String),

    #[error("invariant violated: {0}")]
    Fatal(String),
}

impl CoreError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn conflict(what: impl Into<String>) -> Self {
        Self::Conflict(what.into())
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::QueryReturnedNoRows => CoreError::NotFound("row".into()),
            rusqlite::Error::SqliteFailure(err, msg) => match err.code {
                rusqlite::ErrorCode::ConstraintViolation => {
                    CoreError::Conflict(msg.unwrap_or_else(|| "constraint violation".into()))
                }
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked => {
                    CoreError::Transient(msg.unwrap_or_else(|| "database busy".into()))
                }
                _ => CoreError::Transient(format!("sqlite failure: {err}")),
            },
            other => CoreError::Transient(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_rows_maps_to_not_found() {
        let e: CoreError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(e, CoreError::NotFound(_)));
    }
}
