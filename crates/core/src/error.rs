use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed input: bad MIME type, duplicate labels in one submitted set,
    /// missing or oversized field.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A uniqueness rule would be broken (label text, default collection, username).
    #[error("conflict: {0}")]
    Conflict(String),

    /// An illegal state transition was attempted.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("embedding extractor failed: {0}")]
    Embedding(String),

    #[error("principal not found: {0}")]
    PrincipalNotFound(String),

    #[error("collection not found: {0}")]
    CollectionNotFound(Uuid),

    #[error("image not found: {0}")]
    ImageNotFound(Uuid),

    #[error("label not found: {0}")]
    LabelNotFound(Uuid),

    #[error("current credential does not match")]
    CredentialMismatch,

    #[error("catalog schema version {db} is newer than supported version {code}")]
    SchemaTooNew { db: u32, code: u32 },
}

impl Error {
    /// Transport or transaction failures. Nothing was committed, so the caller
    /// may resubmit the same input.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Store(_) | Error::Io(_))
    }

    /// Errors caused by the caller's input rather than by the store.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Error::Validation(_)
                | Error::Conflict(_)
                | Error::InvariantViolation(_)
                | Error::UnsupportedFormat(_)
                | Error::PrincipalNotFound(_)
                | Error::CollectionNotFound(_)
                | Error::ImageNotFound(_)
                | Error::LabelNotFound(_)
                | Error::CredentialMismatch
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Translate store constraint failures into the domain error the application
/// pre-check would have raised.
///
/// Trigger aborts (`RAISE(ABORT, ...)`) become `InvariantViolation` carrying the
/// trigger message; plain UNIQUE/PRIMARY KEY failures become whatever `conflict`
/// builds. Everything else stays a `Store` error.
pub(crate) trait ConstraintExt<T> {
    fn on_conflict<F>(self, conflict: F) -> Result<T>
    where
        F: FnOnce() -> Error;
}

impl<T> ConstraintExt<T> for rusqlite::Result<T> {
    fn on_conflict<F>(self, conflict: F) -> Result<T>
    where
        F: FnOnce() -> Error,
    {
        self.map_err(|err| translate_constraint(err, conflict))
    }
}

pub(crate) fn translate_constraint<F>(err: rusqlite::Error, conflict: F) -> Error
where
    F: FnOnce() -> Error,
{
    use rusqlite::ffi;

    if let rusqlite::Error::SqliteFailure(ref failure, ref message) = err {
        match failure.extended_code {
            ffi::SQLITE_CONSTRAINT_TRIGGER => {
                return Error::InvariantViolation(
                    message.clone().unwrap_or_else(|| "rejected by store trigger".to_string()),
                );
            }
            ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                return conflict();
            }
            _ => {}
        }
    }
    Error::Store(err)
}

/// Trigger translation for statements that cannot raise a uniqueness conflict.
pub(crate) fn from_store(err: rusqlite::Error) -> Error {
    translate_constraint(err, || Error::Conflict("uniqueness constraint".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn conn_with_guard() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE t (k TEXT PRIMARY KEY, v TEXT UNIQUE);
             CREATE TRIGGER t_guard BEFORE DELETE ON t
             BEGIN SELECT RAISE(ABORT, 'rows in t are permanent'); END;
             INSERT INTO t (k, v) VALUES ('a', 'x');",
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_unique_violation_becomes_conflict() {
        let conn = conn_with_guard();
        let err = conn
            .execute("INSERT INTO t (k, v) VALUES ('b', 'x')", [])
            .on_conflict(|| Error::Conflict("v taken".into()))
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(ref m) if m == "v taken"));
    }

    #[test]
    fn test_primary_key_violation_becomes_conflict() {
        let conn = conn_with_guard();
        let err = conn
            .execute("INSERT INTO t (k, v) VALUES ('a', 'y')", [])
            .on_conflict(|| Error::Conflict("k taken".into()))
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[test]
    fn test_trigger_abort_becomes_invariant_violation() {
        let conn = conn_with_guard();
        let err = conn
            .execute("DELETE FROM t", [])
            .map_err(from_store)
            .unwrap_err();
        match err {
            Error::InvariantViolation(msg) => assert_eq!(msg, "rows in t are permanent"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_other_errors_stay_store_errors() {
        let conn = conn_with_guard();
        let err = conn
            .execute("INSERT INTO missing (k) VALUES (1)", [])
            .map_err(from_store)
            .unwrap_err();
        assert!(matches!(err, Error::Store(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_rejections_are_not_retryable() {
        assert!(!Error::Validation("x".into()).is_retryable());
        assert!(Error::Validation("x".into()).is_rejection());
        assert!(!Error::Io(std::io::Error::other("disk")).is_rejection());
    }
}
