//! Classifies a failure as retryable or terminal, per job class policy and
//! Postgres SQLSTATE codes.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Retry,
    Discard,
}

// https://www.postgresql.org/docs/current/errcodes-appendix.html
const SQLSTATE_SERIALIZATION_FAILURE: &str = "40001";
const SQLSTATE_DEADLOCK_DETECTED: &str = "40P01";
const SQLSTATE_STATEMENT_TIMEOUT: &str = "57014";
const SQLSTATE_LOCK_NOT_AVAILABLE: &str = "55P03";
const SQLSTATE_CLASS_CONNECTION_EXCEPTION: &str = "08";

/// Classifies a `sqlx::Error` the way the executor would classify any other
/// database error: connection loss, deadlock, serialization conflicts, and
/// statement/lock timeouts are transient and retried; everything else about
/// the database layer is also retried by default (only a handler's own
/// argument/validation errors are discarded, see `classify_exception_name`).
pub fn classify_db_error(err: &sqlx::Error) -> ErrorClass {
    match err {
        sqlx::Error::Database(db_err) => match db_err.code() {
            Some(code)
                if code == SQLSTATE_SERIALIZATION_FAILURE
                    || code == SQLSTATE_DEADLOCK_DETECTED
                    || code == SQLSTATE_STATEMENT_TIMEOUT
                    || code == SQLSTATE_LOCK_NOT_AVAILABLE
                    || code.starts_with(SQLSTATE_CLASS_CONNECTION_EXCEPTION) =>
            {
                ErrorClass::Retry
            }
            _ => ErrorClass::Retry,
        },
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::Tls(_) => ErrorClass::Retry,
        _ => ErrorClass::Retry,
    }
}

/// Classifies a handler-raised exception by its type name, the way a class's
/// `discard_on` list overrides the default-to-retry policy. Cast errors,
/// validation errors, argument errors, and missing-clause errors discard by
/// convention; an explicit `discard_on` entry always wins.
pub fn classify_exception_name(exception_type: &str, discard_on: &[String]) -> ErrorClass {
    if discard_on.iter().any(|d| d == exception_type) {
        return ErrorClass::Discard;
    }

    const DISCARD_BY_DEFAULT: &[&str] = &[
        "ArgumentError",
        "CastError",
        "ValidationError",
        "MissingClauseError",
    ];

    if DISCARD_BY_DEFAULT.contains(&exception_type) {
        ErrorClass::Discard
    } else {
        ErrorClass::Retry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discard_on_overrides_default_retry() {
        let discard_on = vec!["TimeoutError".to_string()];
        assert_eq!(
            classify_exception_name("TimeoutError", &discard_on),
            ErrorClass::Discard
        );
    }

    #[test]
    fn argument_errors_discard_by_default() {
        assert_eq!(
            classify_exception_name("ArgumentError", &[]),
            ErrorClass::Discard
        );
    }

    #[test]
    fn unknown_exceptions_retry_by_default() {
        assert_eq!(
            classify_exception_name("NetworkError", &[]),
            ErrorClass::Retry
        );
    }
}
