use uuid::Uuid;

/// Errors about the store/connection itself: pool exhaustion, query failure,
/// (de)serialization, or the database being in a state the caller didn't expect.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("failed to serialize/deserialize job payload: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("invalid queue expression: {0}")]
    InvalidQueueExpression(String),

    #[error("invalid cron expression: {0}")]
    InvalidCronExpression(String),

    #[error("attempted to update job {job} using lock {lock}, but it was not held")]
    InvalidLock { lock: Uuid, job: Uuid },

    #[error("update affected no rows (job {0} likely no longer exists or already finished)")]
    NoRowsUpdated(Uuid),

    #[error("concurrency limit exceeded for key {0}")]
    ConcurrencyLimitExceeded(String),

    #[error("throttle exceeded for key {0}")]
    ThrottleExceeded(String),

    #[error("could not acquire advisory lock for key {0}")]
    LockNotAcquired(String),

    #[error("batch {0} not found")]
    BatchNotFound(Uuid),
}

/// Errors about a single job's state machine: invalid transitions, attempts to
/// finish a job twice, or a handler outcome the executor doesn't recognize.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("job {0} was already finished before this execution started")]
    AlreadyFinished(Uuid),

    #[error("job {0} has no outstanding claim to flush against")]
    FlushWithoutClaim(Uuid),

    #[error("job {0} handler timed out after {1:?}")]
    Timeout(Uuid, std::time::Duration),

    #[error("job {0} handler panicked or the task was aborted: {1}")]
    HandlerAborted(Uuid, String),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

pub type QueueResult<T> = Result<T, QueueError>;
pub type JobResult<T> = Result<T, JobError>;
