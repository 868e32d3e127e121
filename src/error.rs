use thiserror::Error;

/// Errors surfaced by the prepare/execute/recover services. Each variant maps
/// to a stable code so API callers can branch without parsing messages.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("nonce has expired, restart from prepare")]
    NonceExpired,

    #[error("nonce is unknown, mismatched, or already consumed")]
    NonceInvalid,

    #[error("chain rejected the submitted transaction: {0}")]
    ChainExecutionFailed(String),

    /// A past transaction, found during recovery, had failed on-chain.
    #[error("transaction {0} failed on-chain")]
    ChainTxFailed(String),

    #[error("transaction {0} is unknown to the chain")]
    NotFound(String),

    /// Transient: the transaction may still land. Retry later, do not treat
    /// as a definitive failure.
    #[error("transaction {0} is not finalized yet")]
    Pending(String),

    #[error("server-driven settlement is deprecated, payouts are claimed by users")]
    DeprecatedJob,

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl ServiceError {
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::Validation(_) => "VALIDATION_ERROR",
            ServiceError::NonceExpired => "NONCE_EXPIRED",
            ServiceError::NonceInvalid => "NONCE_INVALID",
            ServiceError::ChainExecutionFailed(_) => "CHAIN_EXECUTION_FAILED",
            ServiceError::ChainTxFailed(_) => "CHAIN_TX_FAILED",
            ServiceError::NotFound(_) => "NOT_FOUND",
            ServiceError::Pending(_) => "PENDING",
            ServiceError::DeprecatedJob => "DEPRECATED_JOB",
            ServiceError::Storage(_) => "STORAGE_ERROR",
        }
    }

    /// Transient errors are expected to resolve on a later attempt without
    /// user action; the backfill scanner leaves such rows for the next run.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ServiceError::Pending(_) | ServiceError::Storage(_)
        )
    }
}
