//! Tombstone for the retired server-driven settlement job.
//!
//! Payouts used to be pushed by a scheduled job; they are now pulled by the
//! user through the prepare/execute claim flow. The entry point stays so old
//! schedulers and operator tooling hit a hard, explicit failure instead of a
//! silent 404, and it must never be resurrected.

use crate::{
    app::store::RoundRepository,
    error::ServiceError,
};

/// Always fails with `DEPRECATED_JOB`. Takes the round repository only to
/// keep the old call shape; it performs no read or write through it.
pub fn run_settlement<Rounds: RoundRepository>(
    _rounds: &Rounds,
    round_id: &str,
) -> Result<(), ServiceError> {
    tracing::warn!(round = %round_id, "rejected call to the retired settlement job");
    Err(ServiceError::DeprecatedJob)
}
