use crate::model::{
    Bet,
    NonceRecord,
    Round,
};
use chrono::{
    DateTime,
    Utc,
};

/// Outcome of a conditional row update.
#[derive(PartialEq, Eq, Debug, Copy, Clone)]
pub enum UpdateOutcome {
    Updated,
    /// The row exists but the mutation found nothing to change. Field-level
    /// set-if-empty merges report this when every field was already set.
    Unchanged,
    NotFound,
}

/// Outcome of a nonce consumption attempt. Consumption is atomic: for a
/// given nonce, exactly one caller observes `Consumed`.
#[derive(PartialEq, Eq, Debug, Clone)]
pub enum ConsumeOutcome {
    Consumed(NonceRecord),
    AlreadyConsumed,
    Missing,
}

pub trait BetRepository {
    fn get(&self, id: &str) -> crate::Result<Option<Bet>>;

    /// Looks a bet up by its execution digest, for digest-keyed idempotency.
    fn find_by_tx_hash(&self, tx_hash: &str) -> crate::Result<Option<Bet>>;

    fn insert(&self, bet: &Bet) -> crate::Result<()>;

    /// Applies `apply` to the row atomically with respect to concurrent
    /// updates of the same row. `apply` returns whether it changed anything;
    /// it may be invoked more than once and must be pure over its input.
    fn update_with(
        &self,
        id: &str,
        apply: &dyn Fn(&mut Bet) -> bool,
    ) -> crate::Result<UpdateOutcome>;

    /// Bets carrying an execution digest but no on-chain object id.
    fn bets_missing_object_id(&self) -> crate::Result<Vec<Bet>>;

    /// Bets carrying a claim digest but no claim-finalize fields.
    fn bets_missing_claim_fields(&self) -> crate::Result<Vec<Bet>>;
}

pub trait RoundRepository {
    fn get(&self, id: &str) -> crate::Result<Option<Round>>;

    fn insert(&self, round: &Round) -> crate::Result<()>;

    fn update_with(
        &self,
        id: &str,
        apply: &dyn Fn(&mut Round) -> bool,
    ) -> crate::Result<UpdateOutcome>;

    /// Rounds with a creation digest but no pool object id.
    fn rounds_missing_pool(&self) -> crate::Result<Vec<Round>>;

    /// Rounds with a finalize digest but missing finalize artifacts.
    fn rounds_missing_finalize(&self) -> crate::Result<Vec<Round>>;
}

pub trait NonceStore {
    fn put(&self, record: &NonceRecord) -> crate::Result<()>;

    fn get(&self, nonce: &str) -> crate::Result<Option<NonceRecord>>;

    /// Marks the record consumed. Concurrent attempts for the same nonce
    /// yield exactly one `Consumed`; losers observe `AlreadyConsumed`.
    fn consume(&self, nonce: &str) -> crate::Result<ConsumeOutcome>;

    /// Deletes consumed and expired records so the store does not grow
    /// without bound. Returns how many records were removed.
    fn purge_stale(&self, now: DateTime<Utc>) -> crate::Result<u64>;
}

pub(crate) fn bet_missing_object_id(bet: &Bet) -> bool {
    bet.onchain_tx_hash.is_some()
        && bet.onchain_object_id.is_none()
        && bet.result != crate::model::BetResult::Failed
}

pub(crate) fn bet_missing_claim_fields(bet: &Bet) -> bool {
    bet.claim_digest.is_some()
        && bet.payout_amount.is_none()
        && bet.settlement == crate::model::SettlementStatus::Pending
}

pub(crate) fn round_missing_pool(round: &Round) -> bool {
    round.create_digest.is_some()
        && round.pool_object_id.is_none()
        && round.status != crate::model::RoundStatus::Cancelled
}

pub(crate) fn round_missing_finalize(round: &Round) -> bool {
    round.finalize_digest.is_some()
        && (round.settlement_object_id.is_none() || round.fee_coin_object_id.is_none())
        && round.status != crate::model::RoundStatus::Cancelled
}
