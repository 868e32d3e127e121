use chrono::{
    DateTime,
    Utc,
};
use serde::{
    Deserialize,
    Serialize,
};

#[derive(PartialEq, Eq, Debug, Copy, Clone, Serialize, Deserialize)]
pub enum Side {
    Up,
    Down,
}

#[derive(PartialEq, Eq, Debug, Copy, Clone, Serialize, Deserialize)]
pub enum BetResult {
    Pending,
    Won,
    Lost,
    Refunded,
    Failed,
}

#[derive(PartialEq, Eq, Debug, Copy, Clone, Serialize, Deserialize)]
pub enum SettlementStatus {
    Pending,
    Completed,
    Failed,
}

#[derive(PartialEq, Eq, Debug, Copy, Clone, Serialize, Deserialize)]
pub enum RoundStatus {
    Scheduled,
    BettingOpen,
    BettingLocked,
    Settling,
    Settled,
    Cancelled,
}

impl RoundStatus {
    fn rank(self) -> u8 {
        match self {
            RoundStatus::Scheduled => 0,
            RoundStatus::BettingOpen => 1,
            RoundStatus::BettingLocked => 2,
            RoundStatus::Settling => 3,
            RoundStatus::Settled => 4,
            RoundStatus::Cancelled => 5,
        }
    }

    /// Transitions move forward along the lifecycle only. Cancellation is
    /// reachable from any state before the round has settled.
    pub fn can_transition_to(self, next: RoundStatus) -> bool {
        match next {
            RoundStatus::Cancelled => {
                self != RoundStatus::Settled && self != RoundStatus::Cancelled
            }
            _ => self != RoundStatus::Cancelled && next.rank() > self.rank(),
        }
    }
}

/// A user's price-direction bet. The relational row is a derived index over
/// chain state: the digest fields record which transactions produced it, and
/// the object id / payout fields are filled in from parsed chain artifacts,
/// by the executor on the happy path or by recovery after a crash.
#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
pub struct Bet {
    pub id: String,
    pub round_id: String,
    pub user_id: String,
    pub side: Side,
    pub amount: u64,
    pub currency: String,
    pub result: BetResult,
    pub settlement: SettlementStatus,
    pub onchain_object_id: Option<String>,
    pub onchain_tx_hash: Option<String>,
    pub claim_digest: Option<String>,
    pub payout_amount: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
pub struct Round {
    pub id: String,
    pub kind: String,
    pub status: RoundStatus,
    pub start_time: DateTime<Utc>,
    pub lock_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub up_pool: u64,
    pub down_pool: u64,
    pub pool_object_id: Option<String>,
    pub settlement_object_id: Option<String>,
    pub fee_coin_object_id: Option<String>,
    pub create_digest: Option<String>,
    pub finalize_digest: Option<String>,
}

/// Single-use token binding a prepared transaction to one execution attempt.
#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
pub struct NonceRecord {
    pub nonce: String,
    pub user_id: String,
    pub intent: IntentKind,
    pub tx_bytes_hash: String,
    pub expires_at: DateTime<Utc>,
    pub consumed: bool,
}

impl NonceRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[derive(PartialEq, Eq, Debug, Copy, Clone, Serialize, Deserialize)]
pub enum IntentKind {
    PlaceBet,
    Claim,
}

/// What the caller wants to do on-chain. The preparer validates the intent
/// against current rows, the executor re-reads it out of the signed bytes.
#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Intent {
    #[serde(rename_all = "camelCase")]
    PlaceBet {
        round_id: String,
        side: Side,
        amount: u64,
        currency: String,
    },
    #[serde(rename_all = "camelCase")]
    Claim { bet_id: String },
}

impl Intent {
    pub fn kind(&self) -> IntentKind {
        match self {
            Intent::PlaceBet { .. } => IntentKind::PlaceBet,
            Intent::Claim { .. } => IntentKind::Claim,
        }
    }
}

/// Identity of the authenticated caller, supplied by the auth layer and
/// trusted as given.
#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
pub struct Caller {
    pub user_id: String,
    pub address: String,
}

/// Artifacts parsed out of a bet-placement transaction result.
#[derive(PartialEq, Eq, Debug, Clone, Default)]
pub struct PlacementArtifacts {
    pub bet_object_id: Option<String>,
}

/// Artifacts parsed out of a claim transaction result.
#[derive(PartialEq, Eq, Debug, Clone, Default)]
pub struct ClaimArtifacts {
    pub payout_amount: Option<u64>,
}

/// Artifacts parsed out of a round-creation transaction result.
#[derive(PartialEq, Eq, Debug, Clone, Default)]
pub struct RoundCreateArtifacts {
    pub pool_object_id: Option<String>,
}

/// Artifacts parsed out of a round-finalize transaction result.
#[derive(PartialEq, Eq, Debug, Clone, Default)]
pub struct RoundFinalizeArtifacts {
    pub settlement_object_id: Option<String>,
    pub fee_coin_object_id: Option<String>,
}

fn set_if_empty<T: Clone>(field: &mut Option<T>, value: &Option<T>) -> bool {
    match (field.is_none(), value) {
        (true, Some(v)) => {
            *field = Some(v.clone());
            true
        }
        _ => false,
    }
}

impl Bet {
    /// Fills still-empty placement fields from parsed artifacts. Populated
    /// fields are never overwritten. Returns whether anything changed.
    pub fn merge_placement(&mut self, artifacts: &PlacementArtifacts) -> bool {
        set_if_empty(&mut self.onchain_object_id, &artifacts.bet_object_id)
    }

    /// Fills still-empty claim fields and completes settlement. A bet whose
    /// claim fields are already populated is left untouched.
    pub fn merge_claim(&mut self, artifacts: &ClaimArtifacts) -> bool {
        let mut changed = set_if_empty(&mut self.payout_amount, &artifacts.payout_amount);
        if self.settlement == SettlementStatus::Pending && self.payout_amount.is_some() {
            self.settlement = SettlementStatus::Completed;
            changed = true;
        }
        changed
    }
}

impl Round {
    pub fn merge_create(&mut self, artifacts: &RoundCreateArtifacts) -> bool {
        set_if_empty(&mut self.pool_object_id, &artifacts.pool_object_id)
    }

    pub fn merge_finalize(&mut self, artifacts: &RoundFinalizeArtifacts) -> bool {
        let settlement = set_if_empty(
            &mut self.settlement_object_id,
            &artifacts.settlement_object_id,
        );
        let fee = set_if_empty(&mut self.fee_coin_object_id, &artifacts.fee_coin_object_id);
        settlement || fee
    }
}

/// Aggregate result of one backfill scan. Counts only, nothing is persisted.
#[derive(PartialEq, Eq, Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackfillReport {
    pub stuck_count: u64,
    pub retried_count: u64,
    pub alerted_count: u64,
    pub round_backfill: RoundBackfill,
    pub bet_backfill: BetBackfill,
}

#[derive(PartialEq, Eq, Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundBackfill {
    pub pool_scanned: u64,
    pub pool_updated: u64,
    pub finalize_scanned: u64,
    pub finalize_updated: u64,
}

#[derive(PartialEq, Eq, Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BetBackfill {
    pub bet_object_id_scanned: u64,
    pub bet_object_id_updated: u64,
    pub claim_scanned: u64,
    pub claim_updated: u64,
}
