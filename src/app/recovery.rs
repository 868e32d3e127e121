use crate::{
    app::store::{
        BetRepository,
        RoundRepository,
        UpdateOutcome,
    },
    chain::{
        ChainRpc,
        TransactionResult,
        TxLookup,
        TxStatus,
        object_types,
    },
    error::ServiceError,
    model::{
        BetResult,
        ClaimArtifacts,
        PlacementArtifacts,
        RoundCreateArtifacts,
        RoundFinalizeArtifacts,
        RoundStatus,
        SettlementStatus,
    },
    tx_parser::{
        TypeFilter,
        find_created_object_id_by_type,
        parse_payout_distributed_amount,
    },
};
use chrono::Utc;

/// Which row and which of its digests to reconcile.
#[derive(PartialEq, Eq, Debug, Clone)]
pub enum RecoveryTarget {
    RoundCreate(String),
    RoundFinalize(String),
    BetPlacement(String),
    BetClaim(String),
}

#[derive(PartialEq, Eq, Debug, Clone)]
pub struct RecoveryOutcome {
    /// Whether any field was filled in. `false` means the row was already
    /// complete; re-running recovery is always safe.
    pub updated: bool,
    pub digest: String,
}

/// Reconciles a row against the chain record of its transaction. Read-only
/// towards the chain: this never submits anything, it only fetches, parses,
/// and fills in fields the executor did not get to write.
#[derive(Clone)]
pub struct RecoveryService<Chain, Bets, Rounds> {
    chain: Chain,
    bets: Bets,
    rounds: Rounds,
}

impl<Chain, Bets, Rounds> RecoveryService<Chain, Bets, Rounds>
where
    Chain: ChainRpc,
    Bets: BetRepository,
    Rounds: RoundRepository,
{
    pub fn new(chain: Chain, bets: Bets, rounds: Rounds) -> Self {
        Self {
            chain,
            bets,
            rounds,
        }
    }

    /// Resolves the digest (from the row unless overridden), fetches the
    /// transaction, and merges missing fields. A digest the chain reports as
    /// failed marks the row failed instead of populating it.
    pub async fn recover(
        &self,
        target: RecoveryTarget,
        digest_override: Option<String>,
    ) -> Result<RecoveryOutcome, ServiceError> {
        let digest = self.resolve_digest(&target, digest_override)?;
        let result = match self.chain.fetch_transaction(&digest).await? {
            TxLookup::Executed(result) => result,
            TxLookup::Pending => return Err(ServiceError::Pending(digest)),
            TxLookup::NotFound => return Err(ServiceError::NotFound(digest)),
        };
        if result.status == TxStatus::Failure {
            self.mark_failed(&target)?;
            return Err(ServiceError::ChainTxFailed(digest));
        }

        let outcome = self.apply(&target, &result)?;
        match outcome {
            UpdateOutcome::NotFound => Err(ServiceError::Validation(format!(
                "row for {target:?} disappeared during recovery"
            ))),
            UpdateOutcome::Unchanged => Ok(RecoveryOutcome {
                updated: false,
                digest,
            }),
            UpdateOutcome::Updated => {
                tracing::info!(?target, digest = %digest, "recovered missing fields");
                Ok(RecoveryOutcome {
                    updated: true,
                    digest,
                })
            }
        }
    }

    fn resolve_digest(
        &self,
        target: &RecoveryTarget,
        digest_override: Option<String>,
    ) -> Result<String, ServiceError> {
        if let Some(digest) = digest_override {
            return Ok(digest);
        }
        let stored = match target {
            RecoveryTarget::RoundCreate(id) => self.require_round(id)?.create_digest,
            RecoveryTarget::RoundFinalize(id) => self.require_round(id)?.finalize_digest,
            RecoveryTarget::BetPlacement(id) => self.require_bet(id)?.onchain_tx_hash,
            RecoveryTarget::BetClaim(id) => self.require_bet(id)?.claim_digest,
        };
        stored.ok_or_else(|| {
            ServiceError::Validation(format!("{target:?} has no recorded digest"))
        })
    }

    fn require_round(&self, id: &str) -> Result<crate::model::Round, ServiceError> {
        self.rounds
            .get(id)?
            .ok_or_else(|| ServiceError::Validation(format!("unknown round {id}")))
    }

    fn require_bet(&self, id: &str) -> Result<crate::model::Bet, ServiceError> {
        self.bets
            .get(id)?
            .ok_or_else(|| ServiceError::Validation(format!("unknown bet {id}")))
    }

    fn apply(
        &self,
        target: &RecoveryTarget,
        result: &TransactionResult,
    ) -> Result<UpdateOutcome, ServiceError> {
        let outcome = match target {
            RecoveryTarget::RoundCreate(id) => {
                let artifacts = RoundCreateArtifacts {
                    pool_object_id: find_created_object_id_by_type(
                        &result.object_changes,
                        &TypeFilter::contains(object_types::BETTING_POOL),
                    ),
                };
                self.rounds
                    .update_with(id, &|round| round.merge_create(&artifacts))?
            }
            RecoveryTarget::RoundFinalize(id) => {
                let artifacts = RoundFinalizeArtifacts {
                    settlement_object_id: find_created_object_id_by_type(
                        &result.object_changes,
                        &TypeFilter::contains(object_types::ROUND_SETTLEMENT),
                    ),
                    fee_coin_object_id: find_created_object_id_by_type(
                        &result.object_changes,
                        &TypeFilter::contains(object_types::FEE_COIN),
                    ),
                };
                self.rounds
                    .update_with(id, &|round| round.merge_finalize(&artifacts))?
            }
            RecoveryTarget::BetPlacement(id) => {
                let artifacts = PlacementArtifacts {
                    bet_object_id: find_created_object_id_by_type(
                        &result.object_changes,
                        &TypeFilter {
                            contains: object_types::BET,
                            excludes: &[object_types::BETTING_POOL],
                        },
                    ),
                };
                self.bets
                    .update_with(id, &|bet| bet.merge_placement(&artifacts))?
            }
            RecoveryTarget::BetClaim(id) => {
                let payout = parse_payout_distributed_amount(
                    &result.events,
                    object_types::PAYOUT_DISTRIBUTED,
                )?;
                let artifacts = ClaimArtifacts {
                    payout_amount: Some(payout),
                };
                self.bets.update_with(id, &|bet| bet.merge_claim(&artifacts))?
            }
        };
        Ok(outcome)
    }

    fn mark_failed(&self, target: &RecoveryTarget) -> Result<(), ServiceError> {
        match target {
            RecoveryTarget::RoundCreate(id) | RecoveryTarget::RoundFinalize(id) => {
                self.rounds.update_with(id, &|round| {
                    if round.status.can_transition_to(RoundStatus::Cancelled) {
                        round.status = RoundStatus::Cancelled;
                        true
                    } else {
                        false
                    }
                })?;
            }
            RecoveryTarget::BetPlacement(id) => {
                self.bets.update_with(id, &|bet| {
                    bet.result = BetResult::Failed;
                    bet.settlement = SettlementStatus::Failed;
                    bet.updated_at = Utc::now();
                    true
                })?;
            }
            RecoveryTarget::BetClaim(id) => {
                self.bets.update_with(id, &|bet| {
                    bet.settlement = SettlementStatus::Failed;
                    bet.updated_at = Utc::now();
                    true
                })?;
            }
        }
        Ok(())
    }
}
