use crate::{
    app::{
        preparer::{
            TransactionEnvelope,
            hash_tx_bytes,
            random_hex,
        },
        store::{
            BetRepository,
            ConsumeOutcome,
            NonceStore,
            RoundRepository,
        },
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
        Bet,
        BetResult,
        Caller,
        ClaimArtifacts,
        Intent,
        PlacementArtifacts,
        SettlementStatus,
        Side,
    },
    tx_parser::{
        TypeFilter,
        find_created_object_id_by_type,
        parse_payout_distributed_amount,
    },
};
use chrono::Utc;
use std::time::Duration;

/// Bounded wait for transaction finality. Exhausting the window yields a
/// transient `PENDING` error, not a failure: the transaction may still land
/// and recovery can pick the row up later.
#[derive(Debug, Clone)]
pub struct FinalityPolicy {
    pub max_polls: u32,
    pub poll_interval: Duration,
}

impl Default for FinalityPolicy {
    fn default() -> Self {
        Self {
            max_polls: 10,
            poll_interval: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecuteRequest {
    pub transaction_bytes: Vec<u8>,
    pub signature: String,
    pub nonce: String,
}

#[derive(Clone)]
pub struct TransactionExecutor<Chain, Bets, Rounds, Nonces> {
    chain: Chain,
    bets: Bets,
    rounds: Rounds,
    nonces: Nonces,
    finality: FinalityPolicy,
}

impl<Chain, Bets, Rounds, Nonces> TransactionExecutor<Chain, Bets, Rounds, Nonces>
where
    Chain: ChainRpc,
    Bets: BetRepository,
    Rounds: RoundRepository,
    Nonces: NonceStore,
{
    pub fn new(
        chain: Chain,
        bets: Bets,
        rounds: Rounds,
        nonces: Nonces,
        finality: FinalityPolicy,
    ) -> Self {
        Self {
            chain,
            bets,
            rounds,
            nonces,
            finality,
        }
    }

    /// Validates and consumes the nonce, submits the signed payload, waits
    /// for finality, and applies the database mutation. Consumption happens
    /// before submission: of concurrent racers on one nonce, exactly one
    /// reaches the chain.
    pub async fn execute(
        &self,
        caller: &Caller,
        request: ExecuteRequest,
    ) -> Result<Bet, ServiceError> {
        let envelope = self.validate_nonce(caller, &request)?;

        match self.nonces.consume(&request.nonce)? {
            ConsumeOutcome::Consumed(_) => {}
            ConsumeOutcome::AlreadyConsumed | ConsumeOutcome::Missing => {
                return Err(ServiceError::NonceInvalid);
            }
        }

        match envelope.intent {
            Intent::PlaceBet {
                round_id,
                side,
                amount,
                currency,
            } => {
                self.execute_place_bet(caller, &request, round_id, side, amount, currency)
                    .await
            }
            Intent::Claim { bet_id } => self.execute_claim(caller, &request, bet_id).await,
        }
    }

    fn validate_nonce(
        &self,
        caller: &Caller,
        request: &ExecuteRequest,
    ) -> Result<TransactionEnvelope, ServiceError> {
        let Some(record) = self.nonces.get(&request.nonce)? else {
            return Err(ServiceError::NonceInvalid);
        };
        if record.consumed {
            return Err(ServiceError::NonceInvalid);
        }
        if record.is_expired(Utc::now()) {
            return Err(ServiceError::NonceExpired);
        }
        if record.tx_bytes_hash != hash_tx_bytes(&request.transaction_bytes) {
            return Err(ServiceError::NonceInvalid);
        }
        if record.user_id != caller.user_id {
            return Err(ServiceError::NonceInvalid);
        }
        let envelope: TransactionEnvelope =
            serde_json::from_slice(&request.transaction_bytes).map_err(|e| {
                ServiceError::Validation(format!("malformed transaction bytes: {e}"))
            })?;
        if envelope.intent.kind() != record.intent {
            return Err(ServiceError::NonceInvalid);
        }
        Ok(envelope)
    }

    async fn execute_place_bet(
        &self,
        caller: &Caller,
        request: &ExecuteRequest,
        round_id: String,
        side: Side,
        amount: u64,
        currency: String,
    ) -> Result<Bet, ServiceError> {
        let digest = self
            .chain
            .submit_transaction(&request.transaction_bytes, &request.signature)
            .await?;

        // Re-applying an already recorded digest is a no-op.
        if let Some(existing) = self.bets.find_by_tx_hash(&digest)? {
            tracing::info!(digest = %digest, bet = %existing.id, "digest already applied");
            return Ok(existing);
        }

        // The digest lands in the row before the finality wait, so a crash or
        // timeout from here on leaves a row recovery can repair.
        let now = Utc::now();
        let bet = Bet {
            id: format!("bet-{}", random_hex(8)),
            round_id: round_id.clone(),
            user_id: caller.user_id.clone(),
            side,
            amount,
            currency,
            result: BetResult::Pending,
            settlement: SettlementStatus::Pending,
            onchain_object_id: None,
            onchain_tx_hash: Some(digest.clone()),
            claim_digest: None,
            payout_amount: None,
            created_at: now,
            updated_at: now,
        };
        self.bets.insert(&bet)?;

        let result = match self.await_finality(&digest).await? {
            FinalityOutcome::Executed(result) => result,
            FinalityOutcome::TimedOut => {
                tracing::warn!(digest = %digest, bet = %bet.id, "finality wait exhausted");
                return Err(ServiceError::Pending(digest));
            }
        };
        if result.status == TxStatus::Failure {
            self.bets.update_with(&bet.id, &|b| {
                b.result = BetResult::Failed;
                b.settlement = SettlementStatus::Failed;
                b.updated_at = Utc::now();
                true
            })?;
            let reason = result.error.unwrap_or_else(|| "unknown".to_string());
            return Err(ServiceError::ChainExecutionFailed(reason));
        }

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
            .update_with(&bet.id, &|b| b.merge_placement(&artifacts))?;
        self.rounds.update_with(&round_id, &|round| {
            match side {
                Side::Up => round.up_pool += amount,
                Side::Down => round.down_pool += amount,
            }
            true
        })?;
        tracing::info!(digest = %digest, bet = %bet.id, "bet placement executed");

        self.bets
            .get(&bet.id)?
            .ok_or_else(|| ServiceError::Storage(anyhow::anyhow!("bet row vanished")))
    }

    async fn execute_claim(
        &self,
        caller: &Caller,
        request: &ExecuteRequest,
        bet_id: String,
    ) -> Result<Bet, ServiceError> {
        let bet = self
            .bets
            .get(&bet_id)?
            .ok_or_else(|| ServiceError::Validation(format!("unknown bet {bet_id}")))?;
        if bet.user_id != caller.user_id {
            return Err(ServiceError::Validation(format!(
                "bet {bet_id} does not belong to the caller"
            )));
        }
        // An already completed claim is a no-op, not a duplicate payout.
        if bet.settlement == SettlementStatus::Completed {
            return Ok(bet);
        }

        let digest = self
            .chain
            .submit_transaction(&request.transaction_bytes, &request.signature)
            .await?;
        self.bets.update_with(&bet_id, &|b| {
            if b.claim_digest.is_none() {
                b.claim_digest = Some(digest.clone());
                b.updated_at = Utc::now();
                true
            } else {
                false
            }
        })?;

        let result = match self.await_finality(&digest).await? {
            FinalityOutcome::Executed(result) => result,
            FinalityOutcome::TimedOut => {
                tracing::warn!(digest = %digest, bet = %bet_id, "finality wait exhausted");
                return Err(ServiceError::Pending(digest));
            }
        };
        if result.status == TxStatus::Failure {
            self.bets.update_with(&bet_id, &|b| {
                b.settlement = SettlementStatus::Failed;
                b.updated_at = Utc::now();
                true
            })?;
            let reason = result.error.unwrap_or_else(|| "unknown".to_string());
            return Err(ServiceError::ChainExecutionFailed(reason));
        }

        let payout =
            parse_payout_distributed_amount(&result.events, object_types::PAYOUT_DISTRIBUTED)?;
        let artifacts = ClaimArtifacts {
            payout_amount: Some(payout),
        };
        self.bets
            .update_with(&bet_id, &|b| b.merge_claim(&artifacts))?;
        tracing::info!(digest = %digest, bet = %bet_id, payout, "claim executed");

        self.bets
            .get(&bet_id)?
            .ok_or_else(|| ServiceError::Storage(anyhow::anyhow!("bet row vanished")))
    }

    async fn await_finality(&self, digest: &str) -> Result<FinalityOutcome, ServiceError> {
        for poll in 0..self.finality.max_polls {
            match self.chain.fetch_transaction(digest).await? {
                TxLookup::Executed(result) => {
                    return Ok(FinalityOutcome::Executed(result));
                }
                // A freshly submitted digest may not be visible yet, so
                // NotFound is treated like Pending inside the wait window.
                TxLookup::Pending | TxLookup::NotFound => {
                    tracing::debug!(digest = %digest, poll, "transaction not finalized yet");
                    tokio::time::sleep(self.finality.poll_interval).await;
                }
            }
        }
        Ok(FinalityOutcome::TimedOut)
    }
}

enum FinalityOutcome {
    Executed(TransactionResult),
    TimedOut,
}
