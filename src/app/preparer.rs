use crate::{
    app::store::{
        BetRepository,
        NonceStore,
        RoundRepository,
    },
    error::ServiceError,
    model::{
        BetResult,
        Caller,
        Intent,
        NonceRecord,
        RoundStatus,
        SettlementStatus,
    },
};
use chrono::{
    DateTime,
    Duration,
    Utc,
};
use rand::RngCore;
use serde::{
    Deserialize,
    Serialize,
};
use sha2::{
    Digest,
    Sha256,
};

/// What prepare hands back to the signing client. The bytes are signed
/// externally and come back through the executor together with the nonce.
#[derive(PartialEq, Eq, Debug, Clone)]
pub struct PreparedTransaction {
    pub transaction_bytes: Vec<u8>,
    pub nonce: String,
    pub expires_at: DateTime<Utc>,
}

/// Unsigned transaction payload. The executor deserializes this back out of
/// the signed bytes, so the bytes carry everything needed to apply the
/// database mutation after chain success.
#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionEnvelope {
    pub intent: Intent,
    pub sender: String,
    pub prepared_at: DateTime<Utc>,
}

pub fn hash_tx_bytes(tx_bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(tx_bytes))
}

pub fn random_hex(byte_len: usize) -> String {
    let mut bytes = vec![0u8; byte_len];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub struct TransactionPreparer<Rounds, Bets, Nonces> {
    rounds: Rounds,
    bets: Bets,
    nonces: Nonces,
    nonce_ttl: Duration,
}

impl<Rounds, Bets, Nonces> TransactionPreparer<Rounds, Bets, Nonces>
where
    Rounds: RoundRepository,
    Bets: BetRepository,
    Nonces: NonceStore,
{
    pub fn new(rounds: Rounds, bets: Bets, nonces: Nonces, nonce_ttl: Duration) -> Self {
        Self {
            rounds,
            bets,
            nonces,
            nonce_ttl,
        }
    }

    /// Builds the unsigned transaction for the intent and binds a fresh
    /// single-use nonce to its byte hash. The nonce record is the only side
    /// effect; nothing touches the chain here.
    pub fn prepare(
        &self,
        caller: &Caller,
        intent: Intent,
    ) -> Result<PreparedTransaction, ServiceError> {
        self.validate(caller, &intent)?;

        let envelope = TransactionEnvelope {
            intent: intent.clone(),
            sender: caller.address.clone(),
            prepared_at: Utc::now(),
        };
        let transaction_bytes = serde_json::to_vec(&envelope)
            .map_err(|e| ServiceError::Storage(anyhow::anyhow!("encode envelope: {e}")))?;

        let nonce = random_hex(16);
        let expires_at = Utc::now() + self.nonce_ttl;
        let record = NonceRecord {
            nonce: nonce.clone(),
            user_id: caller.user_id.clone(),
            intent: intent.kind(),
            tx_bytes_hash: hash_tx_bytes(&transaction_bytes),
            expires_at,
            consumed: false,
        };
        self.nonces.put(&record)?;
        tracing::debug!(
            user = %caller.user_id,
            intent = ?intent.kind(),
            expires_at = %expires_at,
            "prepared transaction"
        );

        Ok(PreparedTransaction {
            transaction_bytes,
            nonce,
            expires_at,
        })
    }

    fn validate(&self, caller: &Caller, intent: &Intent) -> Result<(), ServiceError> {
        match intent {
            Intent::PlaceBet {
                round_id, amount, ..
            } => {
                if *amount == 0 {
                    return Err(ServiceError::Validation(
                        "bet amount must be positive".to_string(),
                    ));
                }
                let round = self
                    .rounds
                    .get(round_id)?
                    .ok_or_else(|| ServiceError::Validation(format!("unknown round {round_id}")))?;
                if round.status != RoundStatus::BettingOpen {
                    return Err(ServiceError::Validation(format!(
                        "round {round_id} is not open for betting"
                    )));
                }
                Ok(())
            }
            Intent::Claim { bet_id } => {
                let bet = self
                    .bets
                    .get(bet_id)?
                    .ok_or_else(|| ServiceError::Validation(format!("unknown bet {bet_id}")))?;
                if bet.user_id != caller.user_id {
                    return Err(ServiceError::Validation(format!(
                        "bet {bet_id} does not belong to the caller"
                    )));
                }
                if bet.result != BetResult::Won {
                    return Err(ServiceError::Validation(format!(
                        "bet {bet_id} has no payout to claim"
                    )));
                }
                if bet.settlement != SettlementStatus::Pending {
                    return Err(ServiceError::Validation(format!(
                        "bet {bet_id} is already settled"
                    )));
                }
                if bet.onchain_object_id.is_none() {
                    return Err(ServiceError::Validation(format!(
                        "bet {bet_id} has no on-chain object to claim against"
                    )));
                }
                Ok(())
            }
        }
    }
}
