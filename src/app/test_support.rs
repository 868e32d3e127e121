//! Fake collaborators shared by the service tests.

use crate::{
    Result,
    chain::{
        ChainRpc,
        TxLookup,
    },
    model::{
        Bet,
        BetResult,
        Caller,
        IntentKind,
        NonceRecord,
        Round,
        RoundStatus,
        SettlementStatus,
        Side,
    },
};
use chrono::{
    DateTime,
    TimeZone,
    Utc,
};
use std::{
    collections::HashMap,
    sync::{
        Arc,
        Mutex,
    },
};

/// In-memory chain double. Submissions are recorded; lookups come from a
/// staged script per digest (a sequence of outcomes, last one repeating), so
/// tests can model "pending, pending, executed" finality windows.
#[derive(Clone, Default)]
pub struct FakeChainRpc {
    submit_digest: Arc<Mutex<Option<String>>>,
    submissions: Arc<Mutex<Vec<(Vec<u8>, String)>>>,
    lookups: Arc<Mutex<HashMap<String, Vec<TxLookup>>>>,
}

impl FakeChainRpc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage_submit_digest(&self, digest: &str) {
        *self.submit_digest.lock().unwrap() = Some(digest.to_string());
    }

    pub fn stage_lookups(&self, digest: &str, outcomes: Vec<TxLookup>) {
        self.lookups
            .lock()
            .unwrap()
            .insert(digest.to_string(), outcomes);
    }

    pub fn stage_lookup(&self, digest: &str, outcome: TxLookup) {
        self.stage_lookups(digest, vec![outcome]);
    }

    pub fn submission_count(&self) -> usize {
        self.submissions.lock().unwrap().len()
    }
}

impl ChainRpc for FakeChainRpc {
    async fn submit_transaction(&self, tx_bytes: &[u8], signature: &str) -> Result<String> {
        let digest = self
            .submit_digest
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| anyhow::anyhow!("no staged submit digest"))?;
        self.submissions
            .lock()
            .unwrap()
            .push((tx_bytes.to_vec(), signature.to_string()));
        Ok(digest)
    }

    async fn fetch_transaction(&self, digest: &str) -> Result<TxLookup> {
        let mut guard = self.lookups.lock().unwrap();
        match guard.get_mut(digest) {
            Some(outcomes) if outcomes.len() > 1 => Ok(outcomes.remove(0)),
            Some(outcomes) => Ok(outcomes[0].clone()),
            None => Ok(TxLookup::NotFound),
        }
    }
}

pub fn caller() -> Caller {
    Caller {
        user_id: "user-1".to_string(),
        address: "0xaddr".to_string(),
    }
}

pub fn arb_round(id: &str) -> Round {
    let start = Utc.with_ymd_and_hms(2026, 1, 10, 12, 0, 0).unwrap();
    Round {
        id: id.to_string(),
        kind: "price-direction".to_string(),
        status: RoundStatus::BettingOpen,
        start_time: start,
        lock_time: start,
        end_time: start,
        up_pool: 0,
        down_pool: 0,
        pool_object_id: None,
        settlement_object_id: None,
        fee_coin_object_id: None,
        create_digest: None,
        finalize_digest: None,
    }
}

pub fn arb_bet(id: &str) -> Bet {
    let created = Utc.with_ymd_and_hms(2026, 1, 10, 12, 0, 0).unwrap();
    Bet {
        id: id.to_string(),
        round_id: "round-1".to_string(),
        user_id: "user-1".to_string(),
        side: Side::Up,
        amount: 500,
        currency: "CRYSTAL".to_string(),
        result: BetResult::Pending,
        settlement: SettlementStatus::Pending,
        onchain_object_id: None,
        onchain_tx_hash: None,
        claim_digest: None,
        payout_amount: None,
        created_at: created,
        updated_at: created,
    }
}

pub fn arb_nonce(nonce: &str, expires_at: DateTime<Utc>) -> NonceRecord {
    NonceRecord {
        nonce: nonce.to_string(),
        user_id: "user-1".to_string(),
        intent: IntentKind::PlaceBet,
        tx_bytes_hash: "abcd".to_string(),
        expires_at,
        consumed: false,
    }
}

pub fn success_result(digest: &str) -> crate::chain::TransactionResult {
    crate::chain::TransactionResult {
        digest: digest.to_string(),
        status: crate::chain::TxStatus::Success,
        error: None,
        object_changes: Vec::new(),
        events: Vec::new(),
    }
}

pub fn failure_result(digest: &str, error: &str) -> crate::chain::TransactionResult {
    crate::chain::TransactionResult {
        digest: digest.to_string(),
        status: crate::chain::TxStatus::Failure,
        error: Some(error.to_string()),
        object_changes: Vec::new(),
        events: Vec::new(),
    }
}

pub fn created_object(object_type: &str, object_id: &str) -> crate::chain::ObjectChange {
    crate::chain::ObjectChange {
        change: "created".to_string(),
        object_type: object_type.to_string(),
        object_id: object_id.to_string(),
    }
}

pub fn payout_event(amount: &str) -> crate::chain::ChainEvent {
    crate::chain::ChainEvent {
        event_type: "0xa::betting::PayoutDistributed".to_string(),
        parsed_json: serde_json::json!({ "amount": amount }),
    }
}
