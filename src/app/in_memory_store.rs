use crate::{
    app::store::{
        BetRepository,
        ConsumeOutcome,
        NonceStore,
        RoundRepository,
        UpdateOutcome,
        bet_missing_claim_fields,
        bet_missing_object_id,
        round_missing_finalize,
        round_missing_pool,
    },
    model::{
        Bet,
        NonceRecord,
        Round,
    },
};
use chrono::{
    DateTime,
    Utc,
};
use std::{
    collections::HashMap,
    sync::{
        Arc,
        Mutex,
    },
};

#[derive(Clone, Default)]
pub struct InMemoryBetStore {
    bets: Arc<Mutex<HashMap<String, Bet>>>,
}

impl InMemoryBetStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<Bet> {
        let guard = self.bets.lock().unwrap();
        guard.values().cloned().collect()
    }
}

impl BetRepository for InMemoryBetStore {
    fn get(&self, id: &str) -> crate::Result<Option<Bet>> {
        let guard = self.bets.lock().unwrap();
        Ok(guard.get(id).cloned())
    }

    fn find_by_tx_hash(&self, tx_hash: &str) -> crate::Result<Option<Bet>> {
        let guard = self.bets.lock().unwrap();
        Ok(guard
            .values()
            .find(|bet| bet.onchain_tx_hash.as_deref() == Some(tx_hash))
            .cloned())
    }

    fn insert(&self, bet: &Bet) -> crate::Result<()> {
        let mut guard = self.bets.lock().unwrap();
        guard.insert(bet.id.clone(), bet.clone());
        Ok(())
    }

    fn update_with(
        &self,
        id: &str,
        apply: &dyn Fn(&mut Bet) -> bool,
    ) -> crate::Result<UpdateOutcome> {
        let mut guard = self.bets.lock().unwrap();
        match guard.get_mut(id) {
            Some(bet) => {
                if apply(bet) {
                    Ok(UpdateOutcome::Updated)
                } else {
                    Ok(UpdateOutcome::Unchanged)
                }
            }
            None => Ok(UpdateOutcome::NotFound),
        }
    }

    fn bets_missing_object_id(&self) -> crate::Result<Vec<Bet>> {
        let guard = self.bets.lock().unwrap();
        let mut bets: Vec<_> = guard
            .values()
            .filter(|bet| bet_missing_object_id(bet))
            .cloned()
            .collect();
        bets.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(bets)
    }

    fn bets_missing_claim_fields(&self) -> crate::Result<Vec<Bet>> {
        let guard = self.bets.lock().unwrap();
        let mut bets: Vec<_> = guard
            .values()
            .filter(|bet| bet_missing_claim_fields(bet))
            .cloned()
            .collect();
        bets.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(bets)
    }
}

#[derive(Clone, Default)]
pub struct InMemoryRoundStore {
    rounds: Arc<Mutex<HashMap<String, Round>>>,
}

impl InMemoryRoundStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RoundRepository for InMemoryRoundStore {
    fn get(&self, id: &str) -> crate::Result<Option<Round>> {
        let guard = self.rounds.lock().unwrap();
        Ok(guard.get(id).cloned())
    }

    fn insert(&self, round: &Round) -> crate::Result<()> {
        let mut guard = self.rounds.lock().unwrap();
        guard.insert(round.id.clone(), round.clone());
        Ok(())
    }

    fn update_with(
        &self,
        id: &str,
        apply: &dyn Fn(&mut Round) -> bool,
    ) -> crate::Result<UpdateOutcome> {
        let mut guard = self.rounds.lock().unwrap();
        match guard.get_mut(id) {
            Some(round) => {
                if apply(round) {
                    Ok(UpdateOutcome::Updated)
                } else {
                    Ok(UpdateOutcome::Unchanged)
                }
            }
            None => Ok(UpdateOutcome::NotFound),
        }
    }

    fn rounds_missing_pool(&self) -> crate::Result<Vec<Round>> {
        let guard = self.rounds.lock().unwrap();
        let mut rounds: Vec<_> = guard
            .values()
            .filter(|round| round_missing_pool(round))
            .cloned()
            .collect();
        rounds.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(rounds)
    }

    fn rounds_missing_finalize(&self) -> crate::Result<Vec<Round>> {
        let guard = self.rounds.lock().unwrap();
        let mut rounds: Vec<_> = guard
            .values()
            .filter(|round| round_missing_finalize(round))
            .cloned()
            .collect();
        rounds.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(rounds)
    }
}

#[derive(Clone, Default)]
pub struct InMemoryNonceStore {
    nonces: Arc<Mutex<HashMap<String, NonceRecord>>>,
}

impl InMemoryNonceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NonceStore for InMemoryNonceStore {
    fn put(&self, record: &NonceRecord) -> crate::Result<()> {
        let mut guard = self.nonces.lock().unwrap();
        guard.insert(record.nonce.clone(), record.clone());
        Ok(())
    }

    fn get(&self, nonce: &str) -> crate::Result<Option<NonceRecord>> {
        let guard = self.nonces.lock().unwrap();
        Ok(guard.get(nonce).cloned())
    }

    fn consume(&self, nonce: &str) -> crate::Result<ConsumeOutcome> {
        let mut guard = self.nonces.lock().unwrap();
        match guard.get_mut(nonce) {
            Some(record) if record.consumed => Ok(ConsumeOutcome::AlreadyConsumed),
            Some(record) => {
                record.consumed = true;
                Ok(ConsumeOutcome::Consumed(record.clone()))
            }
            None => Ok(ConsumeOutcome::Missing),
        }
    }

    fn purge_stale(&self, now: DateTime<Utc>) -> crate::Result<u64> {
        let mut guard = self.nonces.lock().unwrap();
        let before = guard.len();
        guard.retain(|_, record| !record.consumed && !record.is_expired(now));
        Ok((before - guard.len()) as u64)
    }
}
