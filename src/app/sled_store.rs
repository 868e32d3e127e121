// Sled-backed stores for bet, round, and nonce persistence.
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
use anyhow::Context;
use chrono::{
    DateTime,
    Utc,
};
use serde::{
    Serialize,
    de::DeserializeOwned,
};
use sled::{
    Config,
    Db,
    Tree,
};
use std::path::Path;

#[derive(Clone)]
pub struct SledBetStore {
    tree: Tree,
}

#[derive(Clone)]
pub struct SledRoundStore {
    tree: Tree,
}

#[derive(Clone)]
pub struct SledNonceStore {
    tree: Tree,
}

/// Opens all three stores over a single sled database.
pub fn open_stores<P: AsRef<Path>>(
    path: P,
) -> crate::Result<(SledBetStore, SledRoundStore, SledNonceStore)> {
    let config = Config::default().path(path);
    let db = config.open().context("open sled database")?;
    Ok((
        SledBetStore::new(&db)?,
        SledRoundStore::new(&db)?,
        SledNonceStore::new(&db)?,
    ))
}

fn serialize<T: Serialize>(value: &T, label: &str) -> crate::Result<Vec<u8>> {
    serde_json::to_vec(value).with_context(|| format!("serialize {label}"))
}

fn deserialize<T: DeserializeOwned>(bytes: &[u8]) -> crate::Result<T> {
    serde_json::from_slice(bytes).context("deserialize sled record")
}

/// Re-read / apply / compare-and-swap loop. The mutation lands only if the
/// row is unchanged since the read, so concurrent updaters cannot clobber
/// each other's fields.
fn update_row<T>(
    tree: &Tree,
    key: &[u8],
    label: &str,
    apply: &dyn Fn(&mut T) -> bool,
) -> crate::Result<UpdateOutcome>
where
    T: Serialize + DeserializeOwned,
{
    loop {
        let current = tree
            .get(key)
            .with_context(|| format!("read {label} row"))?;
        let Some(current_bytes) = current else {
            return Ok(UpdateOutcome::NotFound);
        };
        let mut row: T = deserialize(current_bytes.as_ref())?;
        if !apply(&mut row) {
            return Ok(UpdateOutcome::Unchanged);
        }
        let new_bytes = serialize(&row, label)?;
        let swap = tree
            .compare_and_swap(key, Some(current_bytes), Some(new_bytes))
            .with_context(|| format!("compare-and-swap {label} row"))?;
        match swap {
            Ok(()) => {
                tree.flush().with_context(|| format!("flush {label} tree"))?;
                return Ok(UpdateOutcome::Updated);
            }
            // Lost the race against another writer; re-read and retry.
            Err(_) => continue,
        }
    }
}

fn scan_rows<T, F>(tree: &Tree, label: &str, keep: F) -> crate::Result<Vec<T>>
where
    T: DeserializeOwned,
    F: Fn(&T) -> bool,
{
    let mut rows = Vec::new();
    for entry in tree.iter() {
        let (_, value) = entry.with_context(|| format!("iterate {label} rows"))?;
        let row: T = deserialize(value.as_ref())?;
        if keep(&row) {
            rows.push(row);
        }
    }
    Ok(rows)
}

impl SledBetStore {
    pub fn new(db: &Db) -> crate::Result<Self> {
        let tree = db.open_tree("bets").context("open bets tree")?;
        Ok(Self { tree })
    }
}

impl BetRepository for SledBetStore {
    fn get(&self, id: &str) -> crate::Result<Option<Bet>> {
        match self.tree.get(id.as_bytes()).context("read bet row")? {
            Some(bytes) => Ok(Some(deserialize(bytes.as_ref())?)),
            None => Ok(None),
        }
    }

    fn find_by_tx_hash(&self, tx_hash: &str) -> crate::Result<Option<Bet>> {
        for entry in self.tree.iter() {
            let (_, value) = entry.context("iterate bet rows")?;
            let bet: Bet = deserialize(value.as_ref())?;
            if bet.onchain_tx_hash.as_deref() == Some(tx_hash) {
                return Ok(Some(bet));
            }
        }
        Ok(None)
    }

    fn insert(&self, bet: &Bet) -> crate::Result<()> {
        let bytes = serialize(bet, "bet")?;
        self.tree
            .insert(bet.id.as_bytes(), bytes)
            .context("persist bet row")?;
        self.tree.flush().context("flush bets tree")?;
        Ok(())
    }

    fn update_with(
        &self,
        id: &str,
        apply: &dyn Fn(&mut Bet) -> bool,
    ) -> crate::Result<UpdateOutcome> {
        update_row(&self.tree, id.as_bytes(), "bet", apply)
    }

    fn bets_missing_object_id(&self) -> crate::Result<Vec<Bet>> {
        scan_rows(&self.tree, "bet", bet_missing_object_id)
    }

    fn bets_missing_claim_fields(&self) -> crate::Result<Vec<Bet>> {
        scan_rows(&self.tree, "bet", bet_missing_claim_fields)
    }
}

impl SledRoundStore {
    pub fn new(db: &Db) -> crate::Result<Self> {
        let tree = db.open_tree("rounds").context("open rounds tree")?;
        Ok(Self { tree })
    }
}

impl RoundRepository for SledRoundStore {
    fn get(&self, id: &str) -> crate::Result<Option<Round>> {
        match self.tree.get(id.as_bytes()).context("read round row")? {
            Some(bytes) => Ok(Some(deserialize(bytes.as_ref())?)),
            None => Ok(None),
        }
    }

    fn insert(&self, round: &Round) -> crate::Result<()> {
        let bytes = serialize(round, "round")?;
        self.tree
            .insert(round.id.as_bytes(), bytes)
            .context("persist round row")?;
        self.tree.flush().context("flush rounds tree")?;
        Ok(())
    }

    fn update_with(
        &self,
        id: &str,
        apply: &dyn Fn(&mut Round) -> bool,
    ) -> crate::Result<UpdateOutcome> {
        update_row(&self.tree, id.as_bytes(), "round", apply)
    }

    fn rounds_missing_pool(&self) -> crate::Result<Vec<Round>> {
        scan_rows(&self.tree, "round", round_missing_pool)
    }

    fn rounds_missing_finalize(&self) -> crate::Result<Vec<Round>> {
        scan_rows(&self.tree, "round", round_missing_finalize)
    }
}

impl SledNonceStore {
    pub fn new(db: &Db) -> crate::Result<Self> {
        let tree = db.open_tree("nonces").context("open nonces tree")?;
        Ok(Self { tree })
    }
}

impl NonceStore for SledNonceStore {
    fn put(&self, record: &NonceRecord) -> crate::Result<()> {
        let bytes = serialize(record, "nonce record")?;
        self.tree
            .insert(record.nonce.as_bytes(), bytes)
            .context("persist nonce record")?;
        self.tree.flush().context("flush nonces tree")?;
        Ok(())
    }

    fn get(&self, nonce: &str) -> crate::Result<Option<NonceRecord>> {
        match self
            .tree
            .get(nonce.as_bytes())
            .context("read nonce record")?
        {
            Some(bytes) => Ok(Some(deserialize(bytes.as_ref())?)),
            None => Ok(None),
        }
    }

    fn consume(&self, nonce: &str) -> crate::Result<ConsumeOutcome> {
        loop {
            let current = self
                .tree
                .get(nonce.as_bytes())
                .context("read nonce record")?;
            let Some(current_bytes) = current else {
                return Ok(ConsumeOutcome::Missing);
            };
            let mut record: NonceRecord = deserialize(current_bytes.as_ref())?;
            if record.consumed {
                return Ok(ConsumeOutcome::AlreadyConsumed);
            }
            record.consumed = true;
            let new_bytes = serialize(&record, "nonce record")?;
            let swap = self
                .tree
                .compare_and_swap(nonce.as_bytes(), Some(current_bytes), Some(new_bytes))
                .context("compare-and-swap nonce record")?;
            match swap {
                Ok(()) => {
                    self.tree.flush().context("flush nonces tree")?;
                    return Ok(ConsumeOutcome::Consumed(record));
                }
                Err(_) => continue,
            }
        }
    }

    fn purge_stale(&self, now: DateTime<Utc>) -> crate::Result<u64> {
        let mut purged = 0u64;
        for entry in self.tree.iter() {
            let (key, value) = entry.context("iterate nonce records")?;
            let record: NonceRecord = deserialize(value.as_ref())?;
            if record.consumed || record.is_expired(now) {
                self.tree.remove(key).context("remove stale nonce record")?;
                purged += 1;
            }
        }
        if purged > 0 {
            self.tree.flush().context("flush nonces tree")?;
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::model::{
        BetResult,
        IntentKind,
        RoundStatus,
        SettlementStatus,
        Side,
    };
    use chrono::{
        TimeZone,
        Utc,
    };
    use tempdir::TempDir;

    fn sled_db(temp_dir: &TempDir) -> Db {
        Config::default()
            .path(temp_dir.path())
            .open()
            .expect("open sled db")
    }

    fn arb_bet(id: &str) -> Bet {
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

    fn arb_round(id: &str) -> Round {
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

    fn arb_nonce(nonce: &str) -> NonceRecord {
        NonceRecord {
            nonce: nonce.to_string(),
            user_id: "user-1".to_string(),
            intent: IntentKind::PlaceBet,
            tx_bytes_hash: "abcd".to_string(),
            expires_at: Utc.with_ymd_and_hms(2026, 1, 10, 12, 5, 0).unwrap(),
            consumed: false,
        }
    }

    #[test]
    fn update_with__applies_merge_and_reports_unchanged_on_reapply() {
        // given
        let temp_dir = TempDir::new("sled_bet_store").unwrap();
        let db = sled_db(&temp_dir);
        let store = SledBetStore::new(&db).unwrap();
        store.insert(&arb_bet("bet-1")).unwrap();
        let set_object_id = |bet: &mut Bet| {
            if bet.onchain_object_id.is_none() {
                bet.onchain_object_id = Some("0xbet".to_string());
                true
            } else {
                false
            }
        };

        // when
        let first = store.update_with("bet-1", &set_object_id).unwrap();
        let second = store.update_with("bet-1", &set_object_id).unwrap();

        // then
        assert_eq!(first, UpdateOutcome::Updated);
        assert_eq!(second, UpdateOutcome::Unchanged);
        let loaded = store.get("bet-1").unwrap().unwrap();
        assert_eq!(loaded.onchain_object_id.as_deref(), Some("0xbet"));
    }

    #[test]
    fn update_with__unknown_row_reports_not_found() {
        let temp_dir = TempDir::new("sled_bet_store_missing").unwrap();
        let db = sled_db(&temp_dir);
        let store = SledBetStore::new(&db).unwrap();

        let outcome = store.update_with("bet-404", &|_| true).unwrap();

        assert_eq!(outcome, UpdateOutcome::NotFound);
    }

    #[test]
    fn find_by_tx_hash__returns_the_matching_bet() {
        // given
        let temp_dir = TempDir::new("sled_bet_store_digest").unwrap();
        let db = sled_db(&temp_dir);
        let store = SledBetStore::new(&db).unwrap();
        let mut bet = arb_bet("bet-1");
        bet.onchain_tx_hash = Some("0xd1".to_string());
        store.insert(&bet).unwrap();
        store.insert(&arb_bet("bet-2")).unwrap();

        // when
        let found = store.find_by_tx_hash("0xd1").unwrap();

        // then
        assert_eq!(found.map(|b| b.id), Some("bet-1".to_string()));
    }

    #[test]
    fn bets_missing_object_id__only_digest_bearing_rows_match() {
        // given
        let temp_dir = TempDir::new("sled_bet_store_scan").unwrap();
        let db = sled_db(&temp_dir);
        let store = SledBetStore::new(&db).unwrap();

        let mut stuck = arb_bet("bet-stuck");
        stuck.onchain_tx_hash = Some("0xd1".to_string());
        store.insert(&stuck).unwrap();

        let mut complete = arb_bet("bet-complete");
        complete.onchain_tx_hash = Some("0xd2".to_string());
        complete.onchain_object_id = Some("0xobj".to_string());
        store.insert(&complete).unwrap();

        store.insert(&arb_bet("bet-no-digest")).unwrap();

        // when
        let missing = store.bets_missing_object_id().unwrap();

        // then
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].id, "bet-stuck");
    }

    #[test]
    fn rounds_missing_finalize__requires_both_artifacts() {
        // given
        let temp_dir = TempDir::new("sled_round_store_scan").unwrap();
        let db = sled_db(&temp_dir);
        let store = SledRoundStore::new(&db).unwrap();

        let mut partial = arb_round("round-partial");
        partial.finalize_digest = Some("0xf1".to_string());
        partial.settlement_object_id = Some("0xsettle".to_string());
        store.insert(&partial).unwrap();

        let mut complete = arb_round("round-complete");
        complete.finalize_digest = Some("0xf2".to_string());
        complete.settlement_object_id = Some("0xsettle".to_string());
        complete.fee_coin_object_id = Some("0xfee".to_string());
        store.insert(&complete).unwrap();

        // when
        let missing = store.rounds_missing_finalize().unwrap();

        // then
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].id, "round-partial");
    }

    #[test]
    fn consume__first_caller_wins_and_record_survives_reopen() {
        // given
        let temp_dir = TempDir::new("sled_nonce_store").unwrap();
        let db = sled_db(&temp_dir);
        let store = SledNonceStore::new(&db).unwrap();
        store.put(&arb_nonce("nonce-1")).unwrap();

        // when
        let first = store.consume("nonce-1").unwrap();
        let second = store.consume("nonce-1").unwrap();

        // then
        assert!(matches!(first, ConsumeOutcome::Consumed(_)));
        assert_eq!(second, ConsumeOutcome::AlreadyConsumed);
        let record = store.get("nonce-1").unwrap().unwrap();
        assert!(record.consumed);
    }

    #[test]
    fn consume__unknown_nonce_is_missing() {
        let temp_dir = TempDir::new("sled_nonce_store_missing").unwrap();
        let db = sled_db(&temp_dir);
        let store = SledNonceStore::new(&db).unwrap();

        let outcome = store.consume("nonce-404").unwrap();

        assert_eq!(outcome, ConsumeOutcome::Missing);
    }

    #[test]
    fn purge_stale__drops_consumed_and_expired_records_keeps_live_ones() {
        // given
        let temp_dir = TempDir::new("sled_nonce_store_purge").unwrap();
        let db = sled_db(&temp_dir);
        let store = SledNonceStore::new(&db).unwrap();

        let mut consumed = arb_nonce("nonce-consumed");
        consumed.consumed = true;
        store.put(&consumed).unwrap();

        let mut expired = arb_nonce("nonce-expired");
        expired.expires_at = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        store.put(&expired).unwrap();

        store.put(&arb_nonce("nonce-live")).unwrap();

        // when
        let purged = store
            .purge_stale(Utc.with_ymd_and_hms(2026, 1, 10, 12, 0, 0).unwrap())
            .unwrap();

        // then
        assert_eq!(purged, 2);
        assert_eq!(store.get("nonce-consumed").unwrap(), None);
        assert_eq!(store.get("nonce-expired").unwrap(), None);
        assert!(store.get("nonce-live").unwrap().is_some());
    }

    #[test]
    fn consume__parallel_attempts_yield_exactly_one_winner() {
        // given
        let temp_dir = TempDir::new("sled_nonce_store_race").unwrap();
        let db = sled_db(&temp_dir);
        let store = SledNonceStore::new(&db).unwrap();
        store.put(&arb_nonce("nonce-race")).unwrap();

        // when
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || store.consume("nonce-race").unwrap())
            })
            .collect();
        let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        // then
        let winners = outcomes
            .iter()
            .filter(|outcome| matches!(outcome, ConsumeOutcome::Consumed(_)))
            .count();
        assert_eq!(winners, 1);
    }
}
