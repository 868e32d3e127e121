//! Pure functions over a transaction execution result. Everything here takes
//! parsed chain data and returns extracted artifacts; no RPC, no storage.

use crate::chain::{
    ChainEvent,
    ObjectChange,
};

/// Substring filter over on-chain type strings. `excludes` exists to
/// disambiguate overlapping names: a `Bet` object and a `BettingPool` object
/// both contain `::betting::Bet` in their type string, so the pool type is
/// excluded when looking for the bet.
#[derive(Debug, Clone)]
pub struct TypeFilter<'a> {
    pub contains: &'a str,
    pub excludes: &'a [&'a str],
}

impl<'a> TypeFilter<'a> {
    pub fn contains(contains: &'a str) -> Self {
        Self {
            contains,
            excludes: &[],
        }
    }

    pub fn matches(&self, object_type: &str) -> bool {
        object_type.contains(self.contains)
            && !self
                .excludes
                .iter()
                .any(|excluded| object_type.contains(excluded))
    }
}

/// Returns the id of the first created object whose type matches the filter,
/// in list order, or `None` when nothing matches.
pub fn find_created_object_id_by_type(
    object_changes: &[ObjectChange],
    filter: &TypeFilter,
) -> Option<String> {
    object_changes
        .iter()
        .filter(|change| change.is_created())
        .find(|change| filter.matches(&change.object_type))
        .map(|change| change.object_id.clone())
}

/// Extracts the payout amount from the first event whose type contains the
/// given substring. The node encodes u64 amounts as strings. No matching
/// event means a zero payout, which is a legitimate outcome, not an error.
pub fn parse_payout_distributed_amount(
    events: &[ChainEvent],
    event_type_contains: &str,
) -> crate::Result<u64> {
    let Some(event) = events
        .iter()
        .find(|event| event.event_type.contains(event_type_contains))
    else {
        return Ok(0);
    };
    let raw = event
        .parsed_json
        .get("amount")
        .ok_or_else(|| anyhow::anyhow!("payout event has no amount field"))?;
    let amount_str = raw
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("payout amount is not a string: {raw}"))?;
    amount_str
        .parse::<u64>()
        .map_err(|e| anyhow::anyhow!("payout amount '{amount_str}' is not a u64: {e}"))
}
