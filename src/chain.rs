use crate::Result;
use anyhow::{
    Context,
    anyhow,
};
use serde::{
    Deserialize,
    Serialize,
};
use serde_json::json;
use url::Url;

pub mod object_types {
    //! Type and event fragments of the on-chain betting package. Matching is
    //! by substring so package address upgrades do not invalidate them.

    pub const BET: &str = "::betting::Bet";
    pub const BETTING_POOL: &str = "::betting::BettingPool";
    pub const ROUND_SETTLEMENT: &str = "::betting::RoundSettlement";
    pub const FEE_COIN: &str = "::coin::Coin";
    pub const PAYOUT_DISTRIBUTED: &str = "::betting::PayoutDistributed";
}

#[derive(PartialEq, Eq, Debug, Copy, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Success,
    Failure,
}

#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectChange {
    /// "created", "mutated", "deleted" as reported by the node.
    pub change: String,
    pub object_type: String,
    pub object_id: String,
}

impl ObjectChange {
    pub fn is_created(&self) -> bool {
        self.change == "created"
    }
}

#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainEvent {
    pub event_type: String,
    /// Event payload as emitted; field layout is package-defined.
    pub parsed_json: serde_json::Value,
}

#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionResult {
    pub digest: String,
    pub status: TxStatus,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub object_changes: Vec<ObjectChange>,
    #[serde(default)]
    pub events: Vec<ChainEvent>,
}

/// Outcome of a read-only transaction lookup. `Pending` (indexed but not
/// finalized, or submitted too recently to be visible) is transient and
/// distinct from `NotFound`, which is permanent for that digest.
#[derive(PartialEq, Eq, Debug, Clone)]
pub enum TxLookup {
    Executed(TransactionResult),
    Pending,
    NotFound,
}

/// Boundary to the chain node. The node is an external, unreliable service;
/// implementations do plain RPC and leave interpretation to the services.
pub trait ChainRpc {
    /// Submits a signed transaction and returns its digest. Returning a
    /// digest does not imply finality.
    fn submit_transaction(
        &self,
        tx_bytes: &[u8],
        signature: &str,
    ) -> impl Future<Output = Result<String>>;

    /// Fetches a transaction by digest without re-submitting anything.
    fn fetch_transaction(&self, digest: &str) -> impl Future<Output = Result<TxLookup>>;
}

/// JSON-RPC client over HTTP.
#[derive(Clone)]
pub struct HttpChainRpc {
    client: reqwest::Client,
    endpoint: Url,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
enum FetchedTransaction {
    Executed(TransactionResult),
    Pending,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitResult {
    digest: String,
}

impl HttpChainRpc {
    pub fn new(endpoint: Url) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
        }
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<RpcResponse<T>> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&body)
            .send()
            .await
            .with_context(|| format!("send {method} request"))?;
        response
            .json::<RpcResponse<T>>()
            .await
            .with_context(|| format!("decode {method} response"))
    }
}

/// The node reports an unknown digest with this error code.
const RPC_TX_NOT_FOUND: i64 = -32004;

impl ChainRpc for HttpChainRpc {
    async fn submit_transaction(&self, tx_bytes: &[u8], signature: &str) -> Result<String> {
        let params = json!([hex::encode(tx_bytes), signature]);
        let response: RpcResponse<SubmitResult> =
            self.call("chain_executeTransaction", params).await?;
        if let Some(error) = response.error {
            return Err(anyhow!(
                "chain_executeTransaction failed: {} ({})",
                error.message,
                error.code
            ));
        }
        let result = response
            .result
            .ok_or_else(|| anyhow!("chain_executeTransaction returned no result"))?;
        Ok(result.digest)
    }

    async fn fetch_transaction(&self, digest: &str) -> Result<TxLookup> {
        let response: RpcResponse<FetchedTransaction> = self
            .call("chain_getTransaction", json!([digest]))
            .await?;
        if let Some(error) = response.error {
            if error.code == RPC_TX_NOT_FOUND {
                return Ok(TxLookup::NotFound);
            }
            return Err(anyhow!(
                "chain_getTransaction failed: {} ({})",
                error.message,
                error.code
            ));
        }
        match response.result {
            Some(FetchedTransaction::Executed(result)) => Ok(TxLookup::Executed(result)),
            Some(FetchedTransaction::Pending) | None => Ok(TxLookup::Pending),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;

    #[test]
    fn transaction_result__decodes_node_wire_format() {
        // given
        let raw = serde_json::json!({
            "digest": "0xd1",
            "status": "success",
            "objectChanges": [
                {"change": "created", "objectType": "0xa::betting::Bet", "objectId": "0xb1"}
            ],
            "events": [
                {"eventType": "0xa::betting::PayoutDistributed", "parsedJson": {"amount": "10"}}
            ]
        });

        // when
        let result: TransactionResult = serde_json::from_value(raw).unwrap();

        // then
        assert_eq!(result.status, TxStatus::Success);
        assert_eq!(result.object_changes.len(), 1);
        assert!(result.object_changes[0].is_created());
        assert_eq!(result.events[0].event_type, "0xa::betting::PayoutDistributed");
    }

    #[test]
    fn fetched_transaction__pending_state_decodes_without_payload() {
        // given
        let raw = serde_json::json!({"state": "pending"});

        // when
        let fetched: FetchedTransaction = serde_json::from_value(raw).unwrap();

        // then
        assert!(matches!(fetched, FetchedTransaction::Pending));
    }
}
