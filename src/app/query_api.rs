use crate::{
    app::{
        executor::ExecuteRequest,
        preparer::PreparedTransaction,
        recovery::{
            RecoveryOutcome,
            RecoveryTarget,
        },
    },
    error::ServiceError,
    model::{
        BackfillReport,
        Bet,
        Caller,
        Intent,
    },
};
use tokio::sync::oneshot;

/// Source of operator/user requests for the app loop.
pub trait QueryAPI {
    fn query(&mut self) -> impl Future<Output = crate::Result<Query>>;
}

#[derive(Debug)]
pub enum Query {
    Prepare(PrepareQuery),
    Execute(ExecuteQuery),
    Recover(RecoverQuery),
    Backfill(oneshot::Sender<Result<BackfillReport, ServiceError>>),
    Settle(SettleQuery),
}

#[derive(Debug)]
pub struct PrepareQuery {
    pub caller: Caller,
    pub intent: Intent,
    pub responder: oneshot::Sender<Result<PreparedTransaction, ServiceError>>,
}

#[derive(Debug)]
pub struct ExecuteQuery {
    pub caller: Caller,
    pub request: ExecuteRequest,
    pub responder: oneshot::Sender<Result<Bet, ServiceError>>,
}

#[derive(Debug)]
pub struct RecoverQuery {
    pub target: RecoveryTarget,
    pub digest: Option<String>,
    pub responder: oneshot::Sender<Result<RecoveryOutcome, ServiceError>>,
}

#[derive(Debug)]
pub struct SettleQuery {
    pub round_id: String,
    pub responder: oneshot::Sender<Result<(), ServiceError>>,
}
