use crate::{
    Result,
    app::{
        backfill::BackfillScanner,
        executor::TransactionExecutor,
        preparer::TransactionPreparer,
        query_api::{
            ExecuteQuery,
            PrepareQuery,
            Query,
            QueryAPI,
            RecoverQuery,
            SettleQuery,
        },
        recovery::RecoveryService,
        settlement::run_settlement,
        store::{
            BetRepository,
            NonceStore,
            RoundRepository,
        },
    },
    chain::ChainRpc,
};
use std::time::Duration;

pub mod actix_api;
pub mod backfill;
pub mod executor;
pub mod in_memory_store;
pub mod preparer;
pub mod query_api;
pub mod recovery;
pub mod settlement;
pub mod sled_store;
pub mod store;

#[cfg(test)]
pub mod test_support;


pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[derive(PartialEq, Eq, Debug)]
pub enum RunState {
    Continue,
    Exit,
}

/// Composition root: one API source, the four services, and the backfill
/// timer, each constructed with its collaborators passed in explicitly.
pub struct App<API, Chain, Bets, Rounds, Nonces> {
    api: API,
    preparer: TransactionPreparer<Rounds, Bets, Nonces>,
    executor: TransactionExecutor<Chain, Bets, Rounds, Nonces>,
    recovery: RecoveryService<Chain, Bets, Rounds>,
    backfill: BackfillScanner<Chain, Bets, Rounds, Nonces>,
    rounds: Rounds,
    backfill_tick: tokio::time::Interval,
}

impl<API, Chain, Bets, Rounds, Nonces> App<API, Chain, Bets, Rounds, Nonces>
where
    API: QueryAPI,
    Chain: ChainRpc,
    Bets: BetRepository + Clone,
    Rounds: RoundRepository + Clone,
    Nonces: NonceStore + Clone,
{
    pub fn new(
        api: API,
        preparer: TransactionPreparer<Rounds, Bets, Nonces>,
        executor: TransactionExecutor<Chain, Bets, Rounds, Nonces>,
        recovery: RecoveryService<Chain, Bets, Rounds>,
        backfill: BackfillScanner<Chain, Bets, Rounds, Nonces>,
        rounds: Rounds,
        backfill_interval: Duration,
    ) -> Self {
        Self {
            api,
            preparer,
            executor,
            recovery,
            backfill,
            rounds,
            backfill_tick: tokio::time::interval(backfill_interval),
        }
    }

    /// Serves one unit of work: an incoming query, a backfill tick, or the
    /// interrupt. The caller loops until `RunState::Exit`.
    pub async fn run(&mut self, interrupt: impl Future<Output = ()>) -> Result<RunState> {
        tokio::select! {
            query = self.api.query() => {
                match query {
                    Ok(query) => {
                        self.handle_query(query).await;
                        Ok(RunState::Continue)
                    }
                    Err(e) => Err(e),
                }
            }
            _ = self.backfill_tick.tick() => {
                if let Err(error) = self.backfill.run().await {
                    tracing::error!(%error, "scheduled backfill scan failed");
                }
                Ok(RunState::Continue)
            }
            _ = interrupt => {
                Ok(RunState::Exit)
            }
        }
    }

    async fn handle_query(&mut self, query: Query) {
        // Responders may be dropped by impatient clients; that is their loss.
        match query {
            Query::Prepare(PrepareQuery {
                caller,
                intent,
                responder,
            }) => {
                let _ = responder.send(self.preparer.prepare(&caller, intent));
            }
            Query::Execute(ExecuteQuery {
                caller,
                request,
                responder,
            }) => {
                let _ = responder.send(self.executor.execute(&caller, request).await);
            }
            Query::Recover(RecoverQuery {
                target,
                digest,
                responder,
            }) => {
                let _ = responder.send(self.recovery.recover(target, digest).await);
            }
            Query::Backfill(responder) => {
                let _ = responder.send(self.backfill.run().await);
            }
            Query::Settle(SettleQuery {
                round_id,
                responder,
            }) => {
                let _ = responder.send(run_settlement(&self.rounds, &round_id));
            }
        }
    }
}
