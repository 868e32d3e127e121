use anyhow::Context;
use clap::Parser;
use reconciler::{
    app::{
        App,
        RunState,
        actix_api::ActixApi,
        backfill::BackfillScanner,
        executor::{
            FinalityPolicy,
            TransactionExecutor,
        },
        init_tracing,
        preparer::TransactionPreparer,
        recovery::RecoveryService,
        sled_store::open_stores,
    },
    chain::HttpChainRpc,
};
use std::{
    path::PathBuf,
    time::Duration,
};
use url::Url;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Chain node JSON-RPC endpoint.
    #[arg(short, long)]
    chain_url: Url,

    /// API port; an ephemeral port is picked when omitted.
    #[arg(short, long)]
    port: Option<u16>,

    /// Directory for the sled database.
    #[arg(long, default_value = "reconciler_data")]
    data_dir: PathBuf,

    /// Seconds between scheduled backfill scans.
    #[arg(long, default_value_t = 60)]
    backfill_interval_secs: u64,

    /// Nonce lifetime handed out by prepare.
    #[arg(long, default_value_t = 300)]
    nonce_ttl_secs: i64,

    /// Shared secret required on cron-only routes; unset disables the check.
    #[arg(long)]
    cron_secret: Option<String>,

    #[arg(short, long, default_value = "false")]
    tracing: bool,
}

async fn handle_interrupt() {
    let res = tokio::signal::ctrl_c().await;
    match res {
        Ok(_) => {
            tracing::info!("Received interrupt, exiting");
        }
        Err(_) => {
            tracing::warn!("Received interrupt error, exiting anyway");
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    if args.tracing {
        init_tracing();
    }

    std::fs::create_dir_all(&args.data_dir)
        .with_context(|| format!("create data directory {}", args.data_dir.display()))?;
    tracing::info!("Using sled directory {}", args.data_dir.display());
    let (bets, rounds, nonces) = open_stores(&args.data_dir)?;

    let chain = HttpChainRpc::new(args.chain_url.clone());
    tracing::info!("Using chain node at {}", args.chain_url);

    let preparer = TransactionPreparer::new(
        rounds.clone(),
        bets.clone(),
        nonces.clone(),
        chrono::Duration::seconds(args.nonce_ttl_secs),
    );
    let executor = TransactionExecutor::new(
        chain.clone(),
        bets.clone(),
        rounds.clone(),
        nonces.clone(),
        FinalityPolicy::default(),
    );
    let recovery = RecoveryService::new(chain.clone(), bets.clone(), rounds.clone());
    let backfill = BackfillScanner::new(recovery.clone(), bets, rounds.clone(), nonces);

    let api = ActixApi::new(args.port, args.cron_secret.clone()).await?;
    let mut app = App::new(
        api,
        preparer,
        executor,
        recovery,
        backfill,
        rounds,
        Duration::from_secs(args.backfill_interval_secs),
    );

    tracing::info!("Starting reconciliation service");
    loop {
        let interrupt = handle_interrupt();
        match app.run(interrupt).await? {
            RunState::Continue => continue,
            RunState::Exit => {
                tracing::info!("Exiting reconciliation service");
                return Ok(());
            }
        }
    }
}
