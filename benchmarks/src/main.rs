//! Claim throughput under contention.
//!
//! Spawns many concurrent claimants against one faucet and many concurrent
//! acceptors against one inline send, then checks that the runtime paid
//! exactly what it should and reports timings as JSON.

use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use futures::future::join_all;
use serde::Serialize;

use satsflow::Config;
use satsflow::db::MemoryBackend;
use satsflow::flows::{FaucetFlow, FlowConfig, FlowContext, InlineSendFlow};
use satsflow::notify::{Notifier, TracingChannel};
use satsflow::wallet::{LedgerWallet, UserRef};

#[derive(Parser, Debug)]
#[command(name = "satsflow-bench", about = "Contention benchmarks for satsflow")]
struct Args {
    /// Concurrent claimants per round.
    #[arg(long, default_value_t = 200)]
    claimants: usize,
    /// Faucet capacity in sats.
    #[arg(long, default_value_t = 1_000)]
    capacity: u64,
    #[arg(long, default_value_t = 10)]
    per_user: u64,
    #[arg(long, default_value_t = 5)]
    rounds: usize,
}

#[derive(Debug, Serialize)]
struct RoundReport {
    round: usize,
    scenario: &'static str,
    attempts: usize,
    succeeded: usize,
    expected: usize,
    elapsed_ms: f64,
}

struct Bench {
    ctx: FlowContext,
    ledger: Arc<LedgerWallet>,
}

impl Bench {
    fn new() -> Self {
        let ledger = Arc::new(LedgerWallet::new());
        let ctx = FlowContext::new(
            Arc::new(MemoryBackend::new()),
            ledger.clone(),
            Notifier::new(Arc::new(TracingChannel)),
            FlowConfig::from(&Config::in_memory()),
        );
        Self { ctx, ledger }
    }

    fn user(&self, id: i64, balance: u64) -> UserRef {
        let name = format!("user{id}");
        UserRef::new(id, Some(&name)).with_wallet(self.ledger.open_wallet(&name, balance))
    }
}

async fn faucet_round(args: &Args, round: usize) -> anyhow::Result<RoundReport> {
    let bench = Bench::new();
    let owner = bench.user(0, args.capacity);
    let flow = Arc::new(FaucetFlow::new(bench.ctx.clone()));
    let faucet = flow
        .create(&owner, args.capacity, args.per_user, "bench", false)
        .await?;
    let supply = bench.ledger.total_supply();

    let claimants: Vec<UserRef> = (1..=args.claimants as i64)
        .map(|id| bench.user(id, 0))
        .collect();
    let started = Instant::now();
    let results = join_all(claimants.iter().map(|claimant| {
        let flow = Arc::clone(&flow);
        let id = faucet.base.id.to_string();
        let claimant = claimant.clone();
        tokio::spawn(async move { flow.claim(&id, &claimant).await })
    }))
    .await;
    let elapsed = started.elapsed();

    let succeeded = results
        .into_iter()
        .filter(|joined| matches!(joined, Ok(Ok(_))))
        .count();
    let expected = (faucet.n_total as usize).min(args.claimants);
    anyhow::ensure!(
        succeeded == expected,
        "faucet paid {succeeded} claimants, expected {expected}"
    );
    anyhow::ensure!(
        bench.ledger.total_supply() == supply,
        "ledger supply changed"
    );

    Ok(report(round, "faucet", args.claimants, succeeded, expected, elapsed))
}

async fn inline_send_round(args: &Args, round: usize) -> anyhow::Result<RoundReport> {
    let bench = Bench::new();
    let sender = bench.user(0, args.per_user);
    let flow = Arc::new(InlineSendFlow::new(bench.ctx.clone()));
    let intent = flow.create(&sender, args.per_user, "bench", None).await?;

    let acceptors: Vec<UserRef> = (1..=args.claimants as i64)
        .map(|id| bench.user(id, 0))
        .collect();
    let started = Instant::now();
    let results = join_all(acceptors.iter().map(|acceptor| {
        let flow = Arc::clone(&flow);
        let id = intent.base.id.to_string();
        let acceptor = acceptor.clone();
        tokio::spawn(async move { flow.accept(&id, &acceptor).await })
    }))
    .await;
    let elapsed = started.elapsed();

    let succeeded = results
        .into_iter()
        .filter(|joined| matches!(joined, Ok(Ok(_))))
        .count();
    anyhow::ensure!(succeeded == 1, "inline send accepted {succeeded} times");

    Ok(report(round, "inline_send", args.claimants, succeeded, 1, elapsed))
}

fn report(
    round: usize,
    scenario: &'static str,
    attempts: usize,
    succeeded: usize,
    expected: usize,
    elapsed: Duration,
) -> RoundReport {
    RoundReport {
        round,
        scenario,
        attempts,
        succeeded,
        expected,
        elapsed_ms: elapsed.as_secs_f64() * 1_000.0,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    anyhow::ensure!(args.per_user > 0, "--per-user must be positive");

    for round in 1..=args.rounds {
        for report in [
            faucet_round(&args, round).await?,
            inline_send_round(&args, round).await?,
        ] {
            tracing::info!(round, scenario = report.scenario, "Round finished");
            println!("{}", serde_json::to_string(&report)?);
        }
    }
    Ok(())
}
