//! Exchange Core - demo workload
//!
//! Opens the configured markets, funds a population of accounts, then has a
//! pool of worker threads fire random BUY/SELL/CANCEL commands at one shared
//! engine. Balance-sheet totals are printed before and after; they must match.
//!
//! ```bash
//! cargo run --release                  # reference workload
//! cargo run --release -- demo.toml     # custom DemoConfig
//! RUST_LOG=exchange_core=debug cargo run
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use anyhow::{anyhow, bail, Context};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rust_decimal::prelude::ToPrimitive;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use exchange_core::engine::{Command, DemoConfig, Engine, Query, QueryResult};
use exchange_core::types::{AccountId, Quantity, Side};

/// Outcome counters of one worker.
#[derive(Debug, Default, Clone, Copy)]
struct Stats {
    placed: u64,
    trades: u64,
    cancelled: u64,
    rejected: u64,
}

impl Stats {
    fn merge(self, other: Stats) -> Stats {
        Stats {
            placed: self.placed + other.placed,
            trades: self.trades + other.trades,
            cancelled: self.cancelled + other.cancelled,
            rejected: self.rejected + other.rejected,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();

    let config = match std::env::args().nth(1) {
        Some(path) => DemoConfig::load(&path).with_context(|| format!("loading {path}"))?,
        None => DemoConfig::default(),
    };
    config.validate()?;
    info!(
        accounts = config.accounts,
        operations = config.operations,
        workers = config.workers,
        seed = config.seed,
        "starting demo workload"
    );

    let engine = Arc::new(Engine::new(config.engine.clone())?);
    let accounts = fund_accounts(&engine, &config)?;
    print_totals("before", &engine);

    let started = Instant::now();
    let stats = run_workers(&engine, &accounts, &config)?;
    let elapsed = started.elapsed();

    println!();
    println!("{} operations in {:.2?}", config.operations, elapsed);
    println!(
        "  placed {}, trades {}, cancelled {}, rejected {}",
        stats.placed, stats.trades, stats.cancelled, stats.rejected
    );

    print_totals("after", &engine);
    for market in engine.markets() {
        print_book(market);
    }

    let report = engine.audit();
    if !report.is_clean() {
        for discrepancy in &report.discrepancies {
            warn!(%discrepancy, "audit failed");
        }
        bail!("audit found {} discrepancies", report.discrepancies.len());
    }
    info!("audit clean");
    Ok(())
}

/// Open accounts and give each a random starting balance in every currency.
fn fund_accounts(engine: &Engine, config: &DemoConfig) -> anyhow::Result<Vec<AccountId>> {
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let symbols: Vec<String> = engine
        .registry()
        .iter()
        .map(|instrument| instrument.symbol.clone())
        .collect();

    let mut accounts = Vec::with_capacity(config.accounts);
    for _ in 0..config.accounts {
        let account = engine.new_account();
        for (idx, symbol) in symbols.iter().enumerate() {
            // the first instrument is the scarce one, like BTC against USD
            let amount: u64 = if idx == 0 {
                rng.gen_range(0..=1_000)
            } else {
                rng.gen_range(0..=1_000_000u64) * rng.gen_range(0..=3u64)
            };
            if amount > 0 {
                engine.deposit(account, symbol, amount)?;
            }
        }
        accounts.push(account);
    }
    Ok(accounts)
}

fn run_workers(
    engine: &Arc<Engine>,
    accounts: &[AccountId],
    config: &DemoConfig,
) -> anyhow::Result<Stats> {
    let accounts: Arc<[AccountId]> = Arc::from(accounts);
    let per_worker = config.operations / config.workers;
    let extra = config.operations % config.workers;

    let handles: Vec<_> = (0..config.workers)
        .map(|worker| {
            let engine = Arc::clone(engine);
            let accounts = Arc::clone(&accounts);
            let operations = per_worker + usize::from(worker < extra);
            let seed = config.seed.wrapping_add(1 + worker as u64);
            let band = (config.min_price, config.max_price);
            thread::spawn(move || worker_loop(&engine, &accounts, operations, seed, band))
        })
        .collect();

    let mut total = Stats::default();
    for handle in handles {
        let stats = handle
            .join()
            .map_err(|_| anyhow!("worker thread panicked"))??;
        total = total.merge(stats);
    }
    Ok(total)
}

fn worker_loop(
    engine: &Engine,
    accounts: &[AccountId],
    operations: usize,
    seed: u64,
    (min_price, max_price): (u64, u64),
) -> anyhow::Result<Stats> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut stats = Stats::default();

    for _ in 0..operations {
        let Some(&account) = accounts.choose(&mut rng) else {
            break;
        };
        let Some(market) = engine.markets().choose(&mut rng) else {
            break;
        };
        let QueryResult::Balances(balances) = engine.query(account, Query::Balances) else {
            continue;
        };
        let QueryResult::OpenOrders(orders) = engine.query(account, Query::OpenOrders) else {
            continue;
        };

        let cancel = !orders.is_empty() && rng.gen_ratio(1, 3);
        let command = if cancel {
            let Some(order) = orders.choose(&mut rng) else {
                continue;
            };
            Command::Cancel { order_id: order.id }
        } else {
            let side = if rng.gen_bool(0.5) { Side::Buy } else { Side::Sell };
            let funding = match side {
                Side::Buy => &market.quote().symbol,
                Side::Sell => &market.base().symbol,
            };
            let available = balances
                .iter()
                .find(|row| &row.instrument == funding)
                .map(|row| row.available)
                .unwrap_or(Quantity::ZERO)
                .as_decimal()
                .to_f64()
                .unwrap_or(0.0);

            // commit up to a third of what is available
            let to_trade = available * rng.gen_range(0.0..=1.0 / 3.0);
            let price = rng.gen_range(min_price..=max_price);
            let quantity = match side {
                Side::Buy => to_trade / price as f64,
                Side::Sell => to_trade,
            };
            if quantity <= 0.0 {
                continue;
            }
            let market = market.symbol().to_string();
            match side {
                Side::Buy => Command::Buy {
                    market,
                    price: price.into(),
                    quantity: quantity.into(),
                },
                Side::Sell => Command::Sell {
                    market,
                    price: price.into(),
                    quantity: quantity.into(),
                },
            }
        };

        match engine.execute(account, command) {
            Ok(execution) => match execution {
                exchange_core::Execution::Placed(submission) => {
                    stats.placed += 1;
                    stats.trades += submission.trades.len() as u64;
                }
                exchange_core::Execution::Cancelled(_) => stats.cancelled += 1,
                _ => {}
            },
            Err(e) if e.is_fatal() => return Err(e.into()),
            // balances moved since the query, or the amount truncated to zero
            Err(_) => stats.rejected += 1,
        }
    }
    Ok(stats)
}

fn print_totals(label: &str, engine: &Engine) {
    let sheet = engine.balance_sheet();
    let totals: BTreeMap<String, Quantity> = sheet.count_all();
    let line: Vec<String> = totals
        .iter()
        .map(|(symbol, total)| format!("{symbol}: {total}"))
        .collect();

    println!();
    println!("---");
    println!("Total ({label}): {}", line.join(", "));
    println!("---");
}

fn print_book(market: &exchange_core::Market) {
    let book = market.lock();
    println!();
    println!("Orderbook {}:", market.symbol());
    println!("---");
    for level in book.depth(Side::Sell).iter().rev() {
        println!("  {:>14} x {} ({} orders)", level.price, level.quantity, level.orders);
    }
    println!("---");
    for level in book.depth(Side::Buy) {
        println!("  {:>14} x {} ({} orders)", level.price, level.quantity, level.orders);
    }
    println!("---");
    println!(
        "trades: {}, state root: {}",
        book.trades().len(),
        hex::encode(book.state_root())
    );
}
