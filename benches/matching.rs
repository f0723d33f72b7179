//! Benchmarks for order submission and matching.
//!
//! ## Running Benchmarks
//!
//! ```bash
//! # Run all benchmarks
//! cargo bench
//!
//! # Run specific benchmark
//! cargo bench -- single_match
//! ```
//!
//! Results are saved to `target/criterion/` with HTML reports.

use std::time::Duration;

use criterion::{
    black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use exchange_core::ledger::Ledger;
use exchange_core::orderbook::OrderBook;
use exchange_core::types::{
    AccountId, InstrumentId, InstrumentRegistry, InstrumentType, MarketId, OrderId, Quantity,
    Side,
};

const MAKER: AccountId = AccountId(1);
const TAKER: AccountId = AccountId(2);

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Ledger with BTC and USD, both accounts funded far beyond any benchmark.
fn funded_ledger() -> (Ledger, InstrumentId, InstrumentId) {
    let mut registry = InstrumentRegistry::new();
    let btc = registry.register("BTC", InstrumentType::Currency, None).unwrap();
    let usd = registry.register("USD", InstrumentType::Currency, None).unwrap();
    let ledger = Ledger::new(&registry);
    for account in [MAKER, TAKER] {
        ledger.deposit(account, btc, Quantity::from(1_000_000_000u64)).unwrap();
        ledger.deposit(account, usd, Quantity::from(1_000_000_000_000u64)).unwrap();
    }
    (ledger, btc, usd)
}

/// Book with `count` one-unit asks at 50_000, 50_001, ...
fn populated_book(ledger: &Ledger, btc: InstrumentId, usd: InstrumentId, count: u64) -> OrderBook {
    let mut book = OrderBook::with_capacity(MarketId(0), btc, usd, count as usize * 2);
    for i in 0..count {
        book.submit(
            ledger,
            OrderId(i + 1),
            MAKER,
            Side::Sell,
            Quantity::from(50_000 + i),
            Quantity::from(1u64),
        )
        .unwrap();
    }
    book
}

/// Seeded random orders around 50_000.
fn generate_order_batch(count: usize, seed: u64) -> Vec<(Side, Quantity, Quantity)> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            let side = if rng.gen_bool(0.5) { Side::Buy } else { Side::Sell };
            let price = Quantity::from(rng.gen_range(49_500u64..=50_500));
            let quantity = Quantity::new(rust_decimal::Decimal::new(rng.gen_range(1..=100), 2));
            (side, price, quantity)
        })
        .collect()
}

// ============================================================================
// BENCHMARK: Single Match Latency
// ============================================================================

fn bench_single_match(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_match");
    group.measurement_time(Duration::from_secs(5));

    for depth in [100u64, 1_000] {
        group.bench_with_input(BenchmarkId::new("against_asks", depth), &depth, |b, &depth| {
            let (ledger, btc, usd) = funded_ledger();
            b.iter_batched(
                || populated_book(&ledger, btc, usd, depth),
                |mut book| {
                    black_box(
                        book.submit(
                            &ledger,
                            OrderId(u64::MAX),
                            TAKER,
                            Side::Buy,
                            Quantity::from(50_000u64),
                            Quantity::from(1u64),
                        )
                        .unwrap(),
                    )
                },
                BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

// ============================================================================
// BENCHMARK: Throughput
// ============================================================================

fn bench_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("throughput");
    group.measurement_time(Duration::from_secs(10));

    for size in [1_000usize, 10_000] {
        let orders = generate_order_batch(size, 42);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("random_orders", size), &orders, |b, orders| {
            b.iter_batched(
                || {
                    let (ledger, btc, usd) = funded_ledger();
                    let book = OrderBook::with_capacity(MarketId(0), btc, usd, size * 2);
                    (ledger, book)
                },
                |(ledger, mut book)| {
                    for (i, &(side, price, quantity)) in orders.iter().enumerate() {
                        let account = if i % 2 == 0 { MAKER } else { TAKER };
                        let _ = black_box(book.submit(
                            &ledger,
                            OrderId(i as u64 + 1),
                            account,
                            side,
                            price,
                            quantity,
                        ));
                    }
                    book
                },
                BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

// ============================================================================
// BENCHMARK: Cancel
// ============================================================================

fn bench_cancel(c: &mut Criterion) {
    let mut group = c.benchmark_group("cancel");

    group.bench_function("middle_of_1k", |b| {
        let (ledger, btc, usd) = funded_ledger();
        b.iter_batched(
            || populated_book(&ledger, btc, usd, 1_000),
            |mut book| black_box(book.cancel(&ledger, MAKER, OrderId(500)).unwrap()),
            BatchSize::LargeInput,
        );
    });
    group.finish();
}

criterion_group!(benches, bench_single_match, bench_throughput, bench_cancel);
criterion_main!(benches);
