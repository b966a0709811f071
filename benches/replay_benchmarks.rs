//! Benchmarks for replay and analytics over long chains
//!
//! These benchmarks measure:
//! - Full replay at several chain lengths
//! - Historical snapshots by timestamp cutoff
//! - The three anomaly detectors over the same chains

use chrono::{Duration, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rust_decimal::Decimal;

use stockledger::transaction::{CreateItem, MoveStock, StockChange};
use stockledger::{Actor, AnomalyEngine, Block, BlockHash, Cutoff, ReplayEngine, Transaction};

const LOCATIONS: [&str; 3] = ["Warehouse", "Distribution Center", "Retailer"];

/// A valid chain cycling through creates, restocks, sales and moves
fn build_chain(len: usize) -> Vec<Block> {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let staff = Actor::new("bench", "E-0", "Inventory Manager");
    let mut chain = vec![Block::seal(
        0,
        start,
        Transaction::Genesis(Default::default()),
        BlockHash::GENESIS_PREVIOUS,
    )
    .unwrap()];

    let products = 50;
    for i in 1..len {
        let sku = format!("SKU-{}", i % products);
        let tx = if i <= products {
            Transaction::CreateItem(CreateItem {
                sku,
                product_name: format!("Product {}", i),
                price: Decimal::new(i as i64 * 10 + 99, 2),
                category: "Bench".to_string(),
                quantity: 1_000,
                to_location: LOCATIONS[0].to_string(),
                actor: staff.clone(),
            })
        } else {
            match i % 3 {
                0 => Transaction::StockIn(StockChange {
                    sku,
                    quantity: 5,
                    location: LOCATIONS[0].to_string(),
                    actor: staff.clone(),
                }),
                1 => Transaction::StockOut(StockChange {
                    sku,
                    quantity: 3,
                    location: LOCATIONS[0].to_string(),
                    actor: staff.clone(),
                }),
                _ => Transaction::Move(MoveStock {
                    sku,
                    quantity: 1,
                    from_location: LOCATIONS[0].to_string(),
                    to_location: LOCATIONS[1 + i % 2].to_string(),
                    actor: staff.clone(),
                }),
            }
        };
        let prev = &chain[i - 1];
        let block = Block::seal(i as u64, start + Duration::minutes(i as i64), tx, prev.hash).unwrap();
        chain.push(block);
    }
    chain
}

fn bench_full_replay(c: &mut Criterion) {
    let mut group = c.benchmark_group("full_replay");
    let engine = ReplayEngine::new();

    for len in [100usize, 1_000, 5_000] {
        let chain = build_chain(len);
        group.throughput(Throughput::Elements(len as u64));
        group.bench_with_input(BenchmarkId::from_parameter(len), &chain, |b, chain| {
            b.iter(|| engine.state_at(black_box(chain), Cutoff::Latest).unwrap());
        });
    }
    group.finish();
}

fn bench_timestamp_cutoff(c: &mut Criterion) {
    let chain = build_chain(5_000);
    let midpoint = chain[chain.len() / 2].timestamp;
    let engine = ReplayEngine::new();

    c.bench_function("snapshot_at_midpoint", |b| {
        b.iter(|| engine.state_at(black_box(&chain), Cutoff::Timestamp(midpoint)).unwrap());
    });
}

fn bench_anomaly_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("anomaly_scan");
    let engine = AnomalyEngine::default();

    for len in [1_000usize, 5_000] {
        let chain = build_chain(len);
        group.throughput(Throughput::Elements(len as u64));
        group.bench_with_input(BenchmarkId::from_parameter(len), &chain, |b, chain| {
            b.iter(|| engine.scan(black_box(chain)));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_full_replay, bench_timestamp_cutoff, bench_anomaly_scan);
criterion_main!(benches);
