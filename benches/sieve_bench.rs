use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rug::Integer;

use hexad::block::remainder_for_target;
use hexad::offsets::{seed_range, OffsetArena, OffsetStack, SegmentBuckets};
use hexad::sieve::{sieve_dense, SieveBits};
use hexad::verify::fermat_base2;
use hexad::PrimeTable;

fn bench_prime_table_1m(c: &mut Criterion) {
    c.bench_function("PrimeTable::build(1_000_000, 40)", |b| {
        b.iter(|| PrimeTable::build(black_box(1_000_000), black_box(40)).unwrap());
    });
}

fn seeded_table() -> (PrimeTable, OffsetArena, Integer) {
    let table = PrimeTable::build(1_000_000, 40).unwrap();
    let arena = OffsetArena::new(table.arena_len());
    let buckets = SegmentBuckets::new(table.entries_per_segment());
    let mut stack = OffsetStack::new();
    let target = Integer::from(0x9e3779b97f4a7c15u64) << 240;
    let remainder = remainder_for_target(&target, table.primorial());
    let base = Integer::from(&target + &remainder);
    seed_range(
        &table,
        &arena,
        &buckets,
        &mut stack,
        &base,
        table.primorial_number(),
        table.len(),
    );
    (table, arena, base)
}

fn bench_seed_range(c: &mut Criterion) {
    let table = PrimeTable::build(1_000_000, 40).unwrap();
    let arena = OffsetArena::new(table.arena_len());
    let buckets = SegmentBuckets::new(table.entries_per_segment());
    let target = Integer::from(0xdeadbeefu32) << 280;
    let remainder = remainder_for_target(&target, table.primorial());
    let base = Integer::from(&target + &remainder);
    c.bench_function("seed_range(78k primes)", |b| {
        b.iter(|| {
            let mut stack = OffsetStack::new();
            buckets.reset();
            seed_range(
                &table,
                &arena,
                &buckets,
                &mut stack,
                black_box(&base),
                table.primorial_number(),
                table.len(),
            );
        });
    });
}

fn bench_dense_window(c: &mut Criterion) {
    let (table, arena, _base) = seeded_table();
    let mut bits = SieveBits::new();
    c.bench_function("sieve_dense(one window)", |b| {
        b.iter(|| {
            bits.zero();
            sieve_dense(
                &table,
                &arena,
                &mut bits,
                table.first_dense(),
                table.first_sparse(),
            );
        });
    });
}

fn bench_fermat_300_bits(c: &mut Criterion) {
    // A fixed ~300-bit candidate in the searched residue class.
    let (table, _arena, base) = seeded_table();
    let candidate = Integer::from(table.primorial() * 123_456u32) + &base;
    c.bench_function("fermat_base2(300-bit)", |b| {
        b.iter(|| fermat_base2(black_box(&candidate)));
    });
}

criterion_group!(
    benches,
    bench_prime_table_1m,
    bench_seed_range,
    bench_dense_window,
    bench_fermat_300_bits
);
criterion_main!(benches);
