//! Modulator and front-end throughput
//!
//! Run with: cargo bench -p csrd-core --bench modulate_bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use csrd_core::message::{create_source, MessageKind};
use csrd_core::modulate::{Modulator, ModulatorOverrides, ModulatorParams, ModulatorRegistry};
use csrd_core::rf::TxFrontEndSpec;
use csrd_core::spectrum::occupied_bandwidth;
use rand::{rngs::StdRng, SeedableRng};

const SAMPLE_RATE: f64 = 1e6;
const NUM_SYMBOLS: usize = 4096;

fn configured(type_id: &str, order: usize) -> Box<dyn Modulator> {
    let registry = ModulatorRegistry::with_defaults();
    let params = ModulatorParams::new(order, 4, SAMPLE_RATE);
    let mut rng = StdRng::seed_from_u64(1);
    match registry.configure(type_id, &params, &ModulatorOverrides::default(), &mut rng) {
        Ok(m) => m,
        Err(e) => panic!("{} failed to configure: {}", type_id, e),
    }
}

fn bench_modulators(c: &mut Criterion) {
    let mut group = c.benchmark_group("modulate");

    for (type_id, order) in [("QAM", 16), ("PSK", 8), ("GMSK", 2), ("OFDM", 16), ("SCFDMA", 16), ("OTFS", 4)] {
        let modulator = configured(type_id, order);
        let kind = if modulator.kind().is_digital() {
            MessageKind::RandomBit
        } else {
            MessageKind::Audio
        };
        let length = modulator.message_length_for(NUM_SYMBOLS);
        let message = create_source(kind, 7)
            .generate(length, modulator.symbol_rate())
            .unwrap();

        group.throughput(Throughput::Elements(NUM_SYMBOLS as u64));
        group.bench_with_input(BenchmarkId::new("symbols", type_id), &message, |b, msg| {
            b.iter(|| modulator.modulate(black_box(msg)).unwrap())
        });
    }

    group.finish();
}

fn bench_front_end(c: &mut Criterion) {
    let mut group = c.benchmark_group("tx_front_end");
    let modulator = configured("QAM", 16);
    let message = create_source(MessageKind::RandomBit, 3)
        .generate(modulator.message_length_for(NUM_SYMBOLS), modulator.symbol_rate())
        .unwrap();
    let signal = modulator
        .modulate(&message)
        .unwrap()
        .into_signal(SAMPLE_RATE, modulator.kind());

    for out_rate in [1e6, 4e6] {
        let mut tx = TxFrontEndSpec::ideal(out_rate, 150e3, 0.0).setup().unwrap();
        group.throughput(Throughput::Elements(signal.len() as u64));
        group.bench_with_input(BenchmarkId::new("process", out_rate as u64), &signal, |b, s| {
            b.iter(|| tx.process(black_box(s)).unwrap())
        });
    }

    group.finish();
}

fn bench_occupied_bandwidth(c: &mut Criterion) {
    let modulator = configured("QAM", 16);
    let message = create_source(MessageKind::RandomBit, 5)
        .generate(modulator.message_length_for(NUM_SYMBOLS), modulator.symbol_rate())
        .unwrap();
    let samples = modulator.modulate(&message).unwrap().samples.remove(0);

    c.bench_function("occupied_bandwidth", |b| {
        b.iter(|| occupied_bandwidth(black_box(&samples), SAMPLE_RATE))
    });
}

criterion_group!(benches, bench_modulators, bench_front_end, bench_occupied_bandwidth);
criterion_main!(benches);
