use criterion::{Criterion, black_box, criterion_group, criterion_main};
use trainer_core::calibration::{CalibrationSet, TableKind};
use trainer_core::protocol::IndoorBikeData;

pub fn bench_lookup(c: &mut Criterion) {
    let mut g = c.benchmark_group("calibration_lookup");
    // BENCH_SAMPLE_SIZE=10 cargo bench -p trainer_core --bench lookup
    if let Ok(ss) = std::env::var("BENCH_SAMPLE_SIZE")
        && let Ok(n) = ss.parse::<usize>()
    {
        g.sample_size(n.max(10));
    }

    let set = CalibrationSet::factory();
    for kind in TableKind::ALL {
        let table = set.table(kind).clone();
        let y_max = table.y_axis().last().copied().unwrap_or(0.0);
        g.bench_function(kind.name(), |b| {
            b.iter(|| {
                let mut acc = 0.0;
                for i in 0..100 {
                    let x = f64::from(i) * 0.3;
                    let y = y_max * f64::from(i % 17) / 17.0;
                    acc += table.lookup(black_box(x), black_box(y));
                }
                black_box(acc)
            })
        });
    }
    g.bench_function("estimate_power", |b| {
        b.iter(|| black_box(set.estimate_power(black_box(18.5), black_box(430))))
    });
    g.finish();

    c.bench_function("indoor_bike_encode", |b| {
        let frame = IndoorBikeData {
            speed_mph: 21.0,
            power_watts: 245.7,
        };
        b.iter(|| black_box(black_box(frame).encode()))
    });
}

criterion_group!(lookup, bench_lookup);
criterion_main!(lookup);
