use criterion::{criterion_group, criterion_main, Criterion};
use ndarray::Array1;
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use wavecal::atlas::{align_to_atlas, Atlas, AtlasAlignment};
use wavecal::central::{refine_center, refine_center_par};
use wavecal::instrument::{CalibParams, Instrument};

const DISP: f64 = 0.5;

fn lamp(waves: &[f64], grid: impl Iterator<Item = f64>) -> Array1<f64> {
    Array1::from_iter(grid.map(|w| {
        waves
            .iter()
            .map(|&lw| 80.0 * (-(w - lw).powi(2) / (2.0 * 0.6f64.powi(2))).exp())
            .sum::<f64>()
    }))
}

fn scene() -> (
    Vec<Array1<f64>>,
    Vec<isize>,
    Atlas,
    AtlasAlignment,
    Instrument,
    CalibParams,
) {
    let instrument = Instrument {
        nbars: 24,
        refbar: 12,
        ..Instrument::default()
    };
    let params = CalibParams::default();
    let waves: Vec<f64> = (0..30).map(|i| 4280.0 + 15.0 * i as f64).collect();

    let raw = lamp(&waves, (0..2400).map(|i| 4200.0 + 0.25 * i as f64));
    let atlas = Atlas::new(raw, 4200.0, 0.25, &instrument).unwrap();

    let n = 1500;
    let noise = Array1::random(n, Uniform::new(0.0, 5.0));
    let spectrum =
        lamp(&waves, (0..n).map(|y| (y as f64 - 750.0) * DISP + 4500.0)) * 800.0 / 80.0 + noise;
    let arcs: Vec<Array1<f64>> = (0..instrument.nbars).map(|_| spectrum.clone()).collect();
    let offsets = vec![0isize; instrument.nbars];

    let alignment = align_to_atlas(
        arcs[instrument.refbar].view(),
        &atlas,
        DISP,
        &instrument,
        &params,
    )
    .unwrap();
    (arcs, offsets, atlas, alignment, instrument, params)
}

fn central_benchmark(c: &mut Criterion) {
    let mut central = c.benchmark_group("central");
    central.sample_size(10);

    let (arcs, offsets, atlas, alignment, instrument, params) = scene();
    central.bench_function("central blocking", |b| {
        b.iter(|| refine_center(&arcs, &offsets, &atlas, &alignment, DISP, &instrument, &params, 1))
    });

    central.bench_function("central parallel", |b| {
        b.iter(|| {
            refine_center_par(&arcs, &offsets, &atlas, &alignment, DISP, &instrument, &params, 1)
        })
    });
}

criterion_group!(benches, central_benchmark);
criterion_main!(benches);
