use criterion::{criterion_group, criterion_main, Criterion};
use rawdev::{demosaic, wavelet_denoise, Algorithm, DemosaicContext, FilterPattern, MosaicImage, Phase, Pipeline, PipelineConfig};

fn synthetic_input(width: usize, height: usize, pattern: FilterPattern) -> MosaicImage {
    MosaicImage::from_fn(width, height, pattern, |row, col, c| {
        let texture = ((row * 7 + col * 13) % 64) as u16 * 40;
        [45000, 32000, 19000, 32000][c] + texture
    })
    .unwrap()
}

fn bench_bayer(c: &mut Criterion) {
    let mosaic = synthetic_input(4032, 3024, FilterPattern::rggb());
    let ctx = DemosaicContext::default();

    let mut group = c.benchmark_group("bayer_4032x3024");
    group.sample_size(10);
    for algo in [Algorithm::Bilinear, Algorithm::Vng, Algorithm::Ppg, Algorithm::Ahd] {
        group.bench_function(format!("{algo}"), |b| {
            b.iter(|| demosaic(&mosaic, algo, &ctx));
        });
    }
    group.finish();
}

fn bench_xtrans(c: &mut Criterion) {
    let mosaic = synthetic_input(4032, 3024, FilterPattern::xtrans_default());
    let ctx = DemosaicContext::default();

    let mut group = c.benchmark_group("xtrans_4032x3024");
    group.sample_size(10);
    for algo in [Algorithm::Bilinear, Algorithm::SixColor { passes: 1 }, Algorithm::SixColor { passes: 3 }] {
        group.bench_function(format!("{algo}"), |b| {
            b.iter(|| demosaic(&mosaic, algo, &ctx));
        });
    }
    group.finish();
}

fn bench_denoise(c: &mut Criterion) {
    let raster = demosaic(&synthetic_input(2016, 1512, FilterPattern::rggb()), Algorithm::Bilinear, &DemosaicContext::default());

    let mut group = c.benchmark_group("wavelet_2016x1512");
    group.sample_size(10);
    group.bench_function("threshold 200", |b| {
        b.iter(|| {
            let mut r = raster.clone();
            wavelet_denoise(&mut r, 200.0);
            r
        });
    });
    group.finish();
}

fn bench_pipeline(c: &mut Criterion) {
    let mosaic = synthetic_input(2016, 1512, FilterPattern::rggb());
    let config = PipelineConfig::builder().algorithm(Algorithm::Ppg).rotation(3.0).build();

    let mut group = c.benchmark_group("pipeline_2016x1512");
    group.sample_size(10);
    group.bench_function("full display", |b| {
        b.iter(|| {
            let mut pipeline = Pipeline::new(mosaic.clone(), config.clone());
            pipeline.get_phase(Phase::Display, true).width()
        });
    });

    let mut pipeline = Pipeline::new(mosaic.clone(), config.clone());
    pipeline.get_phase(Phase::Display, true);
    group.bench_function("exposure change", |b| {
        let mut ev = 0.0;
        b.iter(|| {
            ev += 0.1;
            let mut params = pipeline.config().develop.clone();
            params.exposure = ev;
            pipeline.set_develop_params(params);
            pipeline.get_phase(Phase::Display, true).width()
        });
    });
    group.finish();
}

criterion_group!(benches, bench_bayer, bench_xtrans, bench_denoise, bench_pipeline);
criterion_main!(benches);
