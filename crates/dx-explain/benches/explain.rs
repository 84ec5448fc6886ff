//! Benchmarks for the two explainers on a synthetic spectral image.

use std::sync::Arc;

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use dx_core::config::{Architecture, PerturbationConfig, ScoreKind, SegmentationConfig};
use dx_core::frame::{ClassVocabulary, SpectralImage};
use dx_explain::segmentation::quickshift;
use dx_explain::{GradientExplainer, PerturbationExplainer};
use dx_model::{Classifier, Network};

fn striped_image() -> SpectralImage {
    let mut img = SpectralImage::new(224, 224);
    for y in 0..224u32 {
        for x in 0..224u32 {
            let band = ((y / 28) * 30) as u8;
            let t = ((x * 255) / 223) as u8;
            img.set_pixel(x, y, (band, t / 2, 255 - band));
        }
    }
    img
}

fn bench_quickshift(c: &mut Criterion) {
    let img = striped_image();
    let config = SegmentationConfig::default();
    c.bench_function("quickshift_224", |b| {
        b.iter(|| quickshift(black_box(&img), &config));
    });
}

fn bench_lime(c: &mut Criterion) {
    let img = striped_image();
    let clf = Classifier::from_architecture(Architecture::MobileNet, ClassVocabulary::default(), 0)
        .expect("preset classifier");
    let explainer = PerturbationExplainer::new(PerturbationConfig::default());
    c.bench_function("lime_100_samples", |b| {
        b.iter(|| explainer.explain(black_box(&img), |i| clf.probabilities(i), 100, 8));
    });
}

fn bench_gradcam(c: &mut Criterion) {
    let img = striped_image();
    let net = Network::from_architecture(Architecture::Vgg, 1000, 16).expect("vgg preset");
    let explainer = GradientExplainer::new(Arc::new(net), "block5_conv3", ScoreKind::Probability)
        .expect("layer exists");
    c.bench_function("gradcam_vgg", |b| {
        b.iter(|| explainer.explain(black_box(&img), 1));
    });
}

criterion_group!(benches, bench_quickshift, bench_lime, bench_gradcam);
criterion_main!(benches);
