#![cfg_attr(not(feature = "backend_wgpu"), allow(dead_code))]

#[cfg(feature = "backend_wgpu")]
use burn::{backend::wgpu::Wgpu, prelude::*};
#[cfg(feature = "backend_wgpu")]
use burn_visionfm::model::{
    head::{ClsHeadConfig, FeaturePooling},
    vit::VisionTransformerConfig,
};
#[cfg(feature = "backend_wgpu")]
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};

#[cfg(feature = "backend_wgpu")]
criterion_group! {
    name = visionfm_benchmarks;
    config = Criterion::default().sample_size(500);
    targets = inference_benchmark,
}
#[cfg(feature = "backend_wgpu")]
criterion_main!(visionfm_benchmarks);

#[cfg(feature = "backend_wgpu")]
fn inference_benchmark(c: &mut Criterion) {
    let configs = [
        (VisionTransformerConfig::vit_tiny(), "vit_tiny"),
        (VisionTransformerConfig::vit_small(), "vit_small"),
        (VisionTransformerConfig::vit_base(), "vit_base"),
        // (VisionTransformerConfig::vit_large(), "vit_large"),
    ];
    let n_last_blocks = 4;
    let pooling = FeaturePooling::ClsToken;

    let mut group = c.benchmark_group("burn_visionfm_inference");
    for (config, name) in configs.iter() {
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::new("vit", name), &config, |b, &config| {
            let device = Default::default();
            let model = config.init::<Wgpu>(&device);
            let feature_dim = pooling.feature_dim(config.embedding_dimension, n_last_blocks);
            let head = ClsHeadConfig::new(feature_dim, 5).init::<Wgpu>(&device);
            let input: Tensor<Wgpu, 4> = Tensor::zeros(
                [
                    1,
                    config.input_channels,
                    config.image_size,
                    config.image_size,
                ],
                &device,
            );

            b.iter(|| {
                let outputs = model.get_intermediate_layers(input.clone(), n_last_blocks);
                head.forward(pooling.pool(outputs)).to_data()
            });
        });
    }
}

#[cfg(not(feature = "backend_wgpu"))]
fn main() {
    eprintln!(
        "visionfm benchmark requires `--features backend_wgpu` (fusion path). \
         Re-run with `cargo bench --features backend_wgpu`."
    );
}
