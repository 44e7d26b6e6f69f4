use std::{env, path::PathBuf};

use burn::{
    backend::{wgpu::WgpuDevice, Wgpu},
    data::dataloader::batcher::Batcher,
    prelude::*,
    record::{FullPrecisionSettings, NamedMpkFileRecorder},
};

use burn_visionfm::{
    data::{
        batcher::{ClassificationBatcher, Modality},
        dataset::ImageItem,
    },
    model::vit::VisionTransformerConfig,
};

fn main() {
    let image_path = env::args()
        .nth(1)
        .expect("usage: forward <image> [weights_dir]");
    let weights = env::args().nth(2).map(PathBuf::from);

    let device = WgpuDevice::default();
    let config = VisionTransformerConfig::vit_base();
    let mut model = config.init::<Wgpu>(&device);
    if let Some(dir) = weights {
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
        model = model
            .load_file(dir.join("backbone"), &recorder, &device)
            .expect("failed to load backbone record");
    }

    let size = config.image_size as u32;
    let image = image::open(&image_path)
        .expect("failed to open image")
        .resize_exact(size, size, image::imageops::FilterType::CatmullRom);
    let item = ImageItem {
        pixels: image.to_rgb32f().into_raw(),
        label: 0,
        path: PathBuf::from(&image_path),
    };

    let batcher =
        ClassificationBatcher::<Wgpu>::new(device.clone(), Modality::Fundus, config.image_size);
    let batch = batcher.batch(vec![item]);

    let output = model.forward(batch.images);
    let dims = output.x_norm_patchtokens.shape().dims;
    println!("patch tokens: {} x {}", dims[1], dims[2]);

    let mean = output.x_norm_clstoken.mean().into_scalar();
    println!("class token mean activation: {mean:.6}");
}
