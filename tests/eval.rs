#![cfg(feature = "backend_ndarray")]

use std::path::Path;

use burn::{
    backend::ndarray::NdArray,
    module::Module,
    record::{FullPrecisionSettings, NamedMpkFileRecorder},
    tensor::backend::Backend,
};
use burn_visionfm::{
    data::dataset::Task,
    eval::{evaluate, EvalConfig, Predictions},
    model::vit::Arch,
};
use image::{Rgb, RgbImage};
use tempfile::TempDir;

type TestBackend = NdArray<f32>;

const IMAGE_SIZE: usize = 32;

fn write_image(path: &Path, level: u8) {
    let pixel = Rgb([level, 128, 255 - level]);
    RgbImage::from_pixel(IMAGE_SIZE as u32, IMAGE_SIZE as u32, pixel)
        .save(path)
        .expect("failed to write fixture image");
}

fn papila_tree(root: &Path, per_class: &[usize]) {
    for (label, folder) in Task::Papila.class_folders().iter().enumerate() {
        let dir = root.join("test").join(folder);
        std::fs::create_dir_all(&dir).expect("failed to create class dir");
        for index in 0..per_class[label] {
            let level = (label * 80 + index * 10) as u8;
            write_image(&dir.join(format!("{index}.png")), level);
        }
    }
}

fn test_config(data: &Path, weights: &Path, output: &Path) -> EvalConfig {
    EvalConfig::new(
        data.to_path_buf(),
        weights.to_path_buf(),
        output.to_path_buf(),
    )
    .with_arch(Arch::VitTiny)
    .with_input_size(IMAGE_SIZE)
    .with_n_last_blocks(2)
    .with_task(Some(Task::Papila))
    .with_batch_size(4)
    .with_num_workers(2)
    .with_log_interval(1)
}

fn save_backbone(weights: &Path, config: &EvalConfig) {
    std::fs::create_dir_all(weights).expect("failed to create weights dir");
    let device = <TestBackend as Backend>::Device::default();
    let model = config
        .arch
        .config()
        .with_image_size(config.input_size)
        .with_patch_size(config.patch_size)
        .init::<TestBackend>(&device);
    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    model
        .save_file(weights.join("backbone"), &recorder)
        .expect("failed to save backbone record");
}

#[test]
fn evaluates_a_papila_tree_end_to_end() {
    let dir = TempDir::new().unwrap();
    let data = dir.path().join("data");
    let weights = dir.path().join("weights");
    let output = dir.path().join("out");
    papila_tree(&data, &[2, 2, 2]);

    let config = test_config(&data, &weights, &output);
    save_backbone(&weights, &config);

    let device = <TestBackend as Backend>::Device::default();
    let evaluation = evaluate::<TestBackend>(&config, &device).expect("evaluation should succeed");

    assert_eq!(evaluation.predictions.num_samples(), 6);
    assert_eq!(evaluation.predictions.num_columns(), 3);
    for row in evaluation.predictions.probabilities.rows() {
        let sum: f32 = row.iter().sum();
        assert!((sum - 1.0).abs() < 1e-4, "softmax row sums to {sum}");
    }

    // rows follow the dataset enumeration even with two loader workers
    let targets: Vec<i64> = evaluation.predictions.targets.column(0).to_vec();
    assert_eq!(targets, vec![0, 0, 1, 1, 2, 2]);

    let report = &evaluation.report;
    assert!(report.loss.is_finite() && report.loss > 0.0);
    assert!((0.0..=1.0).contains(&report.accuracy));
    assert_eq!(report.per_class.len(), 3);

    assert!(output.join("predictions.safetensors").is_file());
    assert!(output.join("metrics.json").is_file());
    assert!(output.join("config.json").is_file());

    let reloaded = Predictions::load(&output.join("predictions.safetensors"))
        .expect("saved predictions should reload");
    assert_eq!(reloaded, evaluation.predictions);
}

#[test]
fn single_logit_override_runs_the_binary_branch() {
    let dir = TempDir::new().unwrap();
    let data = dir.path().join("data");
    let weights = dir.path().join("weights");
    let output = dir.path().join("out");
    // third class folder exists but holds no images
    papila_tree(&data, &[2, 2, 0]);

    let config = test_config(&data, &weights, &output).with_num_classes(Some(1));
    save_backbone(&weights, &config);

    let device = <TestBackend as Backend>::Device::default();
    let evaluation = evaluate::<TestBackend>(&config, &device).expect("evaluation should succeed");

    assert_eq!(evaluation.predictions.num_samples(), 4);
    assert_eq!(evaluation.predictions.num_columns(), 1);
    for score in evaluation.predictions.probabilities.iter() {
        assert!((0.0..=1.0).contains(score), "sigmoid score {score}");
    }
    assert_eq!(evaluation.report.per_class.len(), 1);
    assert_eq!(evaluation.report.per_class[0].class, "positive");
    assert!(evaluation.report.loss.is_finite());
}

#[test]
fn worker_count_does_not_change_the_rows() {
    let dir = TempDir::new().unwrap();
    let data = dir.path().join("data");
    let weights = dir.path().join("weights");
    papila_tree(&data, &[3, 2, 1]);

    let config_single =
        test_config(&data, &weights, &dir.path().join("out_single")).with_num_workers(1);
    let config_multi =
        test_config(&data, &weights, &dir.path().join("out_multi")).with_num_workers(3);
    save_backbone(&weights, &config_single);
    let device = <TestBackend as Backend>::Device::default();

    let single = evaluate::<TestBackend>(&config_single, &device).expect("single worker run");
    let multi = evaluate::<TestBackend>(&config_multi, &device).expect("multi worker run");

    assert_eq!(single.predictions, multi.predictions);
    assert_eq!(single.report.accuracy, multi.report.accuracy);
}
