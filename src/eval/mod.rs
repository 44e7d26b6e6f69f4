use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use burn::{
    data::{
        dataloader::{DataLoader, DataLoaderBuilder},
        dataset::Dataset,
    },
    nn::loss::{BinaryCrossEntropyLossConfig, CrossEntropyLossConfig},
    prelude::*,
    record::{FullPrecisionSettings, NamedMpkFileRecorder, RecorderError},
    tensor::activation::{sigmoid, softmax},
};
use ndarray::Array2;

use crate::{
    data::{
        batcher::{ClassificationBatch, ClassificationBatcher, Modality},
        dataset::{ClassFolderDataset, DatasetError, Task},
    },
    model::{
        head::{ClsHead, ClsHeadConfig, FeaturePooling},
        vit::{Arch, VisionTransformer},
    },
};

pub mod metrics;
pub mod predictions;

pub use metrics::{classification_report, ClassificationReport};
pub use predictions::Predictions;

#[derive(Debug)]
pub enum EvalError {
    Dataset(DatasetError),
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Json(serde_json::Error),
    Safetensors(safetensors::SafeTensorError),
    MissingTensor(&'static str),
    UnexpectedRank {
        tensor: &'static str,
        expected: usize,
        actual: usize,
    },
    Tensor(String),
    Recorder(RecorderError),
    InvalidConfig(String),
}

impl std::fmt::Display for EvalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dataset(err) => write!(f, "dataset error: {err}"),
            Self::Io { path, source } => {
                write!(f, "io error at {}: {source}", path.display())
            }
            Self::Json(err) => write!(f, "json error: {err}"),
            Self::Safetensors(err) => write!(f, "safetensors error: {err}"),
            Self::MissingTensor(name) => write!(f, "tensor `{name}` missing from file"),
            Self::UnexpectedRank {
                tensor,
                expected,
                actual,
            } => write!(
                f,
                "tensor `{tensor}` rank mismatch: expected {expected}, got {actual}"
            ),
            Self::Tensor(err) => write!(f, "tensor error: {err}"),
            Self::Recorder(err) => write!(f, "recorder error: {err}"),
            Self::InvalidConfig(err) => write!(f, "invalid configuration: {err}"),
        }
    }
}

impl std::error::Error for EvalError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Dataset(err) => Some(err),
            Self::Io { source, .. } => Some(source),
            Self::Json(err) => Some(err),
            Self::Safetensors(err) => Some(err),
            Self::Recorder(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DatasetError> for EvalError {
    fn from(err: DatasetError) -> Self {
        Self::Dataset(err)
    }
}

impl From<serde_json::Error> for EvalError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err)
    }
}

impl From<safetensors::SafeTensorError> for EvalError {
    fn from(err: safetensors::SafeTensorError) -> Self {
        Self::Safetensors(err)
    }
}

impl From<RecorderError> for EvalError {
    fn from(err: RecorderError) -> Self {
        Self::Recorder(err)
    }
}

/// Everything one evaluation run needs. Saved as `config.json` next to
/// the outputs so a run can be reproduced.
#[derive(Config, Debug)]
pub struct EvalConfig {
    /// Dataset root holding the `test/<class_folder>/` tree.
    pub data_path: PathBuf,
    /// Directory holding `backbone.mpk` and optionally `classifier.mpk`.
    pub weights: PathBuf,
    pub output_dir: PathBuf,
    #[config(default = "Arch::VitBase")]
    pub arch: Arch,
    #[config(default = "224")]
    pub input_size: usize,
    #[config(default = "16")]
    pub patch_size: usize,
    #[config(default = "4")]
    pub n_last_blocks: usize,
    #[config(default = "FeaturePooling::ClsToken")]
    pub pooling: FeaturePooling,
    /// Explicit task; inferred from `data_path` when absent.
    #[config(default = "None")]
    pub task: Option<Task>,
    #[config(default = "Modality::Fundus")]
    pub modality: Modality,
    #[config(default = "128")]
    pub batch_size: usize,
    #[config(default = "10")]
    pub num_workers: usize,
    #[config(default = "0")]
    pub seed: u64,
    #[config(default = "3")]
    pub head_layers: usize,
    /// Overrides the task-derived class count, e.g. `1` for a
    /// single-logit screening head.
    #[config(default = "None")]
    pub num_classes: Option<usize>,
    /// Batches between progress lines, `0` to disable.
    #[config(default = "20")]
    pub log_interval: usize,
}

impl EvalConfig {
    pub fn task(&self) -> Task {
        self.task.unwrap_or_else(|| Task::detect(&self.data_path))
    }
}

/// Report plus the raw predictions it was computed from.
#[derive(Debug)]
pub struct Evaluation {
    pub report: ClassificationReport,
    pub predictions: Predictions,
}

/// Runs the full evaluation: build the loader, restore the weights, run
/// batched inference, compute the metrics and persist every artifact
/// under `output_dir`.
pub fn evaluate<B: Backend>(
    config: &EvalConfig,
    device: &B::Device,
) -> Result<Evaluation, EvalError> {
    if !matches!(config.head_layers, 1 | 3) {
        return Err(EvalError::InvalidConfig(format!(
            "head_layers must be 1 or 3, got {}",
            config.head_layers,
        )));
    }

    B::seed(config.seed);

    let task = config.task();
    let num_classes = config.num_classes.unwrap_or_else(|| task.num_classes());
    log::info!(
        "evaluating {} on task {} ({} classes, modality {})",
        config.arch,
        task,
        num_classes,
        config.modality,
    );

    let dataset = ClassFolderDataset::new(&config.data_path, "test", task, config.input_size)?;
    log::info!("data loaded with {} test images", dataset.len());
    let order = dataset.paths();

    let batcher =
        ClassificationBatcher::<B>::new(device.clone(), config.modality, config.input_size);
    let mut builder = DataLoaderBuilder::new(batcher).batch_size(config.batch_size);
    if config.num_workers > 0 {
        builder = builder.num_workers(config.num_workers);
    }
    let loader = builder.build(dataset);

    let vit_config = config
        .arch
        .config()
        .with_image_size(config.input_size)
        .with_patch_size(config.patch_size);
    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();

    let model: VisionTransformer<B> = vit_config
        .init(device)
        .load_file(config.weights.join("backbone"), &recorder, device)?;

    let feature_dim = config
        .pooling
        .feature_dim(vit_config.embedding_dimension, config.n_last_blocks);
    let head: ClsHead<B> = ClsHeadConfig::new(feature_dim, num_classes)
        .with_layers(config.head_layers)
        .init(device);
    let head = if config.weights.join("classifier.mpk").is_file() {
        head.load_file(config.weights.join("classifier"), &recorder, device)?
    } else {
        log::warn!(
            "no classifier record under {}, evaluating with randomly initialized head",
            config.weights.display(),
        );
        head
    };

    let output = validate(
        loader,
        &model,
        &head,
        config.pooling,
        config.n_last_blocks,
        config.log_interval,
        device,
    )?;
    let (predictions, predicted) =
        into_dataset_order(output.predictions, output.predicted, &output.paths, &order)?;

    let class_names = class_names(task, num_classes);
    let targets: Vec<usize> = predictions.targets.iter().map(|&t| t as usize).collect();
    let report = classification_report(
        &class_names,
        &predictions.probabilities,
        &targets,
        &predicted,
        output.loss,
    );

    std::fs::create_dir_all(&config.output_dir).map_err(|source| EvalError::Io {
        path: config.output_dir.clone(),
        source,
    })?;
    let predictions_path = predictions.save(&config.output_dir)?;
    let metrics_path = report.save(&config.output_dir)?;
    let config_path = config.output_dir.join("config.json");
    config.save(&config_path).map_err(|source| EvalError::Io {
        path: config_path.clone(),
        source,
    })?;
    log::info!(
        "wrote {}, {} and {}",
        predictions_path.display(),
        metrics_path.display(),
        config_path.display(),
    );

    Ok(Evaluation {
        report,
        predictions,
    })
}

/// Raw outputs of one validation pass, rows in loader arrival order.
#[derive(Debug)]
pub struct ValidationOutput {
    /// Unweighted mean of the per-batch losses.
    pub loss: f64,
    pub predictions: Predictions,
    pub predicted: Vec<usize>,
    /// Source file of each row.
    pub paths: Vec<PathBuf>,
}

/// Batched inference over the loader: feature extraction, pooling, the
/// classifier head, then the loss and per-sample scores.
pub fn validate<B: Backend>(
    loader: Arc<dyn DataLoader<ClassificationBatch<B>>>,
    model: &VisionTransformer<B>,
    head: &ClsHead<B>,
    pooling: FeaturePooling,
    n_last_blocks: usize,
    log_interval: usize,
    device: &B::Device,
) -> Result<ValidationOutput, EvalError> {
    let cross_entropy = CrossEntropyLossConfig::new().init(device);
    let binary = BinaryCrossEntropyLossConfig::new()
        .with_logits(true)
        .init(device);

    let mut loss_meter = RunningAverage::default();
    let mut columns = 0;
    let mut scores_flat = Vec::new();
    let mut targets = Vec::new();
    let mut predicted = Vec::new();
    let mut paths = Vec::new();

    for (iteration, batch) in loader.iter().enumerate() {
        let outputs = model.get_intermediate_layers(batch.images, n_last_blocks);
        let features = pooling.pool(outputs);
        let logits = head.forward(features);

        let [_, num_class] = logits.shape().dims();
        columns = num_class;

        let (loss, scores, labels) = if num_class > 1 {
            let loss = cross_entropy.forward(logits.clone(), batch.targets.clone());
            let scores = softmax(logits, 1);
            let labels: Tensor<B, 1, Int> = scores.clone().argmax(1).squeeze(1);
            (loss, scores, labels)
        } else {
            let flat: Tensor<B, 1> = logits.clone().squeeze(1);
            let loss = binary.forward(flat, batch.targets.clone());
            let scores = sigmoid(logits);
            let labels: Tensor<B, 1, Int> = scores.clone().greater_elem(0.5).int().squeeze(1);
            (loss, scores, labels)
        };

        loss_meter.update(loss.into_scalar().elem::<f64>());

        scores_flat.extend(tensor_values::<B, 2, f32>(scores)?);
        targets.extend(int_values(batch.targets)?);
        predicted.extend(
            int_values(labels)?
                .into_iter()
                .map(|label| label as usize),
        );
        paths.extend(batch.paths);

        if log_interval > 0 && (iteration + 1) % log_interval == 0 {
            log::info!(
                "batch {}: {} images, running loss {:.4}",
                iteration + 1,
                targets.len(),
                loss_meter.mean(),
            );
        }
    }

    let rows = targets.len();
    let probabilities = Array2::from_shape_vec((rows, columns), scores_flat)
        .map_err(|err| EvalError::Tensor(format!("probability rows: {err}")))?;

    Ok(ValidationOutput {
        loss: loss_meter.mean(),
        predictions: Predictions::from_rows(probabilities, targets),
        predicted,
        paths,
    })
}

/// Multi-worker loaders yield batches in arrival order. Persisted rows
/// follow the dataset enumeration so each row stays attributable to its
/// source file.
fn into_dataset_order(
    predictions: Predictions,
    predicted: Vec<usize>,
    paths: &[PathBuf],
    order: &[PathBuf],
) -> Result<(Predictions, Vec<usize>), EvalError> {
    let position: HashMap<&Path, usize> = order
        .iter()
        .enumerate()
        .map(|(index, path)| (path.as_path(), index))
        .collect();
    let mut rows: Vec<usize> = (0..paths.len()).collect();
    rows.sort_by_key(|&row| {
        position
            .get(paths[row].as_path())
            .copied()
            .unwrap_or(usize::MAX)
    });

    let columns = predictions.num_columns();
    let mut scores = Vec::with_capacity(rows.len() * columns);
    let mut targets = Vec::with_capacity(rows.len());
    let mut labels = Vec::with_capacity(rows.len());
    for &row in &rows {
        scores.extend(predictions.probabilities.row(row).iter().copied());
        targets.push(predictions.targets[[row, 0]]);
        labels.push(predicted[row]);
    }

    let probabilities = Array2::from_shape_vec((rows.len(), columns), scores)
        .map_err(|err| EvalError::Tensor(format!("probability rows: {err}")))?;
    Ok((Predictions::from_rows(probabilities, targets), labels))
}

fn class_names(task: Task, num_classes: usize) -> Vec<String> {
    if num_classes == task.num_classes() {
        task.class_folders()
            .iter()
            .map(|name| name.to_string())
            .collect()
    } else if num_classes == 1 {
        vec!["positive".to_string()]
    } else {
        (0..num_classes).map(|index| format!("class_{index}")).collect()
    }
}

fn tensor_values<B: Backend, const D: usize, T: burn::tensor::Element>(
    tensor: Tensor<B, D>,
) -> Result<Vec<T>, EvalError> {
    tensor
        .into_data()
        .convert::<T>()
        .to_vec::<T>()
        .map_err(|err| EvalError::Tensor(format!("{err:?}")))
}

fn int_values<B: Backend>(tensor: Tensor<B, 1, Int>) -> Result<Vec<i64>, EvalError> {
    tensor
        .into_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .map_err(|err| EvalError::Tensor(format!("{err:?}")))
}

/// Unweighted mean of the values seen so far, the way the original
/// evaluation averaged its per-batch losses.
#[derive(Debug, Default)]
struct RunningAverage {
    sum: f64,
    count: usize,
}

impl RunningAverage {
    fn update(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}
