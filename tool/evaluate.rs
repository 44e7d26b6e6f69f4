use std::path::PathBuf;

use burn::backend::{wgpu::WgpuDevice, Wgpu};
use clap::Parser;

use burn_visionfm::{
    data::{batcher::Modality, dataset::Task},
    eval::{evaluate, EvalConfig},
    model::{head::FeaturePooling, vit::Arch},
};

#[derive(Parser, Debug)]
#[command(
    name = "evaluate",
    about = "Evaluate a pretrained VisionFM backbone and classifier head on a test split"
)]
struct EvalArgs {
    /// Dataset root holding the `test/<class_folder>/` tree.
    #[arg(long)]
    data_path: PathBuf,
    /// Directory holding `backbone.mpk` and optionally `classifier.mpk`.
    #[arg(long)]
    weights: PathBuf,
    /// Where the metric report, raw predictions and config are written.
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,
    /// Backbone variant: vit_tiny, vit_small, vit_base or vit_large.
    #[arg(long, default_value = "vit_base", value_parser = Arch::parse)]
    arch: Arch,
    #[arg(long, default_value_t = 224)]
    input_size: usize,
    #[arg(long, default_value_t = 16)]
    patch_size: usize,
    /// How many of the last blocks feed the classifier.
    #[arg(long, default_value_t = 4)]
    n_last_blocks: usize,
    /// 0: class tokens, 1: mean patch tokens, 2: both.
    #[arg(long, default_value = "0", value_parser = parse_pooling)]
    avgpool_patchtokens: FeaturePooling,
    /// Evaluation task; inferred from the data path when omitted.
    #[arg(long, value_parser = Task::parse)]
    task: Option<Task>,
    #[arg(long, default_value = "Fundus", value_parser = Modality::parse)]
    modality: Modality,
    #[arg(long, default_value_t = 128)]
    batch_size: usize,
    #[arg(long, default_value_t = 10)]
    num_workers: usize,
    #[arg(long, default_value_t = 0)]
    seed: u64,
    /// Classifier depth, 1 or 3.
    #[arg(long, default_value_t = 3)]
    head_layers: usize,
    /// Overrides the task-derived class count, e.g. 1 for a single-logit head.
    #[arg(long)]
    num_classes: Option<usize>,
    /// Batches between progress log lines, 0 to disable.
    #[arg(long, default_value_t = 20)]
    log_interval: usize,
}

fn parse_pooling(value: &str) -> Result<FeaturePooling, String> {
    let mode = value.parse::<usize>().map_err(|err| err.to_string())?;
    FeaturePooling::from_mode(mode)
}

fn main() {
    let args = EvalArgs::parse();

    let config = EvalConfig::new(args.data_path, args.weights, args.output_dir)
        .with_arch(args.arch)
        .with_input_size(args.input_size)
        .with_patch_size(args.patch_size)
        .with_n_last_blocks(args.n_last_blocks)
        .with_pooling(args.avgpool_patchtokens)
        .with_task(args.task)
        .with_modality(args.modality)
        .with_batch_size(args.batch_size)
        .with_num_workers(args.num_workers)
        .with_seed(args.seed)
        .with_head_layers(args.head_layers)
        .with_num_classes(args.num_classes)
        .with_log_interval(args.log_interval);

    println!(
        "-------- Current Task: {} Modality: {} -------",
        config.task(),
        config.modality,
    );

    let device = WgpuDevice::default();
    match evaluate::<Wgpu>(&config, &device) {
        Ok(evaluation) => {
            println!("{}", evaluation.report);
            println!(
                "predictions and metrics written to {}",
                config.output_dir.display(),
            );
        }
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(1);
        }
    }
}
