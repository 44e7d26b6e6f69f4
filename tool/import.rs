use std::path::PathBuf;

use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder};
use burn_import::pytorch::{LoadArgs, PyTorchFileRecorder};
use clap::Parser;

use burn_visionfm::model::{head::ClsHeadRecord, vit::VisionTransformerRecord};

type Backend = burn::backend::NdArray<f32>;

#[derive(Parser, Debug)]
#[command(
    name = "import",
    about = "Convert a VisionFM PyTorch checkpoint into burn NamedMpk records"
)]
struct ImportArgs {
    /// Path to the `.pth` checkpoint.
    #[arg(long)]
    checkpoint: PathBuf,
    /// Directory the `backbone.mpk` and `classifier.mpk` records are written to.
    #[arg(long, default_value = "assets/models")]
    output_dir: PathBuf,
    /// Top-level key holding the backbone state dict.
    #[arg(long, default_value = "visionfm_state_dict")]
    checkpoint_key: String,
}

fn main() {
    let args = ImportArgs::parse();
    let device = Default::default();

    std::fs::create_dir_all(&args.output_dir).expect("failed to create output directory");
    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();

    println!(
        "loading backbone weights from {} (key `{}`)",
        args.checkpoint.display(),
        args.checkpoint_key,
    );
    let load_args = LoadArgs::new(args.checkpoint.clone())
        .with_top_level_key(&args.checkpoint_key)
        .with_key_remap("module\\.(.+)", "$1")
        .with_key_remap("backbone\\.(.+)", "$1");
    let backbone: VisionTransformerRecord<Backend> =
        PyTorchFileRecorder::<FullPrecisionSettings>::default()
            .load(load_args, &device)
            .expect("failed to load backbone state dict");

    let backbone_path = args.output_dir.join("backbone");
    recorder
        .record(backbone, backbone_path.clone())
        .expect("failed to save backbone record");
    println!("wrote {}.mpk", backbone_path.display());

    // Fine-tuned checkpoints carry the classifier next to the backbone;
    // pretrain-only checkpoints do not.
    let load_args = LoadArgs::new(args.checkpoint.clone())
        .with_top_level_key("classifier_state_dict")
        .with_key_remap("module\\.(.+)", "$1")
        .with_key_remap("head\\.0\\.(.+)", "fc1.$1")
        .with_key_remap("head\\.2\\.(.+)", "fc2.$1")
        .with_key_remap("head\\.4\\.(.+)", "fc3.$1");
    match PyTorchFileRecorder::<FullPrecisionSettings>::default()
        .load::<ClsHeadRecord<Backend>>(load_args, &device)
    {
        Ok(classifier) => {
            let classifier_path = args.output_dir.join("classifier");
            recorder
                .record(classifier, classifier_path.clone())
                .expect("failed to save classifier record");
            println!("wrote {}.mpk", classifier_path.display());
        }
        Err(err) => {
            println!("no classifier weights found in the checkpoint ({err})");
            println!("evaluation will fall back to a randomly initialized head");
        }
    }
}
