use std::path::PathBuf;

use burn::{data::dataloader::batcher::Batcher, prelude::*};
use serde::{Deserialize, Serialize};

use crate::data::dataset::ImageItem;

const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Imaging modality the checkpoint was pretrained on. Selects the channel
/// statistics applied before inference.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Fundus,
    Oct,
    Ffa,
    SlitLamp,
    Ultrasound,
    External,
}

impl Modality {
    pub fn parse(name: &str) -> Result<Self, String> {
        match name.to_ascii_lowercase().as_str() {
            "fundus" => Ok(Self::Fundus),
            "oct" => Ok(Self::Oct),
            "ffa" => Ok(Self::Ffa),
            "slitlamp" | "slit_lamp" => Ok(Self::SlitLamp),
            "ultrasound" => Ok(Self::Ultrasound),
            "external" => Ok(Self::External),
            _ => Err(format!(
                "unknown modality `{name}`, expected one of Fundus, OCT, FFA, \
                 SlitLamp, Ultrasound, External"
            )),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Fundus => "Fundus",
            Self::Oct => "OCT",
            Self::Ffa => "FFA",
            Self::SlitLamp => "SlitLamp",
            Self::Ultrasound => "Ultrasound",
            Self::External => "External",
        }
    }

    /// Per-channel `(mean, std)`. Fundus images keep the ImageNet
    /// statistics, the other modalities are centered at 0.5.
    pub fn stats(&self) -> ([f32; 3], [f32; 3]) {
        match self {
            Self::Fundus => (IMAGENET_MEAN, IMAGENET_STD),
            _ => ([0.5, 0.5, 0.5], [0.5, 0.5, 0.5]),
        }
    }
}

impl std::str::FromStr for Modality {
    type Err = String;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Self::parse(name)
    }
}

impl std::fmt::Display for Modality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Channel normalization as broadcastable `[1, 3, 1, 1]` tensors.
#[derive(Clone, Debug)]
pub struct Normalizer<B: Backend> {
    pub mean: Tensor<B, 4>,
    pub std: Tensor<B, 4>,
}

impl<B: Backend> Normalizer<B> {
    pub fn new(device: &B::Device, modality: Modality) -> Self {
        let (mean, std) = modality.stats();
        Self {
            mean: Tensor::<B, 1>::from_floats(mean, device).reshape([1, 3, 1, 1]),
            std: Tensor::<B, 1>::from_floats(std, device).reshape([1, 3, 1, 1]),
        }
    }

    /// Expects input in `[0, 1]`.
    pub fn normalize(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        (input - self.mean.clone()) / self.std.clone()
    }
}

#[derive(Clone, Debug)]
pub struct ClassificationBatch<B: Backend> {
    /// Normalized images, `[batch, 3, size, size]`.
    pub images: Tensor<B, 4>,
    /// Class labels, `[batch]`.
    pub targets: Tensor<B, 1, Int>,
    /// Source file per row, for diagnostics.
    pub paths: Vec<PathBuf>,
}

#[derive(Clone)]
pub struct ClassificationBatcher<B: Backend> {
    device: B::Device,
    normalizer: Normalizer<B>,
    image_size: usize,
}

impl<B: Backend> ClassificationBatcher<B> {
    pub fn new(device: B::Device, modality: Modality, image_size: usize) -> Self {
        Self {
            normalizer: Normalizer::new(&device, modality),
            device,
            image_size,
        }
    }
}

impl<B: Backend> Batcher<ImageItem, ClassificationBatch<B>> for ClassificationBatcher<B> {
    fn batch(&self, items: Vec<ImageItem>) -> ClassificationBatch<B> {
        let size = self.image_size;

        let targets = items
            .iter()
            .map(|item| {
                Tensor::<B, 1, Int>::from_data(
                    TensorData::from([(item.label as i64).elem::<B::IntElem>()]),
                    &self.device,
                )
            })
            .collect();

        let paths = items.iter().map(|item| item.path.clone()).collect();

        let images = items
            .into_iter()
            .map(|item| {
                let data = TensorData::new(item.pixels, Shape::new([size, size, 3]));
                Tensor::<B, 3>::from_data(data.convert::<B::FloatElem>(), &self.device)
                    .permute([2, 0, 1])
            })
            .collect();

        let images = Tensor::stack(images, 0);
        let targets = Tensor::cat(targets, 0);

        let images = self.normalizer.normalize(images);

        ClassificationBatch {
            images,
            targets,
            paths,
        }
    }
}

#[cfg(test)]
#[cfg(feature = "backend_ndarray")]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    type TestBackend = burn::backend::NdArray<f32>;

    fn item(pixels: Vec<f32>, label: usize) -> ImageItem {
        ImageItem {
            pixels,
            label,
            path: PathBuf::from("fake.png"),
        }
    }

    #[test]
    fn stacks_items_into_nchw() {
        let device = Default::default();
        let batcher =
            ClassificationBatcher::<TestBackend>::new(device, Modality::External, 2);

        let batch = batcher.batch(vec![
            item(vec![0.0; 12], 0),
            item(vec![1.0; 12], 2),
        ]);

        assert_eq!(batch.images.shape().dims, [2, 3, 2, 2]);
        assert_eq!(batch.targets.shape().dims, [2]);
        let targets = batch.targets.into_data().convert::<i64>();
        assert_eq!(targets.to_vec::<i64>().unwrap(), vec![0, 2]);
    }

    #[test]
    fn normalizes_channels_separately() {
        let device = Default::default();
        let batcher =
            ClassificationBatcher::<TestBackend>::new(device, Modality::External, 1);

        // One pixel with R=1, G=0.5, B=0.
        let batch = batcher.batch(vec![item(vec![1.0, 0.5, 0.0], 0)]);

        let values = batch
            .images
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .unwrap();
        assert_relative_eq!(values[0], 1.0, epsilon = 1e-6);
        assert_relative_eq!(values[1], 0.0, epsilon = 1e-6);
        assert_relative_eq!(values[2], -1.0, epsilon = 1e-6);
    }

    #[test]
    fn fundus_uses_imagenet_stats() {
        let (mean, std) = Modality::Fundus.stats();
        assert_relative_eq!(mean[0], 0.485);
        assert_relative_eq!(std[2], 0.225);

        let (mean, std) = Modality::Oct.stats();
        assert_eq!(mean, [0.5, 0.5, 0.5]);
        assert_eq!(std, [0.5, 0.5, 0.5]);
    }
}
