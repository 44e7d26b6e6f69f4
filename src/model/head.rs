use burn::prelude::*;
use serde::{Deserialize, Serialize};

/// How backbone token sequences are pooled into one feature vector per
/// image before classification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeaturePooling {
    /// Class token of each collected block, concatenated.
    ClsToken,
    /// Mean over the patch tokens of the last block.
    AvgPool,
    /// Both of the above, concatenated.
    ClsTokenAvgPool,
}

impl FeaturePooling {
    pub fn from_mode(mode: usize) -> Result<Self, String> {
        match mode {
            0 => Ok(Self::ClsToken),
            1 => Ok(Self::AvgPool),
            2 => Ok(Self::ClsTokenAvgPool),
            _ => Err(format!("unknown pooling mode `{mode}`, expected 0, 1 or 2")),
        }
    }

    pub fn mode(&self) -> usize {
        match self {
            Self::ClsToken => 0,
            Self::AvgPool => 1,
            Self::ClsTokenAvgPool => 2,
        }
    }

    /// Width of the pooled feature vector for a backbone of the given
    /// embedding dimension when `n_last_blocks` blocks are collected.
    pub fn feature_dim(&self, embedding_dimension: usize, n_last_blocks: usize) -> usize {
        match self {
            Self::ClsToken => embedding_dimension * n_last_blocks,
            Self::AvgPool => embedding_dimension,
            Self::ClsTokenAvgPool => embedding_dimension * (n_last_blocks + 1),
        }
    }

    /// Pools the normalized token sequences returned by
    /// `VisionTransformer::get_intermediate_layers`.
    pub fn pool<B: Backend>(&self, outputs: Vec<Tensor<B, 3>>) -> Tensor<B, 2> {
        assert!(!outputs.is_empty(), "pooling needs at least one block output");

        match self {
            Self::ClsToken => {
                let cls = outputs.iter().map(class_token).collect();
                Tensor::cat(cls, 1)
            }
            Self::AvgPool => patch_mean(outputs.last().unwrap()),
            Self::ClsTokenAvgPool => {
                let mut features: Vec<_> = outputs.iter().map(class_token).collect();
                features.push(patch_mean(outputs.last().unwrap()));
                Tensor::cat(features, 1)
            }
        }
    }
}

fn class_token<B: Backend>(tokens: &Tensor<B, 3>) -> Tensor<B, 2> {
    let [b, _n, _c] = tokens.shape().dims();
    tokens.clone().slice([0..b, 0..1]).squeeze(1)
}

fn patch_mean<B: Backend>(tokens: &Tensor<B, 3>) -> Tensor<B, 2> {
    let [b, n, _c] = tokens.shape().dims();
    tokens.clone().slice([0..b, 1..n]).mean_dim(1).squeeze(1)
}

#[derive(Config, Debug)]
pub struct ClsHeadConfig {
    pub in_features: usize,
    pub num_classes: usize,
    /// Either a single linear probe or the released three-layer head.
    #[config(default = "3")]
    pub layers: usize,
}

impl ClsHeadConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> ClsHead<B> {
        ClsHead::new(device, self.clone())
    }
}

/// Shallow classification head over pooled backbone features.
#[derive(Module, Debug)]
pub struct ClsHead<B: Backend> {
    fc1: nn::Linear<B>,
    fc2: Option<nn::Linear<B>>,
    fc3: Option<nn::Linear<B>>,
    act: nn::Gelu,
}

impl<B: Backend> ClsHead<B> {
    pub fn new(device: &B::Device, config: ClsHeadConfig) -> Self {
        assert!(
            matches!(config.layers, 1 | 3),
            "classification head supports 1 or 3 layers, got {}",
            config.layers,
        );

        let (fc1, fc2, fc3) = if config.layers == 1 {
            let fc1 = nn::LinearConfig::new(config.in_features, config.num_classes).init(device);
            (fc1, None, None)
        } else {
            let mid = config.in_features / 2;
            let narrow = config.in_features / 4;
            let fc1 = nn::LinearConfig::new(config.in_features, mid).init(device);
            let fc2 = nn::LinearConfig::new(mid, narrow).init(device);
            let fc3 = nn::LinearConfig::new(narrow, config.num_classes).init(device);
            (fc1, Some(fc2), Some(fc3))
        };

        Self {
            fc1,
            fc2,
            fc3,
            act: nn::Gelu::new(),
        }
    }

    pub fn forward(&self, features: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = self.fc1.forward(features);
        let x = match &self.fc2 {
            Some(fc2) => fc2.forward(self.act.forward(x)),
            None => x,
        };
        match &self.fc3 {
            Some(fc3) => fc3.forward(self.act.forward(x)),
            None => x,
        }
    }
}
