use burn::prelude::*;

use crate::layers::{
    attention::{Attention, AttentionConfig},
    mlp::{Mlp, MlpConfig},
};

#[derive(Config, Debug)]
pub struct BlockConfig {
    pub attn: AttentionConfig,
    #[config(default = "4.0")]
    pub mlp_ratio: f64,
    #[config(default = "1e-6")]
    pub layer_norm_eps: f64,
}

impl BlockConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Block<B> {
        Block::new(device, self.clone())
    }
}

/// Pre-norm transformer encoder block.
#[derive(Module, Debug)]
pub struct Block<B: Backend> {
    norm1: nn::LayerNorm<B>,
    attn: Attention<B>,
    norm2: nn::LayerNorm<B>,
    mlp: Mlp<B>,
}

impl<B: Backend> Block<B> {
    pub fn new(device: &B::Device, config: BlockConfig) -> Self {
        let dim = config.attn.dim;
        let norm1 = nn::LayerNormConfig::new(dim)
            .with_epsilon(config.layer_norm_eps)
            .init(device);
        let attn = config.attn.init(device);

        let norm2 = nn::LayerNormConfig::new(dim)
            .with_epsilon(config.layer_norm_eps)
            .init(device);

        let hidden = (dim as f64 * config.mlp_ratio) as usize;
        let mlp = MlpConfig::new(dim, hidden)
            .with_dropout(config.attn.proj_drop)
            .init(device);

        Self {
            norm1,
            attn,
            norm2,
            mlp,
        }
    }

    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let x = x.clone() + self.attn.forward(self.norm1.forward(x));
        x.clone() + self.mlp.forward(self.norm2.forward(x))
    }
}
