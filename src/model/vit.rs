use burn::{
    module::Param,
    nn::Initializer,
    prelude::*,
};
use serde::{Deserialize, Serialize};

use crate::layers::{
    attention::AttentionConfig,
    block::{Block, BlockConfig},
    patch_embed::{PatchEmbed, PatchEmbedConfig},
};

/// Backbone presets matching the released VisionFM checkpoints.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Arch {
    VitTiny,
    VitSmall,
    VitBase,
    VitLarge,
}

impl Arch {
    pub fn parse(name: &str) -> Result<Self, String> {
        match name {
            "vit_tiny" => Ok(Self::VitTiny),
            "vit_small" => Ok(Self::VitSmall),
            "vit_base" => Ok(Self::VitBase),
            "vit_large" => Ok(Self::VitLarge),
            _ => Err(format!(
                "unknown architecture `{name}`, expected one of \
                 vit_tiny, vit_small, vit_base, vit_large"
            )),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::VitTiny => "vit_tiny",
            Self::VitSmall => "vit_small",
            Self::VitBase => "vit_base",
            Self::VitLarge => "vit_large",
        }
    }

    pub fn config(&self) -> VisionTransformerConfig {
        match self {
            Self::VitTiny => VisionTransformerConfig::vit_tiny(),
            Self::VitSmall => VisionTransformerConfig::vit_small(),
            Self::VitBase => VisionTransformerConfig::vit_base(),
            Self::VitLarge => VisionTransformerConfig::vit_large(),
        }
    }
}

impl std::str::FromStr for Arch {
    type Err = String;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Self::parse(name)
    }
}

impl std::fmt::Display for Arch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Config, Debug)]
pub struct VisionTransformerConfig {
    pub embedding_dimension: usize,
    pub depth: usize,
    pub num_heads: usize,
    #[config(default = "224")]
    pub image_size: usize,
    #[config(default = "16")]
    pub patch_size: usize,
    #[config(default = "3")]
    pub input_channels: usize,
    /// Image size the positional encoding was trained at. The stored grid is
    /// bicubically resampled when `image_size` differs.
    #[config(default = "224")]
    pub pretrain_image_size: usize,
    #[config(default = "4.0")]
    pub mlp_ratio: f64,
    #[config(default = "0.0")]
    pub dropout: f64,
    #[config(default = "1e-6")]
    pub layer_norm_eps: f64,
    #[config(default = "Initializer::Normal{mean: 0.0, std: 0.02}")]
    pub initializer: Initializer,
}

impl VisionTransformerConfig {
    pub fn vit_tiny() -> Self {
        Self::new(192, 12, 3)
    }

    pub fn vit_small() -> Self {
        Self::new(384, 12, 6)
    }

    pub fn vit_base() -> Self {
        Self::new(768, 12, 12)
    }

    pub fn vit_large() -> Self {
        Self::new(1024, 24, 16)
    }

    /// Patch grid side length at evaluation resolution.
    pub fn grid_size(&self) -> usize {
        self.image_size / self.patch_size
    }

    /// Number of patch positions held by the stored positional encoding.
    pub fn num_patches(&self) -> usize {
        let grid = self.pretrain_image_size / self.patch_size;
        grid * grid
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> VisionTransformer<B> {
        VisionTransformer::new(device, self.clone())
    }
}

#[derive(Debug, Clone)]
pub struct VitOutput<B: Backend> {
    pub x_norm_clstoken: Tensor<B, 2>,
    pub x_norm_patchtokens: Tensor<B, 3>,
    pub x_prenorm: Tensor<B, 3>,
}

#[derive(Module, Debug)]
pub struct VisionTransformer<B: Backend> {
    cls_token: Param<Tensor<B, 3>>,
    pub pos_embed: Param<Tensor<B, 3>>,
    patch_embed: PatchEmbed<B>,
    blocks: Vec<Block<B>>,
    norm: nn::LayerNorm<B>,
    interpolate: nn::interpolate::Interpolate2d,
}

impl<B: Backend> VisionTransformer<B> {
    pub fn new(device: &B::Device, config: VisionTransformerConfig) -> Self {
        let cls_token = config
            .initializer
            .init([1, 1, config.embedding_dimension], device);

        let pos_embed = config.initializer.init(
            [1, config.num_patches() + 1, config.embedding_dimension],
            device,
        );

        let patch_embed = PatchEmbedConfig::new()
            .with_image_size(config.image_size)
            .with_patch_size(config.patch_size)
            .with_input_channels(config.input_channels)
            .with_embedding_dimension(config.embedding_dimension)
            .init(device);

        let attn = AttentionConfig::new(config.embedding_dimension)
            .with_num_heads(config.num_heads)
            .with_attn_drop(config.dropout)
            .with_proj_drop(config.dropout);
        let block_config = BlockConfig::new(attn)
            .with_mlp_ratio(config.mlp_ratio)
            .with_layer_norm_eps(config.layer_norm_eps);

        let mut blocks = Vec::with_capacity(config.depth);
        for _ in 0..config.depth {
            blocks.push(block_config.init(device));
        }

        let norm = nn::LayerNormConfig::new(config.embedding_dimension)
            .with_epsilon(config.layer_norm_eps)
            .init(device);

        let grid = config.grid_size();
        let interpolate = nn::interpolate::Interpolate2dConfig::new()
            .with_output_size([grid, grid].into())
            .with_mode(nn::interpolate::InterpolateMode::Cubic)
            .init();

        Self {
            cls_token,
            pos_embed,
            patch_embed,
            blocks,
            norm,
            interpolate,
        }
    }

    pub fn depth(&self) -> usize {
        self.blocks.len()
    }

    /// Positional encoding for the incoming token count, resampling the
    /// stored patch grid when the resolution differs from pretraining.
    pub fn interpolate_pos_encoding(&self, x: Tensor<B, 3>, w: usize, h: usize) -> Tensor<B, 3> {
        let npatch = x.shape().dims[1] - 1;
        let stored = self.pos_embed.shape().dims[1] - 1;

        if npatch == stored && w == h {
            return self.pos_embed.val();
        }

        let [b_dim, n_dim, dim] = self.pos_embed.shape().dims();

        let class_pos_embed: Tensor<B, 2> =
            self.pos_embed.val().slice([0..b_dim, 0..1]).squeeze(1);
        let patch_pos_embed = self.pos_embed.val().slice([0..b_dim, 1..n_dim]);

        let m = stored.isqrt();
        assert!(stored == m * m, "stored patch grid should be square");

        let patch_pos_embed = self
            .interpolate
            .forward(
                patch_pos_embed
                    .reshape([1, m, m, dim])
                    .permute([0, 3, 1, 2]),
            )
            .permute([0, 2, 3, 1])
            .reshape([1_i32, -1, dim as i32]);

        Tensor::cat(
            vec![class_pos_embed.unsqueeze_dim(0), patch_pos_embed],
            1,
        )
    }

    /// Patchify, prepend the class token and add the positional encoding.
    pub fn prepare_tokens(&self, x: Tensor<B, 4>) -> Tensor<B, 3> {
        let [b, _c, w, h] = x.shape().dims();

        let x = self.patch_embed.forward(x);
        let x = Tensor::cat(
            vec![self.cls_token.val().expand([b as i64, -1, -1]), x],
            1,
        );

        let pos = self.interpolate_pos_encoding(x.clone(), w, h);
        x + pos
    }

    /// Normalized token sequences of the last `n` blocks, most shallow first.
    pub fn get_intermediate_layers(&self, x: Tensor<B, 4>, n: usize) -> Vec<Tensor<B, 3>> {
        let n = n.clamp(1, self.blocks.len());
        let start = self.blocks.len() - n;

        let mut tokens = self.prepare_tokens(x);
        let mut outputs = Vec::with_capacity(n);

        for (index, block) in self.blocks.iter().enumerate() {
            tokens = block.forward(tokens);

            if index >= start {
                outputs.push(self.norm.forward(tokens.clone()));
            }
        }

        outputs
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> VitOutput<B> {
        let mut x = self.prepare_tokens(x);

        for block in &self.blocks {
            x = block.forward(x);
        }

        let x_norm = self.norm.forward(x.clone());

        let [b_dim, n_dim, _] = x_norm.shape().dims();
        let x_norm_clstoken = x_norm.clone().slice([0..b_dim, 0..1]).squeeze(1);
        let x_norm_patchtokens = x_norm.slice([0..b_dim, 1..n_dim]);

        VitOutput {
            x_norm_clstoken,
            x_norm_patchtokens,
            x_prenorm: x,
        }
    }
}
