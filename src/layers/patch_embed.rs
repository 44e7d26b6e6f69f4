use burn::prelude::*;

#[derive(Config, Debug)]
pub struct PatchEmbedConfig {
    #[config(default = "224")]
    pub image_size: usize,
    #[config(default = "16")]
    pub patch_size: usize,
    #[config(default = "3")]
    pub input_channels: usize,
    #[config(default = "768")]
    pub embedding_dimension: usize,
}

impl PatchEmbedConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> PatchEmbed<B> {
        PatchEmbed::new(device, self.clone())
    }

    /// Patch grid side length for the configured image size.
    pub fn grid_size(&self) -> usize {
        self.image_size / self.patch_size
    }

    pub fn num_patches(&self) -> usize {
        self.grid_size() * self.grid_size()
    }
}

/// Splits an image into non-overlapping patches and projects each one
/// into the embedding space with a strided convolution.
#[derive(Module, Debug)]
pub struct PatchEmbed<B: Backend> {
    proj: nn::conv::Conv2d<B>,
}

impl<B: Backend> PatchEmbed<B> {
    pub fn new(device: &B::Device, config: PatchEmbedConfig) -> Self {
        let kernel_size = [config.patch_size, config.patch_size];
        let proj = nn::conv::Conv2dConfig::new(
            [config.input_channels, config.embedding_dimension],
            kernel_size,
        )
        .with_stride(kernel_size)
        .init(device);

        Self { proj }
    }

    /// `[batch, channels, height, width]` to `[batch, patches, embedding]`.
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 3> {
        self.proj.forward(x).flatten(2, 3).swap_dims(1, 2)
    }
}
