use burn::{prelude::*, tensor::activation::softmax};

#[derive(Config, Debug)]
pub struct AttentionConfig {
    pub dim: usize,
    #[config(default = "12")]
    pub num_heads: usize,
    #[config(default = "true")]
    pub qkv_bias: bool,
    #[config(default = "true")]
    pub proj_bias: bool,
    #[config(default = "0.0")]
    pub attn_drop: f64,
    #[config(default = "0.0")]
    pub proj_drop: f64,
}

impl AttentionConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Attention<B> {
        Attention::new(device, self.clone())
    }
}

/// Multi-head self attention with a fused qkv projection.
#[derive(Module, Debug)]
pub struct Attention<B: Backend> {
    pub qkv: nn::Linear<B>,
    pub attn_drop: nn::Dropout,
    pub proj: nn::Linear<B>,
    pub proj_drop: nn::Dropout,
    pub num_heads: usize,
    pub scale: f32,
}

impl<B: Backend> Attention<B> {
    pub fn new(device: &B::Device, config: AttentionConfig) -> Self {
        let head_dim = config.dim / config.num_heads;
        let scale = (head_dim as f32).powf(-0.5);

        let qkv = nn::LinearConfig::new(config.dim, config.dim * 3)
            .with_bias(config.qkv_bias)
            .init::<B>(device);

        let attn_drop = nn::DropoutConfig::new(config.attn_drop).init();

        let proj = nn::LinearConfig::new(config.dim, config.dim)
            .with_bias(config.proj_bias)
            .init::<B>(device);

        let proj_drop = nn::DropoutConfig::new(config.proj_drop).init();

        Self {
            qkv,
            attn_drop,
            proj,
            proj_drop,
            num_heads: config.num_heads,
            scale,
        }
    }

    #[allow(clippy::single_range_in_vec_init)]
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let [b, n, c] = x.shape().dims();

        let qkv = self
            .qkv
            .forward(x)
            .reshape([b, n, 3, self.num_heads, c / self.num_heads])
            .permute([2, 0, 3, 1, 4]);

        let q: Tensor<B, 4> = qkv.clone().slice([0..1]).squeeze(0);
        let k: Tensor<B, 4> = qkv.clone().slice([1..2]).squeeze(0);
        let v: Tensor<B, 4> = qkv.slice([2..3]).squeeze(0);

        let attn = (q * self.scale).matmul(k.swap_dims(2, 3));
        let attn = softmax(attn, 3);
        let attn = self.attn_drop.forward(attn);

        let x = attn.matmul(v).swap_dims(1, 2).reshape([b, n, c]);

        let x = self.proj.forward(x);
        self.proj_drop.forward(x)
    }
}
