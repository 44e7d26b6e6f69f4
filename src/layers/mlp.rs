use burn::prelude::*;

#[derive(Config, Debug)]
pub struct MlpConfig {
    pub in_features: usize,
    pub hidden_features: usize,
    #[config(default = "true")]
    pub bias: bool,
    #[config(default = "0.0")]
    pub dropout: f64,
}

impl MlpConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Mlp<B> {
        Mlp::new(device, self.clone())
    }
}

/// Two-layer feed-forward with GELU, applied token-wise.
#[derive(Module, Debug)]
pub struct Mlp<B: Backend> {
    pub fc1: nn::Linear<B>,
    pub fc2: nn::Linear<B>,
    act: nn::Gelu,
    dropout: nn::Dropout,
}

impl<B: Backend> Mlp<B> {
    pub fn new(device: &B::Device, config: MlpConfig) -> Self {
        let fc1 = nn::LinearConfig::new(config.in_features, config.hidden_features)
            .with_bias(config.bias)
            .init(device);
        let fc2 = nn::LinearConfig::new(config.hidden_features, config.in_features)
            .with_bias(config.bias)
            .init(device);

        Self {
            fc1,
            fc2,
            act: nn::Gelu::new(),
            dropout: nn::DropoutConfig::new(config.dropout).init(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let x = self.fc1.forward(x);
        let x = self.act.forward(x);
        let x = self.dropout.forward(x);
        let x = self.fc2.forward(x);
        self.dropout.forward(x)
    }
}
