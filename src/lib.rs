pub mod data;
pub mod eval;
pub mod layers;
pub mod model;

#[cfg(test)]
mod tests {
    use super::model::{
        head::{ClsHeadConfig, FeaturePooling},
        vit::{VisionTransformer, VisionTransformerConfig},
    };
    use burn::prelude::*;

    #[cfg(feature = "backend_ndarray")]
    type NdArrayBackend = burn::backend::NdArray<f32>;

    fn test_config() -> VisionTransformerConfig {
        VisionTransformerConfig::vit_tiny()
            .with_image_size(32)
            .with_patch_size(16)
            .with_pretrain_image_size(32)
    }

    fn build_model<B: Backend>(device: &B::Device) -> VisionTransformer<B> {
        test_config().init(device)
    }

    #[test]
    #[cfg(feature = "backend_ndarray")]
    fn vit_initializes_ndarray() {
        let device = <NdArrayBackend as Backend>::Device::default();
        let _ = build_model::<NdArrayBackend>(&device);
    }

    #[test]
    #[cfg(feature = "backend_ndarray")]
    fn vit_roundtrip_record_ndarray() {
        let device = <NdArrayBackend as Backend>::Device::default();
        let model = build_model::<NdArrayBackend>(&device);
        let record = model.clone().into_record();
        let loaded = build_model::<NdArrayBackend>(&device).load_record(record);
        let size = loaded.pos_embed.shape().dims[2];
        assert_eq!(size, model.pos_embed.shape().dims[2]);
    }

    #[test]
    #[cfg(feature = "backend_ndarray")]
    fn vit_runs_inference_ndarray() {
        let device = <NdArrayBackend as Backend>::Device::default();
        let config = test_config();
        let embed_dim = config.embedding_dimension;
        let model: VisionTransformer<NdArrayBackend> = config.init(&device);
        let input = Tensor::<NdArrayBackend, 4>::zeros([1, 3, 32, 32], &device);
        let output = model.forward(input);
        assert_eq!(output.x_norm_clstoken.shape().dims, [1, embed_dim]);
        assert_eq!(output.x_norm_patchtokens.shape().dims, [1, 4, embed_dim]);
    }

    #[test]
    #[cfg(feature = "backend_ndarray")]
    fn intermediate_layers_clamp_to_depth() {
        let device = <NdArrayBackend as Backend>::Device::default();
        let model = build_model::<NdArrayBackend>(&device);
        let input = Tensor::<NdArrayBackend, 4>::zeros([2, 3, 32, 32], &device);

        let outputs = model.get_intermediate_layers(input.clone(), 2);
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[0].shape().dims, [2, 5, 192]);

        let outputs = model.get_intermediate_layers(input, 99);
        assert_eq!(outputs.len(), model.depth());
    }

    #[test]
    #[cfg(feature = "backend_ndarray")]
    fn pooled_features_feed_the_head() {
        let device = <NdArrayBackend as Backend>::Device::default();
        let model = build_model::<NdArrayBackend>(&device);
        let input = Tensor::<NdArrayBackend, 4>::zeros([2, 3, 32, 32], &device);
        let outputs = model.get_intermediate_layers(input, 2);

        let pooling = FeaturePooling::ClsTokenAvgPool;
        let features = pooling.pool(outputs);
        let feature_dim = pooling.feature_dim(192, 2);
        assert_eq!(features.shape().dims, [2, feature_dim]);

        let head = ClsHeadConfig::new(feature_dim, 5).init::<NdArrayBackend>(&device);
        let logits = head.forward(features);
        assert_eq!(logits.shape().dims, [2, 5]);
    }
}
