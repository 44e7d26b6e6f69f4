pub mod attention;
pub mod block;
pub mod mlp;
pub mod patch_embed;
