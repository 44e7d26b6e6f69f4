pub mod head;
pub mod vit;
