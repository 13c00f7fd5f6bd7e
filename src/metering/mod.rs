pub mod reconciler;
pub mod signature;
