//! Model persistence
//!
//! - Binary model files with integrity checks
//! - Signatures and input examples for the tracking backend

mod serializer;
mod signature;

pub use serializer::{load_model, save_model, LoadedModel, ModelMetadata, SerializedModel};
pub use signature::{ColumnSpec, InputExample, ModelSignature, TensorSpec};
