//! Sparse graph attention: structure selection and multi-head aggregation

pub mod graph_attention;
pub mod structure;

pub use graph_attention::{AttentionOutput, MultiHeadAttentionBlock, SharedBlockWeights};
pub use structure::{top_k_filter, GraphStructureSelector};
