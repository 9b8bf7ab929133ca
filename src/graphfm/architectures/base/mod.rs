//! Base architecture modules

pub mod attention;
pub mod block_stack;
pub mod checkpoint;
pub mod config;
pub mod data;
pub mod deterministic;
pub mod encoders;
pub mod layer;
pub mod loss_utils;
pub mod mlp;
pub mod model;
pub mod train;
pub mod validation;
