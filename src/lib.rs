//! Mail Actions — classification-driven email action pipeline.

pub mod config;
pub mod error;
pub mod pipeline;
pub mod store;
pub mod tools;
