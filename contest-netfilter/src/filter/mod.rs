//! Dependency host filtering

pub mod classifier;

pub use classifier::{Classification, HostClassifier};
