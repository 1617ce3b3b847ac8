//! Configuration for firewall rules and dependency discovery

pub mod schema;
pub mod validator;

pub use schema::{AnalyzerConfig, NetworkConfig};
pub use validator::ConfigValidator;
