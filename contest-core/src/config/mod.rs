//! Configuration system for contest-manager
//!
//! - Config: every tunable, with built-in defaults for anything unset
//! - ConfigLoader: locates and validates the TOML file
//! - builtin: data embedded in the binary (the default whitelist)

pub mod builtin;
pub mod loader;
pub mod schema;

// Re-export commonly used types
pub use loader::ConfigLoader;
pub use schema::{
    AccountsConfig, CommonConfig, Config, MonitorConfig, PersistenceConfig, UsbConfig,
};
