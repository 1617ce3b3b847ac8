//! Network restriction primitives for contest-manager: domain handling,
//! dependency discovery, DNS resolution and per-user firewall chains

pub mod analyzer;
pub mod config;
pub mod dns;
pub mod domain;
pub mod error;
pub mod filter;
pub mod gateway;
pub mod rules;
pub mod user;

// Re-export commonly used types
pub use analyzer::{ChromiumLoader, DependencyAnalyzer, DependencyMap, PageCapture, PageLoader};
pub use config::{AnalyzerConfig, ConfigValidator, NetworkConfig};
pub use dns::{DnsResolver, HostResolver, ResolvedIpSet, SystemResolver};
pub use domain::Domain;
pub use error::{NetfilterError, Result, ValidationError};
pub use filter::{Classification, HostClassifier};
pub use gateway::{CommandOutput, HostGateway, Invocation, RecordingGateway, SystemGateway};
pub use rules::{ApplyReport, ChainNames, Family, FirewallStatus, RuleBuilder, RuleSet};
pub use user::Username;
