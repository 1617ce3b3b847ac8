//! Per-user iptables/ip6tables rules

pub mod builder;
pub mod rule;

pub use builder::{ApplyReport, FamilyStatus, FirewallStatus, RuleBuilder};
pub use rule::{binding_args, ChainNames, Family, Protocol, Rule, RuleSet};
