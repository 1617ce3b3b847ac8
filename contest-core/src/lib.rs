//! Core library for contest-manager
//!
//! Ties the network primitives of `contest-netfilter` to the on-disk state
//! (configuration, whitelist, dependency cache) and to the host-level
//! restrictions that outlive a single command (boot persistence, USB
//! lockdown, account provisioning).

pub mod cache;
pub mod config;
pub mod error;
pub mod manager;
pub mod monitor;
pub mod persistence;
pub mod provision;
pub mod usb;
pub mod whitelist;

pub use cache::{DependencyCache, DependencyReport};
pub use config::{Config, ConfigLoader};
pub use error::{ManagerError, Result};
pub use manager::{ContestManager, RestrictReport, StatusReport};
pub use monitor::Monitor;
pub use persistence::{PersistMethod, PersistReport, Persistence};
pub use provision::Provisioner;
pub use usb::UsbRestrictor;
pub use whitelist::{Change, WhitelistStore};
