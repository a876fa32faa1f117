//! IDM Directory - Okta and LDAP backends behind one directory facade
//!
//! This crate provides:
//! - `OktaUserDao`: the cloud directory, normally the primary
//! - `LdapUserDao`: the legacy directory, normally the secondary
//! - `FallbackListener`: the bridge keeping secondary-owned state in sync
//! - `Directory`: the facade callers use
//!
//! # Architecture
//!
//! Both DAOs implement the `UserDao` and `GroupDao` traits from `idm-core`
//! and talk to their services through the `OktaClient` and `LdapClient`
//! traits. The `memory` feature provides in-memory implementations of both
//! clients.

pub mod bridge;
pub mod config;
pub mod directory;
pub mod providers;

#[cfg(any(test, feature = "memory"))]
pub mod memory;

#[cfg(test)]
mod tests;

pub use bridge::FallbackListener;
pub use config::{DirectorySettings, LdapSettings, OktaSettings};
pub use directory::Directory;
pub use providers::ldap::LdapUserDao;
pub use providers::okta::OktaUserDao;

#[cfg(any(test, feature = "memory"))]
pub use memory::{InMemoryLdapClient, InMemoryOktaClient};

// Re-export core types
pub use idm_core::*;
