//! Multihost Core - value types shared by the multi-host network orchestrator.
//!
//! This crate holds the leaf types that every stage of the orchestration
//! pipeline exchanges as text:
//!
//! - [`subnet`]: IPv4 CIDR ranges (`Subnet`), with containment and overlap
//!   checks backed by `ipnet`
//! - [`envfile`]: the `KEY=VALUE` reader used to load overlay allocations
//! - [`error`]: configuration errors raised while building those values
//!
//! # Example
//!
//! ```
//! use multihost_core::envfile::EnvFile;
//! use multihost_core::subnet::Subnet;
//!
//! let env = EnvFile::parse(b"FLANNEL_SUBNET=10.58.12.1/24\n").unwrap();
//! let subnet: Subnet = env.require("FLANNEL_SUBNET").unwrap().parse().unwrap();
//!
//! let whole: Subnet = "10.58.0.0/16".parse().unwrap();
//! assert!(whole.contains(&subnet));
//! ```

pub mod envfile;
pub mod error;
pub mod subnet;

pub use envfile::EnvFile;
pub use error::{CoreError, Result};
pub use subnet::Subnet;
