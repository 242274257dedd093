//! Patchbay Host
//!
//! The collaborators the engine needs to be useful inside a host
//! application:
//! - [`ModuleLocator`] / [`ModuleGraph`]: find live objects to patch
//! - [`Plugin`] / [`PluginHost`]: load consumers and clean up after them
//!
//! # Example
//!
//! ```rust,ignore
//! use patchbay_host::{ModuleGraph, PluginHost};
//! use patchbay_core::PatchRegistry;
//! use std::sync::Arc;
//!
//! let graph = Arc::new(ModuleGraph::new());
//! let host = PluginHost::new(PatchRegistry::new(), graph.clone());
//!
//! host.load(Arc::new(Announcements::default())).await?;
//! // ...
//! host.unload("announcements").await?;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod locator;
pub mod plugin;

pub use locator::{LocateError, LocatorConfig, ModuleFilter, ModuleGraph, ModuleLocator};
pub use plugin::{HostError, Plugin, PluginContext, PluginHost};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
