//! Patchbay Core
//!
//! Method interception for live objects: independent callers attach,
//! stack, and later remove patches on a method without touching its source
//! and without knowing about each other.
//!
//! # Core Concepts
//!
//! - [`Object`]: a live object whose slots hold values or [`Method`]s
//! - [`Patch`]: a `before`, `instead` or `after` callback
//! - [`PatchRegistry`]: installs wrappers, composes patches, restores originals
//! - [`Next`]: continuation handed to `instead` patches
//!
//! # Example
//!
//! ```rust
//! use patchbay_core::{Object, PatchRegistry};
//! use serde_json::json;
//!
//! let greeter = Object::new("Greeter");
//! greeter.define_method("greet", |_, args| {
//!     json!(format!("Hi {}", args[0].as_str().unwrap_or_default()))
//! });
//!
//! let registry = PatchRegistry::new();
//! registry
//!     .after("shout", &greeter, "greet", |_, _, res| {
//!         Ok(json!(format!("{}!", res.as_str().unwrap_or_default())))
//!     })
//!     .unwrap();
//!
//! assert_eq!(greeter.call("greet", vec![json!("Bob")]).unwrap(), json!("Hi Bob!"));
//! assert!(registry.uninject("shout"));
//! assert_eq!(greeter.call("greet", vec![json!("Bob")]).unwrap(), json!("Hi Bob"));
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod compose;
mod error;
mod failure;
mod object;
mod patch;
mod registry;
mod stack;

// Re-exports
pub use compose::Next;
pub use error::{CallError, InjectError, InvalidTargetReason, RegistryError};
pub use failure::CallbackFailure;
pub use object::{Args, Method, Object, ObjectId, ObjectRef, Slot};
pub use patch::{AfterFn, BeforeFn, InsteadFn, Patch, PatchId, PatchInfo, PatchKind};
pub use registry::{PatchRegistry, RegistryConfig};
pub use stack::TargetKey;

pub use serde_json::{json, Value};

use once_cell::sync::Lazy;

static GLOBAL: Lazy<PatchRegistry> = Lazy::new(PatchRegistry::new);

/// The process-wide registry
///
/// Components that own plugin loading should prefer holding their own
/// [`PatchRegistry`]; this instance exists for callers that just need "the"
/// registry.
#[must_use]
pub fn global() -> &'static PatchRegistry {
    &GLOBAL
}

/// [`PatchRegistry::inject`] on the process-wide registry
pub fn inject(
    id: impl Into<PatchId>,
    target: &ObjectRef,
    method: &str,
    patch: Patch,
) -> Result<(), InjectError> {
    global().inject(id, target, method, patch)
}

/// [`PatchRegistry::uninject`] on the process-wide registry
pub fn uninject(id: &str) -> bool {
    global().uninject(id)
}

/// [`PatchRegistry::uninject_all`] on the process-wide registry
pub fn uninject_all(predicate: impl Fn(&PatchId) -> bool) -> usize {
    global().uninject_all(predicate)
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
