//! Error types for the patch registry and live objects
//!
//! Registry-management errors are reported synchronously to whoever manages
//! patches. Failures inside patch callbacks never show up here; they are
//! isolated per callback (see [`crate::CallbackFailure`]).

use crate::patch::PatchId;
use std::fmt;

/// Why a target cannot be patched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvalidTargetReason {
    /// No slot with that name on the object or its prototypes
    Missing,
    /// The slot exists but holds a plain value
    NotCallable,
}

impl fmt::Display for InvalidTargetReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => f.write_str("method does not exist"),
            Self::NotCallable => f.write_str("property is not callable"),
        }
    }
}

/// Errors returned by [`crate::PatchRegistry::inject`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InjectError {
    /// The id is already used by another patch anywhere in the registry
    #[error("patch id already registered: '{0}'")]
    DuplicateId(PatchId),

    /// The named slot is missing or not callable
    #[error("cannot patch {object}.{method}: {reason}")]
    InvalidTarget {
        object: String,
        method: String,
        reason: InvalidTargetReason,
    },
}

impl InjectError {
    /// Create invalid target error
    pub(crate) fn invalid_target(
        object: impl Into<String>,
        method: impl Into<String>,
        reason: InvalidTargetReason,
    ) -> Self {
        Self::InvalidTarget {
            object: object.into(),
            method: method.into(),
            reason,
        }
    }
}

/// Errors returned by [`crate::PatchRegistry::remove`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// No patch is registered under this id
    #[error("no patch registered under id '{0}'")]
    UnknownId(String),
}

/// Errors from [`crate::Object::call`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallError {
    /// Neither the object nor its prototypes have the slot
    #[error("{object}.{method} is not defined")]
    NoSuchMethod { object: String, method: String },

    /// The slot holds a value, not a method
    #[error("{object}.{method} is not a function")]
    NotCallable { object: String, method: String },
}
