//! Patch identities, kinds and callbacks

use crate::compose::Next;
use crate::object::{Args, Object};
use crate::stack::TargetKey;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

/// Callback run before the method; may rewrite the argument list
pub type BeforeFn = dyn Fn(&Object, &mut Args) -> anyhow::Result<Option<Args>> + Send + Sync;

/// Callback that wraps the method; `next` runs the next-inner layer
pub type InsteadFn = dyn Fn(&Object, Args, &Next<'_>) -> anyhow::Result<Value> + Send + Sync;

/// Callback run after the method; returns the result to carry forward
pub type AfterFn = dyn Fn(&Object, &Args, Value) -> anyhow::Result<Value> + Send + Sync;

/// Registry-wide unique patch identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatchId(Arc<str>);

impl PatchId {
    #[inline]
    #[must_use]
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Owner tag check used for bulk teardown
    #[inline]
    #[must_use]
    pub fn has_prefix(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }
}

impl Borrow<str> for PatchId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PatchId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for PatchId {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

impl From<&String> for PatchId {
    fn from(value: &String) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for PatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which composition phase a patch joins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchKind {
    Before,
    Instead,
    After,
}

impl fmt::Display for PatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Before => "before",
            Self::Instead => "instead",
            Self::After => "after",
        })
    }
}

/// A behavioral modification, ready to be injected
#[derive(Clone)]
pub enum Patch {
    Before(Arc<BeforeFn>),
    Instead(Arc<InsteadFn>),
    After(Arc<AfterFn>),
}

impl Patch {
    /// Runs before the method with `(self, args)`
    ///
    /// Returning `Ok(Some(args))` replaces the argument list; `Ok(None)`
    /// keeps it, including any in-place edits.
    pub fn before<F>(callback: F) -> Self
    where
        F: Fn(&Object, &mut Args) -> anyhow::Result<Option<Args>> + Send + Sync + 'static,
    {
        Self::Before(Arc::new(callback))
    }

    /// Wraps the method with `(self, args, next)`
    ///
    /// Not calling `next` means neither the original method nor any older
    /// `instead` patch runs.
    pub fn instead<F>(callback: F) -> Self
    where
        F: Fn(&Object, Args, &Next<'_>) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self::Instead(Arc::new(callback))
    }

    /// Runs after the method with `(self, args, result)`
    pub fn after<F>(callback: F) -> Self
    where
        F: Fn(&Object, &Args, Value) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self::After(Arc::new(callback))
    }

    #[must_use]
    pub fn kind(&self) -> PatchKind {
        match self {
            Self::Before(_) => PatchKind::Before,
            Self::Instead(_) => PatchKind::Instead,
            Self::After(_) => PatchKind::After,
        }
    }
}

impl fmt::Debug for Patch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Patch::{}", self.kind())
    }
}

/// One registered patch inside a target stack
#[derive(Debug)]
pub(crate) struct PatchEntry {
    pub(crate) id: PatchId,
    pub(crate) patch: Patch,
    /// Registry-wide registration order
    pub(crate) seq: u64,
}

impl PatchEntry {
    pub(crate) fn info(&self, target: &TargetKey) -> PatchInfo {
        PatchInfo {
            id: self.id.clone(),
            kind: self.patch.kind(),
            target: target.clone(),
            seq: self.seq,
        }
    }
}

/// Public description of a registered patch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchInfo {
    pub id: PatchId,
    pub kind: PatchKind,
    pub target: TargetKey,
    pub seq: u64,
}
