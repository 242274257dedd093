//! Per-target patch stacks
//!
//! A [`TargetStack`] exists exactly while at least one patch is attached to
//! its (object, method) pair. It owns the preserved original method and the
//! wrapper installed in its place.

use crate::object::{Method, Object, ObjectId};
use crate::patch::{AfterFn, BeforeFn, InsteadFn, Patch, PatchEntry, PatchId};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};

/// The (object, method name) pair a patch modifies
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetKey {
    pub object: ObjectId,
    pub method: String,
}

impl TargetKey {
    #[must_use]
    pub fn new(object: ObjectId, method: impl Into<String>) -> Self {
        Self {
            object,
            method: method.into(),
        }
    }
}

impl fmt::Display for TargetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.object, self.method)
    }
}

/// A callback plus the id it was registered under
pub(crate) struct Layer<F: ?Sized> {
    pub(crate) id: PatchId,
    pub(crate) callback: Arc<F>,
}

type Layers<F> = SmallVec<[Layer<F>; 4]>;

/// Immutable view of a stack, taken once per call
///
/// Each phase keeps registration order.
pub(crate) struct StackSnapshot {
    pub(crate) label: Arc<str>,
    pub(crate) before: Layers<BeforeFn>,
    pub(crate) instead: Layers<InsteadFn>,
    pub(crate) after: Layers<AfterFn>,
}

pub(crate) struct TargetStack {
    key: TargetKey,
    label: Arc<str>,
    object: Weak<Object>,
    original: Method,
    /// The original was found on a prototype rather than as an own slot
    inherited: bool,
    wrapper: Method,
    /// Keyed by registry seq, so iteration is registration order
    entries: BTreeMap<u64, Arc<PatchEntry>>,
}

impl TargetStack {
    pub(crate) fn new(
        key: TargetKey,
        object: &Arc<Object>,
        original: Method,
        inherited: bool,
        wrapper: Method,
    ) -> Self {
        let label = Arc::from(format!("{}.{}", object.name(), key.method));
        Self {
            key,
            label,
            object: Arc::downgrade(object),
            original,
            inherited,
            wrapper,
            entries: BTreeMap::new(),
        }
    }

    #[inline]
    pub(crate) fn key(&self) -> &TargetKey {
        &self.key
    }

    #[inline]
    pub(crate) fn original(&self) -> &Method {
        &self.original
    }

    /// Entries in registration order
    pub(crate) fn entries(&self) -> impl Iterator<Item = &Arc<PatchEntry>> {
        self.entries.values()
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn push(&mut self, entry: PatchEntry) {
        self.entries.insert(entry.seq, Arc::new(entry));
    }

    /// Remove the entry registered with `seq`
    pub(crate) fn remove(&mut self, seq: u64) -> Option<Arc<PatchEntry>> {
        self.entries.remove(&seq)
    }

    pub(crate) fn snapshot(&self) -> StackSnapshot {
        let mut snapshot = StackSnapshot {
            label: Arc::clone(&self.label),
            before: SmallVec::new(),
            instead: SmallVec::new(),
            after: SmallVec::new(),
        };
        for entry in self.entries.values() {
            let id = entry.id.clone();
            match &entry.patch {
                Patch::Before(callback) => snapshot.before.push(Layer {
                    id,
                    callback: Arc::clone(callback),
                }),
                Patch::Instead(callback) => snapshot.instead.push(Layer {
                    id,
                    callback: Arc::clone(callback),
                }),
                Patch::After(callback) => snapshot.after.push(Layer {
                    id,
                    callback: Arc::clone(callback),
                }),
            }
        }
        snapshot
    }

    /// Put the original method back and drop the wrapper
    ///
    /// Only undone while the wrapper is still the installed slot; if someone
    /// else replaced it since, their method is left in place.
    pub(crate) fn restore(self) {
        let Some(object) = self.object.upgrade() else {
            tracing::debug!(target_label = %self.label, "target dropped before restore");
            return;
        };
        let replacement = if self.inherited {
            None
        } else {
            Some(self.original.clone())
        };
        if object.swap_own_method_if(&self.key.method, &self.wrapper, replacement) {
            tracing::debug!(target_label = %self.label, "original method restored");
        } else {
            tracing::warn!(
                target_label = %self.label,
                "wrapper was overwritten by a third party; leaving current method in place"
            );
        }
    }
}
