//! The patch registry
//!
//! [`PatchRegistry`] indexes every patch by id and owns one
//! [`TargetStack`] per patched (object, method). The first patch on a target
//! captures the original method and installs a wrapper; removing the last one
//! puts the original back.
//!
//! No registry lock is held while a patched method runs. The wrapper copies
//! the stack under the lock and composes from that copy, so injecting or
//! removing patches from inside a callback only affects later calls.

use crate::compose::{Composer, Next};
use crate::error::{InjectError, InvalidTargetReason, RegistryError};
use crate::failure::{CallbackFailure, FailureLog};
use crate::object::{Args, Method, Object, ObjectRef, Slot};
use crate::patch::{Patch, PatchEntry, PatchId, PatchInfo};
use crate::stack::{TargetKey, TargetStack};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

/// Registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// How many recent callback failures to keep for inspection
    pub failure_history: usize,
    /// Contain panics raised by callbacks like returned errors
    ///
    /// Containment happens after unwinding starts, so the process panic
    /// hook still runs for each contained panic. Hosts that want
    /// [`PatchRegistry::failures`] and `tracing` as the only channel install
    /// their own hook with [`std::panic::set_hook`].
    pub catch_panics: bool,
}

impl RegistryConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    #[must_use]
    pub fn with_failure_history(mut self, capacity: usize) -> Self {
        self.failure_history = capacity;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_catch_panics(mut self, catch_panics: bool) -> Self {
        self.catch_panics = catch_panics;
        self
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            failure_history: 64,
            catch_panics: true,
        }
    }
}

#[derive(Default)]
struct RegistryState {
    /// id -> (target, seq within its stack), for removal by id alone
    index: HashMap<PatchId, (TargetKey, u64)>,
    stacks: HashMap<TargetKey, TargetStack>,
    next_seq: u64,
}

struct RegistryInner {
    config: RegistryConfig,
    state: Mutex<RegistryState>,
    failures: FailureLog,
}

impl Drop for RegistryInner {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        state.index.clear();
        for (_, stack) in state.stacks.drain() {
            stack.restore();
        }
    }
}

/// Index of all installed patches
///
/// Cheap to clone; clones share the same state. Dropping the last handle
/// restores every patched method.
#[derive(Clone)]
pub struct PatchRegistry {
    inner: Arc<RegistryInner>,
}

impl PatchRegistry {
    /// Create an empty registry with default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    #[must_use]
    pub fn with_config(config: RegistryConfig) -> Self {
        let failures = FailureLog::new(config.failure_history);
        Self {
            inner: Arc::new(RegistryInner {
                config,
                state: Mutex::new(RegistryState::default()),
                failures,
            }),
        }
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    /// Attach `patch` to `target.method`
    ///
    /// The patch applies to every later call. Fails without side effects if
    /// the id is taken or the method is missing or not callable.
    pub fn inject(
        &self,
        id: impl Into<PatchId>,
        target: &ObjectRef,
        method: &str,
        patch: Patch,
    ) -> Result<(), InjectError> {
        let id = id.into();
        let kind = patch.kind();
        let key = TargetKey::new(target.id(), method);

        let mut state = self.inner.state.lock();
        if state.index.contains_key(&id) {
            return Err(InjectError::DuplicateId(id));
        }

        let seq = state.next_seq;
        let stack = match state.stacks.entry(key.clone()) {
            Entry::Occupied(slot) => slot.into_mut(),
            Entry::Vacant(slot) => slot.insert(self.install_wrapper(target, key.clone())?),
        };
        stack.push(PatchEntry {
            id: id.clone(),
            patch,
            seq,
        });
        state.next_seq += 1;
        state.index.insert(id.clone(), (key, seq));

        tracing::debug!(patch = %id, kind = %kind, object = target.name(), method, "patch injected");
        Ok(())
    }

    /// Inject a `before` patch
    pub fn before<F>(
        &self,
        id: impl Into<PatchId>,
        target: &ObjectRef,
        method: &str,
        callback: F,
    ) -> Result<(), InjectError>
    where
        F: Fn(&Object, &mut Args) -> anyhow::Result<Option<Args>> + Send + Sync + 'static,
    {
        self.inject(id, target, method, Patch::before(callback))
    }

    /// Inject an `instead` patch
    pub fn instead<F>(
        &self,
        id: impl Into<PatchId>,
        target: &ObjectRef,
        method: &str,
        callback: F,
    ) -> Result<(), InjectError>
    where
        F: Fn(&Object, Args, &Next<'_>) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.inject(id, target, method, Patch::instead(callback))
    }

    /// Inject an `after` patch
    pub fn after<F>(
        &self,
        id: impl Into<PatchId>,
        target: &ObjectRef,
        method: &str,
        callback: F,
    ) -> Result<(), InjectError>
    where
        F: Fn(&Object, &Args, Value) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.inject(id, target, method, Patch::after(callback))
    }

    fn install_wrapper(
        &self,
        target: &ObjectRef,
        key: TargetKey,
    ) -> Result<TargetStack, InjectError> {
        let original = match target.get(&key.method) {
            Some(Slot::Method(method)) => method,
            Some(Slot::Value(_)) => {
                return Err(InjectError::invalid_target(
                    target.name(),
                    &key.method,
                    InvalidTargetReason::NotCallable,
                ))
            }
            None => {
                return Err(InjectError::invalid_target(
                    target.name(),
                    &key.method,
                    InvalidTargetReason::Missing,
                ))
            }
        };
        let inherited = !target.has_own(&key.method);
        let wrapper = wrapper_for(Arc::downgrade(&self.inner), key.clone(), original.clone());
        target.set_method(key.method.clone(), wrapper.clone());
        Ok(TargetStack::new(key, target, original, inherited, wrapper))
    }

    /// Remove the patch registered under `id`
    ///
    /// When it was the last patch on its target, the original method is
    /// restored by reference.
    pub fn remove(&self, id: &str) -> Result<PatchInfo, RegistryError> {
        let mut state = self.inner.state.lock();
        let unknown = || RegistryError::UnknownId(id.to_string());

        let (key, seq) = state.index.remove(id).ok_or_else(unknown)?;
        let stack = state.stacks.get_mut(&key).ok_or_else(unknown)?;
        let entry = stack.remove(seq).ok_or_else(unknown)?;
        let info = entry.info(&key);

        if stack.is_empty() {
            if let Some(stack) = state.stacks.remove(&key) {
                stack.restore();
            }
        }
        tracing::debug!(patch = %info.id, "patch removed");
        Ok(info)
    }

    /// Remove a patch; unknown ids are logged and reported as `false`
    ///
    /// Safe to call repeatedly or out of order during teardown.
    pub fn uninject(&self, id: &str) -> bool {
        match self.remove(id) {
            Ok(_) => true,
            Err(error) => {
                tracing::warn!("uninject failed: {error}");
                false
            }
        }
    }

    /// Remove every patch whose id matches `predicate`
    ///
    /// Returns how many were removed.
    ///
    /// `predicate` runs without the registry lock held, so it may query
    /// the registry itself.
    pub fn uninject_all(&self, predicate: impl Fn(&PatchId) -> bool) -> usize {
        let mut ids: Vec<PatchId> = self.inner.state.lock().index.keys().cloned().collect();
        ids.sort();
        ids.iter()
            .filter(|id| predicate(id))
            .filter(|id| self.remove(id.as_str()).is_ok())
            .count()
    }

    /// Remove every patch whose id starts with `prefix`
    pub fn uninject_prefix(&self, prefix: &str) -> usize {
        self.uninject_all(|id| id.has_prefix(prefix))
    }

    /// Remove all patches and forget recorded failures
    pub fn clear(&self) {
        let stacks: Vec<TargetStack> = {
            let mut state = self.inner.state.lock();
            state.index.clear();
            state.stacks.drain().map(|(_, stack)| stack).collect()
        };
        for stack in stacks {
            stack.restore();
        }
        self.inner.failures.take();
    }

    #[must_use]
    pub fn is_injected(&self, id: &str) -> bool {
        self.inner.state.lock().index.contains_key(id)
    }

    /// Number of installed patches
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.state.lock().index.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of (object, method) pairs currently wrapped
    #[must_use]
    pub fn target_count(&self) -> usize {
        self.inner.state.lock().stacks.len()
    }

    /// Patches on `target.method` in registration order
    #[must_use]
    pub fn patches_on(&self, target: &Object, method: &str) -> Vec<PatchInfo> {
        let key = TargetKey::new(target.id(), method);
        let state = self.inner.state.lock();
        state
            .stacks
            .get(&key)
            .map(|stack| stack.entries().map(|e| e.info(stack.key())).collect())
            .unwrap_or_default()
    }

    /// The method captured when `target.method` was first patched
    #[must_use]
    pub fn original_of(&self, target: &Object, method: &str) -> Option<Method> {
        let key = TargetKey::new(target.id(), method);
        let state = self.inner.state.lock();
        state.stacks.get(&key).map(|stack| stack.original().clone())
    }

    /// Recent callback failures, oldest first
    #[must_use]
    pub fn failures(&self) -> Vec<CallbackFailure> {
        self.inner.failures.snapshot()
    }

    /// Drain recorded callback failures
    pub fn take_failures(&self) -> Vec<CallbackFailure> {
        self.inner.failures.take()
    }
}

impl Default for PatchRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PatchRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("PatchRegistry")
            .field("patches", &state.index.len())
            .field("targets", &state.stacks.len())
            .field("config", &self.inner.config)
            .finish()
    }
}

/// Build the replacement installed on a target
///
/// It holds only a weak link to the registry and its own key. If the
/// registry is gone or the stack no longer exists, it behaves exactly like
/// the original.
fn wrapper_for(registry: Weak<RegistryInner>, key: TargetKey, original: Method) -> Method {
    Method::new(move |this, args| {
        let Some(inner) = registry.upgrade() else {
            return original.invoke(this, args);
        };
        let snapshot = inner.state.lock().stacks.get(&key).map(TargetStack::snapshot);
        match snapshot {
            Some(snapshot) => Composer::new(
                this,
                &original,
                &snapshot,
                &inner.failures,
                inner.config.catch_panics,
            )
            .run(args),
            None => original.invoke(this, args),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn counter_object() -> ObjectRef {
        let obj = Object::new("Counter");
        obj.define_method("value", |_, _| json!(1));
        obj
    }

    #[test]
    fn inject_installs_one_wrapper_per_target() {
        let registry = PatchRegistry::new();
        let obj = counter_object();
        let original = obj.method("value").unwrap();

        registry.after("a", &obj, "value", |_, _, r| Ok(r)).unwrap();
        let wrapper = obj.method("value").unwrap();
        registry.after("b", &obj, "value", |_, _, r| Ok(r)).unwrap();

        assert!(!Method::ptr_eq(&original, &wrapper));
        assert!(Method::ptr_eq(&wrapper, &obj.method("value").unwrap()));
        assert_eq!(registry.target_count(), 1);
        assert_eq!(registry.len(), 2);
        assert!(Method::ptr_eq(&registry.original_of(&obj, "value").unwrap(), &original));
    }

    #[test]
    fn failed_inject_leaves_no_trace() {
        let registry = PatchRegistry::new();
        let obj = counter_object();
        obj.set_value("count", 3);

        assert!(registry.after("a", &obj, "missing", |_, _, r| Ok(r)).is_err());
        assert!(registry.after("b", &obj, "count", |_, _, r| Ok(r)).is_err());
        assert!(registry.is_empty());
        assert_eq!(registry.target_count(), 0);
        assert!(!obj.has_own("missing"));
    }

    #[test]
    fn seq_follows_registration_order() {
        let registry = PatchRegistry::new();
        let obj = counter_object();
        registry.after("late", &obj, "value", |_, _, r| Ok(r)).unwrap();
        registry.before("early", &obj, "value", |_, _| Ok(None)).unwrap();

        let infos = registry.patches_on(&obj, "value");
        assert_eq!(infos.len(), 2);
        assert!(infos[0].seq < infos[1].seq);
        assert_eq!(infos[0].id.as_str(), "late");
    }

    #[test]
    fn clear_restores_all_targets() {
        let registry = PatchRegistry::new();
        let obj = counter_object();
        let original = obj.method("value").unwrap();
        registry.after("a", &obj, "value", |_, _, _| Ok(json!(2))).unwrap();

        registry.clear();
        assert!(registry.is_empty());
        assert!(Method::ptr_eq(&obj.method("value").unwrap(), &original));
    }

    #[test]
    fn dropping_registry_restores_originals() {
        let obj = counter_object();
        let original = obj.method("value").unwrap();
        {
            let registry = PatchRegistry::new();
            registry.after("a", &obj, "value", |_, _, _| Ok(json!(2))).unwrap();
            assert_eq!(obj.call("value", vec![]).unwrap(), json!(2));
        }
        assert!(Method::ptr_eq(&obj.method("value").unwrap(), &original));
    }

    #[test]
    fn dropped_target_is_forgotten_on_remove() {
        let registry = PatchRegistry::new();
        let obj = counter_object();
        registry.after("a", &obj, "value", |_, _, r| Ok(r)).unwrap();
        drop(obj);

        assert!(registry.uninject("a"));
        assert_eq!(registry.target_count(), 0);
    }

    #[test]
    fn uninject_all_predicate_may_query_registry() {
        let registry = PatchRegistry::new();
        let obj = counter_object();
        registry.after("keep", &obj, "value", |_, _, r| Ok(r)).unwrap();
        registry.after("drop-a", &obj, "value", |_, _, r| Ok(r)).unwrap();
        registry.after("drop-b", &obj, "value", |_, _, r| Ok(r)).unwrap();

        let removed = registry.uninject_all(|id| {
            registry.is_injected("keep") && id.has_prefix("drop-") && registry.len() > 1
        });
        assert_eq!(removed, 2);
        assert!(registry.is_injected("keep"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn config_builder() {
        let config = RegistryConfig::new()
            .with_failure_history(3)
            .with_catch_panics(false);
        let registry = PatchRegistry::with_config(config);
        assert_eq!(registry.config().failure_history, 3);
        assert!(!registry.config().catch_panics);
    }
}
