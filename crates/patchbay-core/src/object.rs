//! Live objects
//!
//! An [`Object`] is a named table of slots. A slot holds either a plain
//! [`Value`] or a callable [`Method`]. Slots can be read and replaced at any
//! time through a shared reference, which is what lets the registry swap a
//! method for its wrapper and back without owning the object.
//!
//! Lookup walks the prototype chain, so patching a prototype's method
//! affects every instance that inherits it.

use crate::error::CallError;
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Argument list passed to methods and patches
pub type Args = Vec<Value>;

/// Shared handle to a live object
pub type ObjectRef = Arc<Object>;

type MethodFn = dyn Fn(&Object, Args) -> Value + Send + Sync;

/// Process-unique object identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId(pub u64);

impl ObjectId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A callable slot value
///
/// Cloning shares the underlying function; two clones compare equal under
/// [`Method::ptr_eq`].
#[derive(Clone)]
pub struct Method(Arc<MethodFn>);

impl Method {
    /// Wrap a function taking `(self, args)`
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(&Object, Args) -> Value + Send + Sync + 'static,
    {
        Self(Arc::new(func))
    }

    /// Invoke with `this` as the receiver
    #[inline]
    pub fn invoke(&self, this: &Object, args: Args) -> Value {
        (self.0)(this, args)
    }

    /// Reference identity, not behavioral equality
    #[inline]
    #[must_use]
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Method({:p})", Arc::as_ptr(&self.0).cast::<()>())
    }
}

/// Contents of one named slot
#[derive(Debug, Clone)]
pub enum Slot {
    /// Callable
    Method(Method),
    /// Plain data
    Value(Value),
}

impl Slot {
    /// Method stored in this slot, if callable
    #[must_use]
    pub fn as_method(&self) -> Option<&Method> {
        match self {
            Self::Method(method) => Some(method),
            Self::Value(_) => None,
        }
    }
}

/// A live object whose methods can be patched
pub struct Object {
    id: ObjectId,
    name: String,
    prototype: Option<ObjectRef>,
    slots: RwLock<IndexMap<String, Slot>>,
}

impl Object {
    /// Create an empty object
    #[must_use]
    pub fn new(name: impl Into<String>) -> ObjectRef {
        Arc::new(Self {
            id: ObjectId::next(),
            name: name.into(),
            prototype: None,
            slots: RwLock::new(IndexMap::new()),
        })
    }

    /// Create an object that inherits slots from `prototype`
    #[must_use]
    pub fn with_prototype(name: impl Into<String>, prototype: &ObjectRef) -> ObjectRef {
        Arc::new(Self {
            id: ObjectId::next(),
            name: name.into(),
            prototype: Some(Arc::clone(prototype)),
            slots: RwLock::new(IndexMap::new()),
        })
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Display name, used by module filters and in log lines
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    #[must_use]
    pub fn prototype(&self) -> Option<&ObjectRef> {
        self.prototype.as_ref()
    }

    /// Define (or overwrite) an own method
    pub fn define_method<F>(&self, name: impl Into<String>, func: F) -> Method
    where
        F: Fn(&Object, Args) -> Value + Send + Sync + 'static,
    {
        let method = Method::new(func);
        self.set_method(name, method.clone());
        method
    }

    /// Store an existing method as an own slot
    pub fn set_method(&self, name: impl Into<String>, method: Method) {
        self.slots.write().insert(name.into(), Slot::Method(method));
    }

    /// Store a plain value as an own slot
    pub fn set_value(&self, name: impl Into<String>, value: impl Into<Value>) {
        self.slots.write().insert(name.into(), Slot::Value(value.into()));
    }

    /// Look a slot up on this object, then along the prototype chain
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Slot> {
        let mut current = Some(self);
        while let Some(object) = current {
            if let Some(slot) = object.get_own(name) {
                return Some(slot);
            }
            current = object.prototype.as_deref();
        }
        None
    }

    /// Own slot only
    #[must_use]
    pub fn get_own(&self, name: &str) -> Option<Slot> {
        self.slots.read().get(name).cloned()
    }

    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    #[must_use]
    pub fn has_own(&self, name: &str) -> bool {
        self.slots.read().contains_key(name)
    }

    /// Remove an own slot; inherited slots become visible again
    pub fn remove_own(&self, name: &str) -> Option<Slot> {
        self.slots.write().shift_remove(name)
    }

    /// Method reachable under `name`, own or inherited
    #[must_use]
    pub fn method(&self, name: &str) -> Option<Method> {
        self.get(name).and_then(|slot| slot.as_method().cloned())
    }

    /// Plain value reachable under `name`, own or inherited
    #[must_use]
    pub fn get_value(&self, name: &str) -> Option<Value> {
        match self.get(name)? {
            Slot::Value(value) => Some(value),
            Slot::Method(_) => None,
        }
    }

    /// Names of own slots in definition order
    #[must_use]
    pub fn own_slot_names(&self) -> Vec<String> {
        self.slots.read().keys().cloned().collect()
    }

    /// Call a method with this object as the receiver
    ///
    /// No lock is held while the method runs, so it may call back into this
    /// object (including recursively into itself).
    pub fn call(&self, name: &str, args: Args) -> Result<Value, CallError> {
        match self.get(name) {
            Some(Slot::Method(method)) => Ok(method.invoke(self, args)),
            Some(Slot::Value(_)) => Err(CallError::NotCallable {
                object: self.name.clone(),
                method: name.to_string(),
            }),
            None => Err(CallError::NoSuchMethod {
                object: self.name.clone(),
                method: name.to_string(),
            }),
        }
    }

    /// Replace the own method `name` only if it is still `expected`
    ///
    /// `replacement == None` removes the own slot. Returns whether the swap
    /// happened. Check and swap happen under one write lock.
    pub(crate) fn swap_own_method_if(
        &self,
        name: &str,
        expected: &Method,
        replacement: Option<Method>,
    ) -> bool {
        let mut slots = self.slots.write();
        let still_expected = matches!(
            slots.get(name),
            Some(Slot::Method(current)) if Method::ptr_eq(current, expected)
        );
        if !still_expected {
            return false;
        }
        match replacement {
            Some(method) => {
                slots.insert(name.to_string(), Slot::Method(method));
            }
            None => {
                slots.shift_remove(name);
            }
        }
        true
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("slots", &self.own_slot_names())
            .field("prototype", &self.prototype.as_ref().map(|p| p.id))
            .finish()
    }
}
