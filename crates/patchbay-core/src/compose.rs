//! The before / instead / after composition run by every wrapper
//!
//! # Phases
//! 1. `before` patches in registration order, threading the argument list
//! 2. `instead` chain: newest patch outermost, original method innermost
//! 3. `after` patches in registration order, threading the result
//!
//! Every callback runs behind its own failure boundary. A callback that
//! returns `Err` (or panics, when enabled) is reported and treated as if it
//! were absent for this call. An `instead` callback that already ran `next`
//! before failing keeps the inner result instead of running the chain again.
//!
//! Panics raised by the original method are not a patch failure and unwind
//! to the caller unchanged.

use crate::failure::FailureLog;
use crate::object::{Args, Method, Object};
use crate::patch::{PatchId, PatchKind};
use crate::stack::StackSnapshot;
use serde_json::Value;
use std::any::Any;
use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};

/// Everything one invocation of a patched method needs
pub(crate) struct Composer<'a> {
    this: &'a Object,
    original: &'a Method,
    snapshot: &'a StackSnapshot,
    failures: &'a FailureLog,
    catch_panics: bool,
}

impl<'a> Composer<'a> {
    pub(crate) fn new(
        this: &'a Object,
        original: &'a Method,
        snapshot: &'a StackSnapshot,
        failures: &'a FailureLog,
        catch_panics: bool,
    ) -> Self {
        Self {
            this,
            original,
            snapshot,
            failures,
            catch_panics,
        }
    }

    pub(crate) fn run(&self, mut args: Args) -> Value {
        for layer in &self.snapshot.before {
            let mut candidate = args.clone();
            let callback = &layer.callback;
            let outcome = self.guarded(&layer.id, PatchKind::Before, || {
                callback(self.this, &mut candidate)
            });
            if let Some(replacement) = outcome {
                args = replacement.unwrap_or(candidate);
            }
        }

        let next = Next::new(self, self.snapshot.instead.len());
        let mut result = next.call(args.clone());

        for layer in &self.snapshot.after {
            let input = result.clone();
            let callback = &layer.callback;
            let args = &args;
            if let Some(output) = self.guarded(&layer.id, PatchKind::After, || {
                callback(self.this, args, input)
            }) {
                result = output;
            }
        }

        result
    }

    /// Run one callback; `None` means it failed and was reported
    fn guarded<T>(
        &self,
        id: &PatchId,
        kind: PatchKind,
        callback: impl FnOnce() -> anyhow::Result<T>,
    ) -> Option<T> {
        match self.attempt(callback) {
            Outcome::Done(value) => Some(value),
            failure => {
                self.report(id, kind, failure);
                None
            }
        }
    }

    fn attempt<T>(&self, callback: impl FnOnce() -> anyhow::Result<T>) -> Outcome<T> {
        let outcome = if self.catch_panics {
            match panic::catch_unwind(AssertUnwindSafe(callback)) {
                Ok(outcome) => outcome,
                Err(payload) => return Outcome::Panicked(payload),
            }
        } else {
            callback()
        };
        match outcome {
            Ok(value) => Outcome::Done(value),
            Err(error) => Outcome::Failed(error),
        }
    }

    fn report<T>(&self, id: &PatchId, kind: PatchKind, outcome: Outcome<T>) {
        let error = match outcome {
            Outcome::Done(_) => return,
            Outcome::Failed(error) => error,
            Outcome::Panicked(payload) => {
                anyhow::anyhow!("panicked: {}", panic_message(payload.as_ref()))
            }
        };
        self.failures.record(id, kind, &self.snapshot.label, &error);
    }
}

enum Outcome<T> {
    Done(T),
    Failed(anyhow::Error),
    Panicked(Box<dyn Any + Send>),
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

/// Continuation handed to `instead` patches
///
/// Calling it runs the next-inner layer: an older `instead` patch, or the
/// original method once the chain is exhausted. It may be called any number
/// of times.
pub struct Next<'a> {
    composer: &'a Composer<'a>,
    /// Number of `instead` layers still below this point
    depth: usize,
    /// Result of the most recent completed call
    last: Cell<Option<Value>>,
    /// A panic from below passed through this continuation
    unwound: Cell<bool>,
}

impl<'a> Next<'a> {
    fn new(composer: &'a Composer<'a>, depth: usize) -> Self {
        Self {
            composer,
            depth,
            last: Cell::new(None),
            unwound: Cell::new(false),
        }
    }

    /// Invoke the next-inner behavior with `args`
    ///
    /// Panics raised below (by the original method) are not contained
    /// here; they unwind to the caller of the patched method.
    pub fn call(&self, args: Args) -> Value {
        match panic::catch_unwind(AssertUnwindSafe(|| self.call_inner(args))) {
            Ok(result) => {
                self.last.set(Some(result.clone()));
                result
            }
            Err(payload) => {
                self.unwound.set(true);
                panic::resume_unwind(payload)
            }
        }
    }

    fn call_inner(&self, args: Args) -> Value {
        let composer = self.composer;
        let Some(index) = self.depth.checked_sub(1) else {
            return composer.original.invoke(composer.this, args);
        };

        let layer = &composer.snapshot.instead[index];
        let inner = Next::new(composer, index);
        let callback = &layer.callback;
        let forwarded = args.clone();
        match composer.attempt(|| callback(composer.this, args, &inner)) {
            Outcome::Done(result) => result,
            Outcome::Panicked(payload) if inner.unwound.get() => panic::resume_unwind(payload),
            failure => {
                composer.report(&layer.id, PatchKind::Instead, failure);
                // the inner chain runs at most once per failed layer
                match inner.last.take() {
                    Some(result) => result,
                    None => inner.call(forwarded),
                }
            }
        }
    }

    /// The object the patched method was called on
    #[inline]
    #[must_use]
    pub fn this(&self) -> &Object {
        self.composer.this
    }
}
