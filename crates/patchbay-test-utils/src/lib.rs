//! Testing utilities for the patchbay workspace
//!
//! Shared fixtures, counters and value helpers.

#![allow(missing_docs)]

use patchbay_core::{Object, ObjectRef, Value};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Install a test-friendly tracing subscriber once per test binary
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// String content of a value, empty for non-strings
pub fn text(value: &Value) -> &str {
    value.as_str().unwrap_or_default()
}

/// `greet(name) = "Hi " + name`
pub fn greeter() -> ObjectRef {
    let target = Object::new("Greeter");
    target.define_method("greet", |_, args| {
        json!(format!("Hi {}", args.first().map(text).unwrap_or_default()))
    });
    target
}

/// Call `greet` with a single name
pub fn greet(target: &Object, name: &str) -> String {
    let result = target
        .call("greet", vec![json!(name)])
        .expect("greet is defined");
    text(&result).to_string()
}

/// Shared call counter for side-channel assertions
#[derive(Debug, Clone, Default)]
pub struct CallCounter(Arc<AtomicUsize>);

impl CallCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hit(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// Object whose `run` method counts invocations and returns `"original"`
pub fn counted_target(counter: &CallCounter) -> ObjectRef {
    let target = Object::new("Counted");
    let counter = counter.clone();
    target.define_method("run", move |_, _| {
        counter.hit();
        json!("original")
    });
    target
}

/// Component-like prototype with a `render` method returning `{ "children": [] }`
pub fn component_prototype(name: &str) -> ObjectRef {
    let proto = Object::new(name);
    proto.define_method("render", |this, _| {
        json!({
            "id": this.get_value("id").unwrap_or(Value::Null),
            "children": [],
        })
    });
    proto
}
