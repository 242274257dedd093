//! Panic Hook Tests
//!
//! Contained panics still reach the process panic hook. Kept in its own
//! binary because the hook is process-global.

use patchbay_core::PatchRegistry;
use patchbay_test_utils::{greet, greeter};
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[test]
fn test_host_hook_sees_contained_panics() {
    let seen = Arc::new(AtomicUsize::new(0));
    let hook_seen = Arc::clone(&seen);
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |_| {
        hook_seen.fetch_add(1, Ordering::SeqCst);
    }));

    let registry = PatchRegistry::new();
    let target = greeter();
    registry
        .after("loud", &target, "greet", |_, _, _| panic!("render blew up"))
        .unwrap();
    let greeting = greet(&target, "bob");

    std::panic::set_hook(previous);

    assert_eq!(greeting, "Hi bob");
    assert_eq!(seen.load(Ordering::SeqCst), 1);
    assert_eq!(registry.failures().len(), 1);
    assert!(registry.failures()[0].message.contains("render blew up"));
}
