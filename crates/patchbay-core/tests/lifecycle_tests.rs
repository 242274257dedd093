//! Lifecycle Tests
//!
//! inject / uninject bookkeeping: duplicate guards, invalid targets,
//! restoration identity, idempotent teardown and bulk removal.

use patchbay_core::{
    json, InjectError, InvalidTargetReason, Method, Object, Patch, PatchRegistry, RegistryError,
};
use patchbay_test_utils::{component_prototype, greet, greeter, init_tracing, text};

#[test]
fn test_duplicate_id_rejected_first_patch_stays() {
    let registry = PatchRegistry::new();
    let target = greeter();
    registry
        .after("x", &target, "greet", |_, _, res| Ok(json!(format!("{}!", text(&res)))))
        .unwrap();

    let second = registry.after("x", &target, "greet", |_, _, _| Ok(json!("second")));
    assert!(matches!(second, Err(InjectError::DuplicateId(ref id)) if id.as_str() == "x"));
    assert_eq!(greet(&target, "bob"), "Hi bob!");
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_duplicate_id_is_registry_wide() {
    let registry = PatchRegistry::new();
    let first = greeter();
    let second = greeter();
    registry.after("shared", &first, "greet", |_, _, r| Ok(r)).unwrap();

    let result = registry.after("shared", &second, "greet", |_, _, r| Ok(r));
    assert!(matches!(result, Err(InjectError::DuplicateId(_))));
    assert_eq!(registry.target_count(), 1);
}

#[test]
fn test_invalid_targets() {
    let registry = PatchRegistry::new();
    let target = greeter();
    target.set_value("version", "1.0");

    let missing = registry.after("a", &target, "farewell", |_, _, r| Ok(r));
    assert!(matches!(
        missing,
        Err(InjectError::InvalidTarget { reason: InvalidTargetReason::Missing, .. })
    ));

    let not_callable = registry.after("b", &target, "version", |_, _, r| Ok(r));
    assert!(matches!(
        not_callable,
        Err(InjectError::InvalidTarget { reason: InvalidTargetReason::NotCallable, .. })
    ));
    assert_eq!(target.get_value("version"), Some(json!("1.0")));

    let message = missing.unwrap_err().to_string();
    assert!(message.contains("Greeter.farewell"));
}

#[test]
fn test_restoration_identity() {
    let registry = PatchRegistry::new();
    let target = greeter();
    let original = target.method("greet").unwrap();

    registry.before("a", &target, "greet", |_, _| Ok(None)).unwrap();
    registry.instead("b", &target, "greet", |_, args, next| Ok(next.call(args))).unwrap();
    assert!(!Method::ptr_eq(&target.method("greet").unwrap(), &original));

    assert!(registry.uninject("b"));
    assert!(!Method::ptr_eq(&target.method("greet").unwrap(), &original));
    assert!(registry.uninject("a"));
    assert!(Method::ptr_eq(&target.method("greet").unwrap(), &original));
    assert_eq!(registry.target_count(), 0);
}

#[test]
fn test_uninject_twice_returns_false() {
    init_tracing();
    let registry = PatchRegistry::new();
    let target = greeter();
    registry.after("once", &target, "greet", |_, _, r| Ok(r)).unwrap();

    assert!(registry.uninject("once"));
    assert!(!registry.uninject("once"));
    assert!(!registry.uninject("never-registered"));
}

#[test]
fn test_remove_reports_unknown_id() {
    let registry = PatchRegistry::new();
    let err = registry.remove("ghost").unwrap_err();
    assert_eq!(err, RegistryError::UnknownId("ghost".to_string()));
}

#[test]
fn test_remove_returns_patch_info() {
    let registry = PatchRegistry::new();
    let target = greeter();
    registry.instead("swap", &target, "greet", |_, _, _| Ok(json!("swapped"))).unwrap();

    let info = registry.remove("swap").unwrap();
    assert_eq!(info.id.as_str(), "swap");
    assert_eq!(info.kind, patchbay_core::PatchKind::Instead);
    assert_eq!(info.target.object, target.id());
    assert_eq!(info.target.method, "greet");
}

#[test]
fn test_id_reusable_after_removal() {
    let registry = PatchRegistry::new();
    let target = greeter();
    registry.after("reuse", &target, "greet", |_, _, _| Ok(json!("one"))).unwrap();
    assert!(registry.uninject("reuse"));

    registry.after("reuse", &target, "greet", |_, _, _| Ok(json!("two"))).unwrap();
    assert_eq!(greet(&target, "bob"), "two");
}

#[test]
fn test_uninject_prefix_removes_only_owned_patches() {
    let registry = PatchRegistry::new();
    let target = greeter();
    let original = target.method("greet").unwrap();
    for id in ["pc-badges-users", "pc-badges-guilds", "pc-settings-items"] {
        registry.after(id, &target, "greet", |_, _, r| Ok(r)).unwrap();
    }

    assert_eq!(registry.uninject_prefix("pc-badges-"), 2);
    assert!(registry.is_injected("pc-settings-items"));
    assert!(!registry.is_injected("pc-badges-users"));

    assert_eq!(registry.uninject_all(|_| true), 1);
    assert!(Method::ptr_eq(&target.method("greet").unwrap(), &original));
    assert_eq!(registry.uninject_prefix("pc-"), 0);
}

#[test]
fn test_patching_prototype_affects_instances() {
    let registry = PatchRegistry::new();
    let proto = component_prototype("TabBarItem");
    let original = proto.method("render").unwrap();
    let general = Object::with_prototype("TabBarItem", &proto);
    general.set_value("id", "General Settings");
    let privacy = Object::with_prototype("TabBarItem", &proto);
    privacy.set_value("id", "Privacy & Safety");

    registry
        .after("pc-utilitycls-tabbar", &proto, "render", |this, _, mut res| {
            let id = this.get_value("id").unwrap_or_default();
            res["data-item-id"] = json!(text(&id).replace('&', "n").replace(' ', ""));
            Ok(res)
        })
        .unwrap();

    assert_eq!(
        general.call("render", vec![]).unwrap()["data-item-id"],
        json!("GeneralSettings")
    );
    assert_eq!(
        privacy.call("render", vec![]).unwrap()["data-item-id"],
        json!("PrivacynSafety")
    );

    assert!(registry.uninject("pc-utilitycls-tabbar"));
    assert!(Method::ptr_eq(&proto.method("render").unwrap(), &original));
    assert!(general.call("render", vec![]).unwrap().get("data-item-id").is_none());
}

#[test]
fn test_patching_inherited_method_restores_inheritance() {
    let registry = PatchRegistry::new();
    let proto = component_prototype("Notices");
    let original = proto.method("render").unwrap();
    let instance = Object::with_prototype("NoticesInstance", &proto);

    registry.after("local", &instance, "render", |_, _, r| Ok(r)).unwrap();
    assert!(instance.has_own("render"));
    // the prototype itself is untouched
    assert!(Method::ptr_eq(&proto.method("render").unwrap(), &original));

    assert!(registry.uninject("local"));
    assert!(!instance.has_own("render"));
    assert!(Method::ptr_eq(&instance.method("render").unwrap(), &original));
}

#[test]
fn test_separate_registries_stack_independently() {
    init_tracing();
    let first = PatchRegistry::new();
    let second = PatchRegistry::new();
    let target = greeter();

    first
        .after("same-id", &target, "greet", |_, _, r| Ok(json!(format!("{}!", text(&r)))))
        .unwrap();
    second
        .after("same-id", &target, "greet", |_, _, r| Ok(json!(format!("{}?", text(&r)))))
        .unwrap();
    assert_eq!(greet(&target, "bob"), "Hi bob!?");

    // the outer wrapper belongs to `second`, so `first` leaves it in place
    assert!(first.uninject("same-id"));
    assert_eq!(greet(&target, "bob"), "Hi bob?");
    assert!(second.uninject("same-id"));
    assert_eq!(greet(&target, "bob"), "Hi bob");
}

#[test]
fn test_inject_via_patch_value() {
    let registry = PatchRegistry::new();
    let target = greeter();
    let patch = Patch::after(|_, _, _| Ok(json!("replaced")));

    registry.inject("p", &target, "greet", patch.clone()).unwrap();
    registry.inject("q", &greeter(), "greet", patch).unwrap();
    assert_eq!(greet(&target, "bob"), "replaced");
    assert_eq!(registry.target_count(), 2);
}
