//! Integration tests for hierarchical scopes: chain resolution, write
//! routing and chain-aware subscriptions working end to end

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::json;
use statescope::{
    ContextManager, ContextManagerOptions, Select, SubscribeValueOptions, WritePolicy,
};

/// app -> page -> widget: the classic theming setup where leaves read
/// ancestor defaults until they shadow them.
fn app_tree() -> ContextManager {
    let scopes = ContextManager::new();
    scopes.create_context(
        "app",
        json!({"theme": "light", "user": {"name": "ada"}}),
        None,
    );
    scopes.create_context("page", json!({"title": "Home"}), Some("app"));
    scopes.create_context("widget", json!({}), Some("page"));
    scopes
}

#[test]
fn leaf_reads_fall_back_to_ancestors_until_shadowed() {
    let scopes = app_tree();
    assert_eq!(
        scopes.get_value("widget", "theme").unwrap(),
        Some(json!("light"))
    );
    assert_eq!(
        scopes.get_value("widget", "title").unwrap(),
        Some(json!("Home"))
    );

    // Shadowing at the leaf wins over the ancestor value.
    scopes.set_value("widget", "theme", json!("dark"));
    assert_eq!(
        scopes.get_value("widget", "theme").unwrap(),
        Some(json!("dark"))
    );
    assert_eq!(
        scopes.get_value("page", "theme").unwrap(),
        Some(json!("light"))
    );

    // Removing the shadow restores fallback.
    scopes.delete_value("widget", "theme");
    assert_eq!(
        scopes.get_value("widget", "theme").unwrap(),
        Some(json!("light"))
    );
}

#[test]
fn chain_subscription_follows_the_resolved_value() {
    let scopes = app_tree();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let sub = scopes.subscribe_value(
        "widget",
        "theme",
        SubscribeValueOptions::default(),
        move |v| {
            sink.lock().push(v.cloned());
            Ok(())
        },
    );

    // Ancestor change reaches the leaf subscription.
    scopes.set_value("app", "theme", json!("dark"));
    // Leaf shadow takes over.
    scopes.set_value("widget", "theme", json!("sepia"));
    // Writing an unrelated key anywhere in the chain stays silent.
    scopes.set_value("page", "title", json!("About"));
    // Deleting the shadow falls back to the ancestor value again.
    scopes.delete_value("widget", "theme");

    assert_eq!(
        seen.lock().clone(),
        vec![
            Some(json!("dark")),
            Some(json!("sepia")),
            Some(json!("dark")),
        ]
    );

    sub.unsubscribe();
    scopes.set_value("app", "theme", json!("light"));
    assert_eq!(seen.lock().len(), 3);
}

#[test]
fn selector_functions_resolve_across_the_chain() {
    let scopes = app_tree();
    let greeting = scopes
        .get_value(
            "widget",
            Select::selector(|state| {
                Ok(state
                    .pointer("/user/name")
                    .and_then(|v| v.as_str())
                    .map(|name| json!(format!("hello {name}"))))
            }),
        )
        .unwrap();
    assert_eq!(greeting, Some(json!("hello ada")));
}

#[test]
fn bubble_writes_land_at_the_owning_ancestor() {
    let scopes = ContextManager::with_options(ContextManagerOptions {
        write_policy: WritePolicy::Bubble,
        ..Default::default()
    });
    scopes.create_context("app", json!({"count": 0}), None);
    scopes.create_context("page", json!({}), Some("app"));
    scopes.create_context("widget", json!({}), Some("page"));

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    scopes
        .subscribe_value(
            "widget",
            "count",
            SubscribeValueOptions::default(),
            move |v| {
                sink.lock().push(v.cloned());
                Ok(())
            },
        )
        .detach();

    // Issued at the leaf, owned by the root: the write bubbles up and the
    // leaf subscription still observes it through fallback.
    scopes.set_value("widget", "count", json!(1));
    scopes.set_value("widget", "count", json!(2));

    assert_eq!(scopes.store("app").unwrap().get("count"), Some(json!(2)));
    assert_eq!(scopes.store("widget").unwrap().get("count"), None);
    assert_eq!(seen.lock().clone(), vec![Some(json!(1)), Some(json!(2))]);
}

#[test]
fn each_scope_batches_independently() {
    let scopes = app_tree();
    let count = Arc::new(AtomicUsize::new(0));
    let sink = count.clone();
    scopes
        .subscribe_value(
            "widget",
            "theme",
            SubscribeValueOptions::default(),
            move |_| {
                sink.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
        )
        .detach();

    let app = scopes.store("app").unwrap();
    app.batch(|| {
        app.set("theme", json!("a"));
        app.set("theme", json!("b"));
        app.set("theme", json!("dark"));
    });
    // One notify cycle at the app scope, so one re-resolution at the leaf.
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn destroying_a_scope_cuts_the_leaf_off_from_its_ancestors() {
    let scopes = app_tree();
    scopes.set_value("page", "theme", json!("page-blue"));

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    scopes
        .subscribe_value(
            "widget",
            "theme",
            SubscribeValueOptions::default(),
            move |v| {
                sink.lock().push(v.cloned());
                Ok(())
            },
        )
        .detach();

    assert_eq!(
        scopes.get_value("widget", "theme").unwrap(),
        Some(json!("page-blue"))
    );

    // The page scope disappears, taking its parent edge with it: the
    // widget chain now ends at the hole and app is unreachable.
    scopes.destroy_context("page");
    assert_eq!(scopes.get_value("widget", "theme").unwrap(), None);

    // The subscription still listens on the app store (captured at
    // subscribe time), so the next app write re-resolves and reports the
    // value going absent.
    scopes.set_value("app", "theme", json!("dark"));
    assert_eq!(seen.lock().clone(), vec![None]);
}

#[test]
fn scope_ids_can_be_recreated_with_fresh_state() {
    let scopes = ContextManager::new();
    scopes.create_context("session", json!({"user": "ada"}), None);
    assert_eq!(
        scopes.get_value("session", "user").unwrap(),
        Some(json!("ada"))
    );

    scopes.create_context("session", json!({}), None);
    assert_eq!(scopes.get_value("session", "user").unwrap(), None);
}
