//! Integration Tests for the Effect Tree
//!
//! These tests drive whole trees through a `MemoryStore` and check listener
//! accounting, teardown order, and failure isolation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use proptest::prelude::*;
use serde_json::{json, Map, Value};

use treewatch_core::reactive::Cleanup;
use treewatch_core::store::{Delivery, OnSnapshot};
use treewatch_core::tree::Presenter;
use treewatch_core::{
    ChildSpec, Effect, EffectTree, MemoryStore, Path, Payload, RemoteStore, Result,
    SessionBinding, Snapshot, SubscriptionHandle, TreePlan,
};

type Log = Arc<Mutex<Vec<String>>>;
type Mirror = Arc<Mutex<HashMap<String, Payload>>>;

fn path(text: &str) -> Path {
    Path::parse(text).unwrap()
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// A leaf effect that logs "build <path>" and "drop <path>".
fn logging_leaf(log: &Log) -> Effect {
    let log = log.clone();
    Effect::leaf(move |snapshot| {
        let path = snapshot.path().to_string();
        log.lock().push(format!("build {path}"));
        let log = log.clone();
        Cleanup::from_fn(move || log.lock().push(format!("drop {path}")))
    })
}

/// A presenter that logs "<label> <key>" and "-<label> <key>".
fn logging_presenter(log: &Log) -> Arc<dyn Presenter> {
    let log = log.clone();
    Arc::new(move |label: &str, snapshot: &Snapshot| {
        let line = format!("{label} {}", snapshot.key().unwrap_or("/"));
        log.lock().push(line.clone());
        let log = log.clone();
        Cleanup::from_fn(move || log.lock().push(format!("-{line}")))
    })
}

fn key_map<I: IntoIterator<Item = String>>(keys: I) -> Value {
    let map: Map<String, Value> = keys.into_iter().map(|k| (k, Value::Bool(true))).collect();
    Value::Object(map)
}

/// Parent `{multifrogs: {"a": true}}` watches `/root/a`; emptying the
/// enumeration tears it down.
#[test]
fn single_child_comes_and_goes() {
    init_tracing();
    let store = MemoryStore::new();
    store.set(&path("/users/u1"), json!({ "multifrogs": { "a": true } }));
    store.set(&path("/root/a"), json!({ "frogs": { "f": true } }));
    let tree = EffectTree::new(store.clone());
    let log = Log::default();

    // The child is itself a branch, so tearing it down has something to reach.
    let frogs = ChildSpec::new(path("frogs"), path("/frogs"));
    let leaf = logging_leaf(&log);
    let child = Effect::branch(move |snapshot, scope| scope.spawn_children(snapshot, &frogs, &leaf));

    let handle = tree
        .watch_children(
            &path("/users/u1"),
            ChildSpec::new(path("multifrogs"), path("/root")),
            child,
        )
        .unwrap();
    assert_eq!(store.listeners_at(&path("/root/a")), 1);
    assert_eq!(store.listeners_at(&path("/frogs/f")), 1);
    assert_eq!(*log.lock(), vec!["build /frogs/f"]);

    store.set(&path("/users/u1"), json!({ "multifrogs": {} }));
    assert_eq!(store.listeners_at(&path("/root/a")), 0);
    assert_eq!(store.listeners_at(&path("/frogs/f")), 0);
    assert_eq!(*log.lock(), vec!["build /frogs/f", "drop /frogs/f"]);
    assert_eq!(store.listener_count(), 1);

    handle.dispose();
    assert_eq!(store.listener_count(), 0);
    assert_eq!(tree.metrics().live_nodes(), 0);
}

/// Two sibling keys resolving to leaves: two leaf effects, both disposed with
/// the parent.
#[test]
fn two_siblings_built_and_disposed() {
    let store = MemoryStore::new();
    store.set(&path("/users/u1/multifrogs"), json!({ "a": true, "b": true }));
    store.set(&path("/root/a"), json!(1));
    store.set(&path("/root/b"), json!(2));
    let tree = EffectTree::new(store.clone());
    let log = Log::default();

    let handle = tree
        .watch_children(
            &path("/users/u1"),
            ChildSpec::new(path("multifrogs"), path("/root")),
            logging_leaf(&log),
        )
        .unwrap();

    let mut built: Vec<String> = log.lock().clone();
    built.sort();
    assert_eq!(built, vec!["build /root/a", "build /root/b"]);

    log.lock().clear();
    handle.dispose();
    let mut dropped: Vec<String> = log.lock().clone();
    dropped.sort();
    assert_eq!(dropped, vec!["drop /root/a", "drop /root/b"]);
    assert_eq!(store.listener_count(), 0);
}

#[test]
fn previous_generation_is_gone_before_next_is_built() {
    let store = MemoryStore::new();
    store.set(&path("/p/kids"), json!({ "a": true, "b": true, "c": true }));
    let tree = EffectTree::new(store.clone());
    let log = Log::default();

    let _handle = tree
        .watch_children(&path("/p"), ChildSpec::nested(path("kids")), logging_leaf(&log))
        .unwrap();
    log.lock().clear();

    // Same key set, different payload: still a full rebuild.
    store.set(&path("/p/note"), "touched");

    let entries = log.lock().clone();
    assert_eq!(entries.len(), 6);
    let first_build = entries
        .iter()
        .position(|e| e.starts_with("build"))
        .unwrap();
    assert!(entries[..first_build].iter().all(|e| e.starts_with("drop")));
    assert_eq!(first_build, 3);
    assert!(entries[first_build..].iter().all(|e| e.starts_with("build")));
}

#[test]
fn dispose_twice_is_same_as_once() {
    let store = MemoryStore::new();
    store.set(&path("/p/kids"), json!({ "a": true, "b": true }));
    let tree = EffectTree::new(store.clone());
    let log = Log::default();

    let handle = tree
        .watch_children(&path("/p"), ChildSpec::nested(path("kids")), logging_leaf(&log))
        .unwrap();

    handle.dispose();
    let log_after_once = log.lock().clone();
    let metrics_after_once = tree.metrics();

    handle.dispose();
    assert_eq!(*log.lock(), log_after_once);
    assert_eq!(tree.metrics(), metrics_after_once);
    assert_eq!(store.listener_count(), 0);
}

#[test]
fn missing_or_scalar_enumeration_yields_no_children() {
    let store = MemoryStore::new();
    store.set(&path("/p"), json!({ "kids": 7, "other": true }));
    let tree = EffectTree::new(store.clone());
    let log = Log::default();

    let malformed = tree
        .watch_children(&path("/p"), ChildSpec::nested(path("kids")), logging_leaf(&log))
        .unwrap();
    let missing = tree
        .watch_children(&path("/p"), ChildSpec::nested(path("absent")), logging_leaf(&log))
        .unwrap();

    assert!(log.lock().is_empty());
    assert_eq!(store.listener_count(), 2);
    assert_eq!(tree.metrics().malformed_enumerations, 1);
    assert!(!malformed.is_disposed());
    assert!(!missing.is_disposed());
}

/// Full tree: user -> multifrogs -> frogs -> (sensors, readings), rooted at
/// the signed-in session.
#[test]
fn frog_dashboard_tree() {
    init_tracing();
    let store = MemoryStore::new();
    store.set(
        &Path::root(),
        json!({
            "users": { "u1": { "multifrogs": { "m1": true } } },
            "multifrogs": { "m1": { "name": "pond", "frogs": { "f1": true, "f2": true } } },
            "frogs": {
                "f1": { "sensors": { "s1": true } },
                "f2": { "sensors": { "s2": true, "s3": true } }
            },
            "sensors": { "s1": { "kind": "temp" }, "s2": { "kind": "hum" }, "s3": { "kind": "lux" } },
            "readings": { "s1": { "r1": 20, "r2": 21 }, "s2": { "r1": 5 } }
        }),
    );

    let plan = TreePlan::from_json(
        r#"{
            "label": "user",
            "levels": [
                { "label": "multifrog", "enumerate": "multifrogs", "children": [
                    { "label": "frog", "enumerate": "frogs", "children": [
                        { "label": "sensor", "enumerate": "sensors" },
                        { "label": "readings", "enumerate": "sensors",
                          "root": { "collection": "/readings" }, "mode": "once" }
                    ]}
                ]}
            ]
        }"#,
    )
    .unwrap();

    let log = Log::default();
    let tree = EffectTree::new(store.clone());
    let binding = SessionBinding::new(tree.clone(), path("/users"), plan.effect(logging_presenter(&log)));

    binding.apply(Some("u1")).unwrap();
    // user, m1, f1, f2, s1, s2, s3; readings are one-shot and vacate.
    assert_eq!(store.listener_count(), 7);
    {
        let lines = log.lock();
        for expected in [
            "user u1",
            "multifrog m1",
            "frog f1",
            "frog f2",
            "sensor s1",
            "sensor s3",
            "readings s1",
            "readings s3",
        ] {
            assert!(lines.iter().any(|l| l == expected), "missing {expected}");
        }
    }

    // Drop f2 from the multifrog: its subtree goes, f1's is rebuilt.
    log.lock().clear();
    store.remove(&path("/multifrogs/m1/frogs/f2"));
    assert_eq!(store.listener_count(), 4);
    {
        let lines = log.lock();
        assert!(lines.iter().any(|l| l == "-frog f2"));
        assert!(lines.iter().any(|l| l == "-sensor s2"));
        assert!(lines.iter().any(|l| l == "frog f1"));
        assert!(!lines.iter().any(|l| l == "frog f2"));
    }

    // Logging out disposes everything, leaves before parents.
    log.lock().clear();
    binding.apply(None).unwrap();
    assert_eq!(store.listener_count(), 0);
    let lines = log.lock().clone();
    let at = |line: &str| lines.iter().position(|l| l == line).unwrap();
    assert!(at("-sensor s1") < at("-frog f1"));
    assert!(at("-readings s1") < at("-frog f1"));
    assert!(at("-frog f1") < at("-multifrog m1"));
    assert!(at("-multifrog m1") < at("-user u1"));
    assert_eq!(tree.metrics().live_nodes(), 0);
    assert_eq!(tree.metrics().live_generations(), 0);
}

#[test]
fn failed_child_does_not_block_siblings() {
    let store = MemoryStore::new();
    store.set(&path("/p/kids"), json!({ "a": true, "b": true, "c": true }));
    store.fail_path(&path("/root/b"));
    let tree = EffectTree::new(store.clone());
    let log = Log::default();

    let handle = tree
        .watch_children(
            &path("/p"),
            ChildSpec::new(path("kids"), path("/root")),
            logging_leaf(&log),
        )
        .unwrap();

    let mut built = log.lock().clone();
    built.sort();
    assert_eq!(built, vec!["build /root/a", "build /root/c"]);
    assert_eq!(tree.metrics().failed_children, 1);

    handle.dispose();
    assert_eq!(store.listener_count(), 0);
}

#[test]
fn malformed_subtree_does_not_block_siblings() {
    let store = MemoryStore::new();
    store.set(
        &Path::root(),
        json!({
            "p": { "kids": { "good": true, "bad": true } },
            "k": { "good": { "items": { "x": true } }, "bad": { "items": "oops" } }
        }),
    );
    let tree = EffectTree::new(store.clone());
    let log = Log::default();

    let items = ChildSpec::nested(path("items"));
    let leaf = logging_leaf(&log);
    let kid = Effect::branch(move |snapshot, scope| scope.spawn_children(snapshot, &items, &leaf));

    let _handle = tree
        .watch_children(&path("/p"), ChildSpec::new(path("kids"), path("/k")), kid)
        .unwrap();

    assert_eq!(*log.lock(), vec!["build /k/good/items/x"]);
    assert_eq!(tree.metrics().malformed_enumerations, 1);
    // p, k/good, k/bad, k/good/items/x
    assert_eq!(store.listener_count(), 4);
}

/// A store that runs a hook before opening each listener.
struct HookStore {
    inner: MemoryStore,
    hook: Box<dyn Fn(&Path) + Send + Sync>,
}

impl RemoteStore for HookStore {
    fn read_once(&self, path: &Path, on_snapshot: OnSnapshot) -> Result<SubscriptionHandle> {
        (self.hook)(path);
        self.inner.read_once(path, on_snapshot)
    }

    fn watch(&self, path: &Path, on_snapshot: OnSnapshot) -> Result<SubscriptionHandle> {
        (self.hook)(path);
        self.inner.watch(path, on_snapshot)
    }
}

#[test]
fn dispose_during_build_stops_the_generation() {
    let store = MemoryStore::new();
    store.set(&path("/p/other"), true);

    let top: Arc<Mutex<Option<SubscriptionHandle>>> = Arc::default();
    let opened = Arc::new(Mutex::new(Vec::new()));

    let hook_top = top.clone();
    let hook_opened = opened.clone();
    let hooked = HookStore {
        inner: store.clone(),
        hook: Box::new(move |path: &Path| {
            hook_opened.lock().push(path.to_string());
            if path.key() == Some("b") {
                let handle = hook_top.lock().take();
                if let Some(handle) = handle {
                    handle.dispose();
                }
            }
        }),
    };

    let tree = EffectTree::new(hooked);
    let handle = tree
        .watch_children(&path("/p"), ChildSpec::new(path("kids"), path("/root")), Effect::noop())
        .unwrap();
    *top.lock() = Some(handle);

    store.set(&path("/p/kids"), json!({ "a": true, "b": true, "c": true }));

    assert_eq!(*opened.lock(), vec!["/p", "/root/a", "/root/b"]);
    assert_eq!(store.listener_count(), 0);
    assert_eq!(tree.metrics().live_nodes(), 0);
}

#[test]
fn in_flight_notifications_after_dispose_are_dropped() {
    let store = MemoryStore::with_delivery(Delivery::Queued);
    store.set(&path("/p/kids"), json!({ "a": true }));
    let tree = EffectTree::new(store.clone());
    let log = Log::default();

    let handle = tree
        .watch_children(&path("/p"), ChildSpec::nested(path("kids")), logging_leaf(&log))
        .unwrap();
    store.flush();
    assert_eq!(*log.lock(), vec!["build /p/kids/a"]);

    // A change is in flight when the tree is disposed.
    store.set(&path("/p/kids/b"), true);
    handle.dispose();
    store.flush();

    assert_eq!(*log.lock(), vec!["build /p/kids/a", "drop /p/kids/a"]);
    assert_eq!(store.listener_count(), 0);
    assert!(tree.metrics().stale_deliveries >= 1);
}

#[test]
fn read_children_fans_out_once() {
    let store = MemoryStore::new();
    store.set(&path("/p/kids"), json!({ "a": true }));
    let tree = EffectTree::new(store.clone());
    let log = Log::default();

    let handle = tree
        .read_children(
            &path("/p"),
            ChildSpec::nested(path("kids")).once(),
            logging_leaf(&log),
        )
        .unwrap();
    assert_eq!(store.listener_count(), 0);

    store.set(&path("/p/kids/a"), json!(5));
    store.set(&path("/p/kids/b"), true);
    assert_eq!(*log.lock(), vec!["build /p/kids/a"]);

    handle.dispose();
    assert_eq!(*log.lock(), vec!["build /p/kids/a", "drop /p/kids/a"]);
}

/// A leaf effect that records the latest payload seen at each path.
fn mirroring_leaf(mirror: &Mirror) -> Effect {
    let mirror = mirror.clone();
    Effect::leaf(move |snapshot| {
        mirror
            .lock()
            .insert(snapshot.path().to_string(), snapshot.value().clone());
        Cleanup::noop()
    })
}

/// Concurrent writers to the same children: every node ends with exactly one
/// generation, built from the value the store holds last.
#[test]
fn concurrent_writers_keep_one_generation_per_node() {
    let store = MemoryStore::new();
    store.set(&path("/p/kids"), json!({ "a": true, "b": true }));
    let tree = EffectTree::new(store.clone());
    let builds = Arc::new(AtomicUsize::new(0));
    let mirror = Mirror::default();

    let counter = builds.clone();
    let recorded = mirror.clone();
    let handle = tree
        .watch_children(
            &path("/p"),
            ChildSpec::new(path("kids"), path("/root")),
            Effect::leaf(move |snapshot| {
                counter.fetch_add(1, Ordering::SeqCst);
                recorded
                    .lock()
                    .insert(snapshot.path().to_string(), snapshot.value().clone());
                Cleanup::noop()
            }),
        )
        .unwrap();

    let writers: Vec<_> = (0..4)
        .map(|t| {
            let store = store.clone();
            thread::spawn(move || {
                for i in 0..50 {
                    let key = if (t + i) % 2 == 0 { "a" } else { "b" };
                    store.set(&path(&format!("/root/{key}")), json!(t * 100 + i));
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }

    let metrics = tree.metrics();
    assert_eq!(metrics.live_nodes(), 3);
    assert_eq!(metrics.live_generations(), 3);
    assert!(builds.load(Ordering::SeqCst) >= 2);
    for key in ["/root/a", "/root/b"] {
        assert_eq!(mirror.lock().get(key), Some(&store.value_at(&path(key))));
    }

    handle.dispose();
    assert_eq!(store.listener_count(), 0);
    assert_eq!(tree.metrics().live_generations(), 0);
}

proptest! {
    /// After each parent snapshot, live child listeners equal the keys it
    /// enumerates, never an accumulation of earlier ones.
    #[test]
    fn live_listeners_track_latest_enumeration(
        generations in prop::collection::vec(prop::collection::btree_set(0u8..8, 0..6), 1..12)
    ) {
        let store = MemoryStore::new();
        let tree = EffectTree::new(store.clone());
        let parent = path("/users/u1");

        let handle = tree
            .watch_children(&parent, ChildSpec::new(path("multifrogs"), path("/root")), Effect::noop())
            .unwrap();

        for keys in &generations {
            store.set(
                &path("/users/u1/multifrogs"),
                key_map(keys.iter().map(|k| format!("k{k}"))),
            );
            prop_assert_eq!(store.listener_count(), 1 + keys.len());
            prop_assert_eq!(tree.metrics().live_nodes(), 1 + keys.len() as u64);
        }

        handle.dispose();
        prop_assert_eq!(store.listener_count(), 0);
        prop_assert_eq!(tree.metrics().live_generations(), 0);
    }
}

/// A slow delivery of an older value must not let a newer write overtake it:
/// the tree ends on the value the store holds.
#[test]
fn stalled_delivery_does_not_leave_tree_on_stale_value() {
    let store = MemoryStore::new();
    let stalled = Arc::new(AtomicBool::new(false));

    // Slows down the delivery of `/a = 1` to an unrelated listener at the root.
    let stalled_clone = stalled.clone();
    let slow: OnSnapshot = Arc::new(move |snapshot: Snapshot| {
        let a = snapshot.value().get(&path("a")).as_f64();
        if a == Some(1.0) {
            stalled_clone.store(true, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(150));
        }
    });
    let _slow = store.watch(&Path::root(), slow).unwrap();

    let tree = EffectTree::new(store.clone());
    let mirror = Mirror::default();
    let _handle = tree.watch(&path("/a"), mirroring_leaf(&mirror)).unwrap();

    let first = {
        let store = store.clone();
        thread::spawn(move || store.set(&path("/a"), json!(1)))
    };
    while !stalled.load(Ordering::SeqCst) {
        thread::yield_now();
    }
    store.set(&path("/a"), json!(2));
    first.join().unwrap();

    assert_eq!(store.value_at(&path("/a")).as_f64(), Some(2.0));
    assert_eq!(mirror.lock().get("/a"), Some(&store.value_at(&path("/a"))));
}
