//! Cross-environment isolation and shared-reference tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use soak_env::{
    await_equals, bridge, script_fn, BridgeError, CatalogResolver, Counter, IsolationManager,
    ManagerConfig, ResultHandle, ScriptError, ScriptRef, Value, VersionArtifact, VersionTag,
    WaitPolicy,
};

fn tag(s: &str) -> VersionTag {
    VersionTag::new(s).unwrap()
}

/// Each version registers a script under the same id that reports its own
/// "build number" through a counter.
fn versioned_resolver() -> CatalogResolver {
    let mut resolver = CatalogResolver::new();
    for (name, build) in [("current", 3i64), ("previous-major", 2), ("legacy", 1)] {
        resolver = resolver.with_version(tag(name), move |t| {
            VersionArtifact::new(t.clone())
                .with_script(
                    "version/build",
                    script_fn(move |ctx, _| {
                        let counter = ctx.counter();
                        counter.set(build);
                        Ok(ResultHandle::Counter(counter))
                    }),
                )
                .with_script(
                    "work/count_down",
                    script_fn(|ctx, args| {
                        let units = args.count(0, "units")?;
                        let latch = ctx.latch("reusableLatch")?;
                        let errors = ctx.counter();
                        ctx.bind("errorsWorker", errors)?;
                        let running = ctx.counter();
                        running.increment();
                        let live = running.clone();
                        ctx.spawn(async move {
                            for _ in 0..units {
                                latch.count_down();
                                tokio::task::yield_now().await;
                            }
                            live.decrement();
                        })?;
                        Ok(ResultHandle::Counter(running))
                    }),
                )
        });
    }
    resolver
}

fn manager() -> IsolationManager {
    IsolationManager::new(
        Arc::new(versioned_resolver()),
        ManagerConfig { worker_threads: 2 },
    )
}

#[test]
fn identically_named_scripts_resolve_per_version() {
    let manager = manager();
    let script = ScriptRef::from("version/build");

    for (name, build) in [("current", 3), ("previous-major", 2), ("legacy", 1)] {
        let env = manager.acquire(&tag(name)).unwrap();
        let handle = bridge::evaluate(&env, &script, &[] as &[&str]).unwrap();
        assert_eq!(bridge::get(&handle), Some(build), "version {name}");
    }
}

#[test]
fn bindings_do_not_leak_between_environments() {
    let manager = manager();
    let current = manager.acquire(&tag("current")).unwrap();
    let legacy = manager.acquire(&tag("legacy")).unwrap();

    bridge::set_variable(&current, "persistent", false).unwrap();
    assert!(matches!(
        bridge::get_variable(&current, "persistent").unwrap(),
        Value::Bool(false)
    ));
    match bridge::get_variable(&legacy, "persistent").unwrap_err() {
        BridgeError::VariableNotFound { tag, name } => {
            assert_eq!(tag, "legacy");
            assert_eq!(name, "persistent");
        }
        other => panic!("expected VariableNotFound, got {other:?}"),
    }
}

#[test]
fn environment_owned_counter_cannot_be_injected_elsewhere() {
    let manager = manager();
    let current = manager.acquire(&tag("current")).unwrap();
    let legacy = manager.acquire(&tag("legacy")).unwrap();

    let handle =
        bridge::evaluate(&current, &ScriptRef::from("version/build"), &[] as &[&str]).unwrap();
    let counter = handle.counter().unwrap().clone();

    // Back into its own environment is fine.
    bridge::set_variable(&current, "build", counter.clone()).unwrap();

    match bridge::set_variable(&legacy, "build", counter).unwrap_err() {
        BridgeError::ForeignReference { tag, owner, .. } => {
            assert_eq!(tag, "legacy");
            assert_eq!(owner, current.id());
        }
        other => panic!("expected ForeignReference, got {other:?}"),
    }
}

#[test]
fn missing_script_and_variable_surface_resolution_errors() {
    let manager = manager();
    let env = manager.acquire(&tag("current")).unwrap();

    assert!(matches!(
        bridge::evaluate(&env, &ScriptRef::from("hqsoak/missing"), &["x"]),
        Err(BridgeError::ScriptNotFound { .. })
    ));
    assert!(matches!(
        bridge::execute(&env, "return errorsWorker"),
        Err(BridgeError::VariableNotFound { .. })
    ));

    // The count_down script needs the latch binding before it can run.
    match bridge::evaluate(&env, &ScriptRef::from("work/count_down"), &["1"]).unwrap_err() {
        BridgeError::Script { source, .. } => {
            assert!(matches!(source, ScriptError::MissingBinding { .. }))
        }
        other => panic!("expected Script error, got {other:?}"),
    }
}

#[test]
fn execute_rejects_non_counter_bindings() {
    let manager = manager();
    let env = manager.acquire(&tag("current")).unwrap();
    bridge::set_variable(&env, "multiplyFactor", 25i64).unwrap();
    assert!(matches!(
        bridge::execute(&env, "return multiplyFactor"),
        Err(BridgeError::UnexpectedType { found: "int", .. })
    ));
}

#[tokio::test]
async fn shared_latch_is_decremented_from_every_environment() {
    let manager = manager();
    let latch = manager.shared().latch(0);
    latch.count_up(30);

    let mut running = Vec::new();
    for name in ["current", "previous-major", "legacy"] {
        let env = manager.acquire(&tag(name)).unwrap();
        bridge::set_variable(&env, "reusableLatch", latch.clone()).unwrap();
        running.push(
            bridge::evaluate(&env, &ScriptRef::from("work/count_down"), &["10"]).unwrap(),
        );
    }

    let policy = WaitPolicy::new(Duration::from_secs(10), Duration::from_millis(1));
    for handle in &running {
        await_equals(0, || handle.get().unwrap_or(-1), &policy)
            .await
            .unwrap();
    }
    assert!(latch.wait(Duration::from_secs(1)).await);
    assert_eq!(latch.count(), 0);

    // Each environment's tally is its own.
    for name in ["current", "previous-major", "legacy"] {
        let env = manager.get(&tag(name)).unwrap();
        let errors = bridge::execute(&env, "return errorsWorker").unwrap();
        assert_eq!(errors.get(), Some(0));
    }
    assert_eq!(manager.release_all(), 3);
}

#[test]
fn released_environment_rejects_further_use() {
    let manager = manager();
    let env = manager.acquire(&tag("legacy")).unwrap();
    assert!(manager.release(&env));

    assert!(matches!(
        bridge::set_variable(&env, "x", 1i64),
        Err(BridgeError::Env(_))
    ));
    assert!(matches!(
        bridge::evaluate(&env, &ScriptRef::from("version/build"), &[] as &[&str]),
        Err(BridgeError::Env(_))
    ));
    assert!(manager.environments().is_empty());
}

/// `stash` hands its own counter to a slot the test owns, then tries to make
/// it visible; `lookup` reports whether a shared object named `leaked`
/// exists; `rebind` binds whatever sits in the slot.
fn leaking_resolver(slot: Arc<Mutex<Option<Counter>>>) -> CatalogResolver {
    let mut resolver = CatalogResolver::new();
    for name in ["current", "legacy"] {
        let slot = Arc::clone(&slot);
        resolver = resolver.with_version(tag(name), move |t| {
            let stash_slot = Arc::clone(&slot);
            let rebind_slot = Arc::clone(&slot);
            VersionArtifact::new(t.clone())
                .with_script(
                    "leak/stash",
                    script_fn(move |ctx, _| {
                        let counter = ctx.counter();
                        counter.set(42);
                        ctx.bind("leaked", counter.clone())?;
                        *stash_slot.lock().unwrap() = Some(counter.clone());
                        Ok(ResultHandle::Counter(counter))
                    }),
                )
                .with_script(
                    "leak/lookup",
                    script_fn(|ctx, _| {
                        let found = ctx.counter();
                        if ctx.object::<Counter>("leaked").is_some()
                            || ctx.shared().object_handle("leaked").is_some()
                        {
                            found.set(1);
                        }
                        Ok(ResultHandle::Counter(found))
                    }),
                )
                .with_script(
                    "leak/rebind",
                    script_fn(move |ctx, _| {
                        let stolen = rebind_slot.lock().unwrap().clone();
                        if let Some(counter) = stolen {
                            ctx.bind("stolen", counter)?;
                        }
                        Ok(ResultHandle::Void)
                    }),
                )
        });
    }
    resolver
}

#[test]
fn script_owned_objects_stay_in_their_environment() {
    let slot = Arc::new(Mutex::new(None));
    let manager = IsolationManager::new(
        Arc::new(leaking_resolver(Arc::clone(&slot))),
        ManagerConfig { worker_threads: 1 },
    );
    let current = manager.acquire(&tag("current")).unwrap();
    let legacy = manager.acquire(&tag("legacy")).unwrap();

    let stashed =
        bridge::evaluate(&current, &ScriptRef::from("leak/stash"), &[] as &[&str]).unwrap();
    assert_eq!(bridge::get(&stashed), Some(42));

    for env in [&current, &legacy] {
        let found =
            bridge::evaluate(env, &ScriptRef::from("leak/lookup"), &[] as &[&str]).unwrap();
        assert_eq!(bridge::get(&found), Some(0), "environment {}", env.tag());
    }
    assert!(manager.shared().object_handle("leaked").is_none());
}

#[test]
fn script_cannot_bind_a_counter_owned_by_another_environment() {
    let slot = Arc::new(Mutex::new(None));
    let manager = IsolationManager::new(
        Arc::new(leaking_resolver(Arc::clone(&slot))),
        ManagerConfig { worker_threads: 1 },
    );
    let current = manager.acquire(&tag("current")).unwrap();
    let legacy = manager.acquire(&tag("legacy")).unwrap();
    bridge::evaluate(&current, &ScriptRef::from("leak/stash"), &[] as &[&str]).unwrap();

    // Its owner may rebind it.
    bridge::evaluate(&current, &ScriptRef::from("leak/rebind"), &[] as &[&str]).unwrap();

    match bridge::evaluate(&legacy, &ScriptRef::from("leak/rebind"), &[] as &[&str]).unwrap_err() {
        BridgeError::Script { source, .. } => match source {
            ScriptError::ForeignReference { name, owner } => {
                assert_eq!(name, "stolen");
                assert_eq!(owner, current.id());
            }
            other => panic!("expected ForeignReference, got {other:?}"),
        },
        other => panic!("expected Script error, got {other:?}"),
    }
    assert!(bridge::get_variable(&legacy, "stolen").is_err());
}
