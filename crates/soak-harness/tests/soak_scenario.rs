//! End-to-end soak scenarios against the builtin versions.

use std::sync::Arc;
use std::time::Duration;

use soak_env::{
    await_equals, bridge, script_fn, CatalogResolver, ResultHandle, Script, Value, VersionTag,
    WaitPolicy,
};
use soak_harness::{
    builtin_artifact, builtin_resolver, HarnessConfig, Phase, ReceiveMessages, SendMessages,
    SoakError, SoakHarness, VersionWorkload, WorkloadPlan, CURRENT, LEGACY, PREVIOUS_MAJOR,
    RECEIVE_MESSAGES, SEND_MESSAGES,
};
use soak_server::{MemoryBroker, DEFAULT_ENDPOINT};

fn tag(s: &str) -> VersionTag {
    VersionTag::new(s).unwrap()
}

fn test_config(dir: &tempfile::TempDir) -> HarnessConfig {
    HarnessConfig {
        server_dir: dir.path().join("server"),
        worker_threads: 2,
        producer_wait: WaitPolicy::new(Duration::from_secs(30), Duration::from_millis(20)),
        drain_wait: WaitPolicy::new(Duration::from_secs(10), Duration::from_millis(10)),
        readiness_wait: WaitPolicy::new(Duration::from_secs(5), Duration::from_millis(5)),
        latch_timeout_ms: 10_000,
        receive_timeout_ms: 10_000,
        ..HarnessConfig::default()
    }
}

/// Builtin versions, with `legacy`'s producer replaced by one that records a
/// spurious error after doing its normal work.
fn faulty_legacy_resolver() -> CatalogResolver {
    builtin_resolver().with_version(tag(LEGACY), |t| {
        builtin_artifact(t).with_script(
            SEND_MESSAGES,
            script_fn(|ctx, args| {
                let handle = SendMessages::new("legacy-core").run(ctx, args)?;
                if let Value::Counter(errors) = ctx.get("errorsProducer")? {
                    errors.increment();
                }
                Ok(handle)
            }),
        )
    })
}

/// Builtin versions, with `previous-major`'s consumer never draining.
fn stuck_consumer_resolver() -> CatalogResolver {
    builtin_resolver().with_version(tag(PREVIOUS_MAJOR), |t| {
        builtin_artifact(t).with_script(
            RECEIVE_MESSAGES,
            script_fn(|ctx, _args| {
                let errors = ctx.counter();
                ctx.bind("errorsConsumer", errors)?;
                let running = ctx.counter();
                running.set(1);
                Ok(ResultHandle::Counter(running))
            }),
        )
    })
}

/// Builtin versions, with `legacy`'s producer rebinding its tally to void
/// after doing its normal work.
fn void_tally_resolver() -> CatalogResolver {
    builtin_resolver().with_version(tag(LEGACY), |t| {
        builtin_artifact(t).with_script(
            SEND_MESSAGES,
            script_fn(|ctx, args| {
                let handle = SendMessages::new("legacy-core").run(ctx, args)?;
                ctx.bind("errorsProducer", Value::Void)?;
                Ok(handle)
            }),
        )
    })
}

/// Builtin versions, with `current`'s producer only ever finishing one of its
/// threads.
fn stuck_producer_resolver() -> CatalogResolver {
    builtin_resolver().with_version(tag(CURRENT), |t| {
        builtin_artifact(t).with_script(
            SEND_MESSAGES,
            script_fn(|ctx, _args| {
                let errors = ctx.counter();
                ctx.bind("errorsProducer", errors)?;
                let finished = ctx.counter();
                finished.set(1);
                Ok(ResultHandle::Counter(finished))
            }),
        )
    })
}

/// Builtin versions whose consumers also expose their progress counter as
/// `consumerProgress`.
fn observable_consumer_resolver() -> CatalogResolver {
    [CURRENT, PREVIOUS_MAJOR, LEGACY]
        .into_iter()
        .fold(CatalogResolver::new(), |resolver, name| {
            resolver.with_version(tag(name), |t| {
                builtin_artifact(t).with_script(
                    RECEIVE_MESSAGES,
                    script_fn(|ctx, args| {
                        let handle = ReceiveMessages::new().run(ctx, args)?;
                        if let ResultHandle::Counter(progress) = &handle {
                            ctx.bind("consumerProgress", progress.clone())?;
                        }
                        Ok(handle)
                    }),
                )
            })
        })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concrete_scenario_passes() {
    let dir = tempfile::tempdir().unwrap();
    let plan = WorkloadPlan::default();
    let mut harness = SoakHarness::setup(test_config(&dir), Arc::new(builtin_resolver()), &plan)
        .await
        .unwrap();
    assert!(dir.path().join("server").join("data").is_dir());

    let report = harness.run(&plan).await.unwrap();

    assert!(report.passed);
    assert_eq!(report.total_messages_per_queue, 20);
    assert_eq!(report.multiply_factor, 25);
    assert_eq!(report.latch_remaining, 0);
    assert_eq!(report.plan_digest, plan.digest());

    let producers: Vec<_> = report
        .outcomes
        .iter()
        .filter(|o| o.phase == Phase::Producer)
        .collect();
    assert_eq!(producers.len(), 2);
    assert!(producers.iter().all(|o| o.settled_at == 2));
    let consumers: Vec<_> = report
        .outcomes
        .iter()
        .filter(|o| o.phase == Phase::Consumer)
        .collect();
    assert_eq!(consumers.len(), 3);
    assert!(consumers.iter().all(|o| o.settled_at == 0));

    assert_eq!(report.tallies.len(), 5);
    assert!(report.tallies.iter().all(|t| t.errors == 0));

    let broker = harness
        .manager()
        .shared()
        .object::<MemoryBroker>(DEFAULT_ENDPOINT)
        .unwrap();
    assert_eq!(broker.stats().published(), 20);
    assert_eq!(broker.stats().delivered(), 20 * 25);
    assert_eq!(broker.stats().subscriptions(), 25);

    // Every version saw the same latch object.
    let envs: Vec<_> = [CURRENT, PREVIOUS_MAJOR, LEGACY]
        .iter()
        .map(|t| harness.manager().get(&tag(t)).unwrap())
        .collect();
    let latches: Vec<_> = envs
        .iter()
        .map(|env| match bridge::get_variable(env, "reusableLatch").unwrap() {
            Value::Latch(latch) => latch,
            other => panic!("expected latch, got {}", other.kind()),
        })
        .collect();
    assert!(latches[0].same_latch(&latches[1]));
    assert!(latches[1].same_latch(&latches[2]));

    harness.teardown().await;
    assert!(!broker.is_running());
    assert!(harness.manager().environments().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_nonzero_tally_fails_even_when_counts_balance() {
    let dir = tempfile::tempdir().unwrap();
    let plan = WorkloadPlan::default();
    let mut harness =
        SoakHarness::setup(test_config(&dir), Arc::new(faulty_legacy_resolver()), &plan)
            .await
            .unwrap();

    let report = harness.execute(&plan).await.unwrap();
    assert!(!report.passed);
    assert_eq!(report.latch_remaining, 0);
    assert_eq!(report.failures().len(), 1);
    assert_eq!(report.failures()[0].version, tag(LEGACY));
    assert_eq!(report.failures()[0].phase, Phase::Producer);

    match report.into_result() {
        Err(SoakError::WorkloadErrors { failures }) => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].errors, 1);
        }
        other => panic!("expected WorkloadErrors, got {other:?}"),
    }
    harness.teardown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_consumer_that_never_drains_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let config = HarnessConfig {
        drain_wait: WaitPolicy::new(Duration::from_millis(300), Duration::from_millis(10)),
        latch_timeout_ms: 200,
        ..test_config(&dir)
    };
    let plan = WorkloadPlan::default();
    let mut harness = SoakHarness::setup(config, Arc::new(stuck_consumer_resolver()), &plan)
        .await
        .unwrap();

    let err = harness.run(&plan).await.unwrap_err();
    match &err {
        SoakError::Timeout { version, phase, source } => {
            assert_eq!(version, &tag(PREVIOUS_MAJOR));
            assert_eq!(*phase, Phase::Consumer);
            assert!(source.to_string().contains("last observed 1"));
        }
        other => panic!("expected Timeout, got {other:?}"),
    }
    assert!(err.is_timeout());
    harness.teardown().await;
}

#[tokio::test]
async fn test_unknown_version_fails_setup() {
    let dir = tempfile::tempdir().unwrap();
    let plan = WorkloadPlan::new("exampleQueue")
        .with_version(VersionWorkload::new(tag("nightly")).producers(1, 1).consumers(1));

    let err = match SoakHarness::setup(test_config(&dir), Arc::new(builtin_resolver()), &plan).await
    {
        Ok(_) => panic!("setup should fail for an unknown version"),
        Err(e) => e,
    };
    assert!(err.is_configuration());
    assert!(err.to_string().contains("nightly"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_run_after_teardown_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let plan = WorkloadPlan::new("soak")
        .with_version(VersionWorkload::new(tag(CURRENT)).producers(1, 3).consumers(2));
    let mut harness = SoakHarness::setup(test_config(&dir), Arc::new(builtin_resolver()), &plan)
        .await
        .unwrap();

    let report = harness.run(&plan).await.unwrap();
    assert_eq!(report.destination, "soak");
    assert_eq!(report.tallies.len(), 2);

    harness.teardown().await;
    harness.teardown().await;
    assert!(matches!(harness.run(&plan).await, Err(SoakError::NotSetUp)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_void_tally_fails_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let plan = WorkloadPlan::default();
    let mut harness =
        SoakHarness::setup(test_config(&dir), Arc::new(void_tally_resolver()), &plan)
            .await
            .unwrap();

    match harness.run(&plan).await {
        Err(SoakError::TallyNotCounter { version, phase }) => {
            assert_eq!(version, tag(LEGACY));
            assert_eq!(phase, Phase::Producer);
        }
        other => panic!("expected TallyNotCounter, got {other:?}"),
    }
    harness.teardown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_producer_that_never_finishes_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let config = HarnessConfig {
        producer_wait: WaitPolicy::new(Duration::from_millis(300), Duration::from_millis(10)),
        latch_timeout_ms: 200,
        ..test_config(&dir)
    };
    let plan = WorkloadPlan::default();
    let mut harness = SoakHarness::setup(config, Arc::new(stuck_producer_resolver()), &plan)
        .await
        .unwrap();

    let err = harness.run(&plan).await.unwrap_err();
    match &err {
        SoakError::Timeout { version, phase, source } => {
            assert_eq!(version, &tag(CURRENT));
            assert_eq!(*phase, Phase::Producer);
            let msg = source.to_string();
            assert!(msg.contains("expected 2"), "{msg}");
            assert!(msg.contains("last observed 1"), "{msg}");
        }
        other => panic!("expected Timeout, got {other:?}"),
    }
    harness.teardown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_drained_consumers_stay_drained() {
    let dir = tempfile::tempdir().unwrap();
    let plan = WorkloadPlan::default();
    let mut harness = SoakHarness::setup(
        test_config(&dir),
        Arc::new(observable_consumer_resolver()),
        &plan,
    )
    .await
    .unwrap();

    harness.run(&plan).await.unwrap();

    let policy = WaitPolicy::new(Duration::from_millis(200), Duration::from_millis(5));
    for name in [CURRENT, PREVIOUS_MAJOR, LEGACY] {
        let env = harness.manager().get(&tag(name)).unwrap();
        let progress = bridge::execute(&env, "return consumerProgress").unwrap();
        for _ in 0..2 {
            await_equals(0, || progress.get().unwrap_or(-1), &policy)
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(bridge::get(&progress), Some(0), "version {name}");
    }
    harness.teardown().await;
}
