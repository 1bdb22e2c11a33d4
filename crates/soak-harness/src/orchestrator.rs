//! Soak workload orchestrator.
//!
//! Drives one soak scenario across several isolated versions:
//!
//! 1. `multiplyFactor` is the total consumer count over every version.
//! 2. One shared latch starting at zero is bound, with the factor, into every
//!    environment.
//! 3. `totalMessagesPerQueue` is the total producer output.
//! 4. Consumers start in every version before any producer.
//! 5. Producers start and hand back their finished-thread counters.
//! 6. Producer counters are polled until every thread finished.
//! 7. Consumer counters are polled until every listener drained.
//! 8. Error tallies are read back; any nonzero tally fails the run.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use soak_env::{
    await_equals, bridge, ArtifactResolver, Counter, Environment, IsolationManager,
    ResultHandle, ReusableLatch, VersionTag, WaitPolicy,
};
use soak_server::{ServerHandle, ServerLifecycle};
use tracing::{debug, info, Instrument};
use uuid::Uuid;

use crate::config::HarnessConfig;
use crate::error::{SoakError, SoakResult};
use crate::obs::{
    emit_phase_launched, emit_phase_settled, emit_soak_finished, emit_soak_started,
    emit_tally_read, emit_teardown_error, soak_span,
};
use crate::plan::{VersionWorkload, WorkloadPlan};
use crate::report::{PhaseOutcome, SoakReport, TallyReading};
use crate::workloads::{
    Phase, DESTINATION_BINDING, ENDPOINT_BINDING, LATCH_BINDING, LATCH_TIMEOUT_BINDING,
    MULTIPLY_FACTOR_BINDING, RECEIVE_TIMEOUT_BINDING,
};

/// A launched phase in one environment.
struct Launched {
    version: VersionTag,
    phase: Phase,
    units: u64,
    progress: Counter,
}

/// Owns the environments and the server for a soak run.
pub struct SoakHarness {
    config: HarnessConfig,
    manager: IsolationManager,
    lifecycle: ServerLifecycle,
    server: Option<ServerHandle>,
}

impl SoakHarness {
    /// Acquire every version the plan names plus the server version, clear
    /// the server directory and start the server.
    pub async fn setup(
        config: HarnessConfig,
        resolver: Arc<dyn ArtifactResolver>,
        plan: &WorkloadPlan,
    ) -> SoakResult<Self> {
        plan.validate()?;
        let manager = IsolationManager::new(resolver, config.manager_config());
        let lifecycle = ServerLifecycle::new(config.readiness_wait);

        let server_env = manager.acquire(&config.server_version)?;
        let tags = plan.tags();
        for tag in &tags {
            manager.acquire(tag)?;
        }

        let server = lifecycle
            .start(
                &config.server_dir,
                &server_env,
                config.server_role,
                config.server_override(),
                config.persistent,
                &tags,
            )
            .await?;

        info!(
            server_version = %config.server_version,
            endpoint = %server.endpoint,
            versions = ?tags,
            "soak harness ready"
        );
        Ok(Self {
            config,
            manager,
            lifecycle,
            server: Some(server),
        })
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn manager(&self) -> &IsolationManager {
        &self.manager
    }

    pub fn server(&self) -> Option<&ServerHandle> {
        self.server.as_ref()
    }

    /// Run `plan` and fail unless every error tally reads zero.
    pub async fn run(&self, plan: &WorkloadPlan) -> SoakResult<SoakReport> {
        self.execute(plan).await?.into_result()
    }

    /// Run `plan` and return the report whatever the tallies say.
    ///
    /// Configuration errors and phase timeouts still fail the call.
    pub async fn execute(&self, plan: &WorkloadPlan) -> SoakResult<SoakReport> {
        let server = self.server.as_ref().ok_or(SoakError::NotSetUp)?;
        plan.validate()?;

        let run_id = Uuid::new_v4();
        let span = soak_span(&run_id.to_string());
        self.execute_run(run_id, plan, &server.endpoint)
            .instrument(span)
            .await
    }

    async fn execute_run(
        &self,
        run_id: Uuid,
        plan: &WorkloadPlan,
        endpoint: &str,
    ) -> SoakResult<SoakReport> {
        let run_id_str = run_id.to_string();
        let started_at = Utc::now();
        let started = Instant::now();

        let plan_digest = plan.digest();
        let multiply_factor = plan.multiply_factor();
        let total = plan.total_messages_per_queue();
        emit_soak_started(&run_id_str, &plan_digest, plan.versions.len(), total, multiply_factor);

        let latch = self.manager.shared().latch(0);
        let mut envs = Vec::with_capacity(plan.versions.len());
        for workload in &plan.versions {
            let env = self.manager.acquire(&workload.version)?;
            self.seed(&env, &latch, multiply_factor, &plan.destination, endpoint)?;
            envs.push((env, workload));
        }

        let mut consumers = Vec::new();
        for (env, workload) in &envs {
            if workload.participates(Phase::Consumer) {
                consumers.push(launch(env, workload, Phase::Consumer, total)?);
            }
        }
        debug!(listeners = multiply_factor, "all consumers subscribed");

        let mut producers = Vec::new();
        for (env, workload) in &envs {
            if workload.participates(Phase::Producer) {
                producers.push(launch(env, workload, Phase::Producer, total)?);
            }
        }

        let mut outcomes = Vec::new();
        for launched in &producers {
            let expected = launched.units as i64;
            outcomes.push(settle(launched, expected, &self.config.producer_wait).await?);
        }
        for launched in &consumers {
            outcomes.push(settle(launched, 0, &self.config.drain_wait).await?);
        }

        let mut tallies = Vec::new();
        for (env, workload) in &envs {
            for phase in [Phase::Producer, Phase::Consumer] {
                if workload.participates(phase) {
                    tallies.push(read_tally(env, phase)?);
                }
            }
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        let passed = tallies.iter().all(TallyReading::is_clean);
        emit_soak_finished(&run_id_str, duration_ms, passed);

        Ok(SoakReport {
            run_id,
            plan_digest,
            started_at,
            duration_ms,
            destination: plan.destination.clone(),
            total_messages_per_queue: total,
            multiply_factor,
            outcomes,
            tallies,
            latch_remaining: latch.count(),
            passed,
        })
    }

    fn seed(
        &self,
        env: &Environment,
        latch: &ReusableLatch,
        multiply_factor: u64,
        destination: &str,
        endpoint: &str,
    ) -> SoakResult<()> {
        bridge::set_variable(env, LATCH_BINDING, latch.clone())?;
        bridge::set_variable(env, MULTIPLY_FACTOR_BINDING, multiply_factor)?;
        bridge::set_variable(env, DESTINATION_BINDING, destination)?;
        bridge::set_variable(env, ENDPOINT_BINDING, endpoint)?;
        bridge::set_variable(env, LATCH_TIMEOUT_BINDING, self.config.latch_timeout_ms)?;
        bridge::set_variable(env, RECEIVE_TIMEOUT_BINDING, self.config.receive_timeout_ms)?;
        Ok(())
    }

    /// Stop the server and release every environment. Failures are logged,
    /// never returned.
    pub async fn teardown(&mut self) {
        if self.server.take().is_some() {
            if let Err(e) = self.lifecycle.stop_version(&self.config.server_version).await {
                emit_teardown_error("server.stop", &e);
            }
        }
        let released = self.manager.release_all();
        debug!(released, "environments released");
    }
}

fn launch(
    env: &Environment,
    workload: &VersionWorkload,
    phase: Phase,
    total: u64,
) -> SoakResult<Launched> {
    let label = workload.version.to_string();
    let (units, args) = match phase {
        Phase::Consumer => (
            workload.consumers,
            [label, workload.consumers.to_string(), total.to_string()],
        ),
        Phase::Producer => (
            workload.producer_threads,
            [
                label,
                workload.producer_threads.to_string(),
                workload.messages_per_thread.to_string(),
            ],
        ),
    };

    let handle = bridge::evaluate(env, &phase.script(), &args)?;
    let ResultHandle::Counter(progress) = handle else {
        return Err(SoakError::NoProgressCounter {
            version: workload.version.clone(),
            phase,
        });
    };
    emit_phase_launched(workload.version.as_str(), phase, units);
    Ok(Launched {
        version: workload.version.clone(),
        phase,
        units,
        progress,
    })
}

async fn settle(launched: &Launched, expected: i64, policy: &WaitPolicy) -> SoakResult<PhaseOutcome> {
    let started = Instant::now();
    let progress = launched.progress.clone();
    await_equals(expected, || progress.get(), policy)
        .await
        .map_err(|source| SoakError::Timeout {
            version: launched.version.clone(),
            phase: launched.phase,
            source,
        })?;
    let wait_ms = started.elapsed().as_millis() as u64;
    emit_phase_settled(launched.version.as_str(), launched.phase, wait_ms);
    Ok(PhaseOutcome {
        version: launched.version.clone(),
        phase: launched.phase,
        units: launched.units,
        settled_at: expected,
        wait_ms,
    })
}

fn read_tally(env: &Environment, phase: Phase) -> SoakResult<TallyReading> {
    let handle = bridge::execute(env, &format!("return {}", phase.tally_name()))?;
    let Some(errors) = bridge::get(&handle) else {
        return Err(SoakError::TallyNotCounter {
            version: env.tag().clone(),
            phase,
        });
    };
    emit_tally_read(env.tag().as_str(), phase, errors);
    Ok(TallyReading {
        version: env.tag().clone(),
        phase,
        errors,
    })
}
