//! Reference producer and consumer scripts.
//!
//! Both follow the workload contract: numeric string arguments, one latch
//! touch per unit of work, failures counted in a bound error tally instead of
//! propagated, and a live counter returned for polling.
//!
//! Bindings read by both scripts:
//!
//! | name              | kind  | default                  |
//! |-------------------|-------|--------------------------|
//! | `reusableLatch`   | latch | required                 |
//! | `multiplyFactor`  | int   | required (producer only) |
//! | `destination`     | text  | `exampleQueue`           |
//! | `endpoint`        | text  | `mem://localhost:61616`  |
//! | `latchTimeoutMs`  | int   | 60000                    |
//! | `receiveTimeoutMs`| int   | 30000                    |

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use soak_env::{
    Counter, ResultHandle, ReusableLatch, Script, ScriptArgs, ScriptContext, ScriptError,
    ScriptRef, ScriptResult,
};
use soak_server::{MemoryBroker, DEFAULT_ENDPOINT};
use tracing::{debug, warn};

pub const SEND_MESSAGES: &str = "hqsoak/send_messages";
pub const RECEIVE_MESSAGES: &str = "hqsoak/receive_messages";

pub const LATCH_BINDING: &str = "reusableLatch";
pub const MULTIPLY_FACTOR_BINDING: &str = "multiplyFactor";
pub const DESTINATION_BINDING: &str = "destination";
pub const ENDPOINT_BINDING: &str = "endpoint";
pub const LATCH_TIMEOUT_BINDING: &str = "latchTimeoutMs";
pub const RECEIVE_TIMEOUT_BINDING: &str = "receiveTimeoutMs";

pub const DEFAULT_DESTINATION: &str = "exampleQueue";
const DEFAULT_LATCH_TIMEOUT_MS: i64 = 60_000;
const DEFAULT_RECEIVE_TIMEOUT_MS: i64 = 30_000;

/// Which side of the workload a script plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Producer,
    Consumer,
}

impl Phase {
    /// Binding holding this phase's error tally.
    pub fn tally_name(&self) -> &'static str {
        match self {
            Phase::Producer => "errorsProducer",
            Phase::Consumer => "errorsConsumer",
        }
    }

    pub fn script(&self) -> ScriptRef {
        match self {
            Phase::Producer => ScriptRef::from(SEND_MESSAGES),
            Phase::Consumer => ScriptRef::from(RECEIVE_MESSAGES),
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Producer => write!(f, "producer"),
            Phase::Consumer => write!(f, "consumer"),
        }
    }
}

fn text_or(ctx: &ScriptContext<'_>, name: &str, default: &str) -> ScriptResult<String> {
    Ok(ctx.text(name)?.unwrap_or_else(|| default.to_string()))
}

fn millis(ctx: &ScriptContext<'_>, name: &str, default: i64) -> ScriptResult<Duration> {
    let ms = ctx.int_or(name, default)?;
    u64::try_from(ms)
        .map(Duration::from_millis)
        .map_err(|_| ScriptError::Failed(format!("{name} must not be negative, got {ms}")))
}

// ---------------------------------------------------------------------------
// SendMessages
// ---------------------------------------------------------------------------

/// `hqsoak/send_messages [label, threads, messagesPerThread]`
///
/// Each producer thread arms the latch by the multiply factor before every
/// publish, then waits for the latch to drain after its last message. The
/// returned counter counts finished threads.
#[derive(Debug, Clone)]
pub struct SendMessages {
    protocol: &'static str,
}

impl SendMessages {
    /// `protocol` is stamped on every message as the `protocol` header.
    pub fn new(protocol: &'static str) -> Self {
        Self { protocol }
    }
}

impl Script for SendMessages {
    fn run(&self, ctx: &mut ScriptContext<'_>, args: &ScriptArgs) -> ScriptResult<ResultHandle> {
        let label = args.text(0, "label")?.to_string();
        let threads = args.count(1, "threads")?;
        let per_thread = args.count(2, "messagesPerThread")?;

        let errors = ctx.counter();
        ctx.bind(Phase::Producer.tally_name(), errors.clone())?;
        let finished = ctx.counter();

        let latch = ctx.latch(LATCH_BINDING)?;
        let factor = ctx.int(MULTIPLY_FACTOR_BINDING)?;
        let factor = u64::try_from(factor).map_err(|_| {
            ScriptError::Failed(format!("{MULTIPLY_FACTOR_BINDING} must not be negative"))
        })?;
        let destination = text_or(ctx, DESTINATION_BINDING, DEFAULT_DESTINATION)?;
        let endpoint = text_or(ctx, ENDPOINT_BINDING, DEFAULT_ENDPOINT)?;
        let latch_timeout = millis(ctx, LATCH_TIMEOUT_BINDING, DEFAULT_LATCH_TIMEOUT_MS)?;

        let broker = ctx.object::<MemoryBroker>(&endpoint);

        for thread in 0..threads {
            let producer = Producer {
                label: label.clone(),
                protocol: self.protocol,
                thread,
                messages: per_thread,
                destination: destination.clone(),
                broker: broker.clone(),
                endpoint: endpoint.clone(),
                latch: latch.clone(),
                factor,
                latch_timeout,
                errors: errors.clone(),
                finished: finished.clone(),
            };
            ctx.spawn(producer.run())?;
        }

        debug!(label = %label, threads, per_thread, "producers launched");
        Ok(ResultHandle::Counter(finished))
    }
}

struct Producer {
    label: String,
    protocol: &'static str,
    thread: u64,
    messages: u64,
    destination: String,
    broker: Option<Arc<MemoryBroker>>,
    endpoint: String,
    latch: ReusableLatch,
    factor: u64,
    latch_timeout: Duration,
    errors: Counter,
    finished: Counter,
}

impl Producer {
    async fn run(self) {
        match &self.broker {
            None => {
                warn!(label = %self.label, endpoint = %self.endpoint, "producer cannot reach broker");
                self.errors.increment();
            }
            Some(broker) => {
                for seq in 0..self.messages {
                    self.latch.count_up(self.factor);
                    let mut headers = BTreeMap::new();
                    headers.insert("producer".to_string(), self.label.clone());
                    headers.insert("protocol".to_string(), self.protocol.to_string());
                    headers.insert("thread".to_string(), self.thread.to_string());
                    let body = format!("{}-{}-{}", self.label, self.thread, seq);
                    if let Err(e) = broker.publish(&self.destination, body, headers) {
                        warn!(label = %self.label, thread = self.thread, error = %e, "publish failed");
                        self.latch.count_down_by(self.factor);
                        self.errors.increment();
                    }
                }
                if !self.latch.wait(self.latch_timeout).await {
                    warn!(
                        label = %self.label,
                        thread = self.thread,
                        remaining = self.latch.count(),
                        "latch did not drain"
                    );
                    self.errors.increment();
                }
            }
        }
        self.finished.increment();
    }
}

// ---------------------------------------------------------------------------
// ReceiveMessages
// ---------------------------------------------------------------------------

/// `hqsoak/receive_messages [label, consumers, totalMessagesPerQueue]`
///
/// Subscribes every listener before returning. Each listener counts the latch
/// down once per message and exits after `total` messages; the returned
/// counter is the number of listeners still running.
#[derive(Debug, Clone, Default)]
pub struct ReceiveMessages;

impl ReceiveMessages {
    pub fn new() -> Self {
        Self
    }
}

impl Script for ReceiveMessages {
    fn run(&self, ctx: &mut ScriptContext<'_>, args: &ScriptArgs) -> ScriptResult<ResultHandle> {
        let label = args.text(0, "label")?.to_string();
        let consumers = args.count(1, "consumers")?;
        let total = args.count(2, "totalMessagesPerQueue")?;

        let errors = ctx.counter();
        ctx.bind(Phase::Consumer.tally_name(), errors.clone())?;
        let running = ctx.counter();

        let latch = ctx.latch(LATCH_BINDING)?;
        let destination = text_or(ctx, DESTINATION_BINDING, DEFAULT_DESTINATION)?;
        let endpoint = text_or(ctx, ENDPOINT_BINDING, DEFAULT_ENDPOINT)?;
        let receive_timeout = millis(ctx, RECEIVE_TIMEOUT_BINDING, DEFAULT_RECEIVE_TIMEOUT_MS)?;

        let Some(broker) = ctx.object::<MemoryBroker>(&endpoint) else {
            warn!(label = %label, endpoint = %endpoint, "consumer cannot reach broker");
            errors.increment();
            return Ok(ResultHandle::Counter(running));
        };

        for listener in 0..consumers {
            let mut subscription = match broker.subscribe(&destination) {
                Ok(s) => s,
                Err(e) => {
                    warn!(label = %label, listener, error = %e, "subscribe failed");
                    errors.increment();
                    continue;
                }
            };
            running.increment();

            let label = label.clone();
            let latch = latch.clone();
            let errors = errors.clone();
            let running = running.clone();
            ctx.spawn(async move {
                let mut received = 0u64;
                while received < total {
                    match subscription.receive(receive_timeout).await {
                        Ok(_message) => {
                            received += 1;
                            latch.count_down();
                        }
                        Err(e) => {
                            warn!(label = %label, listener, received, total, error = %e, "receive failed");
                            errors.increment();
                            break;
                        }
                    }
                }
                running.decrement();
            })?;
        }

        debug!(label = %label, consumers, total, "consumers subscribed");
        Ok(ResultHandle::Counter(running))
    }
}
