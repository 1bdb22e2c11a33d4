//! In-memory multicast broker used by the reference server.
//!
//! Every subscriber of a destination receives every message published to it
//! after it subscribed. Messages published before a subscription are not
//! replayed, which is why consumers must be subscribed before producers run.

use std::collections::{BTreeMap, HashMap};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{BrokerError, BrokerResult};
use crate::stats::BrokerStats;

/// A published message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: u64,
    pub destination: String,
    pub body: String,
    pub headers: BTreeMap<String, String>,
}

/// Multicast broker shared by reference with every environment.
#[derive(Debug)]
pub struct MemoryBroker {
    endpoint: String,
    running: AtomicBool,
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<Message>>>>,
    journal_dir: Option<PathBuf>,
    journal_lock: Mutex<()>,
    stats: BrokerStats,
}

impl MemoryBroker {
    /// A broker that keeps nothing on disk.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::build(endpoint.into(), None)
    }

    /// A broker that appends every published message to
    /// `<journal_dir>/<destination>.log`.
    pub fn with_journal(endpoint: impl Into<String>, journal_dir: impl Into<PathBuf>) -> Self {
        Self::build(endpoint.into(), Some(journal_dir.into()))
    }

    fn build(endpoint: String, journal_dir: Option<PathBuf>) -> Self {
        Self {
            endpoint,
            running: AtomicBool::new(true),
            next_id: AtomicU64::new(1),
            subscribers: Mutex::new(HashMap::new()),
            journal_dir,
            journal_lock: Mutex::new(()),
            stats: BrokerStats::new(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> &BrokerStats {
        &self.stats
    }

    pub fn journal_dir(&self) -> Option<&Path> {
        self.journal_dir.as_deref()
    }

    fn ensure_running(&self) -> BrokerResult<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(BrokerError::NotRunning {
                endpoint: self.endpoint.clone(),
            })
        }
    }

    /// Subscribe to `destination`. The subscription is live when this returns.
    pub fn subscribe(&self, destination: &str) -> BrokerResult<Subscription> {
        self.ensure_running()?;
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap()
            .entry(destination.to_string())
            .or_default()
            .push(tx);
        self.stats.inc_subscriptions();
        debug!(endpoint = %self.endpoint, destination, "subscribed");
        Ok(Subscription {
            destination: destination.to_string(),
            rx,
        })
    }

    /// Live subscribers of `destination`.
    pub fn subscriber_count(&self, destination: &str) -> usize {
        self.subscribers
            .lock()
            .unwrap()
            .get(destination)
            .map(|subs| subs.iter().filter(|s| !s.is_closed()).count())
            .unwrap_or(0)
    }

    /// Publish to every current subscriber of `destination`. Returns the
    /// message id.
    pub fn publish(
        &self,
        destination: &str,
        body: impl Into<String>,
        headers: BTreeMap<String, String>,
    ) -> BrokerResult<u64> {
        self.ensure_running()?;
        let message = Message {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            destination: destination.to_string(),
            body: body.into(),
            headers,
        };

        if let Some(dir) = &self.journal_dir {
            self.append_journal(dir, &message)?;
        }

        let mut delivered = 0u64;
        {
            let mut subscribers = self.subscribers.lock().unwrap();
            if let Some(subs) = subscribers.get_mut(destination) {
                subs.retain(|tx| tx.send(message.clone()).is_ok());
                delivered = subs.len() as u64;
            }
        }

        self.stats.inc_published();
        self.stats.add_delivered(delivered);
        Ok(message.id)
    }

    fn append_journal(&self, dir: &Path, message: &Message) -> BrokerResult<()> {
        let line = serde_json::to_string(message)?;
        let _guard = self.journal_lock.lock().unwrap();
        std::fs::create_dir_all(dir)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(journal_file_name(&message.destination)))?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    /// Stop accepting traffic and close every subscription.
    ///
    /// Returns `false` if the broker was already shut down.
    pub fn shutdown(&self) -> bool {
        if !self.running.swap(false, Ordering::SeqCst) {
            return false;
        }
        self.subscribers.lock().unwrap().clear();
        true
    }
}

fn journal_file_name(destination: &str) -> String {
    let safe: String = destination
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("{safe}.log")
}

/// A live subscription to one destination.
#[derive(Debug)]
pub struct Subscription {
    destination: String,
    rx: mpsc::UnboundedReceiver<Message>,
}

impl Subscription {
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Wait for the next message.
    pub async fn receive(&mut self, timeout: Duration) -> BrokerResult<Message> {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(message)) => Ok(message),
            Ok(None) => Err(BrokerError::Closed {
                destination: self.destination.clone(),
            }),
            Err(_elapsed) => Err(BrokerError::Timeout {
                destination: self.destination.clone(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }
}
