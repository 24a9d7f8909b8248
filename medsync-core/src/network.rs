//! Network Status Monitor.
//!
//! Owns the process-wide connectivity snapshot. Consumers get it injected
//! and either read [`NetworkMonitor::current`], register an edge-triggered
//! callback, or hold a `watch` receiver.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::remote::check_server;

/// Lower bound for the fallback heartbeat.
pub const MIN_HEARTBEAT: Duration = Duration::from_secs(30);
/// Upper bound for the fallback heartbeat.
pub const MAX_HEARTBEAT: Duration = Duration::from_secs(60);

type Callback = Arc<dyn Fn(bool) + Send + Sync>;
type CallbackMap = Mutex<HashMap<u64, Callback>>;

struct Inner {
    tx: watch::Sender<bool>,
    callbacks: Arc<CallbackMap>,
    next_id: AtomicU64,
}

/// Connectivity snapshot with change notification.
#[derive(Clone)]
pub struct NetworkMonitor {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for NetworkMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkMonitor")
            .field("online", &self.current())
            .finish()
    }
}

impl NetworkMonitor {
    /// Creates a monitor seeded with the runtime's start-up connectivity.
    pub fn new(initial: bool) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self {
            inner: Arc::new(Inner {
                tx,
                callbacks: Arc::new(Mutex::new(HashMap::new())),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn current(&self) -> bool {
        *self.inner.tx.borrow()
    }

    /// Feeds a connectivity signal. Returns true if the state flipped.
    ///
    /// Repeated identical signals are ignored; callbacks only fire on a flip.
    pub fn set_online(&self, online: bool) -> bool {
        let flipped = self.inner.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });

        if flipped {
            if online {
                tracing::info!("Network: online");
            } else {
                tracing::warn!("Network: offline");
            }

            // Call outside the lock so a callback may subscribe or unsubscribe.
            let callbacks: Vec<Callback> = match self.inner.callbacks.lock() {
                Ok(map) => map.values().cloned().collect(),
                Err(poisoned) => poisoned.into_inner().values().cloned().collect(),
            };
            for callback in callbacks {
                callback(online);
            }
        }

        flipped
    }

    /// Registers a callback fired on every flip. Dropping the returned
    /// handle unsubscribes it.
    pub fn on_change<F>(&self, callback: F) -> Subscription
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let mut map = match self.inner.callbacks.lock() {
            Ok(map) => map,
            Err(poisoned) => poisoned.into_inner(),
        };
        map.insert(id, Arc::new(callback));

        Subscription {
            id,
            callbacks: Arc::downgrade(&self.inner.callbacks),
        }
    }

    /// Receiver for async consumers; `changed()` resolves on flips only.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.inner.tx.subscribe()
    }

    /// Polls `probe` as a fallback when the host has no push notifications.
    ///
    /// The interval is clamped to [`MIN_HEARTBEAT`, `MAX_HEARTBEAT`].
    pub fn spawn_heartbeat(
        &self,
        probe: Arc<dyn ConnectivityProbe>,
        interval: Duration,
    ) -> JoinHandle<()> {
        let monitor = self.clone();
        let period = clamp_heartbeat(interval);
        tracing::debug!("Starting connectivity heartbeat every {:?}", period);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let online = probe.probe().await;
                monitor.set_online(online);
            }
        })
    }
}

pub fn clamp_heartbeat(interval: Duration) -> Duration {
    interval.clamp(MIN_HEARTBEAT, MAX_HEARTBEAT)
}

/// Handle returned by [`NetworkMonitor::on_change`].
pub struct Subscription {
    id: u64,
    callbacks: Weak<CallbackMap>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        // Drop does the work.
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(callbacks) = self.callbacks.upgrade() {
            let mut map = match callbacks.lock() {
                Ok(map) => map,
                Err(poisoned) => poisoned.into_inner(),
            };
            map.remove(&self.id);
        }
    }
}

/// A connectivity primitive that can be asked "are we online?".
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn probe(&self) -> bool;
}

/// Probes `GET <server>/health`.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    server_url: String,
}

impl HttpProbe {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
        }
    }
}

#[async_trait]
impl ConnectivityProbe for HttpProbe {
    async fn probe(&self) -> bool {
        check_server(&self.server_url).await
    }
}
