use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use dashmap::DashMap;
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::store::{ChangeEvent, RowStore, StreamSelector};
use crate::sync::retry::RetryPolicy;

/// Callback invoked for every change event delivered on a channel.
pub type ChangeCallback = Arc<dyn Fn(ChangeEvent) + Send + Sync>;
/// Produces the selector for a channel; called again on every
/// re-subscription so filters are always computed fresh.
pub type SelectorFn = Arc<dyn Fn() -> StreamSelector + Send + Sync>;
/// Listener fired after a mass reconnect so owners can resync.
pub type ReconnectListener = Arc<dyn Fn() + Send + Sync>;

/// Connectivity as observed by the registry.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionHealth {
    /// Subscriptions are established and pumping.
    Connected,
    /// A mass reconnect is in progress.
    Reconnecting,
    /// Establishment retries were exhausted; the liveness sweep will
    /// re-probe periodically.
    Disconnected,
}

struct Registration {
    name: String,
    selector: SelectorFn,
    callback: ChangeCallback,
    feed: Mutex<Option<JoinHandle<()>>>,
}

impl Registration {
    fn take_feed(&self) -> Option<JoinHandle<()>> {
        self.feed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn set_feed(&self, handle: JoinHandle<()>) {
        *self.feed.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    fn feed_finished(&self) -> bool {
        self.feed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_none_or(JoinHandle::is_finished)
    }
}

struct RegistryInner {
    store: Arc<dyn RowStore>,
    policy: RetryPolicy,
    stabilization_delay: Duration,
    channels: DashMap<String, Arc<Registration>>,
    listeners: Mutex<Vec<ReconnectListener>>,
    health: watch::Sender<ConnectionHealth>,
    reconnect_gate: tokio::sync::Mutex<()>,
}

/// Owns exactly-once-by-name subscriptions to backend change streams.
///
/// Establishment retries with exponential backoff; a mass
/// [`reconnect_all`](Self::reconnect_all) tears every feed down, waits a
/// stabilization delay, and re-subscribes from scratch with fresh selectors.
/// This is the only safe recovery after a suspension, since any number of
/// pushed events may have been missed while the process was asleep.
#[derive(Clone)]
pub struct ChannelRegistry {
    inner: Arc<RegistryInner>,
}

impl ChannelRegistry {
    /// Create a registry over the given store.
    pub fn new(
        store: Arc<dyn RowStore>,
        policy: RetryPolicy,
        stabilization_delay: Duration,
    ) -> Self {
        let (health, _watcher) = watch::channel(ConnectionHealth::Connected);
        Self {
            inner: Arc::new(RegistryInner {
                store,
                policy,
                stabilization_delay,
                channels: DashMap::new(),
                listeners: Mutex::new(Vec::new()),
                health,
                reconnect_gate: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Subscribe to a change stream under a unique name.
    ///
    /// Registering an already-taken name is idempotent: the duplicate is
    /// logged and a no-op guard is returned, leaving the existing
    /// subscription untouched.
    pub fn subscribe(
        &self,
        name: impl Into<String>,
        selector: SelectorFn,
        callback: ChangeCallback,
    ) -> ChannelGuard {
        let name = name.into();
        if self.inner.channels.contains_key(&name) {
            debug!(channel = %name, "duplicate channel registration ignored");
            return ChannelGuard { slot: None };
        }

        let registration = Arc::new(Registration {
            name: name.clone(),
            selector,
            callback,
            feed: Mutex::new(None),
        });
        self.inner
            .channels
            .insert(name.clone(), registration.clone());
        spawn_feed(&self.inner, registration);

        ChannelGuard {
            slot: Some((Arc::downgrade(&self.inner), name)),
        }
    }

    /// Register a listener fired after every mass reconnect.
    pub fn on_reconnect(&self, listener: ReconnectListener) {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// Watch connectivity transitions.
    pub fn health_watcher(&self) -> watch::Receiver<ConnectionHealth> {
        self.health().subscribe()
    }

    /// Number of registered channels.
    pub fn channel_count(&self) -> usize {
        self.inner.channels.len()
    }

    /// Whether any registered feed has stopped pumping.
    pub fn has_dead_channel(&self) -> bool {
        self.inner
            .channels
            .iter()
            .any(|entry| entry.value().feed_finished())
    }

    /// Tear down every subscription and re-establish from scratch.
    ///
    /// Registered on-reconnect listeners fire afterwards so owners can
    /// follow up with a snapshot resync; nothing received before the
    /// teardown is trusted to be complete.
    pub async fn reconnect_all(&self) {
        let _gate = self.inner.reconnect_gate.lock().await;
        let _ = self.health().send(ConnectionHealth::Reconnecting);

        let registrations: Vec<Arc<Registration>> = self
            .inner
            .channels
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        info!(
            channels = registrations.len(),
            "tearing down subscriptions for full reconnect"
        );
        for registration in &registrations {
            if let Some(handle) = registration.take_feed() {
                handle.abort();
            }
        }

        sleep(self.inner.stabilization_delay).await;

        for registration in &registrations {
            spawn_feed(&self.inner, registration.clone());
        }

        let listeners = self
            .inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in &listeners {
            (listener)();
        }
    }

    /// Handle the OS-level "app foregrounded" signal.
    ///
    /// A process that was suspended cannot trust that it received every
    /// pushed event, so this routes through the same stabilization-delay and
    /// mass-reconnect path as a detected dead feed.
    pub async fn notify_foregrounded(&self) {
        info!("foreground regained; forcing full reconnect");
        self.reconnect_all().await;
    }

    fn health(&self) -> &watch::Sender<ConnectionHealth> {
        &self.inner.health
    }
}

fn spawn_feed(inner: &Arc<RegistryInner>, registration: Arc<Registration>) {
    let store = inner.store.clone();
    let policy = inner.policy;
    let health = inner.health.clone();
    let reg = registration.clone();

    let handle = tokio::spawn(async move {
        let mut attempt = 0u32;
        let feed = loop {
            let selector = (reg.selector)();
            match store.subscribe(selector).await {
                Ok(feed) => break Some(feed),
                Err(err) => {
                    attempt += 1;
                    if attempt >= policy.max_attempts {
                        warn!(
                            channel = %reg.name,
                            attempts = attempt,
                            error = %err,
                            "subscription retries exhausted; giving up"
                        );
                        break None;
                    }
                    let delay = policy.delay_for(attempt);
                    debug!(
                        channel = %reg.name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "subscription establishment failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        };

        let Some(mut feed) = feed else {
            let _ = health.send(ConnectionHealth::Disconnected);
            return;
        };

        let _ = health.send(ConnectionHealth::Connected);
        while let Some(event) = feed.next().await {
            (reg.callback)(event);
        }
        // Feed closed server-side; the liveness sweep picks this up.
        debug!(channel = %reg.name, "change feed ended");
    });

    registration.set_feed(handle);
}

/// Scoped handle to a registered channel.
///
/// Dropping the guard removes the registration and aborts its feed task, so
/// shutdown paths cannot leak subscriptions. Guards returned for duplicate
/// registrations are no-ops.
pub struct ChannelGuard {
    slot: Option<(Weak<RegistryInner>, String)>,
}

impl ChannelGuard {
    /// Whether this guard owns a live registration.
    pub fn is_active(&self) -> bool {
        self.slot.is_some()
    }
}

impl Drop for ChannelGuard {
    fn drop(&mut self) {
        let Some((weak, name)) = self.slot.take() else {
            return;
        };
        let Some(inner) = weak.upgrade() else {
            return;
        };
        if let Some((_, registration)) = inner.channels.remove(&name) {
            if let Some(handle) = registration.take_feed() {
                handle.abort();
            }
            debug!(channel = %name, "channel unregistered");
        }
    }
}
