//! Per-channel change listeners and their dispatch thread.
//!
//! Listeners are keyed by `(mac, channel, kind)`. The IO task never calls
//! them directly; it hands each [`ChannelChange`] to a dedicated dispatch
//! thread, so a slow or panicking callback cannot stall frame processing.

use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use ampio_core::{ChannelChange, ChannelValue, ReadingKind, format_mac};
use tokio::sync::mpsc;

type Callback = dyn Fn(u32, u8, ReadingKind, ChannelValue) + Send + Sync;

/// A change callback, invoked as `callback(mac, channel, kind, value)`.
///
/// Listeners compare by identity: clones of one `Listener` are equal, two
/// listeners built from identical closures are not. Keep a clone around to
/// unregister it later.
#[derive(Clone)]
pub struct Listener(Arc<Callback>);

impl Listener {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(u32, u8, ReadingKind, ChannelValue) + Send + Sync + 'static,
    {
        Self(Arc::new(callback))
    }

    /// Invoke the callback for `change`.
    pub fn call(&self, change: &ChannelChange) {
        (self.0)(change.mac, change.channel, change.kind, change.value);
    }

    fn addr(&self) -> *const () {
        Arc::as_ptr(&self.0) as *const ()
    }
}

impl PartialEq for Listener {
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }
}

impl Eq for Listener {}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Listener").field(&self.addr()).finish()
    }
}

/// Address of one observable channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerKey {
    pub mac: u32,
    pub channel: u8,
    pub kind: ReadingKind,
}

impl ListenerKey {
    pub fn new(mac: u32, channel: u8, kind: ReadingKind) -> Self {
        Self { mac, channel, kind }
    }
}

impl From<&ChannelChange> for ListenerKey {
    fn from(change: &ChannelChange) -> Self {
        Self::new(change.mac, change.channel, change.kind)
    }
}

impl fmt::Display for ListenerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", format_mac(self.mac), self.channel, self.kind)
    }
}

/// Listeners grouped by channel, in registration order.
#[derive(Debug, Default)]
pub struct ListenerRegistry {
    listeners: HashMap<ListenerKey, Vec<Listener>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `listener` for `key`. Registering the same listener twice is a
    /// no-op. Always returns `true`.
    pub fn register(&mut self, key: ListenerKey, listener: Listener) -> bool {
        let entry = self.listeners.entry(key).or_default();
        if !entry.contains(&listener) {
            entry.push(listener);
        }
        true
    }

    /// Remove `listener` from `key`. Returns `false` if it was not
    /// registered there.
    pub fn unregister(&mut self, key: ListenerKey, listener: &Listener) -> bool {
        let Some(entry) = self.listeners.get_mut(&key) else {
            return false;
        };
        let Some(pos) = entry.iter().position(|l| l == listener) else {
            return false;
        };
        entry.remove(pos);
        if entry.is_empty() {
            self.listeners.remove(&key);
        }
        true
    }

    /// Snapshot of the listeners for `key`.
    pub fn listeners_for(&self, key: &ListenerKey) -> Vec<Listener> {
        self.listeners.get(key).cloned().unwrap_or_default()
    }

    /// Number of channels with at least one listener.
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

pub(crate) fn lock_registry(registry: &Mutex<ListenerRegistry>) -> MutexGuard<'_, ListenerRegistry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Invoke every listener registered for the changed channel, in
/// registration order. Returns how many were called.
///
/// The registry lock is released before the first callback runs, so
/// callbacks may register or unregister listeners themselves. A panicking
/// callback is logged and does not stop the others.
pub fn dispatch(registry: &Mutex<ListenerRegistry>, change: &ChannelChange) -> usize {
    let key = ListenerKey::from(change);
    let listeners = lock_registry(registry).listeners_for(&key);
    for listener in &listeners {
        if catch_unwind(AssertUnwindSafe(|| listener.call(change))).is_err() {
            tracing::error!(key = %key, value = %change.value, "Listener panicked");
        }
    }
    listeners.len()
}

/// Start the thread that delivers changes to listeners.
///
/// The thread exits once every sender of `changes` is dropped.
pub(crate) fn spawn_dispatcher(
    registry: Arc<Mutex<ListenerRegistry>>,
    mut changes: mpsc::UnboundedReceiver<ChannelChange>,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("ampio-dispatch".into())
        .spawn(move || {
            while let Some(change) = changes.blocking_recv() {
                dispatch(&registry, &change);
            }
            tracing::debug!("Dispatch thread exiting");
        })
}
