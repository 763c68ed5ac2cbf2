use std::sync::atomic::{AtomicBool, Ordering};
use std::future::Future;
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::watch;

use crate::types::ids::ListenerId;
use crate::utils::helper::alert_operations_team_critical;

/// Callback invoked with the new `is_emergency_stopped` value.
pub type Listener = Arc<dyn Fn(bool) + Send + Sync>;

type Registry = Mutex<Vec<(ListenerId, Listener)>>;

/// Manual kill-switch halting every outbound call.
///
/// Independent of the circuit breaker: it never trips on its own and stays
/// set until an operator resets it.
pub struct EmergencyStop {
    active: AtomicBool,
    reason: Mutex<Option<String>>,
    listeners: Arc<Registry>,
    signal: watch::Sender<bool>,
}

impl EmergencyStop {
    pub fn new() -> Self {
        EmergencyStop {
            active: AtomicBool::new(false),
            reason: Mutex::new(None),
            listeners: Arc::new(Mutex::new(Vec::new())),
            signal: watch::channel(false).0,
        }
    }

    /// Set the stop. Listeners hear about it synchronously, before this returns.
    /// Stopping an already stopped switch keeps the first reason and notifies
    /// nobody.
    pub fn force_stop(&self, reason: impl Into<String>) {
        let reason = reason.into();
        if self.active.swap(true, Ordering::SeqCst) {
            tracing::warn!("Emergency stop already active, ignoring: {}", reason);
            return;
        }

        *self.reason.lock().unwrap_or_else(|e| e.into_inner()) = Some(reason.clone());

        tracing::error!("EMERGENCY STOP ACTIVATED: {}", reason);
        alert_operations_team_critical(format!("EMERGENCY STOP ACTIVATED: {}", reason));
        crate::observability::metrics::EMERGENCY_STOP_ACTIVE.set(1);

        self.signal.send_replace(true);
        self.notify(true);
    }

    pub fn reset(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }

        let previous = self.reason.lock().unwrap_or_else(|e| e.into_inner()).take();
        tracing::warn!("Emergency stop reset (was: {})", previous.unwrap_or_default());
        crate::observability::metrics::EMERGENCY_STOP_ACTIVE.set(0);

        self.signal.send_replace(false);
        self.notify(false);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn reason(&self) -> Option<String> {
        self.reason.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Resolves once the stop is (or already was) active. Used to cut short
    /// calls that are in flight when an operator pulls the switch.
    pub fn wait_until_stopped(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.signal.subscribe();
        async move {
            loop {
                if *rx.borrow_and_update() {
                    return;
                }
                if rx.changed().await.is_err() {
                    std::future::pending::<()>().await;
                }
            }
        }
    }

    pub fn add_listener<F>(&self, callback: F) -> ListenerHandle
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let id = ListenerId::new();
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(callback)));
        tracing::debug!("Emergency stop listener {} registered", id);

        ListenerHandle {
            id,
            registry: Arc::downgrade(&self.listeners),
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn notify(&self, stopped: bool) {
        // Snapshot first: a callback may add or remove listeners
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in listeners {
            listener(stopped);
        }
    }
}

impl Default for EmergencyStop {
    fn default() -> Self {
        Self::new()
    }
}

/// Returned by [`EmergencyStop::add_listener`]. Dropping the handle keeps
/// the subscription alive; call [`ListenerHandle::unsubscribe`] to end it.
#[derive(Debug)]
pub struct ListenerHandle {
    id: ListenerId,
    registry: Weak<Registry>,
}

impl ListenerHandle {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub fn unsubscribe(self) {
        if let Some(registry) = self.registry.upgrade() {
            registry
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .retain(|(id, _)| *id != self.id);
            tracing::debug!("Emergency stop listener {} removed", self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn listeners_receive_every_change() {
        let stop = EmergencyStop::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _handle = stop.add_listener(move |stopped| sink.lock().unwrap().push(stopped));

        stop.force_stop("cost spike");
        assert!(stop.is_active());
        assert_eq!(stop.reason().as_deref(), Some("cost spike"));

        stop.reset();
        assert!(!stop.is_active());
        assert_eq!(stop.reason(), None);

        assert_eq!(*seen.lock().unwrap(), vec![true, false]);
    }

    #[test]
    fn repeated_stop_is_not_a_change() {
        let stop = EmergencyStop::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let _handle = stop.add_listener(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        stop.force_stop("first");
        stop.force_stop("second");
        stop.reset();
        stop.reset();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unsubscribed_listener_is_not_called() {
        let stop = EmergencyStop::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let handle = stop.add_listener(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(stop.listener_count(), 1);

        handle.unsubscribe();
        assert_eq!(stop.listener_count(), 0);

        stop.force_stop("cost spike");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn wait_until_stopped_resolves_on_stop() {
        let stop = Arc::new(EmergencyStop::new());
        let waiter = tokio::spawn(stop.wait_until_stopped());

        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        stop.force_stop("cost spike");
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("waiter should resolve")
            .unwrap();

        // Already stopped: resolves immediately
        stop.wait_until_stopped().await;
    }

    #[test]
    fn listener_may_unsubscribe_others_while_notified() {
        let stop = Arc::new(EmergencyStop::new());
        let other = stop.add_listener(|_| {});
        let other = Mutex::new(Some(other));
        let _handle = stop.add_listener(move |_| {
            if let Some(handle) = other.lock().unwrap().take() {
                handle.unsubscribe();
            }
        });

        stop.force_stop("cost spike");
        assert_eq!(stop.listener_count(), 1);
    }
}
