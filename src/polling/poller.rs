use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::Instrument;

use crate::error::{Error, ErrorKind, Result};
use crate::observability::tracing::trace_poll;
use crate::types::ids::PollerId;

pub type FetchFn<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<T>> + Send + Sync>;

/// What a consumer renders: last good value plus loading and error flags.
/// A failed cycle never clears `value`.
#[derive(Clone, Debug, Serialize)]
pub struct HookState<T> {
    pub value: Option<T>,
    pub is_loading: bool,
    pub error: Option<HookError>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl<T> Default for HookState<T> {
    fn default() -> Self {
        HookState {
            value: None,
            is_loading: false,
            error: None,
            last_updated: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HookError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&Error> for HookError {
    fn from(err: &Error) -> Self {
        HookError {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// One hook instance: a fetch run on an interval with at most one
/// request outstanding.
pub struct Poller<T> {
    id: PollerId,
    hook: &'static str,
    fetch: FetchFn<T>,
    state: watch::Sender<HookState<T>>,
    in_flight: AtomicBool,
    cancelled: AtomicBool,
}

impl<T> Poller<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(hook: &'static str, fetch: FetchFn<T>) -> Arc<Self> {
        Arc::new(Poller {
            id: PollerId::new(),
            hook,
            fetch,
            state: watch::channel(HookState::default()).0,
            in_flight: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> PollerId {
        self.id
    }

    /// Run one fetch unless one is already outstanding. Returns whether the
    /// result was applied to the state.
    pub async fn run_cycle(&self) -> bool {
        if self.is_cancelled() {
            return false;
        }
        if self.in_flight.swap(true, Ordering::SeqCst) {
            tracing::trace!("{} poll skipped, previous fetch still in flight", self.hook);
            return false;
        }
        let _in_flight = InFlight(&self.in_flight);

        self.state.send_modify(|state| state.is_loading = true);

        let result = (self.fetch)()
            .instrument(trace_poll(&self.id, self.hook))
            .await;

        if self.is_cancelled() {
            tracing::debug!("{} poller {} cancelled, discarding result", self.hook, self.id);
            return false;
        }

        self.state.send_modify(|state| {
            state.is_loading = false;
            match result {
                Ok(value) => {
                    state.value = Some(value);
                    state.error = None;
                    state.last_updated = Some(Utc::now());
                }
                Err(err) => {
                    if err.is_policy_rejection() {
                        tracing::debug!("{} poll skipped: {}", self.hook, err);
                    } else {
                        tracing::warn!("{} poll failed: {}", self.hook, err);
                    }
                    state.error = Some(HookError::from(&err));
                }
            }
        });
        true
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> watch::Receiver<HookState<T>> {
        self.state.subscribe()
    }

    pub fn state(&self) -> HookState<T> {
        self.state.borrow().clone()
    }
}

struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Start polling `fetch` every `interval`, first fetch immediately.
///
/// Each tick spawns its cycle so a slow response never delays the ticker;
/// ticks landing while a fetch is outstanding are dropped, not queued.
pub fn spawn_poller<T>(hook: &'static str, interval: Duration, fetch: FetchFn<T>) -> PollerHandle<T>
where
    T: Clone + Send + Sync + 'static,
{
    let poller = Poller::new(hook, fetch);
    let ticking = Arc::clone(&poller);

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            if ticking.is_cancelled() {
                break;
            }
            let cycle = Arc::clone(&ticking);
            tokio::spawn(async move {
                cycle.run_cycle().await;
            });
        }
    });

    tracing::debug!("{} poller {} started every {:?}", hook, poller.id(), interval);
    PollerHandle { poller, task }
}

/// Owner of a running poller. Dropping it cancels the poller: the ticker
/// stops and an outstanding fetch has its result discarded.
pub struct PollerHandle<T>
where
    T: Clone + Send + Sync + 'static,
{
    poller: Arc<Poller<T>>,
    task: JoinHandle<()>,
}

impl<T> PollerHandle<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn id(&self) -> PollerId {
        self.poller.id()
    }

    pub fn subscribe(&self) -> watch::Receiver<HookState<T>> {
        self.poller.subscribe()
    }

    pub fn state(&self) -> HookState<T> {
        self.poller.state()
    }

    /// Manual refresh. Shares the in-flight guard with the ticker, so it is
    /// a no-op returning `false` while a fetch is outstanding.
    pub async fn refresh_now(&self) -> bool {
        self.poller.run_cycle().await
    }

    pub fn cancel(&self) {
        if !self.poller.is_cancelled() {
            self.poller.cancel();
            self.task.abort();
            tracing::debug!("{} poller {} cancelled", self.poller.hook, self.poller.id());
        }
    }
}

impl<T> Drop for PollerHandle<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::AtomicUsize;

    fn counting_fetch(calls: Arc<AtomicUsize>, delay: Duration) -> FetchFn<u64> {
        Arc::new(move || {
            let calls = Arc::clone(&calls);
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) as u64 + 1;
                tokio::time::sleep(delay).await;
                Ok(n)
            }
            .boxed()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn polls_on_interval() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handle = spawn_poller("bid_count", Duration::from_secs(15), counting_fetch(calls.clone(), Duration::ZERO));

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(handle.state().value, Some(1));
        assert!(handle.state().last_updated.is_some());

        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(handle.state().value, Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_fetch_skips_ticks_instead_of_queueing() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handle = spawn_poller("current_bid", Duration::from_secs(15), counting_fetch(calls.clone(), Duration::from_secs(40)));

        // Fetch started at 0s resolves at 40s; ticks at 15s and 30s are dropped
        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(handle.state().is_loading);
        assert!(!handle.refresh_now().await);

        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(handle.state().value, Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_poller_discards_late_result() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handle = spawn_poller("buy_now", Duration::from_secs(30), counting_fetch(calls.clone(), Duration::from_secs(5)));
        let rx = handle.subscribe();

        tokio::time::sleep(Duration::from_secs(1)).await;
        drop(handle);
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(rx.borrow().value, None);
    }

    #[tokio::test]
    async fn failure_keeps_last_value() {
        let fail = Arc::new(AtomicBool::new(false));
        let toggle = Arc::clone(&fail);
        let fetch: FetchFn<u64> = Arc::new(move || {
            let fail = toggle.load(Ordering::SeqCst);
            async move {
                if fail {
                    Err(Error::RateLimited { wait_ms: 2_000 })
                } else {
                    Ok(9)
                }
            }
            .boxed()
        });
        let poller = Poller::new("bid_count", fetch);

        assert!(poller.run_cycle().await);
        fail.store(true, Ordering::SeqCst);
        assert!(poller.run_cycle().await);

        let state = poller.state();
        assert_eq!(state.value, Some(9));
        assert!(!state.is_loading);
        assert_eq!(state.error.map(|e| e.kind), Some(ErrorKind::RateLimited));
    }
}
