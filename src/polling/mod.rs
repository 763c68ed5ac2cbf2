//! Interval-driven consumers of the guarded fetch path.

pub mod hooks;
pub mod poller;

pub use hooks::{MarketHooks, MarketRead};
pub use poller::{spawn_poller, FetchFn, HookError, HookState, Poller, PollerHandle};
