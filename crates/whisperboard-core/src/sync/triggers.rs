//! Trigger sources that feed the coordinator

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use super::coordinator::SyncHandle;
use super::events::TriggerSource;

/// Fire [`TriggerSource::Interval`] every `period` until the coordinator stops.
///
/// The first trigger fires one full period after spawning.
pub fn spawn_interval_trigger(handle: SyncHandle, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if handle.trigger_sync(TriggerSource::Interval).is_err() {
                break;
            }
        }
        debug!("Interval trigger stopped");
    })
}

/// Fire `source` each time `state` goes from `false` to `true`.
pub fn spawn_edge_trigger(
    handle: SyncHandle,
    mut state: watch::Receiver<bool>,
    source: TriggerSource,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last = *state.borrow_and_update();
        while state.changed().await.is_ok() {
            let current = *state.borrow_and_update();
            if current && !last && handle.trigger_sync(source).is_err() {
                break;
            }
            last = current;
        }
        debug!(%source, "Edge trigger stopped");
    })
}

/// Trigger on connectivity regained (offline to online).
pub fn spawn_online_trigger(handle: SyncHandle, online: watch::Receiver<bool>) -> JoinHandle<()> {
    spawn_edge_trigger(handle, online, TriggerSource::NetworkOnline)
}

/// Trigger when the app becomes visible.
pub fn spawn_foreground_trigger(handle: SyncHandle, visible: watch::Receiver<bool>) -> JoinHandle<()> {
    spawn_edge_trigger(handle, visible, TriggerSource::Foreground)
}
