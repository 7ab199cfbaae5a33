//! Background polling of `GET /messages`, using the same command/notification
//! channel pair as any long-lived task in this workspace.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::api::ApiClient;
use crate::events::SyncEvent;
use crate::sync::Timeline;

/// Commands sent *into* the poller task.
#[derive(Debug)]
pub enum PollerCommand {
    /// Poll immediately instead of waiting for the next tick.
    PollNow,
    Shutdown,
}

/// Owner of a running poller. Dropping it stops the task.
pub struct PollerHandle {
    cmd_tx: mpsc::Sender<PollerCommand>,
    task: JoinHandle<()>,
}

impl PollerHandle {
    pub async fn poll_now(&self) {
        let _ = self.cmd_tx.send(PollerCommand::PollNow).await;
    }

    pub async fn shutdown(self) {
        let _ = self.cmd_tx.send(PollerCommand::Shutdown).await;
        let _ = self.task.await;
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

pub(crate) fn lock(timeline: &Mutex<Timeline>) -> MutexGuard<'_, Timeline> {
    timeline.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Spawn the polling loop. The first poll runs immediately.
///
/// Transport and server failures never end the loop; they are reported as
/// [`SyncEvent::Reconnecting`] and retried on the next tick. An
/// `ACCESS_DENIED` answer ends it after emitting [`SyncEvent::Blocked`].
pub fn spawn_poller(
    api: ApiClient,
    timeline: Arc<Mutex<Timeline>>,
    interval: Duration,
) -> (PollerHandle, mpsc::Receiver<SyncEvent>) {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<PollerCommand>(16);
    let (event_tx, event_rx) = mpsc::channel::<SyncEvent>(64);

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut failures: u32 = 0;

        info!(interval_ms = interval.as_millis() as u64, "Poller started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(PollerCommand::PollNow) => {}
                        Some(PollerCommand::Shutdown) | None => break,
                    }
                }
            }

            let events = poll_once(&api, &timeline, &mut failures).await;
            let blocked = events.contains(&SyncEvent::Blocked);
            for event in events {
                if event_tx.send(event).await.is_err() {
                    debug!("Event receiver dropped, stopping poller");
                    return;
                }
            }
            if blocked {
                break;
            }
        }

        info!("Poller stopped");
    });

    (PollerHandle { cmd_tx, task }, event_rx)
}

async fn poll_once(
    api: &ApiClient,
    timeline: &Mutex<Timeline>,
    failures: &mut u32,
) -> Vec<SyncEvent> {
    match api.list_messages().await {
        Ok(messages) => {
            let mut events = Vec::new();
            if *failures > 0 {
                info!(failures = *failures, "Poll recovered");
                *failures = 0;
                events.push(SyncEvent::Recovered);
            }

            let total = messages.len();
            if lock(timeline).apply_snapshot(messages) {
                events.push(SyncEvent::SnapshotChanged { messages: total });
            }
            events
        }
        Err(e) if e.is_access_denied() => {
            warn!("Access denied by server, polling stopped");
            vec![SyncEvent::Blocked]
        }
        Err(e) => {
            *failures = failures.saturating_add(1);
            warn!(error = %e, failures = *failures, "Poll failed");
            vec![SyncEvent::Reconnecting {
                failures: *failures,
            }]
        }
    }
}
