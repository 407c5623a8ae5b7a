// Status watcher
//
// Background poller that keeps the last-known-good session status for a
// viewer. Fetch failures are transient: the previous status is kept and the
// next tick retries. The task ends when its cancellation token fires, which
// also happens when the watcher is dropped.

use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::dashboard_client::DashboardClient;
use crate::session::SessionStatus;

pub struct StatusWatcher {
    status: watch::Receiver<SessionStatus>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl StatusWatcher {
    /// Start polling every `interval`
    pub fn spawn(client: DashboardClient, interval: Duration) -> Self {
        Self::spawn_with_token(client, interval, &CancellationToken::new())
    }

    /// Start polling; cancelling `parent` also stops this watcher
    pub fn spawn_with_token(
        client: DashboardClient,
        interval: Duration,
        parent: &CancellationToken,
    ) -> Self {
        let cancel = parent.child_token();
        let (tx, rx) = watch::channel(SessionStatus::default());
        let task = tokio::spawn(poll(client, interval, tx, cancel.clone()));

        Self {
            status: rx,
            cancel,
            task: Some(task),
        }
    }

    /// Last-known-good status ("stopped, not rendering" until the first poll)
    pub fn latest(&self) -> SessionStatus {
        *self.status.borrow()
    }

    /// Receiver that changes whenever a poll returns a different status
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    /// Resolve once a poll reports rendering; `None` if cancelled first
    pub async fn wait_for_rendering(&self) -> Option<SessionStatus> {
        let mut rx = self.status.clone();
        tokio::select! {
            _ = self.cancel.cancelled() => None,
            result = rx.wait_for(|status| status.rendering) => result.ok().map(|status| *status),
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancel and wait for the polling task to finish
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for StatusWatcher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn poll(
    client: DashboardClient,
    interval: Duration,
    tx: watch::Sender<SessionStatus>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            result = client.session_status() => result,
        };

        match result {
            Ok(status) => {
                tx.send_if_modified(|current| {
                    if *current == status {
                        false
                    } else {
                        *current = status;
                        true
                    }
                });
            }
            Err(e) => {
                // Keep the last-known-good status and retry next tick
                warn!(error = %e, "Status poll failed");
            }
        }
    }

    debug!("Status watcher stopped");
}
