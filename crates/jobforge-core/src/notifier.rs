//! A single long-lived `LISTEN` connection that decodes `pg_notify` payloads
//! and fans them out to registered recipients. Not on the critical path:
//! jobs still become available via polling even if this never reconnects.

use std::sync::Arc;

use sqlx::postgres::PgListener;
use tokio::sync::{broadcast, RwLock};

use crate::config::NOTIFIER_DEGRADED_THRESHOLD;
use crate::wire::NotificationPayload;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifierStatus {
    Connected,
    Degraded,
}

struct Inner {
    status: RwLock<NotifierStatus>,
}

/// Handle shared between the background `LISTEN` task and its subscribers.
#[derive(Clone)]
pub struct Notifier {
    inner: Arc<Inner>,
    sender: broadcast::Sender<NotificationPayload>,
}

impl Notifier {
    pub fn status_handle(&self) -> NotifierStatusHandle {
        NotifierStatusHandle {
            inner: self.inner.clone(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NotificationPayload> {
        self.sender.subscribe()
    }
}

#[derive(Clone)]
pub struct NotifierStatusHandle {
    inner: Arc<Inner>,
}

impl NotifierStatusHandle {
    pub async fn status(&self) -> NotifierStatus {
        *self.inner.status.read().await
    }
}

/// Spawns the listener loop and returns a `Notifier` handle to subscribe on.
/// Reconnects with unbounded retry on connection loss; after
/// `NOTIFIER_DEGRADED_THRESHOLD` consecutive failures it logs one warning and
/// flips to `Degraded` until a successful notification resets the streak.
pub fn spawn(db_url: String, channel: String) -> Notifier {
    let (sender, _) = broadcast::channel(1024);
    let inner = Arc::new(Inner {
        status: RwLock::new(NotifierStatus::Connected),
    });

    let task_sender = sender.clone();
    let task_inner = inner.clone();

    tokio::spawn(async move {
        let mut consecutive_failures: u32 = 0;

        loop {
            match run_once(&db_url, &channel, &task_sender, &task_inner).await {
                Ok(()) => unreachable!("listener loop only returns on error"),
                Err(err) => {
                    consecutive_failures += 1;
                    if consecutive_failures == NOTIFIER_DEGRADED_THRESHOLD {
                        tracing::warn!(
                            error = %err,
                            consecutive_failures,
                            "notifier has failed repeatedly, marking degraded"
                        );
                        *task_inner.status.write().await = NotifierStatus::Degraded;
                    } else {
                        tracing::debug!(error = %err, "notifier connection lost, reconnecting");
                    }

                    let backoff = std::time::Duration::from_secs((consecutive_failures as u64).min(30));
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    });

    Notifier { inner, sender }
}

async fn run_once(
    db_url: &str,
    channel: &str,
    sender: &broadcast::Sender<NotificationPayload>,
    inner: &Arc<Inner>,
) -> Result<(), sqlx::Error> {
    let mut listener = PgListener::connect(db_url).await?;
    listener.listen(channel).await?;

    loop {
        let notification = listener.recv().await?;
        *inner.status.write().await = NotifierStatus::Connected;

        match serde_json::from_str::<NotificationPayload>(notification.payload()) {
            Ok(payload) => {
                // No receivers is the common case between polls; not an error.
                let _ = sender.send(payload);
            }
            Err(err) => {
                tracing::warn!(error = %err, payload = notification.payload(), "failed to decode notification payload");
            }
        }
    }
}
