//! Periodic wake-up broadcaster. Fires every `poll_interval` seconds and
//! forwards notifier messages to schedulers, filtered by each scheduler's
//! queue expression so a pool registered for `emails` doesn't wake on a
//! `default` notification.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, RwLock};

use crate::notifier::Notifier;
use crate::queue_expr::QueueExpr;
use crate::wire::NotificationPayload;

struct Subscription {
    queue_expr: QueueExpr,
    sender: mpsc::Sender<()>,
}

pub struct Poller {
    subscriptions: Arc<RwLock<Vec<Subscription>>>,
}

impl Poller {
    /// `poll_interval_seconds`: `< 0` polls continuously (no wait between
    /// rounds), `0` disables the timer entirely (notify-only mode; only
    /// safe when `notifier` is `Some` and reliable).
    pub fn spawn(poll_interval_seconds: i64, notifier: Option<Notifier>) -> Self {
        let subscriptions: Arc<RwLock<Vec<Subscription>>> = Arc::new(RwLock::new(Vec::new()));

        if poll_interval_seconds != 0 {
            let timer_subs = subscriptions.clone();
            let interval = if poll_interval_seconds < 0 {
                Duration::from_millis(1)
            } else {
                Duration::from_secs(poll_interval_seconds as u64)
            };

            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    broadcast_all(&timer_subs).await;
                }
            });
        }

        if let Some(notifier) = notifier {
            let notify_subs = subscriptions.clone();
            let mut receiver = notifier.subscribe();
            tokio::spawn(async move {
                loop {
                    match receiver.recv().await {
                        Ok(payload) => forward_filtered(&notify_subs, &payload).await,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "poller notifier channel lagged, dropping old notifications");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
            });
        }

        Self { subscriptions }
    }

    /// Registers a scheduler pool's queue expression, returning a channel it
    /// should await on for wake signals.
    pub async fn register(&self, queue_expr: QueueExpr) -> mpsc::Receiver<()> {
        let (sender, receiver) = mpsc::channel(16);
        self.subscriptions
            .write()
            .await
            .push(Subscription { queue_expr, sender });
        receiver
    }
}

async fn broadcast_all(subs: &Arc<RwLock<Vec<Subscription>>>) {
    for sub in subs.read().await.iter() {
        let _ = sub.sender.try_send(());
    }
}

async fn forward_filtered(subs: &Arc<RwLock<Vec<Subscription>>>, payload: &NotificationPayload) {
    for sub in subs.read().await.iter() {
        if sub.queue_expr.matches(&payload.queue_name) {
            let _ = sub.sender.try_send(());
        }
    }
}
