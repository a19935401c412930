use std::time::Duration;

use jobforge_core::poller::Poller;
use jobforge_core::queue_expr::QueueExpr;

#[tokio::test(start_paused = true)]
async fn continuous_poll_wakes_a_registered_subscriber() {
    let poller = Poller::spawn(-1, None);
    let mut rx = poller.register("*".parse::<QueueExpr>().unwrap()).await;

    tokio::time::advance(Duration::from_millis(10)).await;
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for a wake signal")
        .expect("channel should still be open");
}

#[tokio::test(start_paused = true)]
async fn a_disabled_timer_never_wakes_a_subscriber_without_a_notifier() {
    let poller = Poller::spawn(0, None);
    let mut rx = poller.register("*".parse::<QueueExpr>().unwrap()).await;

    tokio::time::advance(Duration::from_secs(5)).await;
    let result = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await;
    assert!(result.is_err(), "poll_interval_seconds = 0 with no notifier should never wake anyone");
}

#[tokio::test(start_paused = true)]
async fn queue_filtered_subscribers_are_independent() {
    let poller = Poller::spawn(-1, None);
    let mut emails_rx = poller.register("emails".parse::<QueueExpr>().unwrap()).await;
    let mut default_rx = poller.register("default".parse::<QueueExpr>().unwrap()).await;

    tokio::time::advance(Duration::from_millis(10)).await;

    // The timer-driven tick wakes every subscriber regardless of queue
    // expression; filtering by queue only applies to notifier-forwarded wakes.
    tokio::time::timeout(Duration::from_secs(1), emails_rx.recv()).await.unwrap().unwrap();
    tokio::time::timeout(Duration::from_secs(1), default_rx.recv()).await.unwrap().unwrap();
}
