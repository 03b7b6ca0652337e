//! Background workers feeding the linker.
//!
//! - [`TriggerWatcher`]: binds fired standing orders to their child orders
//! - [`FillDispatcher`]: credits completed buys from the order-update stream
//! - [`OrderBookPoller`]: credits completed buys found in the order book

mod fill_dispatcher;
mod order_poller;
mod trigger_watcher;

pub use fill_dispatcher::{DispatcherStats, FillDispatcher};
pub use order_poller::{OrderBookPoller, PollerStats};
pub use trigger_watcher::{TriggerWatcher, WatcherStats};

use futures_util::stream::{self, Stream};
use std::future::Future;
use tokio::sync::{mpsc, watch};

/// Create a linked shutdown trigger and signal.
pub fn shutdown_channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx })
}

/// Sending half of the shutdown signal.
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

/// Cloneable shutdown signal observed by every worker.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once shutdown is triggered or the trigger is dropped.
    pub async fn wait(&mut self) {
        let _ = self.rx.wait_for(|stopped| *stopped).await;
    }
}

/// Two-stage session shutdown.
///
/// Credit feeders (watcher, dispatcher, poller) stop first. The release loop
/// stops only after they have exited, so a credit applied by an in-flight
/// poll still reaches a listening release receiver.
#[derive(Debug)]
pub struct SessionShutdown {
    feeders: ShutdownTrigger,
    releases: ShutdownTrigger,
    feeder_signal: Shutdown,
    release_signal: Shutdown,
}

impl SessionShutdown {
    pub fn new() -> Self {
        let (feeders, feeder_signal) = shutdown_channel();
        let (releases, release_signal) = shutdown_channel();
        Self {
            feeders,
            releases,
            feeder_signal,
            release_signal,
        }
    }

    /// Signal for tasks that credit fills or bind triggers.
    pub fn feeders(&self) -> Shutdown {
        self.feeder_signal.clone()
    }

    /// Signal for the release loop.
    pub fn releases(&self) -> Shutdown {
        self.release_signal.clone()
    }

    /// Stop the feeders, wait for `feeders_stopped`, then stop the release loop.
    pub async fn stop<F: Future>(&self, feeders_stopped: F) -> F::Output {
        self.feeders.trigger();
        let output = feeders_stopped.await;
        self.releases.trigger();
        output
    }

    /// Stop everything at once.
    pub fn abort(&self) {
        self.feeders.trigger();
        self.releases.trigger();
    }
}

impl Default for SessionShutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Adapt a bounded receiver into a stream.
pub fn receiver_stream<T: Send + 'static>(rx: mpsc::Receiver<T>) -> impl Stream<Item = T> {
    stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) })
}

/// Adapt an unbounded receiver into a stream.
pub fn unbounded_receiver_stream<T: Send + 'static>(
    rx: mpsc::UnboundedReceiver<T>,
) -> impl Stream<Item = T> {
    stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn test_shutdown_wakes_waiters() {
        let (trigger, shutdown) = shutdown_channel();
        let mut waiter = shutdown.clone();
        assert!(!shutdown.is_triggered());

        let handle = tokio::spawn(async move { waiter.wait().await });
        trigger.trigger();
        handle.await.unwrap();
        assert!(shutdown.is_triggered());
    }

    #[tokio::test]
    async fn test_dropped_trigger_releases_waiters() {
        let (trigger, mut shutdown) = shutdown_channel();
        drop(trigger);
        shutdown.wait().await;
    }

    #[tokio::test]
    async fn test_session_shutdown_stops_releases_last() {
        let session = SessionShutdown::new();
        let feeders = session.feeders();
        let releases = session.releases();

        let observed = session
            .stop(async { (feeders.is_triggered(), releases.is_triggered()) })
            .await;

        assert_eq!(observed, (true, false));
        assert!(session.releases().is_triggered());
    }

    #[tokio::test]
    async fn test_receiver_stream_ends_with_channel() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(1).await.unwrap();
        tx.send(2).await.unwrap();
        drop(tx);

        let items: Vec<i32> = receiver_stream(rx).collect().await;
        assert_eq!(items, vec![1, 2]);
    }
}
