use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    error::BusError,
    transport::Subscriber,
    types::{InboundMessage, OutboundMessage},
};

/// Process-wide message dispatcher.
///
/// Two unbounded FIFO queues (inbound, outbound) plus a per-channel
/// subscriber table for outbound fan-out. Publishing never blocks; the only
/// publish failure in normal operation is [`BusError::Closed`] after
/// shutdown.
///
/// Ordering guarantees: each queue is FIFO; outbound messages are delivered
/// to a channel's subscribers in publish order. Nothing is guaranteed across
/// channels.
pub struct MessageBus {
    inbound_tx: mpsc::UnboundedSender<InboundMessage>,
    inbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<InboundMessage>>,
    outbound_tx: mpsc::UnboundedSender<OutboundMessage>,
    outbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<OutboundMessage>>,
    subscribers: Mutex<HashMap<String, Vec<Arc<dyn Subscriber>>>>,
    closed: AtomicBool,
}

impl MessageBus {
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        Self {
            inbound_tx,
            inbound_rx: tokio::sync::Mutex::new(inbound_rx),
            outbound_tx,
            outbound_rx: tokio::sync::Mutex::new(outbound_rx),
            subscribers: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Enqueue an inbound message. FIFO; never blocks.
    pub fn publish_inbound(&self, msg: InboundMessage) -> Result<(), BusError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BusError::Closed);
        }
        self.inbound_tx.send(msg).map_err(|_| BusError::Closed)
    }

    /// Enqueue an outbound message. FIFO; never blocks.
    pub fn publish_outbound(&self, msg: OutboundMessage) -> Result<(), BusError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BusError::Closed);
        }
        self.outbound_tx.send(msg).map_err(|_| BusError::Closed)
    }

    /// Await the next inbound message.
    ///
    /// Returns `None` when cancellation fires or the bus is closed — a
    /// sentinel, not an error.
    pub async fn consume_inbound(&self, cancel: &CancellationToken) -> Option<InboundMessage> {
        let mut rx = self.inbound_rx.lock().await;
        tokio::select! {
            _ = cancel.cancelled() => None,
            msg = rx.recv() => msg,
        }
    }

    /// Await the next inbound message with a deadline. `None` on timeout.
    pub async fn consume_inbound_timeout(&self, deadline: Duration) -> Option<InboundMessage> {
        let mut rx = self.inbound_rx.lock().await;
        tokio::time::timeout(deadline, rx.recv()).await.ok().flatten()
    }

    /// Register an outbound handler for `channel`.
    ///
    /// Multiple subscribers per channel are allowed and invoked in
    /// registration order.
    pub fn subscribe_outbound(&self, channel: &str, subscriber: Arc<dyn Subscriber>) {
        let mut table = self.subscribers.lock().unwrap();
        debug!(channel, "registering outbound subscriber");
        table.entry(channel.to_string()).or_default().push(subscriber);
    }

    /// Number of subscribers registered for `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.subscribers
            .lock()
            .unwrap()
            .get(channel)
            .map(|v| v.len())
            .unwrap_or(0)
    }

    /// Long-running outbound dispatch loop.
    ///
    /// Dequeues messages and invokes each subscriber registered for the
    /// message's channel. A failing subscriber is logged and swallowed —
    /// remaining subscribers for the same message still run. Cancellation
    /// stops the loop after the in-flight message.
    pub async fn dispatch_outbound(&self, cancel: CancellationToken) {
        loop {
            let msg = {
                let mut rx = self.outbound_rx.lock().await;
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    msg = rx.recv() => match msg {
                        Some(m) => m,
                        None => return,
                    },
                }
            };

            // Snapshot under the lock, release before invoking callbacks.
            let subs: Vec<Arc<dyn Subscriber>> = {
                let table = self.subscribers.lock().unwrap();
                table.get(&msg.channel).cloned().unwrap_or_default()
            };

            if subs.is_empty() {
                warn!(channel = %msg.channel, "outbound message has no subscribers");
                continue;
            }

            for sub in subs {
                if let Err(e) = sub.deliver(&msg).await {
                    warn!(channel = %msg.channel, error = %e, "outbound subscriber failed");
                }
            }
        }
    }

    /// Close both queues. Subsequent publishes fail with [`BusError::Closed`].
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    struct Recorder {
        label: &'static str,
        log: Arc<StdMutex<Vec<String>>>,
        fail: bool,
    }

    #[async_trait]
    impl Subscriber for Recorder {
        async fn deliver(&self, msg: &OutboundMessage) -> Result<(), BusError> {
            if self.fail {
                return Err(BusError::DeliveryFailed("boom".to_string()));
            }
            self.log
                .lock()
                .unwrap()
                .push(format!("{}:{}", self.label, msg.content));
            Ok(())
        }
    }

    #[tokio::test]
    async fn inbound_is_fifo() {
        let bus = MessageBus::new();
        let cancel = CancellationToken::new();
        for i in 0..3 {
            bus.publish_inbound(InboundMessage::new("web", "u", "c", format!("m{i}")))
                .unwrap();
        }
        for i in 0..3 {
            let msg = bus.consume_inbound(&cancel).await.unwrap();
            assert_eq!(msg.content, format!("m{i}"));
        }
    }

    #[tokio::test]
    async fn consume_returns_none_on_cancellation() {
        let bus = Arc::new(MessageBus::new());
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(bus.consume_inbound(&cancel).await.is_none());
    }

    #[tokio::test]
    async fn consume_timeout_is_absent_not_error() {
        let bus = MessageBus::new();
        let got = bus
            .consume_inbound_timeout(Duration::from_millis(20))
            .await;
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn publish_after_close_fails() {
        let bus = MessageBus::new();
        bus.close();
        assert!(matches!(
            bus.publish_inbound(InboundMessage::new("web", "u", "c", "x")),
            Err(BusError::Closed)
        ));
        assert!(matches!(
            bus.publish_outbound(OutboundMessage::new("web", "c", "x")),
            Err(BusError::Closed)
        ));
    }

    #[tokio::test]
    async fn dispatch_invokes_subscribers_in_registration_order() {
        let bus = Arc::new(MessageBus::new());
        let log = Arc::new(StdMutex::new(Vec::new()));

        bus.subscribe_outbound(
            "web",
            Arc::new(Recorder { label: "a", log: log.clone(), fail: false }),
        );
        bus.subscribe_outbound(
            "web",
            Arc::new(Recorder { label: "b", log: log.clone(), fail: false }),
        );

        let cancel = CancellationToken::new();
        let dispatcher = {
            let bus = bus.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { bus.dispatch_outbound(cancel).await })
        };

        bus.publish_outbound(OutboundMessage::new("web", "c", "hi")).unwrap();
        bus.publish_outbound(OutboundMessage::new("web", "c", "again")).unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        dispatcher.await.unwrap();

        let entries = log.lock().unwrap().clone();
        assert_eq!(entries, vec!["a:hi", "b:hi", "a:again", "b:again"]);
    }

    #[tokio::test]
    async fn failing_subscriber_does_not_block_others() {
        let bus = Arc::new(MessageBus::new());
        let log = Arc::new(StdMutex::new(Vec::new()));

        bus.subscribe_outbound(
            "web",
            Arc::new(Recorder { label: "bad", log: log.clone(), fail: true }),
        );
        bus.subscribe_outbound(
            "web",
            Arc::new(Recorder { label: "good", log: log.clone(), fail: false }),
        );

        let cancel = CancellationToken::new();
        let dispatcher = {
            let bus = bus.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { bus.dispatch_outbound(cancel).await })
        };

        bus.publish_outbound(OutboundMessage::new("web", "c", "hi")).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        dispatcher.await.unwrap();

        let entries = log.lock().unwrap().clone();
        assert_eq!(entries, vec!["good:hi"]);
    }

    #[tokio::test]
    async fn messages_for_unsubscribed_channel_are_dropped() {
        let bus = Arc::new(MessageBus::new());
        let cancel = CancellationToken::new();
        let dispatcher = {
            let bus = bus.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { bus.dispatch_outbound(cancel).await })
        };

        bus.publish_outbound(OutboundMessage::new("ghost", "c", "hi")).unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();
        dispatcher.await.unwrap();
    }
}
