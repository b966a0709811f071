//! # Change Notifier
//!
//! Fans committed blocks out to live subscribers over a `tokio::sync::broadcast` channel.
//! Delivery is best-effort: nothing is queued for subscribers that are not connected, and a
//! subscriber that falls behind the buffer is told how much it missed so it can re-fetch the
//! chain.

use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, warn};

use crate::types::Block;

/// What a subscriber receives
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Block(Block),
    /// `n` blocks were dropped; the subscriber must re-fetch the full chain
    Lagged(u64),
}

/// Publishing side of the notifier
#[derive(Debug)]
pub struct ChangeNotifier {
    sender: broadcast::Sender<Block>,
    published: AtomicU64,
}

impl ChangeNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            published: AtomicU64::new(0),
        }
    }

    /// Deliver a committed block to every current subscriber.
    ///
    /// Never blocks. Returns how many subscribers it was queued for.
    pub fn publish(&self, block: &Block) -> usize {
        self.published.fetch_add(1, Ordering::Relaxed);
        match self.sender.send(block.clone()) {
            Ok(receivers) => {
                debug!(index = block.index, hash = %block.hash, receivers, "Block published");
                receivers
            }
            Err(_) => {
                debug!(index = block.index, "Block published with no subscribers");
                0
            }
        }
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// A live registration. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    receiver: broadcast::Receiver<Block>,
}

impl Subscription {
    /// Wait for the next notification. `None` once the notifier is gone.
    pub async fn recv(&mut self) -> Option<Notification> {
        match self.receiver.recv().await {
            Ok(block) => Some(Notification::Block(block)),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed, "Subscriber lagged behind the notifier");
                Some(Notification::Lagged(missed))
            }
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }

    /// Non-blocking receive. `Ok(None)` when nothing is pending.
    pub fn try_recv(&mut self) -> Result<Option<Notification>, SubscriptionClosed> {
        match self.receiver.try_recv() {
            Ok(block) => Ok(Some(Notification::Block(block))),
            Err(broadcast::error::TryRecvError::Empty) => Ok(None),
            Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                Ok(Some(Notification::Lagged(missed)))
            }
            Err(broadcast::error::TryRecvError::Closed) => Err(SubscriptionClosed),
        }
    }

    /// Stream view of the subscription
    pub fn into_stream(self) -> impl Stream<Item = Notification> {
        BroadcastStream::new(self.receiver).map(|item| match item {
            Ok(block) => Notification::Block(block),
            Err(BroadcastStreamRecvError::Lagged(missed)) => Notification::Lagged(missed),
        })
    }
}

/// The notifier was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Notifier closed")]
pub struct SubscriptionClosed;
