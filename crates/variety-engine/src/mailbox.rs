//! Command channels that survive actor restarts
//!
//! A handle holds a [`Mailbox`]; each time the supervisor re-creates an actor
//! the actor calls [`Mailbox::reopen`] and the handle transparently reaches
//! the new incarnation.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::warn;

use variety_core::{Envelope, VarietyError, VarietyResult};

/// Swappable command sender for one supervised actor
pub struct Mailbox<C> {
    name: String,
    capacity: usize,
    slot: Arc<RwLock<mpsc::Sender<C>>>,
}

impl<C> Clone for Mailbox<C> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            capacity: self.capacity,
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<C: Send + 'static> Mailbox<C> {
    /// Create a mailbox and the receiver of its first incarnation
    pub fn new(name: impl Into<String>, capacity: usize) -> (Self, mpsc::Receiver<C>) {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let mailbox = Self {
            name: name.into(),
            capacity,
            slot: Arc::new(RwLock::new(tx)),
        };
        (mailbox, rx)
    }

    /// Replace the sender, returning the receiver for a fresh incarnation
    ///
    /// Commands queued for the previous incarnation are lost.
    pub fn reopen(&self) -> mpsc::Receiver<C> {
        let (tx, rx) = mpsc::channel(self.capacity);
        *self.slot.write() = tx;
        rx
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn sender(&self) -> mpsc::Sender<C> {
        self.slot.read().clone()
    }

    /// Fire-and-forget delivery; a full or closed channel drops the command
    pub fn try_send(&self, command: C) -> VarietyResult<()> {
        self.sender().try_send(command).map_err(|e| {
            let reason = match e {
                mpsc::error::TrySendError::Full(_) => "mailbox full",
                mpsc::error::TrySendError::Closed(_) => "mailbox closed",
            };
            warn!(component = %self.name, reason, "Dropped command");
            VarietyError::ComponentUnavailable(format!("{}: {}", self.name, reason))
        })
    }

    /// Deliver a command, waiting for channel capacity
    pub async fn send(&self, command: C) -> VarietyResult<()> {
        self.sender()
            .send(command)
            .await
            .map_err(|_| VarietyError::ComponentUnavailable(self.name.clone()))
    }

    /// Send a command carrying a reply channel and await the reply
    pub async fn request<R>(&self, make: impl FnOnce(oneshot::Sender<R>) -> C) -> VarietyResult<R> {
        let (tx, rx) = oneshot::channel();
        self.send(make(tx)).await?;
        rx.await
            .map_err(|_| VarietyError::ComponentUnavailable(self.name.clone()))
    }
}

/// Next envelope from an optional subscription
///
/// Lagged receivers skip what they missed. A closed or absent subscription
/// never yields, so it can sit in a `select!` arm.
pub(crate) async fn next_envelope(
    rx: &mut Option<broadcast::Receiver<Envelope>>,
    component: &str,
) -> Envelope {
    loop {
        let Some(receiver) = rx.as_mut() else {
            return std::future::pending().await;
        };
        match receiver.recv().await {
            Ok(envelope) => return envelope,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(component, skipped, "Subscriber lagged, skipping messages");
            }
            Err(broadcast::error::RecvError::Closed) => {
                *rx = None;
            }
        }
    }
}
