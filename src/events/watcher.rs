//! Event watcher: one worker per subscribed event stream

use crate::chain::EventSubscription;
use crate::error::{BridgeError, BridgeResult};
use crate::events::{BridgeEvent, EventKind};
use crate::metrics;

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

/// Terminal states of a subscription. A watcher never reopens its
/// subscription; a replacement is a new watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Active,
    Errored,
    Closed,
}

/// Reaction logic invoked for every event on one stream
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: BridgeEvent) -> BridgeResult<()>;
}

/// Consumes one filtered event stream and dispatches each event to a single
/// handler, in arrival order, never concurrently.
pub struct EventWatcher {
    kind: EventKind,
    handler: Arc<dyn EventHandler>,
}

impl EventWatcher {
    pub fn new(kind: EventKind, handler: Arc<dyn EventHandler>) -> Self {
        Self { kind, handler }
    }

    /// Run until cancellation ([`SubscriptionState::Closed`]) or a terminal
    /// subscription failure, which is fatal and propagated.
    ///
    /// Handler errors are logged and the loop continues: one bad event must
    /// not tear down the subscription. The subscription is released on every
    /// exit path.
    pub async fn run(
        self,
        mut sub: EventSubscription,
        mut cancel: watch::Receiver<bool>,
    ) -> BridgeResult<SubscriptionState> {
        info!(kind = %self.kind, "event watcher active");

        loop {
            tokio::select! {
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        sub.unsubscribe();
                        info!(kind = %self.kind, "event watcher closed");
                        return Ok(SubscriptionState::Closed);
                    }
                }
                Some(message) = sub.errors.recv() => {
                    sub.unsubscribe();
                    return Err(BridgeError::SubscriptionFailed {
                        kind: self.kind,
                        message,
                    });
                }
                event = sub.events.recv() => match event {
                    Some(event) => {
                        metrics::record_event(event.kind());
                        if let Err(e) = self.handler.handle(event).await {
                            warn!(kind = %self.kind, error = %e, "event handler failed");
                        }
                    }
                    None => {
                        sub.unsubscribe();
                        return Err(BridgeError::SubscriptionFailed {
                            kind: self.kind,
                            message: "event stream closed unexpectedly".into(),
                        });
                    }
                },
            }
        }
    }
}

/// Logs observed wrapped-token transfers. Informational only: transfers
/// trigger no state change in the bridge.
pub struct TransferLogger;

#[async_trait]
impl EventHandler for TransferLogger {
    async fn handle(&self, event: BridgeEvent) -> BridgeResult<()> {
        if let BridgeEvent::Transfer { from, to, amount } = event {
            info!(%from, %to, %amount, "noticed transfer event");
        }
        Ok(())
    }
}

/// Logs mint confirmations with their originating native-chain tx id.
pub struct MintConfirmationLogger;

#[async_trait]
impl EventHandler for MintConfirmationLogger {
    async fn handle(&self, event: BridgeEvent) -> BridgeResult<()> {
        if let BridgeEvent::MintConfirmed {
            receiver,
            amount,
            origin_tx_id,
        } = event
        {
            info!(%receiver, %amount, origin_tx_id, "noticed mint confirmation");
        }
        Ok(())
    }
}
