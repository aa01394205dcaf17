//! Head coalescing: latest-wins refresh scheduling
//!
//! Chain-head churn during catch-up arrives faster than a refresh completes.
//! Correctness only needs the cache to eventually reflect a recent head, so
//! heads observed while a refresh is in flight overwrite each other instead
//! of queueing.

use crate::account::AccountStateCache;
use crate::chain::HeadNotification;
use crate::error::{BridgeError, BridgeResult};
use crate::metrics;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex, Notify};
use tracing::{debug, info, warn};

/// Capacity-1, latest-wins mailbox between the head stream and the single
/// refresh worker.
struct Mailbox {
    slot: Mutex<Option<HeadNotification>>,
    closed: AtomicBool,
    notify: Notify,
}

/// Drives [`AccountStateCache`] refreshes from a stream of head
/// notifications, at most one refresh in flight at any instant.
pub struct HeadCoalescer {
    cache: Arc<AccountStateCache>,
}

impl HeadCoalescer {
    pub fn new(cache: Arc<AccountStateCache>) -> Self {
        Self { cache }
    }

    /// Run until the head stream closes or cancellation fires.
    ///
    /// Refresh failures are logged and counted, never fatal; a future head
    /// triggers another attempt. An unexpected end of the head stream is an
    /// error: a bridge with a silently frozen snapshot must not keep issuing
    /// transactions.
    pub async fn run(
        self,
        mut heads: mpsc::UnboundedReceiver<HeadNotification>,
        mut cancel: watch::Receiver<bool>,
    ) -> BridgeResult<()> {
        let mailbox = Arc::new(Mailbox {
            slot: Mutex::new(None),
            closed: AtomicBool::new(false),
            notify: Notify::new(),
        });

        let worker = tokio::spawn(refresh_worker(self.cache, mailbox.clone()));

        let result = loop {
            tokio::select! {
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        break Ok(());
                    }
                }
                head = heads.recv() => match head {
                    Some(head) => {
                        let mut slot = mailbox.slot.lock().await;
                        if let Some(dropped) = slot.replace(head) {
                            debug!(
                                block = dropped.number,
                                "dropping head, refresh already in progress"
                            );
                            metrics::record_head_dropped();
                        }
                        drop(slot);
                        mailbox.notify.notify_one();
                    }
                    None => {
                        break Err(BridgeError::ChainConnection(
                            "head stream closed".into(),
                        ));
                    }
                },
            }
        };

        // Let an in-flight refresh finish, then stop the worker
        mailbox.closed.store(true, Ordering::SeqCst);
        mailbox.notify.notify_one();
        if worker.await.is_err() {
            warn!("refresh worker panicked during shutdown");
        }

        result
    }
}

async fn refresh_worker(cache: Arc<AccountStateCache>, mailbox: Arc<Mailbox>) {
    loop {
        let head = mailbox.slot.lock().await.take();
        match head {
            Some(head) => match cache.refresh(Some(head.clone())).await {
                Ok(snapshot) => {
                    info!(
                        block = snapshot.head_number,
                        balance = %snapshot.balance,
                        nonce = snapshot.nonce,
                        fee = %snapshot.fee_per_unit,
                        "account snapshot updated"
                    );
                    metrics::record_snapshot_height(snapshot.head_number);
                }
                Err(e) => {
                    warn!(block = head.number, error = %e, "failed to refresh account state");
                    metrics::record_refresh_failure();
                }
            },
            None => {
                if mailbox.closed.load(Ordering::SeqCst) {
                    break;
                }
                mailbox.notify.notified().await;
            }
        }
    }
}
