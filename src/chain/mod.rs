//! Foreign-chain capability traits
//!
//! The coordinator never talks to the foreign chain directly; it consumes
//! these narrow capabilities. [`client::EthChainClient`] implements them over
//! an Ethereum-compatible node, and tests swap in doubles.

pub mod client;

pub use client::EthChainClient;

use crate::error::BridgeResult;
use crate::events::{BridgeEvent, EventKind};

use async_trait::async_trait;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, Signature, H256, U256};
use tokio::sync::{mpsc, oneshot};

/// A new best header observed on the foreign chain.
///
/// Arrival may be unordered and duplicated; consumers decide what to keep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadNotification {
    pub number: u64,
    pub hash: H256,
}

/// Source of best-header notifications
#[async_trait]
pub trait HeadSource: Send + Sync {
    /// Open a stream of new-head notifications. The stream ends when the
    /// underlying subscription dies.
    async fn subscribe_heads(&self) -> BridgeResult<mpsc::UnboundedReceiver<HeadNotification>>;

    /// Query the current best head.
    async fn current_head(&self) -> BridgeResult<HeadNotification>;
}

/// Point queries against the bridge account at a given head
#[async_trait]
pub trait AccountQuery: Send + Sync {
    async fn suggested_fee(&self) -> BridgeResult<U256>;
    async fn balance_at(&self, address: Address, block: u64) -> BridgeResult<U256>;
    async fn nonce_at(&self, address: Address, block: u64) -> BridgeResult<u64>;
}

/// One live event subscription.
///
/// Events arrive on `events`; a terminal failure of the subscription arrives
/// on `errors`, after which no further events will be delivered. Dropping the
/// subscription (or calling [`EventSubscription::unsubscribe`]) releases the
/// underlying filter on every exit path.
pub struct EventSubscription {
    pub events: mpsc::Receiver<BridgeEvent>,
    pub errors: mpsc::Receiver<String>,
    unsubscribe: Option<oneshot::Sender<()>>,
}

impl EventSubscription {
    pub fn new(
        events: mpsc::Receiver<BridgeEvent>,
        errors: mpsc::Receiver<String>,
        unsubscribe: oneshot::Sender<()>,
    ) -> Self {
        Self {
            events,
            errors,
            unsubscribe: Some(unsubscribe),
        }
    }

    /// Release the underlying subscription. Idempotent.
    pub fn unsubscribe(&mut self) {
        if let Some(tx) = self.unsubscribe.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Source of filtered wrapped-token event streams
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn subscribe(&self, kind: EventKind) -> BridgeResult<EventSubscription>;
}

/// Signing capability bound to a single configured account.
///
/// Stateless from the coordinator's perspective: a pure function of
/// (address, payload) to signature or `Unauthorized`.
#[async_trait]
pub trait BridgeSigner: Send + Sync {
    /// The only address this signer will sign for
    fn address(&self) -> Address;

    /// Sign `tx` on behalf of `from`; fails with `Unauthorized` for any
    /// address other than [`BridgeSigner::address`].
    async fn sign(&self, from: Address, tx: &TypedTransaction) -> BridgeResult<Signature>;
}

/// Raw transaction submission
#[async_trait]
pub trait Submitter: Send + Sync {
    async fn submit(&self, raw: Bytes) -> BridgeResult<H256>;
}
