//! Bridge coordinator: composition root and lifecycle
//!
//! Owns the account cache, the head coalescer, one watcher per event stream
//! and the transaction issuer. Startup order matters: the account snapshot is
//! populated and the head subscription running before any event stream is
//! opened, so no transaction is ever attempted without fee and nonce hints.

use crate::account::{AccountSnapshot, AccountStateCache, HeadCoalescer};
use crate::chain::{EventSource, HeadSource};
use crate::error::{BridgeError, BridgeResult};
use crate::events::watcher::{MintConfirmationLogger, TransferLogger};
use crate::events::{EventHandler, EventKind, EventWatcher};
use crate::index::LedgerIndex;
use crate::metrics;
use crate::tx::{CallKind, TransactionIssuer, TxRequest};

use ethers::types::{Address, H256, U256};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{error, info, warn};

/// Result of a mint request
#[derive(Debug, PartialEq, Eq)]
pub enum MintOutcome {
    /// The mint was submitted; carries the foreign-chain transaction hash
    Submitted(H256),
    /// The originating native-chain transaction was already processed;
    /// nothing was signed or submitted
    AlreadyProcessed,
}

pub struct BridgeCoordinator {
    contract: Address,
    shutdown_grace: Duration,
    cache: Arc<AccountStateCache>,
    issuer: Arc<TransactionIssuer>,
    head_source: Arc<dyn HeadSource>,
    event_source: Arc<dyn EventSource>,
    ledger_index: Arc<dyn LedgerIndex>,
}

impl BridgeCoordinator {
    pub fn new(
        contract: Address,
        shutdown_grace: Duration,
        cache: Arc<AccountStateCache>,
        issuer: Arc<TransactionIssuer>,
        head_source: Arc<dyn HeadSource>,
        event_source: Arc<dyn EventSource>,
        ledger_index: Arc<dyn LedgerIndex>,
    ) -> Self {
        Self {
            contract,
            shutdown_grace,
            cache,
            issuer,
            head_source,
            event_source,
            ledger_index,
        }
    }

    /// Run the bridge until external cancellation or the first fatal
    /// component error, which is returned; errors surfacing during the
    /// subsequent shutdown are logged only.
    pub async fn start(&self, mut external_cancel: watch::Receiver<bool>) -> BridgeResult<()> {
        // Seed the snapshot so fee/nonce hints exist before anything else runs
        let snapshot = self.cache.refresh(None).await?;
        info!(
            block = snapshot.head_number,
            balance = %snapshot.balance,
            "initial account snapshot loaded"
        );

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let mut workers: JoinSet<BridgeResult<()>> = JoinSet::new();

        // Head subscription first, event streams second
        let heads = self.head_source.subscribe_heads().await?;
        workers.spawn(HeadCoalescer::new(self.cache.clone()).run(heads, cancel_rx.clone()));

        let handlers: [(EventKind, Arc<dyn EventHandler>); 2] = [
            (EventKind::Transfer, Arc::new(TransferLogger)),
            (EventKind::MintConfirmed, Arc::new(MintConfirmationLogger)),
        ];
        for (kind, handler) in handlers {
            let sub = self.event_source.subscribe(kind).await?;
            let cancel = cancel_rx.clone();
            workers.spawn(async move {
                EventWatcher::new(kind, handler)
                    .run(sub, cancel)
                    .await
                    .map(|_| ())
            });
        }

        info!("bridge coordinator running");

        let mut first_error: Option<BridgeError> = None;
        loop {
            tokio::select! {
                changed = external_cancel.changed() => {
                    if changed.is_err() || *external_cancel.borrow() {
                        info!("shutdown requested");
                        break;
                    }
                }
                joined = workers.join_next() => match joined {
                    Some(Ok(Ok(()))) => {}
                    Some(Ok(Err(e))) => {
                        error!(error = %e, "component failed, shutting down");
                        first_error = Some(e);
                        break;
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "component panicked, shutting down");
                        first_error = Some(BridgeError::Internal(e.to_string()));
                        break;
                    }
                    None => break,
                },
            }
        }

        // Cancel everything, then drain in-flight work within the grace
        // period. In-flight submissions finish or time out on their own;
        // nothing is aborted mid-submission.
        let _ = cancel_tx.send(true);
        let drain = async {
            while let Some(joined) = workers.join_next().await {
                match joined {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(error = %e, "component error during shutdown"),
                    Err(e) => warn!(error = %e, "component panic during shutdown"),
                }
            }
        };
        if timeout(self.shutdown_grace, drain).await.is_err() {
            warn!("shutdown grace period elapsed, aborting remaining workers");
            workers.shutdown().await;
        }

        info!("bridge coordinator stopped");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Mint wrapped tokens for a deposit observed on the native chain.
    ///
    /// The ledger index is consulted first; an already-processed origin tx
    /// short-circuits before anything is signed. The index is updated only
    /// after a successful submission, so a failed mint can be retried by the
    /// caller without risking a double mint.
    pub async fn request_mint(
        &self,
        receiver: Address,
        amount: U256,
        origin_tx_id: &str,
    ) -> BridgeResult<MintOutcome> {
        if origin_tx_id.is_empty() {
            return Err(BridgeError::InvalidRequest(
                "empty originating transaction id",
            ));
        }
        if self.ledger_index.is_processed(origin_tx_id).await? {
            info!(origin_tx_id, "origin tx already processed, skipping mint");
            metrics::record_mint_skipped();
            return Ok(MintOutcome::AlreadyProcessed);
        }

        let hash = self
            .issuer
            .issue(TxRequest {
                contract: self.contract,
                kind: CallKind::Mint,
                recipient: receiver,
                amount: Some(amount),
                origin_tx_id: Some(origin_tx_id.to_string()),
            })
            .await?;

        self.ledger_index.record_processed(origin_tx_id, hash).await?;
        Ok(MintOutcome::Submitted(hash))
    }

    /// Transfer wrapped tokens from the bridge account.
    pub async fn request_transfer(&self, recipient: Address, amount: U256) -> BridgeResult<H256> {
        self.issuer
            .issue(TxRequest {
                contract: self.contract,
                kind: CallKind::Transfer,
                recipient,
                amount: Some(amount),
                origin_tx_id: None,
            })
            .await
    }

    /// Last cached account snapshot; never touches the network.
    pub async fn current_snapshot(&self) -> Option<AccountSnapshot> {
        self.cache.read().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{
        AccountQuery, BridgeSigner, EventSubscription, HeadNotification, Submitter,
    };
    use crate::events::BridgeEvent;
    use async_trait::async_trait;
    use ethers::types::transaction::eip2718::TypedTransaction;
    use ethers::types::{Bytes, Signature};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::{mpsc, oneshot};

    fn head(number: u64) -> HeadNotification {
        HeadNotification {
            number,
            hash: H256::from_low_u64_be(number),
        }
    }

    /// Full foreign-chain double: head source, account query and event
    /// source with externally controllable streams.
    struct TestNet {
        head_tx: Mutex<Option<mpsc::UnboundedSender<HeadNotification>>>,
        event_taps: Mutex<HashMap<EventKind, (mpsc::Sender<BridgeEvent>, mpsc::Sender<String>)>>,
    }

    impl TestNet {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                head_tx: Mutex::new(None),
                event_taps: Mutex::new(HashMap::new()),
            })
        }

        fn error_tap(&self, kind: EventKind) -> mpsc::Sender<String> {
            self.event_taps.lock().unwrap()[&kind].1.clone()
        }
    }

    #[async_trait]
    impl HeadSource for TestNet {
        async fn subscribe_heads(
            &self,
        ) -> BridgeResult<mpsc::UnboundedReceiver<HeadNotification>> {
            let (tx, rx) = mpsc::unbounded_channel();
            *self.head_tx.lock().unwrap() = Some(tx);
            Ok(rx)
        }

        async fn current_head(&self) -> BridgeResult<HeadNotification> {
            Ok(head(100))
        }
    }

    #[async_trait]
    impl AccountQuery for TestNet {
        async fn suggested_fee(&self) -> BridgeResult<U256> {
            Ok(U256::from(1_000_000_000u64))
        }

        async fn balance_at(&self, _address: Address, _block: u64) -> BridgeResult<U256> {
            Ok(U256::from(5_000u64))
        }

        async fn nonce_at(&self, _address: Address, _block: u64) -> BridgeResult<u64> {
            Ok(3)
        }
    }

    #[async_trait]
    impl EventSource for TestNet {
        async fn subscribe(&self, kind: EventKind) -> BridgeResult<EventSubscription> {
            let (ev_tx, ev_rx) = mpsc::channel(16);
            let (err_tx, err_rx) = mpsc::channel(1);
            let (unsub_tx, _unsub_rx) = oneshot::channel();
            self.event_taps
                .lock()
                .unwrap()
                .insert(kind, (ev_tx, err_tx));
            Ok(EventSubscription::new(ev_rx, err_rx, unsub_tx))
        }
    }

    struct CountingSigner {
        address: Address,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl BridgeSigner for CountingSigner {
        fn address(&self) -> Address {
            self.address
        }

        async fn sign(&self, from: Address, _tx: &TypedTransaction) -> BridgeResult<Signature> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if from != self.address {
                return Err(BridgeError::Unauthorized { requested: from });
            }
            Ok(Signature {
                r: U256::one(),
                s: U256::one(),
                v: 27,
            })
        }
    }

    struct CountingSubmitter {
        calls: AtomicUsize,
        fail: AtomicBool,
    }

    #[async_trait]
    impl Submitter for CountingSubmitter {
        async fn submit(&self, _raw: Bytes) -> BridgeResult<H256> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                let cause = std::io::Error::new(std::io::ErrorKind::Other, "reverted");
                return Err(BridgeError::SubmissionFailed(Box::new(cause)));
            }
            Ok(H256::repeat_byte(0xaa))
        }
    }

    #[derive(Default)]
    struct MemoryIndex {
        processed: Mutex<HashMap<String, H256>>,
        record_calls: AtomicUsize,
    }

    #[async_trait]
    impl LedgerIndex for MemoryIndex {
        async fn is_processed(&self, origin_tx_id: &str) -> BridgeResult<bool> {
            Ok(self.processed.lock().unwrap().contains_key(origin_tx_id))
        }

        async fn record_processed(&self, origin_tx_id: &str, tx_hash: H256) -> BridgeResult<()> {
            self.record_calls.fetch_add(1, Ordering::SeqCst);
            self.processed
                .lock()
                .unwrap()
                .insert(origin_tx_id.to_string(), tx_hash);
            Ok(())
        }
    }

    struct Fixture {
        coordinator: Arc<BridgeCoordinator>,
        net: Arc<TestNet>,
        signer: Arc<CountingSigner>,
        submitter: Arc<CountingSubmitter>,
        index: Arc<MemoryIndex>,
    }

    fn fixture() -> Fixture {
        let account = Address::repeat_byte(0xbb);
        let net = TestNet::new();
        let cache = Arc::new(AccountStateCache::new(
            account,
            net.clone(),
            net.clone(),
        ));
        let signer = Arc::new(CountingSigner {
            address: account,
            calls: AtomicUsize::new(0),
        });
        let submitter = Arc::new(CountingSubmitter {
            calls: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        });
        let index = Arc::new(MemoryIndex::default());
        let issuer = Arc::new(TransactionIssuer::new(
            account,
            4,
            200_000,
            signer.clone(),
            submitter.clone(),
            cache.clone(),
        ));
        let coordinator = Arc::new(BridgeCoordinator::new(
            Address::repeat_byte(0xcc),
            Duration::from_secs(2),
            cache,
            issuer,
            net.clone(),
            net.clone(),
            index.clone(),
        ));
        Fixture {
            coordinator,
            net,
            signer,
            submitter,
            index,
        }
    }

    async fn seed_snapshot(f: &Fixture) {
        f.coordinator.cache.refresh(Some(head(100))).await.unwrap();
    }

    #[tokio::test]
    async fn duplicate_mint_is_short_circuited_by_the_index() {
        let f = fixture();
        seed_snapshot(&f).await;
        let receiver = Address::repeat_byte(0x01);

        let first = f
            .coordinator
            .request_mint(receiver, U256::from(10u64), "deadbeef")
            .await
            .unwrap();
        assert_eq!(first, MintOutcome::Submitted(H256::repeat_byte(0xaa)));
        assert_eq!(f.index.record_calls.load(Ordering::SeqCst), 1);

        let second = f
            .coordinator
            .request_mint(receiver, U256::from(10u64), "deadbeef")
            .await
            .unwrap();
        assert_eq!(second, MintOutcome::AlreadyProcessed);

        // The duplicate never reached the signer or the submitter
        assert_eq!(f.signer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(f.submitter.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_submission_is_never_recorded_as_processed() {
        let f = fixture();
        seed_snapshot(&f).await;
        f.submitter.fail.store(true, Ordering::SeqCst);

        let err = f
            .coordinator
            .request_mint(Address::repeat_byte(0x01), U256::from(10u64), "deadbeef")
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::SubmissionFailed(_)));
        assert_eq!(f.index.record_calls.load(Ordering::SeqCst), 0);

        // The caller may retry once the failure is understood
        f.submitter.fail.store(false, Ordering::SeqCst);
        let outcome = f
            .coordinator
            .request_mint(Address::repeat_byte(0x01), U256::from(10u64), "deadbeef")
            .await
            .unwrap();
        assert!(matches!(outcome, MintOutcome::Submitted(_)));
    }

    #[tokio::test]
    async fn empty_origin_tx_id_is_rejected() {
        let f = fixture();
        seed_snapshot(&f).await;

        let err = f
            .coordinator
            .request_mint(Address::repeat_byte(0x01), U256::from(10u64), "")
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::InvalidRequest(_)));
        assert_eq!(f.signer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn zero_amount_transfer_is_rejected_not_submitted() {
        let f = fixture();
        seed_snapshot(&f).await;

        let err = f
            .coordinator
            .request_transfer(Address::repeat_byte(0x01), U256::zero())
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::InvalidAmount(_)));
        assert_eq!(f.submitter.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn fatal_watcher_error_shuts_down_and_is_returned() {
        let f = fixture();
        let (_cancel_tx, cancel_rx) = watch::channel(false);

        let running = tokio::spawn({
            let coordinator = f.coordinator.clone();
            async move { coordinator.start(cancel_rx).await }
        });

        // Let startup finish, then kill one event stream
        tokio::time::sleep(Duration::from_millis(100)).await;
        f.net
            .error_tap(EventKind::MintConfirmed)
            .send("node dropped the filter".into())
            .await
            .unwrap();

        let err = timeout(Duration::from_secs(5), running)
            .await
            .unwrap()
            .unwrap()
            .unwrap_err();
        assert!(matches!(
            err,
            BridgeError::SubscriptionFailed {
                kind: EventKind::MintConfirmed,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn external_cancellation_stops_start_cleanly() {
        let f = fixture();
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let running = tokio::spawn({
            let coordinator = f.coordinator.clone();
            async move { coordinator.start(cancel_rx).await }
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        // Startup seeded the snapshot before any worker started
        assert!(f.coordinator.current_snapshot().await.is_some());

        cancel_tx.send(true).unwrap();
        timeout(Duration::from_secs(5), running)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn heads_flow_into_the_snapshot_while_running() {
        let f = fixture();
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let running = tokio::spawn({
            let coordinator = f.coordinator.clone();
            async move { coordinator.start(cancel_rx).await }
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        let head_tx = f.net.head_tx.lock().unwrap().clone().unwrap();
        head_tx.send(head(105)).unwrap();

        for _ in 0..100 {
            if f.coordinator.current_snapshot().await.map(|s| s.head_number) == Some(105) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(
            f.coordinator.current_snapshot().await.unwrap().head_number,
            105
        );

        cancel_tx.send(true).unwrap();
        timeout(Duration::from_secs(5), running)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
