//! Cached view of the bridge account on the foreign chain

use crate::chain::{AccountQuery, HeadNotification, HeadSource};
use crate::error::{BridgeError, BridgeResult};

use ethers::types::{Address, H256, U256};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::debug;

/// Ceiling for one full refresh, all sub-queries included
const REFRESH_TIMEOUT: Duration = Duration::from_secs(30);

/// Point-in-time view of the bridge account.
///
/// All fields come from the same head; the cache replaces snapshots whole,
/// never field by field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountSnapshot {
    pub head_number: u64,
    pub head_hash: H256,
    pub balance: U256,
    pub nonce: u64,
    pub fee_per_unit: U256,
}

/// Holds the last-known account snapshot, refreshed from chain queries.
///
/// The lock is held only to copy or swap the snapshot, never across a
/// network call.
pub struct AccountStateCache {
    address: Address,
    head_source: Arc<dyn HeadSource>,
    query: Arc<dyn AccountQuery>,
    snapshot: RwLock<Option<AccountSnapshot>>,
}

impl AccountStateCache {
    pub fn new(
        address: Address,
        head_source: Arc<dyn HeadSource>,
        query: Arc<dyn AccountQuery>,
    ) -> Self {
        Self {
            address,
            head_source,
            query,
            snapshot: RwLock::new(None),
        }
    }

    /// Fetch fee, balance and nonce at `head` (or the current best head when
    /// none is given) and atomically replace the cached snapshot.
    ///
    /// Any sub-query failure aborts the refresh; readers keep seeing the
    /// previous snapshot. A refresh against a head older than the cached one
    /// is discarded, since old heads show up during chain sync after
    /// downtime.
    pub async fn refresh(&self, head: Option<HeadNotification>) -> BridgeResult<AccountSnapshot> {
        let fresh = timeout(REFRESH_TIMEOUT, self.fetch(head))
            .await
            .map_err(|_| BridgeError::Timeout {
                operation: "account refresh",
            })??;

        let mut guard = self.snapshot.write().await;
        match guard.as_ref() {
            Some(current) if fresh.head_number < current.head_number => {
                debug!(
                    stale = fresh.head_number,
                    cached = current.head_number,
                    "ignoring refresh against stale head"
                );
                Ok(current.clone())
            }
            _ => {
                *guard = Some(fresh.clone());
                Ok(fresh)
            }
        }
    }

    async fn fetch(&self, head: Option<HeadNotification>) -> BridgeResult<AccountSnapshot> {
        let head = match head {
            Some(head) => head,
            None => self
                .head_source
                .current_head()
                .await
                .map_err(|e| BridgeError::RefreshFailed(e.to_string()))?,
        };

        let fee_per_unit = self
            .query
            .suggested_fee()
            .await
            .map_err(|e| BridgeError::RefreshFailed(format!("fee query: {e}")))?;
        let balance = self
            .query
            .balance_at(self.address, head.number)
            .await
            .map_err(|e| BridgeError::RefreshFailed(format!("balance query: {e}")))?;
        let nonce = self
            .query
            .nonce_at(self.address, head.number)
            .await
            .map_err(|e| BridgeError::RefreshFailed(format!("nonce query: {e}")))?;

        Ok(AccountSnapshot {
            head_number: head.number,
            head_hash: head.hash,
            balance,
            nonce,
            fee_per_unit,
        })
    }

    /// Copy out the last successfully cached snapshot. Never touches the
    /// network; `None` only before the first successful refresh.
    pub async fn read(&self) -> Option<AccountSnapshot> {
        self.snapshot.read().await.clone()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::chain::{AccountQuery, HeadSource};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::{mpsc, Notify};

    fn head(number: u64) -> HeadNotification {
        HeadNotification {
            number,
            hash: H256::from_low_u64_be(number),
        }
    }

    /// Scripted chain double: serves fixed values, records which heads were
    /// queried, and can gate balance queries to hold a refresh in flight.
    pub(crate) struct StubChain {
        pub best_head: u64,
        pub balance: U256,
        pub nonce: u64,
        pub fee: U256,
        pub fail_balance: AtomicBool,
        pub current_head_calls: AtomicUsize,
        pub queried_heads: std::sync::Mutex<Vec<u64>>,
        pub gate: Notify,
        pub gated: AtomicBool,
        pub in_flight: Notify,
    }

    impl StubChain {
        pub fn new(best_head: u64) -> Self {
            Self {
                best_head,
                balance: U256::from(1_000u64),
                nonce: 7,
                fee: U256::from(20_000_000_000u64),
                fail_balance: AtomicBool::new(false),
                current_head_calls: AtomicUsize::new(0),
                queried_heads: std::sync::Mutex::new(Vec::new()),
                gate: Notify::new(),
                gated: AtomicBool::new(false),
                in_flight: Notify::new(),
            }
        }
    }

    #[async_trait]
    impl HeadSource for StubChain {
        async fn subscribe_heads(
            &self,
        ) -> BridgeResult<mpsc::UnboundedReceiver<HeadNotification>> {
            let (_tx, rx) = mpsc::unbounded_channel();
            Ok(rx)
        }

        async fn current_head(&self) -> BridgeResult<HeadNotification> {
            self.current_head_calls.fetch_add(1, Ordering::SeqCst);
            Ok(head(self.best_head))
        }
    }

    #[async_trait]
    impl AccountQuery for StubChain {
        async fn suggested_fee(&self) -> BridgeResult<U256> {
            Ok(self.fee)
        }

        async fn balance_at(&self, _address: Address, block: u64) -> BridgeResult<U256> {
            self.queried_heads.lock().unwrap().push(block);
            if self.gated.load(Ordering::SeqCst) {
                self.in_flight.notify_one();
                self.gate.notified().await;
            }
            if self.fail_balance.load(Ordering::SeqCst) {
                return Err(BridgeError::ChainConnection("balance rpc down".into()));
            }
            Ok(self.balance)
        }

        async fn nonce_at(&self, _address: Address, _block: u64) -> BridgeResult<u64> {
            Ok(self.nonce)
        }
    }

    fn cache_with(chain: Arc<StubChain>) -> AccountStateCache {
        AccountStateCache::new(Address::repeat_byte(0xbb), chain.clone(), chain)
    }

    #[tokio::test]
    async fn refresh_without_head_queries_best_head() {
        let chain = Arc::new(StubChain::new(120));
        let cache = cache_with(chain.clone());

        let snap = cache.refresh(None).await.unwrap();
        assert_eq!(snap.head_number, 120);
        assert_eq!(snap.nonce, 7);
        assert_eq!(chain.current_head_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn refresh_with_explicit_head_skips_best_head_query() {
        let chain = Arc::new(StubChain::new(120));
        let cache = cache_with(chain.clone());

        let snap = cache.refresh(Some(head(118))).await.unwrap();
        assert_eq!(snap.head_number, 118);
        assert_eq!(chain.current_head_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_snapshot_whole() {
        let chain = Arc::new(StubChain::new(100));
        let cache = cache_with(chain.clone());

        let first = cache.refresh(Some(head(100))).await.unwrap();
        assert_eq!(cache.read().await, Some(first.clone()));

        chain.fail_balance.store(true, Ordering::SeqCst);
        let err = cache.refresh(Some(head(101))).await.unwrap_err();
        assert!(matches!(err, BridgeError::RefreshFailed(_)));

        // No partial mutation: the old snapshot is still visible in full
        assert_eq!(cache.read().await, Some(first));
    }

    #[tokio::test]
    async fn stale_head_does_not_replace_snapshot() {
        let chain = Arc::new(StubChain::new(100));
        let cache = cache_with(chain.clone());

        cache.refresh(Some(head(100))).await.unwrap();
        let returned = cache.refresh(Some(head(90))).await.unwrap();

        assert_eq!(returned.head_number, 100);
        assert_eq!(cache.read().await.unwrap().head_number, 100);
    }

    #[test]
    fn snapshot_serializes_for_the_status_api() {
        let snap = AccountSnapshot {
            head_number: 100,
            head_hash: H256::zero(),
            balance: U256::from(1_000u64),
            nonce: 7,
            fee_per_unit: U256::from(20u64),
        };
        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["head_number"], 100);
        assert_eq!(json["nonce"], 7);
        // U256 fields render as hex strings
        assert_eq!(json["balance"], "0x3e8");
    }

    #[tokio::test]
    async fn concurrent_read_sees_old_or_new_snapshot_never_a_mix() {
        let chain = Arc::new(StubChain::new(100));
        let cache = Arc::new(cache_with(chain.clone()));

        let old = cache.refresh(Some(head(100))).await.unwrap();

        // Hold the second refresh in flight on the balance query
        chain.gated.store(true, Ordering::SeqCst);
        let refresh = tokio::spawn({
            let cache = cache.clone();
            async move { cache.refresh(Some(head(101))).await }
        });
        chain.in_flight.notified().await;

        // Reader during the in-flight refresh sees the old snapshot in full
        assert_eq!(cache.read().await, Some(old));

        chain.gated.store(false, Ordering::SeqCst);
        chain.gate.notify_one();
        let new = refresh.await.unwrap().unwrap();

        assert_eq!(new.head_number, 101);
        assert_eq!(cache.read().await, Some(new));
    }
}
