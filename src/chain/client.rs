//! Ethereum-compatible chain client
//!
//! Implements the capability traits over a WebSocket provider (head and log
//! subscriptions) and an HTTP provider (point queries and submission).

use crate::config::ChainConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::events::{decode_log, BridgeEvent, EventKind};

use super::{AccountQuery, EventSource, EventSubscription, HeadNotification, HeadSource, Submitter};

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::types::{Address, BlockId, BlockNumber, Bytes, H256, U256};
use futures::StreamExt;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// Client connection to the foreign chain
pub struct EthChainClient {
    http: Provider<Http>,
    ws: Provider<Ws>,
    contract: Address,
}

impl EthChainClient {
    /// Connect both transports and verify the node answers.
    pub async fn connect(config: &ChainConfig, contract: Address) -> BridgeResult<Self> {
        let http = Provider::<Http>::try_from(config.rpc_url.as_str())
            .map_err(|e| BridgeError::Config(format!("invalid rpc url: {e}")))?
            .interval(Duration::from_millis(100));

        let ws = Provider::<Ws>::connect(&config.ws_url)
            .await
            .map_err(|e| BridgeError::ChainConnection(format!("websocket connect: {e}")))?;

        let block = http
            .get_block_number()
            .await
            .map_err(|e| BridgeError::ChainConnection(format!("initial block query: {e}")))?;
        info!(chain = %config.name, block = block.as_u64(), "chain connection established");

        Ok(Self { http, ws, contract })
    }
}

#[async_trait]
impl HeadSource for EthChainClient {
    async fn subscribe_heads(&self) -> BridgeResult<mpsc::UnboundedReceiver<HeadNotification>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let ws = self.ws.clone();

        tokio::spawn(async move {
            let mut stream = match ws.subscribe_blocks().await {
                Ok(stream) => stream,
                Err(e) => {
                    error!(error = %e, "head subscription failed to open");
                    return;
                }
            };
            debug!("head subscription open");

            while let Some(block) = stream.next().await {
                let (Some(number), Some(hash)) = (block.number, block.hash) else {
                    continue;
                };
                let head = HeadNotification {
                    number: number.as_u64(),
                    hash,
                };
                // Receiver gone means the coordinator is shutting down
                if tx.send(head).is_err() {
                    break;
                }
            }
            let _ = stream.unsubscribe().await;
        });

        Ok(rx)
    }

    async fn current_head(&self) -> BridgeResult<HeadNotification> {
        let block = self
            .http
            .get_block(BlockNumber::Latest)
            .await
            .map_err(|e| BridgeError::ChainConnection(format!("latest block: {e}")))?
            .ok_or_else(|| BridgeError::ChainConnection("node has no latest block".into()))?;

        match (block.number, block.hash) {
            (Some(number), Some(hash)) => Ok(HeadNotification {
                number: number.as_u64(),
                hash,
            }),
            _ => Err(BridgeError::ChainConnection(
                "latest block is still pending".into(),
            )),
        }
    }
}

#[async_trait]
impl AccountQuery for EthChainClient {
    async fn suggested_fee(&self) -> BridgeResult<U256> {
        self.http
            .get_gas_price()
            .await
            .map_err(|e| BridgeError::ChainConnection(format!("gas price: {e}")))
    }

    async fn balance_at(&self, address: Address, block: u64) -> BridgeResult<U256> {
        self.http
            .get_balance(address, Some(BlockId::Number(BlockNumber::Number(block.into()))))
            .await
            .map_err(|e| BridgeError::ChainConnection(format!("balance: {e}")))
    }

    async fn nonce_at(&self, address: Address, block: u64) -> BridgeResult<u64> {
        self.http
            .get_transaction_count(address, Some(BlockId::Number(BlockNumber::Number(block.into()))))
            .await
            .map(|n| n.as_u64())
            .map_err(|e| BridgeError::ChainConnection(format!("nonce: {e}")))
    }
}

#[async_trait]
impl EventSource for EthChainClient {
    async fn subscribe(&self, kind: EventKind) -> BridgeResult<EventSubscription> {
        let (ev_tx, ev_rx) = mpsc::channel::<BridgeEvent>(256);
        let (err_tx, err_rx) = mpsc::channel::<String>(1);
        let (unsub_tx, mut unsub_rx) = oneshot::channel::<()>();

        let ws = self.ws.clone();
        let filter = Filter::new().address(self.contract).topic0(kind.topic());

        tokio::spawn(async move {
            let mut stream = match ws.subscribe_logs(&filter).await {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = err_tx.send(format!("subscribe: {e}")).await;
                    return;
                }
            };
            debug!(%kind, "log subscription open");

            loop {
                tokio::select! {
                    _ = &mut unsub_rx => break,
                    log = stream.next() => match log {
                        Some(log) => match decode_log(kind, &log) {
                            Ok(event) => {
                                if ev_tx.send(event).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                warn!(%kind, error = %e, "dropping undecodable log");
                            }
                        },
                        None => {
                            let _ = err_tx.send("log stream ended".to_string()).await;
                            break;
                        }
                    },
                }
            }
            let _ = stream.unsubscribe().await;
        });

        Ok(EventSubscription::new(ev_rx, err_rx, unsub_tx))
    }
}

#[async_trait]
impl Submitter for EthChainClient {
    async fn submit(&self, raw: Bytes) -> BridgeResult<H256> {
        let pending = self
            .http
            .send_raw_transaction(raw)
            .await
            .map_err(|e| BridgeError::SubmissionFailed(Box::new(e)))?;
        Ok(pending.tx_hash())
    }
}
