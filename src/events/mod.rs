//! Wrapped-token contract events and log decoding
//!
//! The bridge watches two event streams on the wrapped-token contract:
//! plain ERC20 transfers, and mint confirmations carrying the originating
//! native-chain transaction id.

pub mod watcher;

pub use watcher::{EventHandler, EventWatcher, SubscriptionState};

use crate::error::{BridgeError, BridgeResult};

use ethers::abi::{self, ParamType, Token};
use ethers::types::{Address, Log, H256, U256};
use ethers::utils::keccak256;
use serde::{Deserialize, Serialize};

/// Which event stream a watcher is subscribed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Transfer,
    MintConfirmed,
}

impl EventKind {
    /// Log topic0 for this event kind
    pub fn topic(&self) -> H256 {
        match self {
            EventKind::Transfer => *topics::TRANSFER,
            EventKind::MintConfirmed => *topics::MINT,
        }
    }

    /// Event name for logs and metrics
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Transfer => "transfer",
            EventKind::MintConfirmed => "mint_confirmed",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A decoded event observed on the wrapped-token contract
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
    /// Wrapped tokens moved between two foreign-chain accounts
    Transfer {
        from: Address,
        to: Address,
        amount: U256,
    },
    /// A mint was executed on the contract; `origin_tx_id` is the
    /// native-chain transaction that funded it
    MintConfirmed {
        receiver: Address,
        amount: U256,
        origin_tx_id: String,
    },
}

impl BridgeEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            BridgeEvent::Transfer { .. } => EventKind::Transfer,
            BridgeEvent::MintConfirmed { .. } => EventKind::MintConfirmed,
        }
    }
}

/// Event topic signatures (keccak256 of the event signature)
pub mod topics {
    use ethers::types::H256;
    use ethers::utils::keccak256;
    use lazy_static::lazy_static;

    lazy_static! {
        pub static ref TRANSFER: H256 =
            H256::from(keccak256("Transfer(address,address,uint256)"));
        pub static ref MINT: H256 = H256::from(keccak256("Mint(address,uint256,string)"));
    }
}

/// Decode a raw log from the wrapped-token contract into a [`BridgeEvent`].
///
/// Returns an error when the log does not match the expected kind; the
/// subscription filter should already have narrowed logs down by topic0.
pub fn decode_log(kind: EventKind, log: &Log) -> BridgeResult<BridgeEvent> {
    let topic0 = log
        .topics
        .first()
        .ok_or(BridgeError::Internal("log without topics".into()))?;
    if *topic0 != kind.topic() {
        return Err(BridgeError::Internal(format!(
            "unexpected topic {topic0:?} on {kind} stream"
        )));
    }

    match kind {
        EventKind::Transfer => {
            let from = indexed_address(log, 1)?;
            let to = indexed_address(log, 2)?;
            let amount = U256::from_big_endian(
                log.data
                    .get(0..32)
                    .ok_or(BridgeError::Internal("transfer log data too short".into()))?,
            );
            Ok(BridgeEvent::Transfer { from, to, amount })
        }
        EventKind::MintConfirmed => {
            let receiver = indexed_address(log, 1)?;
            let tokens = abi::decode(&[ParamType::Uint(256), ParamType::String], &log.data)
                .map_err(|e| BridgeError::Internal(format!("mint log decode: {e}")))?;
            let amount = match tokens.first() {
                Some(Token::Uint(v)) => *v,
                _ => return Err(BridgeError::Internal("mint log missing amount".into())),
            };
            let origin_tx_id = match tokens.get(1) {
                Some(Token::String(s)) => s.clone(),
                _ => return Err(BridgeError::Internal("mint log missing tx id".into())),
            };
            Ok(BridgeEvent::MintConfirmed {
                receiver,
                amount,
                origin_tx_id,
            })
        }
    }
}

fn indexed_address(log: &Log, index: usize) -> BridgeResult<Address> {
    log.topics
        .get(index)
        .map(|t| Address::from_slice(&t.0[12..]))
        .ok_or(BridgeError::Internal("log missing indexed address".into()))
}

/// Function selector for a contract call, first four bytes of the
/// signature hash
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}
