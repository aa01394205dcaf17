//! Signed state-changing calls against the wrapped-token contract

pub mod issuer;
pub mod signer;

pub use issuer::TransactionIssuer;
pub use signer::WalletSigner;

use ethers::types::{Address, U256};

/// Which contract method a request maps to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Mint,
    Transfer,
}

/// A pending signed call against the wrapped-token contract.
///
/// `amount` stays optional until validation so that a missing amount is a
/// rejected request, not a silent zero. For mints, `origin_tx_id` carries the
/// native-chain transaction that funds the mint.
#[derive(Debug, Clone)]
pub struct TxRequest {
    pub contract: Address,
    pub kind: CallKind,
    pub recipient: Address,
    pub amount: Option<U256>,
    pub origin_tx_id: Option<String>,
}
