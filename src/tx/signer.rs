//! Signing capability bound to the configured bridge account

use crate::chain::BridgeSigner;
use crate::error::{BridgeError, BridgeResult};

use async_trait::async_trait;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Signature};
use tracing::info;

/// In-process wallet signer. Refuses to sign for any address other than its
/// own; there is no ambient account state anywhere else in the process.
#[derive(Debug)]
pub struct WalletSigner {
    wallet: LocalWallet,
}

impl WalletSigner {
    /// Load the private key from the named environment variable.
    pub fn from_env(var: &str, chain_id: u64) -> BridgeResult<Self> {
        let key = std::env::var(var)
            .map_err(|_| BridgeError::Wallet(format!("environment variable {var} not set")))?;
        let wallet = key
            .parse::<LocalWallet>()
            .map_err(|e| BridgeError::Wallet(format!("invalid private key: {e}")))?
            .with_chain_id(chain_id);

        info!(address = ?wallet.address(), "bridge signing account loaded");
        Ok(Self { wallet })
    }
}

#[async_trait]
impl BridgeSigner for WalletSigner {
    fn address(&self) -> Address {
        self.wallet.address()
    }

    async fn sign(&self, from: Address, tx: &TypedTransaction) -> BridgeResult<Signature> {
        if from != self.wallet.address() {
            return Err(BridgeError::Unauthorized { requested: from });
        }
        self.wallet
            .sign_transaction(tx)
            .await
            .map_err(|e| BridgeError::Wallet(e.to_string()))
    }
}
