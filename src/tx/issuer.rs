//! Transaction issuance: validate, sign, submit, all within one deadline

use crate::account::AccountStateCache;
use crate::chain::{BridgeSigner, Submitter};
use crate::error::{BridgeError, BridgeResult};
use crate::events::selector;
use crate::metrics;

use super::{CallKind, TxRequest};

use ethers::abi::{self, Token};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, TransactionRequest, H256, U256};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::info;

/// Wall-clock ceiling for one issue call, signing and submission included
const ISSUE_TIMEOUT: Duration = Duration::from_secs(30);

/// Builds, signs and submits mint/transfer calls.
///
/// The issuer never retries: a blind retry on a failed mint could
/// double-spend when the failure was a late confirmation rather than a
/// rejection. Idempotency for mints lives with the caller, which checks the
/// ledger index before issuing.
pub struct TransactionIssuer {
    account: Address,
    chain_id: u64,
    gas_limit: u64,
    signer: Arc<dyn BridgeSigner>,
    submitter: Arc<dyn Submitter>,
    cache: Arc<AccountStateCache>,
}

impl TransactionIssuer {
    pub fn new(
        account: Address,
        chain_id: u64,
        gas_limit: u64,
        signer: Arc<dyn BridgeSigner>,
        submitter: Arc<dyn Submitter>,
        cache: Arc<AccountStateCache>,
    ) -> Self {
        Self {
            account,
            chain_id,
            gas_limit,
            signer,
            submitter,
            cache,
        }
    }

    /// Issue one signed call. Preconditions are checked before any network
    /// interaction; validation failures never reach the signer or submitter.
    pub async fn issue(&self, request: TxRequest) -> BridgeResult<H256> {
        let amount = match request.amount {
            None => return Err(BridgeError::InvalidAmount("amount is required")),
            Some(a) if a.is_zero() => {
                return Err(BridgeError::InvalidAmount("amount must be greater than zero"))
            }
            Some(a) => a,
        };
        if request.kind == CallKind::Mint && request.origin_tx_id.is_none() {
            return Err(BridgeError::InvalidRequest(
                "mint requires the originating transaction id",
            ));
        }

        timeout(ISSUE_TIMEOUT, self.sign_and_submit(request, amount))
            .await
            .map_err(|_| BridgeError::Timeout {
                operation: "transaction submission",
            })?
    }

    async fn sign_and_submit(&self, request: TxRequest, amount: U256) -> BridgeResult<H256> {
        // Fee and nonce hints come from the cached snapshot, not the network
        let snapshot = self.cache.read().await.ok_or(BridgeError::Internal(
            "no account snapshot available yet".into(),
        ))?;

        let data = encode_call(&request, amount)?;
        let tx: TypedTransaction = TransactionRequest::new()
            .from(self.account)
            .to(request.contract)
            .data(data)
            .nonce(snapshot.nonce)
            .gas(self.gas_limit)
            .gas_price(snapshot.fee_per_unit)
            .chain_id(self.chain_id)
            .into();

        let signature = self.signer.sign(self.account, &tx).await?;
        let raw = tx.rlp_signed(&signature);

        match self.submitter.submit(raw).await {
            Ok(hash) => {
                info!(
                    kind = ?request.kind,
                    recipient = ?request.recipient,
                    %amount,
                    tx_hash = ?hash,
                    "transaction submitted"
                );
                metrics::record_tx_submitted();
                Ok(hash)
            }
            Err(e) => {
                metrics::record_tx_failed();
                Err(e)
            }
        }
    }
}

/// Encode the calldata for a mint or transfer call
fn encode_call(request: &TxRequest, amount: U256) -> BridgeResult<Bytes> {
    let data = match request.kind {
        CallKind::Transfer => {
            let mut d = selector("transfer(address,uint256)").to_vec();
            d.extend(abi::encode(&[
                Token::Address(request.recipient),
                Token::Uint(amount),
            ]));
            d
        }
        CallKind::Mint => {
            let origin_tx_id = request.origin_tx_id.as_ref().ok_or(
                BridgeError::InvalidRequest("mint requires the originating transaction id"),
            )?;
            let mut d = selector("mintTokens(address,uint256,string)").to_vec();
            d.extend(abi::encode(&[
                Token::Address(request.recipient),
                Token::Uint(amount),
                Token::String(origin_tx_id.clone()),
            ]));
            d
        }
    };
    Ok(Bytes::from(data))
}
