//! Web3 backed implementation of the submitter's chain access. The settlement contract itself
//! is a black box here; calldata is produced by the encoding module and sent as a raw signed
//! transaction.

use crate::submitter::{SettlementReceipt, SettlementSubmitting};
use anyhow::{Context, Result};
use primitive_types::{H160, H256, U256};
use secp256k1::SecretKey;
use web3::{
    signing::{Key, SecretKeyRef},
    transports::Http,
    types::{BlockNumber, Bytes, CallRequest, TransactionParameters},
    Web3,
};

/// Buffer on top of the node's gas estimate in case racing state changes make the settlement
/// slightly heavier at execution time.
const ESTIMATE_GAS_LIMIT_FACTOR: f64 = 1.2;
/// Used when the node cannot estimate, which happens while it considers the call reverting.
const FALLBACK_GAS_LIMIT: u64 = 8_000_000;

pub struct Web3Settlement {
    web3: Web3<Http>,
    settlement_address: H160,
    key: SecretKey,
    sender: H160,
    chain_id: u64,
}

impl Web3Settlement {
    pub fn new(web3: Web3<Http>, settlement_address: H160, key: SecretKey, chain_id: u64) -> Self {
        let sender = SecretKeyRef::new(&key).address();
        Self {
            web3,
            settlement_address,
            key,
            sender,
            chain_id,
        }
    }

    pub fn sender(&self) -> H160 {
        self.sender
    }

    async fn gas_limit(&self, calldata: &[u8]) -> U256 {
        let request = CallRequest {
            from: Some(self.sender),
            to: Some(self.settlement_address),
            data: Some(Bytes(calldata.to_vec())),
            ..Default::default()
        };
        match self.web3.eth().estimate_gas(request, None).await {
            Ok(estimate) => U256::from_f64_lossy(estimate.to_f64_lossy() * ESTIMATE_GAS_LIMIT_FACTOR),
            Err(err) => {
                tracing::warn!(?err, "gas estimation failed, using fallback limit");
                U256::from(FALLBACK_GAS_LIMIT)
            }
        }
    }
}

#[async_trait::async_trait]
impl SettlementSubmitting for Web3Settlement {
    async fn current_gas_price(&self) -> Result<U256> {
        self.web3
            .eth()
            .gas_price()
            .await
            .context("failed to query gas price")
    }

    async fn pending_nonce(&self) -> Result<U256> {
        self.web3
            .eth()
            .transaction_count(self.sender, Some(BlockNumber::Pending))
            .await
            .context("failed to query transaction count")
    }

    async fn broadcast(&self, calldata: Vec<u8>, gas_price: U256, nonce: U256) -> Result<H256> {
        let gas = self.gas_limit(&calldata).await;
        let parameters = TransactionParameters {
            to: Some(self.settlement_address),
            gas,
            gas_price: Some(gas_price),
            nonce: Some(nonce),
            data: Bytes(calldata),
            chain_id: Some(self.chain_id),
            ..Default::default()
        };
        let signed = self
            .web3
            .accounts()
            .sign_transaction(parameters, SecretKeyRef::new(&self.key))
            .await
            .context("failed to sign settlement transaction")?;
        self.web3
            .eth()
            .send_raw_transaction(signed.raw_transaction)
            .await
            .context("failed to broadcast settlement transaction")
    }

    async fn transaction_receipt(&self, tx_hash: H256) -> Result<Option<SettlementReceipt>> {
        let receipt = self
            .web3
            .eth()
            .transaction_receipt(tx_hash)
            .await
            .context("failed to query transaction receipt")?;
        Ok(receipt.and_then(|receipt| {
            // A receipt without a block is still pending.
            receipt.block_number?;
            Some(SettlementReceipt {
                tx_hash,
                success: receipt.status == Some(1.into()),
            })
        }))
    }
}
