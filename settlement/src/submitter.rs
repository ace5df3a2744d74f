//! Drives settlement batches onto the chain.
//!
//! One flush is in flight at a time; triggers arriving during a flush coalesce into the next
//! one. Broadcasts are serialized by the sender account: the tracked nonce only advances after a
//! broadcast succeeds, and confirmation timeouts rebroadcast the same nonce with an escalated
//! gas price. A batch whose receipt reports a revert goes back to the front of the queue.

use crate::{
    encoding::SettlementBatch,
    queue::{PendingFill, SettlementQueue},
};
use anyhow::{Context, Result};
use model::{trade::FillId, DomainSeparator};
use primitive_types::{H256, U256};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

/// How often the run loop re-checks the flush conditions when no enqueue wakes it.
const FLUSH_POLL_INTERVAL: Duration = Duration::from_millis(250);
/// How often a pending transaction's receipt is polled.
const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Rebroadcast attempts per batch before it is returned to the queue.
const MAX_SUBMISSION_ATTEMPTS: u32 = 10;

#[derive(Clone, Debug)]
pub struct SubmitterConfig {
    pub batch_size: usize,
    pub batch_timeout: Duration,
    pub gas_multiplier_on_retry: f64,
    pub confirmation_timeout: Duration,
}

impl Default for SubmitterConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            batch_timeout: Duration::from_secs(5),
            gas_multiplier_on_retry: 1.25,
            confirmation_timeout: Duration::from_secs(300),
        }
    }
}

/// Receipt of a mined settlement transaction; `success` is false on revert.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SettlementReceipt {
    pub tx_hash: H256,
    pub success: bool,
}

/// The chain access the submitter needs, kept narrow so tests can mock it.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait SettlementSubmitting: Send + Sync {
    async fn current_gas_price(&self) -> Result<U256>;
    async fn pending_nonce(&self) -> Result<U256>;
    async fn broadcast(&self, calldata: Vec<u8>, gas_price: U256, nonce: U256) -> Result<H256>;
    async fn transaction_receipt(&self, tx_hash: H256) -> Result<Option<SettlementReceipt>>;
}

/// Write-back of confirmed settlements into fill storage.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait SettledFillsSink: Send + Sync {
    async fn fills_settled(&self, fill_ids: &[FillId], tx_hash: H256) -> Result<()>;
}

pub struct Submitter {
    queue: Arc<SettlementQueue>,
    chain: Arc<dyn SettlementSubmitting>,
    sink: Arc<dyn SettledFillsSink>,
    domain_separator: DomainSeparator,
    config: SubmitterConfig,
    paused: AtomicBool,
    /// Next nonce of the sender account; None until first queried.
    nonce: tokio::sync::Mutex<Option<U256>>,
    /// Cumulative settled amount per order hash, mirroring the contract's overfill guard.
    settled_amounts: Mutex<HashMap<H256, U256>>,
}

impl Submitter {
    pub fn new(
        queue: Arc<SettlementQueue>,
        chain: Arc<dyn SettlementSubmitting>,
        sink: Arc<dyn SettledFillsSink>,
        domain_separator: DomainSeparator,
        config: SubmitterConfig,
    ) -> Self {
        Self {
            queue,
            chain,
            sink,
            domain_separator,
            config,
            paused: AtomicBool::new(false),
            nonce: tokio::sync::Mutex::new(None),
            settled_amounts: Mutex::new(HashMap::new()),
        }
    }

    /// Operator switch; a paused submitter accumulates fills but drains nothing.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        tracing::info!("settlement submitter paused");
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        tracing::info!("settlement submitter resumed");
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub async fn run_forever(self: Arc<Self>) -> ! {
        loop {
            tokio::select! {
                _ = self.queue.notified() => (),
                _ = tokio::time::sleep(FLUSH_POLL_INTERVAL) => (),
            }
            if self.is_paused() {
                continue;
            }
            if self
                .queue
                .flush_due(self.config.batch_size, self.config.batch_timeout)
            {
                self.flush_once().await;
            }
        }
    }

    /// Takes one batch off the queue and settles it. Public so tests can drive flushes without
    /// the run loop.
    pub async fn flush_once(&self) {
        let pending = self.queue.take_batch(self.config.batch_size);
        if pending.is_empty() {
            return;
        }
        let admissible = self.drop_overfills(pending);
        if admissible.is_empty() {
            return;
        }
        let batch = SettlementBatch::from_pending(&admissible, &self.domain_separator);
        tracing::info!(
            fills = batch.fills.len(),
            takers = batch.taker_orders.len(),
            makers = batch.maker_orders.len(),
            "submitting settlement batch"
        );
        match self.submit_batch(&batch).await {
            Ok(receipt) if receipt.success => {
                self.record_settled(&admissible);
                if let Err(err) = self
                    .sink
                    .fills_settled(&batch.fill_ids(), receipt.tx_hash)
                    .await
                {
                    tracing::error!(?err, "failed to record settled fills");
                }
                tracing::info!(tx_hash = ?receipt.tx_hash, "settlement batch confirmed");
            }
            Ok(receipt) => {
                tracing::warn!(tx_hash = ?receipt.tx_hash, "settlement batch reverted, requeueing");
                self.queue.prepend(admissible);
            }
            Err(err) => {
                tracing::error!(?err, "settlement submission failed, requeueing");
                self.queue.prepend(admissible);
            }
        }
    }

    /// The local twin of the contract's per hash overfill protection: fills that would push an
    /// order's cumulative settled amount past its signed amount never leave the process.
    fn drop_overfills(&self, pending: Vec<PendingFill>) -> Vec<PendingFill> {
        let settled = self.settled_amounts.lock().unwrap();
        let mut in_batch: HashMap<H256, U256> = HashMap::new();
        let mut admissible = Vec::with_capacity(pending.len());
        'fills: for entry in pending {
            let legs = [
                (entry.taker.hash(&self.domain_separator), entry.taker.amount),
                (entry.maker.hash(&self.domain_separator), entry.maker.amount),
            ];
            for (hash, total) in legs {
                let already = settled.get(&hash).copied().unwrap_or_default()
                    + in_batch.get(&hash).copied().unwrap_or_default();
                if already + entry.fill.amount > total {
                    tracing::error!(
                        fill = ?entry.fill.id,
                        order_hash = ?hash,
                        "dropping fill that would overfill its order"
                    );
                    continue 'fills;
                }
            }
            for (hash, _) in legs {
                *in_batch.entry(hash).or_default() += entry.fill.amount;
            }
            admissible.push(entry);
        }
        admissible
    }

    fn record_settled(&self, settled: &[PendingFill]) {
        let mut amounts = self.settled_amounts.lock().unwrap();
        for entry in settled {
            for hash in [
                entry.taker.hash(&self.domain_separator),
                entry.maker.hash(&self.domain_separator),
            ] {
                *amounts.entry(hash).or_default() += entry.fill.amount;
            }
        }
    }

    async fn submit_batch(&self, batch: &SettlementBatch) -> Result<SettlementReceipt> {
        let calldata = batch.calldata();
        // Holding the nonce lock across the whole submission serializes broadcasts by the sender
        // account: one pending transaction at a time.
        let mut tracked_nonce = self.nonce.lock().await;
        let nonce = match *tracked_nonce {
            Some(nonce) => nonce,
            None => self
                .chain
                .pending_nonce()
                .await
                .context("failed to fetch sender nonce")?,
        };
        let base_gas_price = self
            .chain
            .current_gas_price()
            .await
            .context("failed to fetch gas price")?;

        let mut attempt: u32 = 0;
        loop {
            let gas_price = escalate(base_gas_price, self.config.gas_multiplier_on_retry, attempt);
            let tx_hash = self
                .chain
                .broadcast(calldata.clone(), gas_price, nonce)
                .await
                .context("failed to broadcast settlement transaction")?;
            *tracked_nonce = Some(nonce + 1);
            tracing::debug!(?tx_hash, %gas_price, attempt, "settlement transaction broadcast");

            match self.wait_for_receipt(tx_hash).await? {
                Some(receipt) => return Ok(receipt),
                None => {
                    attempt += 1;
                    if attempt >= MAX_SUBMISSION_ATTEMPTS {
                        anyhow::bail!(
                            "settlement transaction {:?} unconfirmed after {} attempts",
                            tx_hash,
                            attempt
                        );
                    }
                    tracing::warn!(
                        ?tx_hash,
                        attempt,
                        "confirmation timed out, rebroadcasting with escalated gas price"
                    );
                }
            }
        }
    }

    async fn wait_for_receipt(&self, tx_hash: H256) -> Result<Option<SettlementReceipt>> {
        let deadline = tokio::time::Instant::now() + self.config.confirmation_timeout;
        loop {
            if let Some(receipt) = self.chain.transaction_receipt(tx_hash).await? {
                return Ok(Some(receipt));
            }
            if tokio::time::Instant::now() + RECEIPT_POLL_INTERVAL > deadline {
                return Ok(None);
            }
            tokio::time::sleep(RECEIPT_POLL_INTERVAL).await;
        }
    }
}

fn escalate(base: U256, multiplier: f64, attempt: u32) -> U256 {
    if attempt == 0 {
        return base;
    }
    U256::from_f64_lossy(base.to_f64_lossy() * multiplier.powi(attempt as i32))
}
