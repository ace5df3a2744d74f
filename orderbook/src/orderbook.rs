//! The admission pipeline and query surface behind the http handlers.
//!
//! A signed order passes, in this sequence: payload validation, signature recovery, expiry
//! check, replay protection by hash, nonce monotonicity, risk checks, fund locking, persistence
//! and finally the matching engine. Failures before the engine never mutate a book; the engine
//! itself either completes a consistent transition or leaves the pair untouched.

use crate::{
    account_balances::{BalanceBook, BalanceError},
    database::{Database, InsertionError, OrderFilter, OrderStoring, TradeFilter, TradeRetrieving},
    events::EventHub,
    matching::{MatchOutcome, MatchingEngine},
    risk::{RiskChecker, RiskError},
};
use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use model::{
    order::{Order, OrderCreation, OrderId, OrderKind, OrderMetadata, OrderStatus},
    orderbook::{OrderBookSnapshot, PairStats},
    trade::Fill,
    DomainSeparator, TradingPair,
};
use primitive_types::{H160, U256};
use settlement::{PendingFill, SettlementQueue};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

#[derive(Debug)]
pub enum AddOrderResult {
    Added { order: Order, fills: Vec<Fill> },
    InvalidParameter(&'static str),
    MalformedSignature,
    InvalidSignature(H160),
    Expired,
    DuplicatedOrder(OrderId),
    NonceTooLow { highest: U256 },
    Risk(RiskError),
    InsufficientBalance { required: U256, available: U256 },
}

#[derive(Debug)]
pub enum OrderCancellationResult {
    Cancelled(Order),
    OrderNotFound,
    NotOrderOwner,
    OrderNotCancellable(OrderStatus),
    RateLimited,
}

pub struct Orderbook {
    domain_separator: DomainSeparator,
    database: Arc<Database>,
    balances: Arc<BalanceBook>,
    risk: RiskChecker,
    engine: Arc<MatchingEngine>,
    hub: Arc<EventHub>,
    settlement: Arc<SettlementQueue>,
    enable_balance_check: bool,
    /// First admitted order of a symbol binds it to its token addresses.
    pair_tokens: Mutex<HashMap<TradingPair, (H160, H160)>>,
    /// Highest admitted nonce per user; defense in depth next to hash uniqueness.
    nonces: Mutex<HashMap<H160, U256>>,
}

impl Orderbook {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        domain_separator: DomainSeparator,
        database: Arc<Database>,
        balances: Arc<BalanceBook>,
        risk: RiskChecker,
        engine: Arc<MatchingEngine>,
        hub: Arc<EventHub>,
        settlement: Arc<SettlementQueue>,
        enable_balance_check: bool,
    ) -> Self {
        Self {
            domain_separator,
            database,
            balances,
            risk,
            engine,
            hub,
            settlement,
            enable_balance_check,
            pair_tokens: Mutex::new(HashMap::new()),
            nonces: Mutex::new(HashMap::new()),
        }
    }

    pub fn domain_separator(&self) -> &DomainSeparator {
        &self.domain_separator
    }

    pub fn balances(&self) -> &BalanceBook {
        &self.balances
    }

    pub async fn add_order(&self, creation: OrderCreation) -> Result<AddOrderResult> {
        if creation.amount.is_zero() {
            return Ok(AddOrderResult::InvalidParameter("amount must be positive"));
        }
        if creation.kind != OrderKind::Market && creation.price.is_zero() {
            return Ok(AddOrderResult::InvalidParameter("price must be positive"));
        }
        if let Some(result) = self.check_pair_binding(&creation) {
            return Ok(result);
        }

        match creation.recover_signer(&self.domain_separator) {
            Err(_) => return Ok(AddOrderResult::MalformedSignature),
            Ok(signer) if signer != creation.user_address => {
                return Ok(AddOrderResult::InvalidSignature(signer))
            }
            Ok(_) => (),
        }

        if creation.expires_at != 0
            && creation.expires_at <= shared::time::now_in_epoch_seconds()
        {
            return Ok(AddOrderResult::Expired);
        }

        let hash = creation.hash(&self.domain_separator);
        if let Some(existing) = self.database.order_by_hash(hash).await? {
            return Ok(AddOrderResult::DuplicatedOrder(existing.metadata.id));
        }

        if let Some(highest) = self.nonce_too_low(&creation) {
            return Ok(AddOrderResult::NonceTooLow { highest });
        }

        let open_orders = self
            .database
            .open_order_count(creation.user_address)
            .await?;
        let reference_price = self.engine.reference_price(&creation.trading_pair);
        if let Err(err) = self.risk.check_order(&creation, open_orders, reference_price) {
            return Ok(AddOrderResult::Risk(err));
        }

        let now = Utc::now();
        let order = Order {
            metadata: OrderMetadata {
                id: self.engine.next_order_id(),
                hash,
                status: OrderStatus::Pending,
                filled_amount: U256::zero(),
                created_at: now,
                updated_at: now,
            },
            creation,
        };

        if self.enable_balance_check {
            match self.balances.lock_for_order(&order) {
                Ok(()) => (),
                Err(BalanceError::InsufficientBalance {
                    required,
                    available,
                }) => {
                    return Ok(AddOrderResult::InsufficientBalance {
                        required,
                        available,
                    })
                }
                Err(_) => {
                    return Ok(AddOrderResult::InvalidParameter(
                        "order amounts overflow settlement arithmetic",
                    ))
                }
            }
        }

        if let Err(InsertionError::DuplicatedRecord) = self.database.insert_order(&order).await {
            // Lost a race against an identical payload; undo the reservation.
            self.balances.unlock_for_order(order.metadata.id);
            let existing = self.database.order_by_hash(hash).await?;
            return Ok(AddOrderResult::DuplicatedOrder(
                existing
                    .map(|order| order.metadata.id)
                    .unwrap_or(order.metadata.id),
            ));
        }

        // Admission is committed: record the nonce and the pair's token binding.
        self.commit_admission(&order);

        let mut submitted = order;
        submitted.metadata.status = OrderStatus::Open;
        let outcome = self.engine.submit(submitted);
        self.apply_outcome(&outcome)
            .await
            .context("failed to apply match outcome")?;

        Ok(AddOrderResult::Added {
            order: outcome.taker,
            fills: outcome.fills,
        })
    }

    pub async fn cancel_order(
        &self,
        order_id: OrderId,
        user: H160,
    ) -> Result<OrderCancellationResult> {
        let order = match self.database.single_order(order_id).await? {
            Some(order) => order,
            None => return Ok(OrderCancellationResult::OrderNotFound),
        };
        if order.creation.user_address != user {
            return Ok(OrderCancellationResult::NotOrderOwner);
        }
        if order.is_terminal() {
            return Ok(OrderCancellationResult::OrderNotCancellable(
                order.metadata.status,
            ));
        }
        if self.risk.check_cancel(user).is_err() {
            return Ok(OrderCancellationResult::RateLimited);
        }
        match self.engine.cancel(&order.creation.trading_pair, order_id) {
            Some(outcome) => {
                self.database.update_order(&outcome.order).await?;
                self.balances.unlock_for_order(order_id);
                self.hub.publish_order(&outcome.order);
                self.hub.publish_depth(&outcome.snapshot);
                Ok(OrderCancellationResult::Cancelled(outcome.order))
            }
            None => {
                // The engine already retired the order, for example a fill racing this cancel.
                let current = self
                    .database
                    .single_order(order_id)
                    .await?
                    .map(|order| order.metadata.status)
                    .unwrap_or(OrderStatus::Cancelled);
                Ok(OrderCancellationResult::OrderNotCancellable(current))
            }
        }
    }

    pub async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        self.database.single_order(order_id).await
    }

    pub async fn get_orders(&self, filter: &OrderFilter) -> Result<(Vec<Order>, usize)> {
        self.database.orders(filter).await
    }

    pub async fn get_trades(&self, filter: &TradeFilter) -> Result<(Vec<Fill>, usize)> {
        self.database.trades(filter).await
    }

    /// None when the pair has never been traded.
    pub fn get_order_book(&self, pair: &TradingPair, depth: usize) -> Option<OrderBookSnapshot> {
        self.engine.snapshot(pair, depth)
    }

    pub async fn get_stats(&self, pair: &TradingPair) -> Result<Option<PairStats>> {
        let info = match self.engine.pair_info(pair) {
            Some(info) => info,
            None => return Ok(None),
        };
        let since = Utc::now() - ChronoDuration::hours(24);
        let (volume_24h, trade_count) = self.database.volume_since(pair, since).await?;
        Ok(Some(PairStats {
            trading_pair: pair.clone(),
            best_bid: info.best_bid,
            best_ask: info.best_ask,
            last_price: info.last_price,
            volume_24h,
            open_orders: info.open_orders,
            trade_count,
            timestamp: Utc::now(),
        }))
    }

    /// Administrative reflection of deposits and withdrawals observed on chain.
    pub fn set_balance(&self, user: H160, token: H160, total: U256) -> Result<(), BalanceError> {
        self.balances.set_balance(user, token, total)
    }

    /// Cancels every live order whose deadline passed and releases its funds.
    pub async fn sweep_expired(&self) -> Result<()> {
        for sweep in self.engine.sweep_expired(Utc::now()) {
            for order in &sweep.cancelled {
                self.database.update_order(order).await?;
                self.balances.unlock_for_order(order.metadata.id);
                self.hub.publish_order(order);
            }
            self.hub.publish_depth(&sweep.snapshot);
        }
        Ok(())
    }

    fn check_pair_binding(&self, creation: &OrderCreation) -> Option<AddOrderResult> {
        if creation.base_token == creation.quote_token {
            return Some(AddOrderResult::InvalidParameter(
                "base and quote token must differ",
            ));
        }
        let bindings = self.pair_tokens.lock().unwrap();
        match bindings.get(&creation.trading_pair) {
            Some((base, quote))
                if *base != creation.base_token || *quote != creation.quote_token =>
            {
                Some(AddOrderResult::InvalidParameter(
                    "token addresses do not match the trading pair",
                ))
            }
            _ => None,
        }
    }

    fn nonce_too_low(&self, creation: &OrderCreation) -> Option<U256> {
        let nonces = self.nonces.lock().unwrap();
        match nonces.get(&creation.user_address) {
            Some(highest) if creation.nonce <= *highest => Some(*highest),
            _ => None,
        }
    }

    fn commit_admission(&self, order: &Order) {
        self.pair_tokens.lock().unwrap().insert(
            order.creation.trading_pair.clone(),
            (order.creation.base_token, order.creation.quote_token),
        );
        self.nonces
            .lock()
            .unwrap()
            .insert(order.creation.user_address, order.creation.nonce);
    }

    /// Fans a match outcome out to the ledger, storage, the settlement queue and subscribers.
    /// Runs after the pair lock is released.
    async fn apply_outcome(&self, outcome: &MatchOutcome) -> Result<()> {
        let mut orders: HashMap<OrderId, &Order> = HashMap::new();
        orders.insert(outcome.taker.metadata.id, &outcome.taker);
        for order in outcome.maker_updates.iter().chain(&outcome.cancelled) {
            orders.insert(order.metadata.id, order);
        }

        for fill in &outcome.fills {
            let taker = orders
                .get(&fill.taker_order_id)
                .copied()
                .context("fill references unknown taker")?;
            let maker = orders
                .get(&fill.maker_order_id)
                .copied()
                .context("fill references unknown maker")?;
            if self.enable_balance_check {
                if let Err(err) =
                    self.balances
                        .transfer_on_fill(taker, maker, fill.price, fill.amount)
                {
                    tracing::error!(?err, fill = ?fill.id, "fill transfer failed");
                }
            }
            self.database.insert_fill(fill).await?;
            self.settlement.enqueue(PendingFill {
                fill: fill.clone(),
                taker: taker.creation.clone(),
                maker: maker.creation.clone(),
            });
            self.hub.publish_fill(fill);
        }

        for order in outcome
            .maker_updates
            .iter()
            .chain(&outcome.cancelled)
            .chain(std::iter::once(&outcome.taker))
        {
            self.database.update_order(order).await?;
            if order.is_terminal() {
                self.balances.unlock_for_order(order.metadata.id);
            }
            self.hub.publish_order(order);
        }

        self.hub.publish_depth(&outcome.snapshot);
        Ok(())
    }
}

#[async_trait::async_trait]
impl shared::maintenance::Maintaining for Orderbook {
    async fn run_maintenance(&self) -> Result<()> {
        self.sweep_expired().await
    }
}
