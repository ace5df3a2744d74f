//! The per pair resting order state: two price indexed sides, the order records they reference
//! and the trigger list for stop orders.
//!
//! Orders are owned by the pair's record map; the side levels and the trigger list only hold ids
//! so cancels, partial fills and expiry evictions cannot leave a dangling reference.

use chrono::{DateTime, Utc};
use model::{
    order::{Order, OrderId, OrderKind, Side},
    orderbook::{OrderBookSnapshot, PriceLevelView},
    TradingPair,
};
use primitive_types::U256;
use std::collections::{BTreeMap, HashMap, VecDeque};

/// FIFO queue of resting orders at one price, first entry is the oldest.
#[derive(Debug, Default)]
struct PriceLevel {
    orders: VecDeque<OrderId>,
    aggregate_amount: U256,
}

/// One side of a book: a price ordered map of levels. Bids match from the highest price down,
/// asks from the lowest price up.
#[derive(Debug)]
pub struct BookSide {
    side: Side,
    levels: BTreeMap<U256, PriceLevel>,
}

impl BookSide {
    fn new(side: Side) -> Self {
        Self {
            side,
            levels: BTreeMap::new(),
        }
    }

    pub fn best_price(&self) -> Option<U256> {
        match self.side {
            Side::Buy => self.levels.keys().next_back().copied(),
            Side::Sell => self.levels.keys().next().copied(),
        }
    }

    fn head(&self, price: U256) -> Option<OrderId> {
        self.levels.get(&price)?.orders.front().copied()
    }

    fn append(&mut self, price: U256, id: OrderId, remaining: U256) {
        let level = self.levels.entry(price).or_default();
        level.orders.push_back(id);
        level.aggregate_amount += remaining;
    }

    fn reduce(&mut self, price: U256, amount: U256) {
        if let Some(level) = self.levels.get_mut(&price) {
            level.aggregate_amount = level.aggregate_amount.saturating_sub(amount);
        }
    }

    fn remove(&mut self, price: U256, id: OrderId, remaining: U256) -> bool {
        let level = match self.levels.get_mut(&price) {
            Some(level) => level,
            None => return false,
        };
        let before = level.orders.len();
        level.orders.retain(|entry| *entry != id);
        if level.orders.len() == before {
            return false;
        }
        level.aggregate_amount = level.aggregate_amount.saturating_sub(remaining);
        if level.orders.is_empty() {
            self.levels.remove(&price);
        }
        true
    }

    fn depth(&self, depth: usize) -> Vec<PriceLevelView> {
        let view = |(price, level): (&U256, &PriceLevel)| PriceLevelView {
            price: *price,
            aggregate_amount: level.aggregate_amount,
            order_count: level.orders.len(),
        };
        match self.side {
            Side::Buy => self.levels.iter().rev().take(depth).map(view).collect(),
            Side::Sell => self.levels.iter().take(depth).map(view).collect(),
        }
    }

    fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}

/// All live orders of one trading pair.
pub struct PairBook {
    pair: TradingPair,
    orders: HashMap<OrderId, Order>,
    bids: BookSide,
    asks: BookSide,
    /// Price level a resting order currently sits at.
    resting_price: HashMap<OrderId, U256>,
    /// Stop and take-profit orders waiting for their trigger, in arrival order.
    stops: Vec<OrderId>,
    last_price: Option<U256>,
}

impl PairBook {
    pub fn new(pair: TradingPair) -> Self {
        Self {
            pair,
            orders: HashMap::new(),
            bids: BookSide::new(Side::Buy),
            asks: BookSide::new(Side::Sell),
            resting_price: HashMap::new(),
            stops: Vec::new(),
            last_price: None,
        }
    }

    pub fn pair(&self) -> &TradingPair {
        &self.pair
    }

    pub fn last_price(&self) -> Option<U256> {
        self.last_price
    }

    pub fn set_last_price(&mut self, price: U256) {
        self.last_price = Some(price);
    }

    fn side_mut(&mut self, side: Side) -> &mut BookSide {
        match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        }
    }

    pub fn side(&self, side: Side) -> &BookSide {
        match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        }
    }

    pub fn order(&self, id: OrderId) -> Option<&Order> {
        self.orders.get(&id)
    }

    pub fn order_mut(&mut self, id: OrderId) -> Option<&mut Order> {
        self.orders.get_mut(&id)
    }

    /// Appends a limit order to its price level, creating the level if absent.
    pub fn insert_resting(&mut self, order: Order) {
        let id = order.metadata.id;
        let price = order.creation.price;
        let side = order.creation.side;
        let remaining = order.remaining_amount();
        self.side_mut(side).append(price, id, remaining);
        self.resting_price.insert(id, price);
        self.orders.insert(id, order);
    }

    /// Parks a stop order on the trigger list; it does not contribute to depth.
    pub fn insert_stop(&mut self, order: Order) {
        let id = order.metadata.id;
        self.stops.push(id);
        self.orders.insert(id, order);
    }

    /// Splices an order out of the book or the trigger list and returns its record.
    pub fn remove(&mut self, id: OrderId) -> Option<Order> {
        let order = self.orders.remove(&id)?;
        if let Some(price) = self.resting_price.remove(&id) {
            let remaining = order.remaining_amount();
            self.side_mut(order.creation.side).remove(price, id, remaining);
        } else {
            self.stops.retain(|entry| *entry != id);
        }
        Some(order)
    }

    /// The best price and oldest order at it on the given side.
    pub fn peek_best(&self, side: Side) -> Option<(U256, OrderId)> {
        let book_side = self.side(side);
        let price = book_side.best_price()?;
        let head = book_side.head(price)?;
        Some((price, head))
    }

    /// Shrinks a resting maker's level aggregate after a partial fill.
    pub fn reduce_resting(&mut self, id: OrderId, amount: U256) {
        if let (Some(price), Some(side)) = (
            self.resting_price.get(&id).copied(),
            self.orders.get(&id).map(|order| order.creation.side),
        ) {
            self.side_mut(side).reduce(price, amount);
        }
    }

    pub fn best_bid(&self) -> Option<U256> {
        self.bids.best_price()
    }

    pub fn best_ask(&self) -> Option<U256> {
        self.asks.best_price()
    }

    /// Mid between best bid and ask; either side alone when the other is empty.
    pub fn reference_price(&self) -> Option<U256> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid + ask) / 2),
            (Some(bid), None) => Some(bid),
            (None, Some(ask)) => Some(ask),
            (None, None) => self.last_price,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    pub fn open_order_count(&self) -> usize {
        self.orders.len()
    }

    pub fn snapshot(&self, depth: usize) -> OrderBookSnapshot {
        OrderBookSnapshot {
            trading_pair: self.pair.clone(),
            bids: self.bids.depth(depth),
            asks: self.asks.depth(depth),
            timestamp: Utc::now(),
        }
    }

    /// Ids of live orders whose deadline has passed.
    pub fn expired_order_ids(&self, now: DateTime<Utc>) -> Vec<OrderId> {
        self.orders
            .values()
            .filter(|order| order.is_expired_at(now))
            .map(|order| order.metadata.id)
            .collect()
    }

    /// Removes and returns the stop orders whose trigger condition is met by the last trade
    /// price, preserving arrival order.
    pub fn take_triggered(&mut self) -> Vec<Order> {
        let last_price = match self.last_price {
            Some(price) => price,
            None => return Vec::new(),
        };
        let triggered: Vec<OrderId> = self
            .stops
            .iter()
            .copied()
            .filter(|id| {
                self.orders
                    .get(id)
                    .map(|order| stop_triggers(order, last_price))
                    .unwrap_or(false)
            })
            .collect();
        triggered
            .into_iter()
            .filter_map(|id| {
                self.stops.retain(|entry| *entry != id);
                self.orders.remove(&id)
            })
            .collect()
    }
}

/// Whether a parked stop order fires at the given last trade price.
///
/// A stop-loss rests on the adverse side of the market (sell below, buy above), a take-profit on
/// the favorable one, so the comparisons mirror each other.
fn stop_triggers(order: &Order, last_price: U256) -> bool {
    let trigger = order.creation.price;
    match (order.creation.kind, order.creation.side) {
        (OrderKind::StopLoss, Side::Sell) => last_price <= trigger,
        (OrderKind::StopLoss, Side::Buy) => last_price >= trigger,
        (OrderKind::TakeProfit, Side::Sell) => last_price >= trigger,
        (OrderKind::TakeProfit, Side::Buy) => last_price <= trigger,
        _ => false,
    }
}
