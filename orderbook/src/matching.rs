//! Price-time priority matching over the per pair books.
//!
//! The engine is serialized per trading pair: every mutation of a pair's book happens under that
//! pair's mutex and nothing else is locked while it is held. Fund transfers, storage writes and
//! event publication all happen after the outcome is returned.

use crate::book::PairBook;
use chrono::{DateTime, Utc};
use model::{
    order::{Order, OrderId, OrderKind, OrderStatus, Side},
    orderbook::OrderBookSnapshot,
    trade::{Fill, FillId},
    TradingPair,
};
use primitive_types::U256;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, RwLock,
    },
};

/// Number of levels included in depth updates published to subscribers.
pub const DEPTH_UPDATE_LEVELS: usize = 20;

#[derive(Clone, Debug)]
pub struct EngineSettings {
    /// When disabled incoming orders only rest; nothing is matched.
    pub auto_matching: bool,
    /// When enabled a resting maker owned by the taker is cancelled instead of matched against.
    pub self_trade_prevention: bool,
    /// Bounded-loss cap for market orders relative to the first matched price.
    pub max_slippage_bps: Option<u32>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            auto_matching: true,
            self_trade_prevention: false,
            max_slippage_bps: None,
        }
    }
}

/// Everything a single engine call changed, captured under the pair lock.
///
/// `taker` is the submitted order in its final state. `maker_updates` are other orders whose
/// fill state advanced (including stop orders that were activated by the trade prints).
/// `cancelled` are orders the engine evicted: expired makers, self-trade makers and unfillable
/// market remainders keep their funds locked until the caller releases them.
#[derive(Debug)]
pub struct MatchOutcome {
    pub taker: Order,
    pub fills: Vec<Fill>,
    pub maker_updates: Vec<Order>,
    pub cancelled: Vec<Order>,
    pub snapshot: OrderBookSnapshot,
}

#[derive(Debug)]
pub struct CancelOutcome {
    pub order: Order,
    pub snapshot: OrderBookSnapshot,
}

#[derive(Debug)]
pub struct SweepOutcome {
    pub pair: TradingPair,
    pub cancelled: Vec<Order>,
    pub snapshot: OrderBookSnapshot,
}

/// Best prices and liveness counters of one pair, for the stats endpoint.
#[derive(Debug, Default, Eq, PartialEq)]
pub struct PairInfo {
    pub best_bid: Option<U256>,
    pub best_ask: Option<U256>,
    pub last_price: Option<U256>,
    pub open_orders: usize,
}

pub struct MatchingEngine {
    settings: EngineSettings,
    books: RwLock<HashMap<TradingPair, Arc<Mutex<PairBook>>>>,
    next_order_id: AtomicU64,
    next_fill_id: AtomicU64,
}

impl MatchingEngine {
    pub fn new(settings: EngineSettings) -> Self {
        Self {
            settings,
            books: RwLock::new(HashMap::new()),
            next_order_id: AtomicU64::new(1),
            next_fill_id: AtomicU64::new(1),
        }
    }

    pub fn next_order_id(&self) -> OrderId {
        OrderId(self.next_order_id.fetch_add(1, Ordering::SeqCst))
    }

    fn next_fill_id(&self) -> FillId {
        FillId(self.next_fill_id.fetch_add(1, Ordering::SeqCst))
    }

    fn book(&self, pair: &TradingPair) -> Arc<Mutex<PairBook>> {
        // Lock poisoning means another thread panicked mid mutation; propagating the panic is the
        // only safe response, so unwraps on book locks are deliberate throughout.
        if let Some(book) = self.books.read().unwrap().get(pair) {
            return book.clone();
        }
        self.books
            .write()
            .unwrap()
            .entry(pair.clone())
            .or_insert_with(|| Arc::new(Mutex::new(PairBook::new(pair.clone()))))
            .clone()
    }

    fn existing_book(&self, pair: &TradingPair) -> Option<Arc<Mutex<PairBook>>> {
        self.books.read().unwrap().get(pair).cloned()
    }

    pub fn known_pair(&self, pair: &TradingPair) -> bool {
        self.books.read().unwrap().contains_key(pair)
    }

    /// Take-then-rest admission of an already validated order.
    pub fn submit(&self, order: Order) -> MatchOutcome {
        let book_ref = self.book(&order.creation.trading_pair);
        let mut book = book_ref.lock().unwrap();
        let now = Utc::now();

        let mut outcome = Outputs::default();
        let mut taker = order;
        match taker.creation.kind {
            OrderKind::Limit | OrderKind::Market => {
                self.match_and_place(&mut book, &mut taker, now, &mut outcome);
            }
            OrderKind::StopLoss | OrderKind::TakeProfit => {
                book.insert_stop(taker.clone());
            }
        }
        self.run_triggers(&mut book, now, &mut outcome);
        // The trigger cascade may have filled the taker itself if it was a stop that fired
        // immediately; report its latest state.
        if let Some(updated) = latest_state(&outcome, taker.metadata.id) {
            taker = updated;
        }

        MatchOutcome {
            taker,
            fills: outcome.fills,
            maker_updates: outcome.maker_updates,
            cancelled: outcome.cancelled,
            snapshot: book.snapshot(DEPTH_UPDATE_LEVELS),
        }
    }

    /// Removes a live order from its book. None when the engine does not know the order, which
    /// for callers means it is either terminal or never existed; storage disambiguates.
    pub fn cancel(&self, pair: &TradingPair, id: OrderId) -> Option<CancelOutcome> {
        let book_ref = self.existing_book(pair)?;
        let mut book = book_ref.lock().unwrap();
        let mut order = book.remove(id)?;
        order.metadata.status = OrderStatus::Cancelled;
        order.metadata.updated_at = Utc::now();
        Some(CancelOutcome {
            order,
            snapshot: book.snapshot(DEPTH_UPDATE_LEVELS),
        })
    }

    pub fn snapshot(&self, pair: &TradingPair, depth: usize) -> Option<OrderBookSnapshot> {
        let book_ref = self.existing_book(pair)?;
        let book = book_ref.lock().unwrap();
        Some(book.snapshot(depth))
    }

    pub fn pair_info(&self, pair: &TradingPair) -> Option<PairInfo> {
        let book_ref = self.existing_book(pair)?;
        let book = book_ref.lock().unwrap();
        Some(PairInfo {
            best_bid: book.best_bid(),
            best_ask: book.best_ask(),
            last_price: book.last_price(),
            open_orders: book.open_order_count(),
        })
    }

    /// Mid price used for admission price-deviation checks.
    pub fn reference_price(&self, pair: &TradingPair) -> Option<U256> {
        let book_ref = self.existing_book(pair)?;
        let book = book_ref.lock().unwrap();
        book.reference_price()
    }

    /// Evicts every live order whose deadline has passed. Runs from the maintenance loop at
    /// least once per second.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> Vec<SweepOutcome> {
        let books: Vec<Arc<Mutex<PairBook>>> =
            self.books.read().unwrap().values().cloned().collect();
        let mut outcomes = Vec::new();
        for book_ref in books {
            let mut book = book_ref.lock().unwrap();
            let expired = book.expired_order_ids(now);
            if expired.is_empty() {
                continue;
            }
            let mut cancelled = Vec::new();
            for id in expired {
                if let Some(mut order) = book.remove(id) {
                    order.metadata.status = OrderStatus::Cancelled;
                    order.metadata.updated_at = now;
                    cancelled.push(order);
                }
            }
            outcomes.push(SweepOutcome {
                pair: book.pair().clone(),
                cancelled,
                snapshot: book.snapshot(DEPTH_UPDATE_LEVELS),
            });
        }
        outcomes
    }

    fn match_and_place(
        &self,
        book: &mut PairBook,
        taker: &mut Order,
        now: DateTime<Utc>,
        out: &mut Outputs,
    ) {
        if self.settings.auto_matching {
            self.match_against_book(book, taker, now, out);
        }
        if taker.remaining_amount().is_zero() {
            return;
        }
        match taker.creation.kind {
            OrderKind::Market => {
                // Market orders never rest; the unfilled remainder is cancelled.
                taker.metadata.status = OrderStatus::Cancelled;
                taker.metadata.updated_at = now;
            }
            _ => {
                book.insert_resting(taker.clone());
            }
        }
    }

    fn match_against_book(
        &self,
        book: &mut PairBook,
        taker: &mut Order,
        now: DateTime<Utc>,
        out: &mut Outputs,
    ) {
        let opposing = taker.creation.side.opposite();
        let is_market = taker.creation.kind == OrderKind::Market;
        let mut first_price: Option<U256> = None;

        while !taker.remaining_amount().is_zero() {
            let (best_price, maker_id) = match book.peek_best(opposing) {
                Some(best) => best,
                None => break,
            };
            if !is_market {
                let crosses = match taker.creation.side {
                    Side::Buy => taker.creation.price >= best_price,
                    Side::Sell => taker.creation.price <= best_price,
                };
                if !crosses {
                    break;
                }
            } else if let (Some(cap), Some(first)) = (self.settings.max_slippage_bps, first_price)
            {
                if deviation_exceeds(best_price, first, cap) {
                    break;
                }
            }

            // Unwrap: peek_best returned the id out of this book under the same lock.
            let maker = book.order(maker_id).unwrap();
            if maker.is_expired_at(now) {
                self.evict(book, maker_id, now, out);
                continue;
            }
            if self.settings.self_trade_prevention
                && maker.creation.user_address == taker.creation.user_address
            {
                self.evict(book, maker_id, now, out);
                continue;
            }

            let maker_remaining = maker.remaining_amount();
            let match_amount = taker.remaining_amount().min(maker_remaining);
            // The match always prints at the resting order's price; improvement goes to the
            // taker.
            let price = maker.creation.price;
            first_price.get_or_insert(price);

            if match_amount == maker_remaining {
                // Remove before advancing the fill counter so the level aggregate shrinks by the
                // maker's pre-fill remainder.
                let mut filled = book.remove(maker_id).unwrap();
                filled.metadata.filled_amount = filled.creation.amount;
                filled.metadata.status = OrderStatus::Filled;
                filled.metadata.updated_at = now;
                out.maker_updates.push(filled);
            } else {
                book.reduce_resting(maker_id, match_amount);
                let maker = book.order_mut(maker_id).unwrap();
                maker.metadata.filled_amount += match_amount;
                maker.metadata.status = OrderStatus::PartiallyFilled;
                maker.metadata.updated_at = now;
                out.maker_updates.push(maker.clone());
            }

            taker.metadata.filled_amount += match_amount;
            taker.metadata.status = if taker.remaining_amount().is_zero() {
                OrderStatus::Filled
            } else {
                OrderStatus::PartiallyFilled
            };
            taker.metadata.updated_at = now;

            out.fills.push(Fill {
                id: self.next_fill_id(),
                taker_order_id: taker.metadata.id,
                maker_order_id: maker_id,
                trading_pair: taker.creation.trading_pair.clone(),
                price,
                amount: match_amount,
                taker_side: taker.creation.side,
                created_at: now,
                settlement_tx_hash: None,
            });
            book.set_last_price(price);
        }
    }

    /// Drains fired stop orders and feeds them back through the match path until no trade print
    /// activates another trigger.
    fn run_triggers(&self, book: &mut PairBook, now: DateTime<Utc>, out: &mut Outputs) {
        loop {
            let triggered = book.take_triggered();
            if triggered.is_empty() {
                return;
            }
            for mut order in triggered {
                tracing::debug!(id = %order.metadata.id, "stop order triggered");
                self.match_and_place(book, &mut order, now, out);
                out.maker_updates.push(order);
            }
        }
    }

    fn evict(&self, book: &mut PairBook, id: OrderId, now: DateTime<Utc>, out: &mut Outputs) {
        if let Some(mut order) = book.remove(id) {
            order.metadata.status = OrderStatus::Cancelled;
            order.metadata.updated_at = now;
            out.cancelled.push(order);
        }
    }
}

#[derive(Debug, Default)]
struct Outputs {
    fills: Vec<Fill>,
    maker_updates: Vec<Order>,
    cancelled: Vec<Order>,
}

fn latest_state(out: &Outputs, id: OrderId) -> Option<Order> {
    out.maker_updates
        .iter()
        .rev()
        .find(|order| order.metadata.id == id)
        .cloned()
}

/// Whether `price` deviates from `reference` by more than `cap` basis points.
fn deviation_exceeds(price: U256, reference: U256, cap: u32) -> bool {
    let diff = if price > reference {
        price - reference
    } else {
        reference - price
    };
    diff.full_mul(U256::from(10_000u64)) > reference.full_mul(U256::from(cap))
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::order::OrderBuilder;

    fn pair() -> TradingPair {
        "WETH-USDC".parse().unwrap()
    }

    fn engine() -> MatchingEngine {
        MatchingEngine::new(EngineSettings::default())
    }

    fn order(
        engine: &MatchingEngine,
        side: Side,
        kind: OrderKind,
        price: u64,
        amount: u64,
    ) -> Order {
        OrderBuilder::default()
            .with_id(engine.next_order_id())
            .with_trading_pair(pair())
            .with_side(side)
            .with_kind(kind)
            .with_price(U256::from(price))
            .with_amount(U256::from(amount))
            .with_status(OrderStatus::Open)
            .with_created_at(Utc::now())
            .build()
    }

    #[test]
    fn simple_match_at_maker_price() {
        let engine = engine();
        let resting = engine.submit(order(&engine, Side::Buy, OrderKind::Limit, 2000, 10));
        assert!(resting.fills.is_empty());
        assert_eq!(resting.taker.metadata.status, OrderStatus::Open);

        let crossing = engine.submit(order(&engine, Side::Sell, OrderKind::Limit, 1999, 10));
        assert_eq!(crossing.fills.len(), 1);
        let fill = &crossing.fills[0];
        // Maker price, not taker price.
        assert_eq!(fill.price, U256::from(2000));
        assert_eq!(fill.amount, U256::from(10));
        assert_eq!(fill.taker_side, Side::Sell);
        assert_eq!(crossing.taker.metadata.status, OrderStatus::Filled);
        assert_eq!(crossing.maker_updates.len(), 1);
        assert_eq!(crossing.maker_updates[0].metadata.status, OrderStatus::Filled);

        let snapshot = engine.snapshot(&pair(), 20).unwrap();
        assert!(snapshot.bids.is_empty());
        assert!(snapshot.asks.is_empty());
    }

    #[test]
    fn partial_fill_respects_time_priority() {
        let engine = engine();
        let first = order(&engine, Side::Sell, OrderKind::Limit, 2000, 2);
        let first_id = first.metadata.id;
        engine.submit(first);
        let second = order(&engine, Side::Sell, OrderKind::Limit, 2000, 3);
        let second_id = second.metadata.id;
        engine.submit(second);

        let outcome = engine.submit(order(&engine, Side::Buy, OrderKind::Limit, 2100, 4));
        assert_eq!(outcome.fills.len(), 2);
        assert_eq!(outcome.fills[0].maker_order_id, first_id);
        assert_eq!(outcome.fills[0].amount, U256::from(2));
        assert_eq!(outcome.fills[1].maker_order_id, second_id);
        assert_eq!(outcome.fills[1].amount, U256::from(2));
        assert_eq!(outcome.taker.metadata.status, OrderStatus::Filled);

        let partially_filled = outcome
            .maker_updates
            .iter()
            .find(|order| order.metadata.id == second_id)
            .unwrap();
        assert_eq!(partially_filled.metadata.status, OrderStatus::PartiallyFilled);
        assert_eq!(partially_filled.remaining_amount(), U256::from(1));
    }

    #[test]
    fn price_priority_beats_time_priority() {
        let engine = engine();
        engine.submit(order(&engine, Side::Sell, OrderKind::Limit, 2010, 1));
        let better = order(&engine, Side::Sell, OrderKind::Limit, 2000, 1);
        let better_id = better.metadata.id;
        engine.submit(better);

        let outcome = engine.submit(order(&engine, Side::Buy, OrderKind::Limit, 2020, 1));
        assert_eq!(outcome.fills.len(), 1);
        assert_eq!(outcome.fills[0].maker_order_id, better_id);
        assert_eq!(outcome.fills[0].price, U256::from(2000));
    }

    #[test]
    fn non_crossing_limit_rests() {
        let engine = engine();
        engine.submit(order(&engine, Side::Buy, OrderKind::Limit, 1900, 1));
        let outcome = engine.submit(order(&engine, Side::Sell, OrderKind::Limit, 2000, 1));
        assert!(outcome.fills.is_empty());
        assert_eq!(outcome.taker.metadata.status, OrderStatus::Open);

        let snapshot = engine.snapshot(&pair(), 20).unwrap();
        assert_eq!(snapshot.bids.len(), 1);
        assert_eq!(snapshot.asks.len(), 1);
        assert_eq!(snapshot.bids[0].order_count, 1);
        assert_eq!(snapshot.asks[0].order_count, 1);
        // No crossed book at rest.
        assert!(snapshot.bids[0].price < snapshot.asks[0].price);
    }

    #[test]
    fn market_order_without_liquidity_is_cancelled() {
        let engine = engine();
        let outcome = engine.submit(order(&engine, Side::Buy, OrderKind::Market, 0, 1));
        assert!(outcome.fills.is_empty());
        assert_eq!(outcome.taker.metadata.status, OrderStatus::Cancelled);
        assert!(engine.snapshot(&pair(), 20).unwrap().bids.is_empty());
    }

    #[test]
    fn market_order_consumes_multiple_levels() {
        let engine = engine();
        engine.submit(order(&engine, Side::Sell, OrderKind::Limit, 2000, 1));
        engine.submit(order(&engine, Side::Sell, OrderKind::Limit, 2010, 1));
        let outcome = engine.submit(order(&engine, Side::Buy, OrderKind::Market, 0, 2));
        assert_eq!(outcome.fills.len(), 2);
        assert_eq!(outcome.fills[0].price, U256::from(2000));
        assert_eq!(outcome.fills[1].price, U256::from(2010));
        assert_eq!(outcome.taker.metadata.status, OrderStatus::Filled);
    }

    #[test]
    fn partially_filled_market_remainder_is_cancelled() {
        let engine = engine();
        engine.submit(order(&engine, Side::Sell, OrderKind::Limit, 2000, 1));
        let outcome = engine.submit(order(&engine, Side::Buy, OrderKind::Market, 0, 3));
        assert_eq!(outcome.fills.len(), 1);
        assert_eq!(outcome.taker.metadata.status, OrderStatus::Cancelled);
        assert_eq!(outcome.taker.metadata.filled_amount, U256::from(1));
    }

    #[test]
    fn slippage_cap_bounds_market_order() {
        let engine = MatchingEngine::new(EngineSettings {
            max_slippage_bps: Some(100),
            ..Default::default()
        });
        engine.submit(order(&engine, Side::Sell, OrderKind::Limit, 2000, 1));
        // 2015 deviates from the first print by 75 bps, 2100 by 500.
        engine.submit(order(&engine, Side::Sell, OrderKind::Limit, 2015, 1));
        engine.submit(order(&engine, Side::Sell, OrderKind::Limit, 2100, 1));

        let outcome = engine.submit(order(&engine, Side::Buy, OrderKind::Market, 0, 3));
        assert_eq!(outcome.fills.len(), 2);
        assert_eq!(outcome.taker.metadata.filled_amount, U256::from(2));
        assert_eq!(outcome.taker.metadata.status, OrderStatus::Cancelled);
    }

    #[test]
    fn expired_maker_is_evicted_not_matched() {
        let engine = engine();
        let mut stale = order(&engine, Side::Sell, OrderKind::Limit, 2000, 1);
        stale.creation.expires_at = 1_600_000_000;
        let stale_id = stale.metadata.id;
        engine.submit(stale);
        engine.submit(order(&engine, Side::Sell, OrderKind::Limit, 2000, 1));

        let outcome = engine.submit(order(&engine, Side::Buy, OrderKind::Limit, 2000, 1));
        assert_eq!(outcome.fills.len(), 1);
        assert_ne!(outcome.fills[0].maker_order_id, stale_id);
        assert_eq!(outcome.cancelled.len(), 1);
        assert_eq!(outcome.cancelled[0].metadata.id, stale_id);
    }

    #[test]
    fn self_trade_prevention_cancels_resting_order() {
        let engine = MatchingEngine::new(EngineSettings {
            self_trade_prevention: true,
            ..Default::default()
        });
        let user = primitive_types::H160::from_low_u64_be(7);
        let mut maker = order(&engine, Side::Sell, OrderKind::Limit, 2000, 1);
        maker.creation.user_address = user;
        let maker_id = maker.metadata.id;
        engine.submit(maker);

        let mut taker = order(&engine, Side::Buy, OrderKind::Limit, 2000, 1);
        taker.creation.user_address = user;
        let outcome = engine.submit(taker);
        assert!(outcome.fills.is_empty());
        assert_eq!(outcome.cancelled.len(), 1);
        assert_eq!(outcome.cancelled[0].metadata.id, maker_id);
        // The taker rests on the now empty opposite side.
        assert_eq!(outcome.taker.metadata.status, OrderStatus::Open);
    }

    #[test]
    fn self_trading_allowed_by_default() {
        let engine = engine();
        let user = primitive_types::H160::from_low_u64_be(7);
        let mut maker = order(&engine, Side::Sell, OrderKind::Limit, 2000, 1);
        maker.creation.user_address = user;
        engine.submit(maker);
        let mut taker = order(&engine, Side::Buy, OrderKind::Limit, 2000, 1);
        taker.creation.user_address = user;
        let outcome = engine.submit(taker);
        assert_eq!(outcome.fills.len(), 1);
    }

    #[test]
    fn cancel_removes_from_book() {
        let engine = engine();
        let resting = order(&engine, Side::Buy, OrderKind::Limit, 1900, 1);
        let id = resting.metadata.id;
        engine.submit(resting);

        let outcome = engine.cancel(&pair(), id).unwrap();
        assert_eq!(outcome.order.metadata.status, OrderStatus::Cancelled);
        assert!(outcome.snapshot.bids.is_empty());
        // Idempotent: the engine no longer knows the order.
        assert!(engine.cancel(&pair(), id).is_none());
    }

    #[test]
    fn stop_loss_fires_once_trigger_price_prints() {
        let engine = engine();
        let stop = order(&engine, Side::Sell, OrderKind::StopLoss, 1950, 1);
        let stop_id = stop.metadata.id;
        let outcome = engine.submit(stop);
        assert!(outcome.fills.is_empty());
        // Parked on the trigger list, not in the book.
        assert!(engine.snapshot(&pair(), 20).unwrap().asks.is_empty());

        // A print at 1950 fires the trigger and the stop consumes the rest of the bid level.
        engine.submit(order(&engine, Side::Buy, OrderKind::Limit, 1950, 2));
        let outcome = engine.submit(order(&engine, Side::Sell, OrderKind::Limit, 1950, 1));
        assert_eq!(outcome.fills.len(), 2);
        assert_eq!(outcome.fills[1].taker_order_id, stop_id);
        assert_eq!(outcome.fills[1].price, U256::from(1950));
        let activated = outcome
            .maker_updates
            .iter()
            .find(|order| order.metadata.id == stop_id)
            .unwrap();
        assert_eq!(activated.metadata.status, OrderStatus::Filled);
    }

    #[test]
    fn expiry_sweep_cancels_and_reports() {
        let engine = engine();
        let mut stale = order(&engine, Side::Buy, OrderKind::Limit, 1900, 1);
        stale.creation.expires_at = 1_600_000_000;
        let stale_id = stale.metadata.id;
        engine.submit(stale);
        engine.submit(order(&engine, Side::Buy, OrderKind::Limit, 1800, 1));

        let outcomes = engine.sweep_expired(Utc::now());
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].cancelled.len(), 1);
        assert_eq!(outcomes[0].cancelled[0].metadata.id, stale_id);
        assert_eq!(outcomes[0].snapshot.bids.len(), 1);
        assert!(engine.sweep_expired(Utc::now()).is_empty());
    }

    #[test]
    fn auto_matching_disabled_rests_crossing_orders() {
        let engine = MatchingEngine::new(EngineSettings {
            auto_matching: false,
            ..Default::default()
        });
        engine.submit(order(&engine, Side::Buy, OrderKind::Limit, 2000, 1));
        let outcome = engine.submit(order(&engine, Side::Sell, OrderKind::Limit, 1999, 1));
        assert!(outcome.fills.is_empty());
        assert_eq!(outcome.taker.metadata.status, OrderStatus::Open);
        let snapshot = engine.snapshot(&pair(), 20).unwrap();
        assert_eq!(snapshot.bids.len(), 1);
        assert_eq!(snapshot.asks.len(), 1);
    }

    #[test]
    fn fill_amount_never_exceeds_either_remainder() {
        let engine = engine();
        engine.submit(order(&engine, Side::Sell, OrderKind::Limit, 2000, 5));
        let outcome = engine.submit(order(&engine, Side::Buy, OrderKind::Limit, 2000, 3));
        assert_eq!(outcome.fills.len(), 1);
        assert_eq!(outcome.fills[0].amount, U256::from(3));
        let maker = &outcome.maker_updates[0];
        assert_eq!(maker.metadata.filled_amount, U256::from(3));
        assert_eq!(maker.remaining_amount(), U256::from(2));
        // Aggregate shrank with the fill.
        let snapshot = engine.snapshot(&pair(), 20).unwrap();
        assert_eq!(snapshot.asks[0].aggregate_amount, U256::from(2));
    }
}
