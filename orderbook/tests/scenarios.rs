//! End to end exercises of the admission and matching pipeline through the service facade,
//! covering the canonical limit/market scenarios and the fund accounting around them.

use model::{
    order::{OrderCreation, OrderKind, OrderStatus, Side},
    DomainSeparator, TradingPair,
};
use orderbook::{
    account_balances::BalanceBook,
    database::Database,
    events::EventHub,
    matching::{EngineSettings, MatchingEngine},
    orderbook::{AddOrderResult, Orderbook, OrderCancellationResult},
    risk::{RiskChecker, RiskConfig},
};
use primitive_types::{H160, U256};
use secp256k1::SecretKey;
use settlement::SettlementQueue;
use std::sync::Arc;
use web3::signing::{Key, SecretKeyRef};

const PRICE_SCALE: u64 = model::order::PRICE_SCALE;

fn domain() -> DomainSeparator {
    DomainSeparator::new(1, H160::from_low_u64_be(0x42))
}

fn pair() -> TradingPair {
    "WETH-USDC".parse().unwrap()
}

fn base_token() -> H160 {
    H160::from_low_u64_be(100)
}

fn quote_token() -> H160 {
    H160::from_low_u64_be(101)
}

fn key(seed: u8) -> SecretKey {
    SecretKey::from_slice(&[seed; 32]).unwrap()
}

fn address(key: &SecretKey) -> H160 {
    SecretKeyRef::new(key).address()
}

/// Amounts in whole base units, prices in quote wei per base unit.
fn base_units(units: u64) -> U256 {
    U256::from(units) * U256::from(PRICE_SCALE)
}

struct Exchange {
    orderbook: Orderbook,
    settlement: Arc<SettlementQueue>,
    nonces: std::cell::Cell<u64>,
}

impl Exchange {
    fn new() -> Self {
        let settlement = Arc::new(SettlementQueue::new());
        let orderbook = Orderbook::new(
            domain(),
            Arc::new(Database::new()),
            Arc::new(BalanceBook::new()),
            RiskChecker::new(RiskConfig::default()),
            Arc::new(MatchingEngine::new(EngineSettings::default())),
            Arc::new(EventHub::new()),
            settlement.clone(),
            true,
        );
        Self {
            orderbook,
            settlement,
            nonces: std::cell::Cell::new(0),
        }
    }

    fn fund(&self, user: &SecretKey, base_amount: U256, quote_amount: U256) {
        self.orderbook
            .set_balance(address(user), base_token(), base_amount)
            .unwrap();
        self.orderbook
            .set_balance(address(user), quote_token(), quote_amount)
            .unwrap();
    }

    fn creation(
        &self,
        user: &SecretKey,
        side: Side,
        kind: OrderKind,
        price: u64,
        amount: U256,
    ) -> OrderCreation {
        self.nonces.set(self.nonces.get() + 1);
        let creation = OrderCreation {
            user_address: address(user),
            trading_pair: pair(),
            base_token: base_token(),
            quote_token: quote_token(),
            side,
            kind,
            price: U256::from(price),
            amount,
            expires_at: 0,
            nonce: U256::from(self.nonces.get()),
            signature: Default::default(),
        };
        creation.sign_with(&domain(), SecretKeyRef::new(user))
    }

    async fn place(
        &self,
        user: &SecretKey,
        side: Side,
        kind: OrderKind,
        price: u64,
        amount: U256,
    ) -> AddOrderResult {
        self.orderbook
            .add_order(self.creation(user, side, kind, price, amount))
            .await
            .unwrap()
    }
}

fn added(result: AddOrderResult) -> (model::order::Order, Vec<model::trade::Fill>) {
    match result {
        AddOrderResult::Added { order, fills } => (order, fills),
        other => panic!("expected Added, got {:?}", other),
    }
}

#[tokio::test]
async fn simple_match_fills_both_orders_at_maker_price() {
    let exchange = Exchange::new();
    let buyer = key(1);
    let seller = key(2);
    exchange.fund(&buyer, base_units(0), U256::from(10_000));
    exchange.fund(&seller, base_units(1), U256::zero());

    let (maker, fills) = added(
        exchange
            .place(&buyer, Side::Buy, OrderKind::Limit, 2000, base_units(1))
            .await,
    );
    assert!(fills.is_empty());
    assert_eq!(maker.metadata.status, OrderStatus::Open);

    let (taker, fills) = added(
        exchange
            .place(&seller, Side::Sell, OrderKind::Limit, 1999, base_units(1))
            .await,
    );
    assert_eq!(fills.len(), 1);
    assert_eq!(fills[0].price, U256::from(2000));
    assert_eq!(fills[0].amount, base_units(1));
    assert_eq!(taker.metadata.status, OrderStatus::Filled);

    let maker = exchange
        .orderbook
        .get_order(maker.metadata.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(maker.metadata.status, OrderStatus::Filled);

    let snapshot = exchange.orderbook.get_order_book(&pair(), 20).unwrap();
    assert!(snapshot.bids.is_empty());
    assert!(snapshot.asks.is_empty());

    // The fill reached the settlement queue.
    assert_eq!(exchange.settlement.len(), 1);
}

#[tokio::test]
async fn partial_fills_respect_time_priority() {
    let exchange = Exchange::new();
    let seller_one = key(1);
    let seller_two = key(2);
    let buyer = key(3);
    exchange.fund(&seller_one, base_units(2), U256::zero());
    exchange.fund(&seller_two, base_units(3), U256::zero());
    exchange.fund(&buyer, base_units(0), U256::from(1_000_000));

    let (first, _) = added(
        exchange
            .place(&seller_one, Side::Sell, OrderKind::Limit, 2000, base_units(2))
            .await,
    );
    let (second, _) = added(
        exchange
            .place(&seller_two, Side::Sell, OrderKind::Limit, 2000, base_units(3))
            .await,
    );

    let (taker, fills) = added(
        exchange
            .place(&buyer, Side::Buy, OrderKind::Limit, 2100, base_units(4))
            .await,
    );
    assert_eq!(fills.len(), 2);
    assert_eq!(fills[0].maker_order_id, first.metadata.id);
    assert_eq!(fills[0].amount, base_units(2));
    assert_eq!(fills[0].price, U256::from(2000));
    assert_eq!(fills[1].maker_order_id, second.metadata.id);
    assert_eq!(fills[1].amount, base_units(2));
    assert_eq!(taker.metadata.status, OrderStatus::Filled);

    let second = exchange
        .orderbook
        .get_order(second.metadata.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second.metadata.status, OrderStatus::PartiallyFilled);
    assert_eq!(second.remaining_amount(), base_units(1));
}

#[tokio::test]
async fn non_crossing_orders_rest_without_fills() {
    let exchange = Exchange::new();
    let buyer = key(1);
    let seller = key(2);
    exchange.fund(&buyer, base_units(0), U256::from(10_000));
    exchange.fund(&seller, base_units(1), U256::zero());

    let (_, fills) = added(
        exchange
            .place(&buyer, Side::Buy, OrderKind::Limit, 1900, base_units(1))
            .await,
    );
    assert!(fills.is_empty());
    let (_, fills) = added(
        exchange
            .place(&seller, Side::Sell, OrderKind::Limit, 2000, base_units(1))
            .await,
    );
    assert!(fills.is_empty());

    let snapshot = exchange.orderbook.get_order_book(&pair(), 20).unwrap();
    assert_eq!(snapshot.bids.len(), 1);
    assert_eq!(snapshot.bids[0].price, U256::from(1900));
    assert_eq!(snapshot.bids[0].order_count, 1);
    assert_eq!(snapshot.asks.len(), 1);
    assert_eq!(snapshot.asks[0].price, U256::from(2000));
    assert_eq!(snapshot.asks[0].order_count, 1);
    // The book does not cross at rest.
    assert!(snapshot.bids[0].price < snapshot.asks[0].price);
}

#[tokio::test]
async fn market_order_on_empty_book_is_cancelled() {
    let exchange = Exchange::new();
    let buyer = key(1);
    exchange.fund(&buyer, base_units(0), U256::from(10_000));

    let (order, fills) = added(
        exchange
            .place(&buyer, Side::Buy, OrderKind::Market, 0, base_units(1))
            .await,
    );
    assert!(fills.is_empty());
    assert_eq!(order.metadata.status, OrderStatus::Cancelled);
}

#[tokio::test]
async fn replayed_payload_is_rejected_and_state_unchanged() {
    let exchange = Exchange::new();
    let buyer = key(1);
    exchange.fund(&buyer, base_units(0), U256::from(10_000));

    let creation = exchange.creation(&buyer, Side::Buy, OrderKind::Limit, 2000, base_units(1));
    let (order, _) = added(exchange.orderbook.add_order(creation.clone()).await.unwrap());

    let result = exchange.orderbook.add_order(creation).await.unwrap();
    match result {
        AddOrderResult::DuplicatedOrder(id) => assert_eq!(id, order.metadata.id),
        other => panic!("expected DuplicatedOrder, got {:?}", other),
    }
    let snapshot = exchange.orderbook.get_order_book(&pair(), 20).unwrap();
    assert_eq!(snapshot.bids.len(), 1);
    assert_eq!(snapshot.bids[0].order_count, 1);
}

#[tokio::test]
async fn cancel_frees_locked_funds_for_reuse() {
    let exchange = Exchange::new();
    let buyer = key(1);
    exchange.fund(&buyer, base_units(0), U256::from(10_000));
    let user = address(&buyer);

    let (order, _) = added(
        exchange
            .place(&buyer, Side::Buy, OrderKind::Limit, 2000, base_units(1))
            .await,
    );
    let balance = exchange.orderbook.balances().get_balance(user, quote_token());
    assert_eq!(balance.locked, U256::from(2000));
    assert_eq!(balance.available(), U256::from(8000));

    let result = exchange
        .orderbook
        .cancel_order(order.metadata.id, user)
        .await
        .unwrap();
    assert!(matches!(result, OrderCancellationResult::Cancelled(_)));
    let balance = exchange.orderbook.balances().get_balance(user, quote_token());
    assert_eq!(balance.available(), U256::from(10_000));

    // The identical order under a fresh nonce is admitted again.
    let result = exchange
        .place(&buyer, Side::Buy, OrderKind::Limit, 2000, base_units(1))
        .await;
    assert!(matches!(result, AddOrderResult::Added { .. }));
}

#[tokio::test]
async fn price_improvement_goes_to_the_taker() {
    let exchange = Exchange::new();
    let buyer = key(1);
    let seller = key(2);
    exchange.fund(&buyer, base_units(0), U256::from(10_000));
    exchange.fund(&seller, base_units(1), U256::zero());

    // The ask rests at 1950; a buy willing to pay 2000 fills at 1950.
    added(
        exchange
            .place(&seller, Side::Sell, OrderKind::Limit, 1950, base_units(1))
            .await,
    );
    let (_, fills) = added(
        exchange
            .place(&buyer, Side::Buy, OrderKind::Limit, 2000, base_units(1))
            .await,
    );
    assert_eq!(fills.len(), 1);
    assert!(fills[0].price <= U256::from(2000));
    assert_eq!(fills[0].price, U256::from(1950));

    // The buyer paid the maker price, not their limit.
    let balance = exchange.orderbook.balances().get_balance(address(&buyer), quote_token());
    assert_eq!(balance.total, U256::from(10_000 - 1950));
}

#[tokio::test]
async fn snapshot_aggregates_match_resting_orders() {
    let exchange = Exchange::new();
    let seller = key(1);
    exchange.fund(&seller, base_units(10), U256::zero());

    for _ in 0..3 {
        added(
            exchange
                .place(&seller, Side::Sell, OrderKind::Limit, 2000, base_units(2))
                .await,
        );
    }
    let snapshot = exchange.orderbook.get_order_book(&pair(), 20).unwrap();
    assert_eq!(snapshot.asks.len(), 1);
    assert_eq!(snapshot.asks[0].order_count, 3);
    assert_eq!(snapshot.asks[0].aggregate_amount, base_units(6));
}

#[tokio::test]
async fn total_fill_volume_never_exceeds_order_amount() {
    let exchange = Exchange::new();
    let seller = key(1);
    let buyer = key(2);
    exchange.fund(&seller, base_units(5), U256::zero());
    exchange.fund(&buyer, base_units(0), U256::from(1_000_000));

    let (maker, _) = added(
        exchange
            .place(&seller, Side::Sell, OrderKind::Limit, 2000, base_units(5))
            .await,
    );
    let mut total = U256::zero();
    for _ in 0..3 {
        let (_, fills) = added(
            exchange
                .place(&buyer, Side::Buy, OrderKind::Limit, 2000, base_units(2))
                .await,
        );
        total = fills
            .iter()
            .filter(|fill| fill.maker_order_id == maker.metadata.id)
            .fold(total, |sum, fill| sum + fill.amount);
    }
    assert_eq!(total, base_units(5));
    let maker = exchange
        .orderbook
        .get_order(maker.metadata.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(maker.metadata.status, OrderStatus::Filled);
    assert_eq!(maker.metadata.filled_amount, maker.creation.amount);
}
