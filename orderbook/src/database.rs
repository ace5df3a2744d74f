//! Order and fill storage behind trait seams so the in-memory store can be swapped for a
//! persistent backend without touching the service. Reads and writes happen outside the matching
//! engine's per pair critical section.

use anyhow::Result;
use chrono::{DateTime, Utc};
use model::{
    order::{Order, OrderId, OrderStatus},
    trade::{Fill, FillId},
    TradingPair,
};
use primitive_types::{H160, H256, U256};
use std::{collections::HashMap, sync::RwLock};
use thiserror::Error;

#[derive(Clone, Debug, Default)]
pub struct OrderFilter {
    pub user_address: Option<H160>,
    pub trading_pair: Option<TradingPair>,
    pub status: Option<OrderStatus>,
    pub limit: Option<usize>,
    pub offset: usize,
}

#[derive(Clone, Debug, Default)]
pub struct TradeFilter {
    pub trading_pair: Option<TradingPair>,
    pub limit: Option<usize>,
}

#[derive(Debug, Error, Eq, PartialEq)]
pub enum InsertionError {
    #[error("record already exists")]
    DuplicatedRecord,
}

#[async_trait::async_trait]
pub trait OrderStoring: Send + Sync {
    async fn insert_order(&self, order: &Order) -> Result<(), InsertionError>;
    async fn update_order(&self, order: &Order) -> Result<()>;
    async fn single_order(&self, id: OrderId) -> Result<Option<Order>>;
    async fn order_by_hash(&self, hash: H256) -> Result<Option<Order>>;
    /// Orders matching the filter, newest first, together with the pre-pagination total.
    async fn orders(&self, filter: &OrderFilter) -> Result<(Vec<Order>, usize)>;
    async fn open_order_count(&self, user: H160) -> Result<usize>;
}

#[async_trait::async_trait]
pub trait TradeRetrieving: Send + Sync {
    async fn insert_fill(&self, fill: &Fill) -> Result<()>;
    /// Fills matching the filter, newest first, together with the pre-pagination total.
    async fn trades(&self, filter: &TradeFilter) -> Result<(Vec<Fill>, usize)>;
    /// Base token volume since the given time and the all-time fill count of a pair.
    async fn volume_since(
        &self,
        pair: &TradingPair,
        since: DateTime<Utc>,
    ) -> Result<(U256, usize)>;
    async fn mark_fills_settled(&self, fill_ids: &[FillId], tx_hash: H256) -> Result<()>;
}

#[derive(Default)]
struct Storage {
    orders: HashMap<OrderId, Order>,
    orders_by_hash: HashMap<H256, OrderId>,
    fills: Vec<Fill>,
    fill_positions: HashMap<FillId, usize>,
}

/// The in-memory store used in production; anything admitted lives here until a retention policy
/// outside this service prunes it.
#[derive(Default)]
pub struct Database {
    storage: RwLock<Storage>,
}

impl Database {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl OrderStoring for Database {
    async fn insert_order(&self, order: &Order) -> Result<(), InsertionError> {
        let mut storage = self.storage.write().unwrap();
        if storage.orders_by_hash.contains_key(&order.metadata.hash) {
            return Err(InsertionError::DuplicatedRecord);
        }
        storage
            .orders_by_hash
            .insert(order.metadata.hash, order.metadata.id);
        storage.orders.insert(order.metadata.id, order.clone());
        Ok(())
    }

    async fn update_order(&self, order: &Order) -> Result<()> {
        let mut storage = self.storage.write().unwrap();
        storage.orders.insert(order.metadata.id, order.clone());
        Ok(())
    }

    async fn single_order(&self, id: OrderId) -> Result<Option<Order>> {
        Ok(self.storage.read().unwrap().orders.get(&id).cloned())
    }

    async fn order_by_hash(&self, hash: H256) -> Result<Option<Order>> {
        let storage = self.storage.read().unwrap();
        Ok(storage
            .orders_by_hash
            .get(&hash)
            .and_then(|id| storage.orders.get(id))
            .cloned())
    }

    async fn orders(&self, filter: &OrderFilter) -> Result<(Vec<Order>, usize)> {
        let storage = self.storage.read().unwrap();
        let mut matching: Vec<Order> = storage
            .orders
            .values()
            .filter(|order| {
                filter
                    .user_address
                    .map(|user| order.creation.user_address == user)
                    .unwrap_or(true)
                    && filter
                        .trading_pair
                        .as_ref()
                        .map(|pair| order.creation.trading_pair == *pair)
                        .unwrap_or(true)
                    && filter
                        .status
                        .map(|status| order.metadata.status == status)
                        .unwrap_or(true)
            })
            .cloned()
            .collect();
        matching.sort_by(|a, b| {
            (b.metadata.created_at, b.metadata.id).cmp(&(a.metadata.created_at, a.metadata.id))
        });
        let total = matching.len();
        let page = matching
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit.unwrap_or(usize::MAX))
            .collect();
        Ok((page, total))
    }

    async fn open_order_count(&self, user: H160) -> Result<usize> {
        let storage = self.storage.read().unwrap();
        Ok(storage
            .orders
            .values()
            .filter(|order| {
                order.creation.user_address == user && !order.metadata.status.is_terminal()
            })
            .count())
    }
}

#[async_trait::async_trait]
impl TradeRetrieving for Database {
    async fn insert_fill(&self, fill: &Fill) -> Result<()> {
        let mut storage = self.storage.write().unwrap();
        let position = storage.fills.len();
        storage.fill_positions.insert(fill.id, position);
        storage.fills.push(fill.clone());
        Ok(())
    }

    async fn trades(&self, filter: &TradeFilter) -> Result<(Vec<Fill>, usize)> {
        let storage = self.storage.read().unwrap();
        let matching: Vec<&Fill> = storage
            .fills
            .iter()
            .filter(|fill| {
                filter
                    .trading_pair
                    .as_ref()
                    .map(|pair| fill.trading_pair == *pair)
                    .unwrap_or(true)
            })
            .collect();
        let total = matching.len();
        let page = matching
            .into_iter()
            .rev()
            .take(filter.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();
        Ok((page, total))
    }

    async fn volume_since(
        &self,
        pair: &TradingPair,
        since: DateTime<Utc>,
    ) -> Result<(U256, usize)> {
        let storage = self.storage.read().unwrap();
        let mut volume = U256::zero();
        let mut count = 0;
        for fill in storage
            .fills
            .iter()
            .filter(|fill| fill.trading_pair == *pair)
        {
            count += 1;
            if fill.created_at >= since {
                volume += fill.amount;
            }
        }
        Ok((volume, count))
    }

    async fn mark_fills_settled(&self, fill_ids: &[FillId], tx_hash: H256) -> Result<()> {
        let mut storage = self.storage.write().unwrap();
        for id in fill_ids {
            if let Some(position) = storage.fill_positions.get(id).copied() {
                storage.fills[position].settlement_tx_hash =
                    Some(model::trade::SettlementTxHash(tx_hash));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::order::OrderBuilder;

    fn order(id: u64, hash_byte: u8) -> Order {
        let mut order = OrderBuilder::default().with_id(OrderId(id)).build();
        order.metadata.hash = H256::repeat_byte(hash_byte);
        order
    }

    #[tokio::test]
    async fn duplicate_hash_is_rejected() {
        let db = Database::new();
        db.insert_order(&order(1, 0x11)).await.unwrap();
        assert_eq!(
            db.insert_order(&order(2, 0x11)).await,
            Err(InsertionError::DuplicatedRecord)
        );
        assert_eq!(
            db.order_by_hash(H256::repeat_byte(0x11))
                .await
                .unwrap()
                .unwrap()
                .metadata
                .id,
            OrderId(1)
        );
    }

    #[tokio::test]
    async fn filters_and_paginates_orders() {
        let db = Database::new();
        let user = H160::from_low_u64_be(7);
        for id in 1..=5u64 {
            let mut order = order(id, id as u8);
            order.creation.user_address = user;
            order.metadata.created_at = Utc::now();
            db.insert_order(&order).await.unwrap();
        }
        let (page, total) = db
            .orders(&OrderFilter {
                user_address: Some(user),
                limit: Some(2),
                offset: 1,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(total, 5);
        assert_eq!(page.len(), 2);

        let (none, total) = db
            .orders(&OrderFilter {
                user_address: Some(H160::from_low_u64_be(8)),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(total, 0);
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn open_order_count_ignores_terminal() {
        let db = Database::new();
        let user = H160::from_low_u64_be(7);
        let mut open = order(1, 1);
        open.creation.user_address = user;
        open.metadata.status = OrderStatus::Open;
        db.insert_order(&open).await.unwrap();
        let mut filled = order(2, 2);
        filled.creation.user_address = user;
        filled.metadata.status = OrderStatus::Filled;
        db.insert_order(&filled).await.unwrap();
        assert_eq!(db.open_order_count(user).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn trades_newest_first_with_limit() {
        let db = Database::new();
        let pair: TradingPair = "WETH-USDC".parse().unwrap();
        for id in 1..=3u64 {
            db.insert_fill(&Fill {
                id: FillId(id),
                trading_pair: pair.clone(),
                created_at: Utc::now(),
                ..Default::default()
            })
            .await
            .unwrap();
        }
        let (page, total) = db
            .trades(&TradeFilter {
                trading_pair: Some(pair),
                limit: Some(2),
            })
            .await
            .unwrap();
        assert_eq!(total, 3);
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].id, FillId(3));
    }

    #[tokio::test]
    async fn marks_fills_settled() {
        let db = Database::new();
        db.insert_fill(&Fill {
            id: FillId(1),
            ..Default::default()
        })
        .await
        .unwrap();
        let tx_hash = H256::repeat_byte(0xab);
        db.mark_fills_settled(&[FillId(1)], tx_hash).await.unwrap();
        let (fills, _) = db.trades(&TradeFilter::default()).await.unwrap();
        assert_eq!(
            fills[0].settlement_tx_hash,
            Some(model::trade::SettlementTxHash(tx_hash))
        );
    }
}
