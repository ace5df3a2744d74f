//! Aggregated order book views served to clients and streamed to depth subscribers.

use crate::{u256_decimal, TradingPair};
use chrono::{DateTime, Utc};
use primitive_types::U256;
use serde::{Deserialize, Serialize};

/// One aggregated price level of a snapshot.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceLevelView {
    #[serde(with = "u256_decimal")]
    pub price: U256,
    #[serde(with = "u256_decimal")]
    pub aggregate_amount: U256,
    pub order_count: usize,
}

/// Depth snapshot of one pair. Bids are in descending, asks in ascending price order.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderBookSnapshot {
    pub trading_pair: TradingPair,
    pub bids: Vec<PriceLevelView>,
    pub asks: Vec<PriceLevelView>,
    pub timestamp: DateTime<Utc>,
}

/// Per pair statistics as served by the stats endpoint.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairStats {
    pub trading_pair: TradingPair,
    #[serde(default, with = "option_u256_decimal")]
    pub best_bid: Option<U256>,
    #[serde(default, with = "option_u256_decimal")]
    pub best_ask: Option<U256>,
    #[serde(default, with = "option_u256_decimal")]
    pub last_price: Option<U256>,
    #[serde(with = "u256_decimal")]
    pub volume_24h: U256,
    pub open_orders: usize,
    pub trade_count: usize,
    pub timestamp: DateTime<Utc>,
}

mod option_u256_decimal {
    use super::*;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<U256>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(value) => crate::u256_decimal::serialize(value, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<U256>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<String>::deserialize(deserializer)?;
        value
            .map(|s| U256::from_dec_str(&s).map_err(serde::de::Error::custom))
            .transpose()
    }
}
