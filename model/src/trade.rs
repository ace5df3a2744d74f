//! Contains the fill type produced by the matching engine, with serialization as exposed by the
//! http api and the settlement batches.

use crate::{h256_hexadecimal, order::OrderId, order::Side, u256_decimal, TradingPair};
use chrono::{DateTime, Utc};
use primitive_types::{H256, U256};
use serde::{Deserialize, Serialize};

/// Engine assigned fill identifier.
#[derive(
    Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct FillId(pub u64);

/// An atomic match between one taker and one maker.
///
/// The price is always the maker's resting price so any price improvement accrues to the taker.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fill {
    pub id: FillId,
    pub taker_order_id: OrderId,
    pub maker_order_id: OrderId,
    pub trading_pair: TradingPair,
    #[serde(with = "u256_decimal")]
    pub price: U256,
    #[serde(with = "u256_decimal")]
    pub amount: U256,
    pub taker_side: Side,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settlement_tx_hash: Option<SettlementTxHash>,
}

/// Transaction hash wrapper so the option serializes as a hex string.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SettlementTxHash(#[serde(with = "h256_hexadecimal")] pub H256);
