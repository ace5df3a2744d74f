//! ABI encoding of settlement batches. The tuple layout mirrors the settlement contract's
//! `batchSettle(BatchSettlement)` entry point and has to stay bit compatible with it.

use ethabi::Token;
use model::{
    order::OrderCreation,
    trade::Fill,
    DomainSeparator,
};
use primitive_types::{H256, U256};
use web3::signing;

/// A deduplicated batch ready for encoding: each distinct taker and maker order appears once
/// with its signature while the fills list keeps every match.
#[derive(Clone, Debug, Default)]
pub struct SettlementBatch {
    pub taker_orders: Vec<OrderCreation>,
    pub maker_orders: Vec<OrderCreation>,
    pub fills: Vec<Fill>,
    fill_hashes: Vec<(H256, H256)>,
}

impl SettlementBatch {
    pub fn from_pending(
        pending: &[crate::queue::PendingFill],
        domain_separator: &DomainSeparator,
    ) -> Self {
        let mut batch = SettlementBatch::default();
        let mut taker_hashes = Vec::new();
        let mut maker_hashes = Vec::new();
        for entry in pending {
            let taker_hash = entry.taker.hash(domain_separator);
            let maker_hash = entry.maker.hash(domain_separator);
            if !taker_hashes.contains(&taker_hash) {
                taker_hashes.push(taker_hash);
                batch.taker_orders.push(entry.taker.clone());
            }
            if !maker_hashes.contains(&maker_hash) {
                maker_hashes.push(maker_hash);
                batch.maker_orders.push(entry.maker.clone());
            }
            batch.fills.push(entry.fill.clone());
            batch.fill_hashes.push((taker_hash, maker_hash));
        }
        batch
    }

    /// `batchSettle` calldata: four byte selector followed by the encoded settlement tuple.
    pub fn calldata(&self) -> Vec<u8> {
        let settlement = Token::Tuple(vec![
            Token::Array(self.taker_orders.iter().map(order_token).collect()),
            Token::Array(self.maker_orders.iter().map(order_token).collect()),
            Token::Array(
                self.taker_orders
                    .iter()
                    .map(|order| Token::Bytes(order.signature.to_bytes().to_vec()))
                    .collect(),
            ),
            Token::Array(
                self.maker_orders
                    .iter()
                    .map(|order| Token::Bytes(order.signature.to_bytes().to_vec()))
                    .collect(),
            ),
            Token::Array(
                self.fills
                    .iter()
                    .zip(&self.fill_hashes)
                    .map(|(fill, hashes)| fill_token(fill, hashes))
                    .collect(),
            ),
        ]);
        let mut calldata = batch_settle_selector().to_vec();
        calldata.extend(ethabi::encode(&[settlement]));
        calldata
    }

    pub fn fill_ids(&self) -> Vec<model::trade::FillId> {
        self.fills.iter().map(|fill| fill.id).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.fills.is_empty()
    }
}

const ORDER_TUPLE: &str = "(address,string,address,address,uint8,uint8,uint256,uint256,uint256,uint256)";

fn batch_settle_selector() -> [u8; 4] {
    let signature = format!(
        "batchSettle(({orders}[],{orders}[],bytes[],bytes[],(bytes32,bytes32,uint256,uint256,uint8)[]))",
        orders = ORDER_TUPLE,
    );
    let hash = signing::keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

fn order_token(order: &OrderCreation) -> Token {
    Token::Tuple(vec![
        Token::Address(order.user_address),
        Token::String(order.trading_pair.to_string()),
        Token::Address(order.base_token),
        Token::Address(order.quote_token),
        Token::Uint(U256::from(order.side as u8)),
        Token::Uint(U256::from(order.kind as u8)),
        Token::Uint(order.price),
        Token::Uint(order.amount),
        Token::Uint(U256::from(order.expires_at)),
        Token::Uint(order.nonce),
    ])
}

fn fill_token(fill: &Fill, (taker_hash, maker_hash): &(H256, H256)) -> Token {
    Token::Tuple(vec![
        Token::FixedBytes(taker_hash.as_bytes().to_vec()),
        Token::FixedBytes(maker_hash.as_bytes().to_vec()),
        Token::Uint(fill.price),
        Token::Uint(fill.amount),
        Token::Uint(U256::from(fill.taker_side as u8)),
    ])
}
