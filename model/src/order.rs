//! Contains the order type as used by the matching service and its signed-payload subset whose
//! digest is shared bit-exactly with the settlement contract.

use crate::{
    h160_hexadecimal, h256_hexadecimal,
    signature::{EcdsaSignature, MalformedSignature},
    u256_decimal, DomainSeparator, TradingPair,
};
use chrono::{DateTime, Utc};
use ethabi::Token;
use lazy_static::lazy_static;
use primitive_types::{H160, H256, U256, U512};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use web3::signing::{self, SecretKeyRef};

/// Engine assigned identifier, stable for the order's lifetime.
#[derive(
    Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct OrderId(pub u64);

impl Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for OrderId {
    type Err = std::num::ParseIntError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Side {
    Buy = 0,
    Sell = 1,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

impl Default for Side {
    fn default() -> Self {
        Self::Buy
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum OrderKind {
    Limit = 0,
    Market = 1,
    StopLoss = 2,
    TakeProfit = 3,
}

impl Default for OrderKind {
    fn default() -> Self {
        Self::Limit
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Open,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    /// Terminal orders are removed from the book indices and can no longer change.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Filled | Self::Cancelled | Self::Rejected)
    }
}

impl Default for OrderStatus {
    fn default() -> Self {
        Self::Pending
    }
}

/// The user signed subset of an order as submitted for admission.
///
/// The field set and its order are normative: the struct hash below must agree bit-exactly with
/// the settlement contract's `Order` schema or signatures fail to verify on-chain.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreation {
    #[serde(with = "h160_hexadecimal")]
    pub user_address: H160,
    pub trading_pair: TradingPair,
    #[serde(with = "h160_hexadecimal")]
    pub base_token: H160,
    #[serde(with = "h160_hexadecimal")]
    pub quote_token: H160,
    pub side: Side,
    #[serde(rename = "orderType")]
    pub kind: OrderKind,
    #[serde(with = "u256_decimal")]
    pub price: U256,
    #[serde(with = "u256_decimal")]
    pub amount: U256,
    /// Seconds since epoch; 0 means good-til-cancelled.
    #[serde(default)]
    pub expires_at: u64,
    #[serde(with = "u256_decimal")]
    pub nonce: U256,
    pub signature: EcdsaSignature,
}

/// Prices are quote token wei per 10^18 base token wei. The scale is shared with the settlement
/// contract; changing it breaks fill accounting on both sides.
pub const PRICE_SCALE: u64 = 1_000_000_000_000_000_000;

/// The quote leg of a fill of `amount` base wei at `price`.
///
/// Truncates toward zero so rounding can never create a positive residual. None if the result
/// does not fit 256 bits.
pub fn quote_amount(price: U256, amount: U256) -> Option<U256> {
    let scaled = price.full_mul(amount) / U512::from(PRICE_SCALE);
    U256::try_from(scaled).ok()
}

lazy_static! {
    static ref ORDER_TYPE_HASH: [u8; 32] = signing::keccak256(
        b"Order(address userAddress,string tradingPair,address baseToken,address quoteToken,\
          uint8 side,uint8 orderType,uint256 price,uint256 amount,uint256 expiresAt,uint256 nonce)",
    );
}

impl OrderCreation {
    /// EIP-712 struct hash over the normative field schema. Dynamic fields (the trading pair
    /// string) enter as their keccak256 digest.
    pub fn struct_hash(&self) -> [u8; 32] {
        let encoded = ethabi::encode(&[
            Token::FixedBytes(ORDER_TYPE_HASH.to_vec()),
            Token::Address(self.user_address),
            Token::FixedBytes(
                signing::keccak256(self.trading_pair.as_str().as_bytes()).to_vec(),
            ),
            Token::Address(self.base_token),
            Token::Address(self.quote_token),
            Token::Uint(U256::from(self.side as u8)),
            Token::Uint(U256::from(self.kind as u8)),
            Token::Uint(self.price),
            Token::Uint(self.amount),
            Token::Uint(U256::from(self.expires_at)),
            Token::Uint(self.nonce),
        ]);
        signing::keccak256(&encoded)
    }

    /// The canonical order hash used for replay protection and settlement cross-referencing.
    pub fn hash(&self, domain_separator: &DomainSeparator) -> H256 {
        H256(crate::signature::hashed_eip712_message(
            domain_separator,
            &self.struct_hash(),
        ))
    }

    /// Recovers the signer; admission compares it against `user_address`.
    pub fn recover_signer(
        &self,
        domain_separator: &DomainSeparator,
    ) -> Result<H160, MalformedSignature> {
        self.signature
            .recover(domain_separator, &self.struct_hash())
    }

    pub fn sign_with(mut self, domain_separator: &DomainSeparator, key: SecretKeyRef) -> Self {
        self.signature = EcdsaSignature::sign(domain_separator, &self.struct_hash(), key);
        self
    }

    pub fn expires_at_datetime(&self) -> Option<DateTime<Utc>> {
        match self.expires_at {
            0 => None,
            seconds => {
                use chrono::TimeZone;
                Utc.timestamp_opt(seconds as i64, 0).single()
            }
        }
    }
}

/// Engine maintained order state next to the user signed fields.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderMetadata {
    pub id: OrderId,
    #[serde(with = "h256_hexadecimal")]
    pub hash: H256,
    pub status: OrderStatus,
    #[serde(with = "u256_decimal")]
    pub filled_amount: U256,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Order {
    #[serde(flatten)]
    pub metadata: OrderMetadata,
    #[serde(flatten)]
    pub creation: OrderCreation,
}

impl Order {
    pub fn remaining_amount(&self) -> U256 {
        // filled_amount <= amount is an invariant; saturate so a violated invariant cannot
        // additionally corrupt arithmetic before it is caught.
        self.creation.amount.saturating_sub(self.metadata.filled_amount)
    }

    pub fn is_terminal(&self) -> bool {
        self.metadata.status.is_terminal()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.creation.expires_at_datetime() {
            Some(deadline) => deadline <= now,
            None => false,
        }
    }
}

#[derive(Default)]
pub struct OrderBuilder(Order);

impl OrderBuilder {
    pub fn with_id(mut self, id: OrderId) -> Self {
        self.0.metadata.id = id;
        self
    }

    pub fn with_user(mut self, user: H160) -> Self {
        self.0.creation.user_address = user;
        self
    }

    pub fn with_trading_pair(mut self, pair: TradingPair) -> Self {
        self.0.creation.trading_pair = pair;
        self
    }

    pub fn with_tokens(mut self, base: H160, quote: H160) -> Self {
        self.0.creation.base_token = base;
        self.0.creation.quote_token = quote;
        self
    }

    pub fn with_side(mut self, side: Side) -> Self {
        self.0.creation.side = side;
        self
    }

    pub fn with_kind(mut self, kind: OrderKind) -> Self {
        self.0.creation.kind = kind;
        self
    }

    pub fn with_price(mut self, price: U256) -> Self {
        self.0.creation.price = price;
        self
    }

    pub fn with_amount(mut self, amount: U256) -> Self {
        self.0.creation.amount = amount;
        self
    }

    pub fn with_expires_at(mut self, expires_at: u64) -> Self {
        self.0.creation.expires_at = expires_at;
        self
    }

    pub fn with_nonce(mut self, nonce: U256) -> Self {
        self.0.creation.nonce = nonce;
        self
    }

    pub fn with_status(mut self, status: OrderStatus) -> Self {
        self.0.metadata.status = status;
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.0.metadata.created_at = created_at;
        self.0.metadata.updated_at = created_at;
        self
    }

    /// Signs the creation fields and stamps the canonical hash.
    pub fn sign_with(mut self, domain_separator: &DomainSeparator, key: SecretKeyRef) -> Self {
        self.0.creation = self.0.creation.sign_with(domain_separator, key);
        self.0.metadata.hash = self.0.creation.hash(domain_separator);
        self
    }

    pub fn build(self) -> Order {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;
    use secp256k1::ONE_KEY;
    use serde_json::json;
    use web3::signing::Key;

    fn sample_creation() -> OrderCreation {
        OrderCreation {
            user_address: H160(hex!("63FC2aD3d021a4D7e64323529a55a9442C444dA0")),
            trading_pair: "WETH-USDC".parse().unwrap(),
            base_token: H160(hex!("A193E42526F1FEA8C99AF609dcEabf30C1c29fAA")),
            quote_token: H160(hex!("FDFEF9D10d929cB3905C71400ce6be1990EA0F34")),
            side: Side::Buy,
            kind: OrderKind::Limit,
            price: U256::from_dec_str("2000000000000000000000").unwrap(),
            amount: U256::from_dec_str("1000000000000000000").unwrap(),
            expires_at: 0,
            nonce: U256::from(1),
            signature: Default::default(),
        }
    }

    #[test]
    fn struct_hash_is_sensitive_to_every_signed_field() {
        let base = sample_creation();
        let mutations: Vec<OrderCreation> = vec![
            OrderCreation {
                user_address: H160::from_low_u64_be(9),
                ..base.clone()
            },
            OrderCreation {
                trading_pair: "WBTC-USDC".parse().unwrap(),
                ..base.clone()
            },
            OrderCreation {
                base_token: H160::from_low_u64_be(9),
                ..base.clone()
            },
            OrderCreation {
                quote_token: H160::from_low_u64_be(9),
                ..base.clone()
            },
            OrderCreation {
                side: Side::Sell,
                ..base.clone()
            },
            OrderCreation {
                kind: OrderKind::Market,
                ..base.clone()
            },
            OrderCreation {
                price: U256::from(1),
                ..base.clone()
            },
            OrderCreation {
                amount: U256::from(1),
                ..base.clone()
            },
            OrderCreation {
                expires_at: 1,
                ..base.clone()
            },
            OrderCreation {
                nonce: U256::from(2),
                ..base.clone()
            },
        ];
        for mutated in mutations {
            assert_ne!(mutated.struct_hash(), base.struct_hash());
        }
    }

    #[test]
    fn signature_does_not_affect_hash() {
        let domain = DomainSeparator::new(1, H160::from_low_u64_be(1));
        let unsigned = sample_creation();
        let signed = unsigned.clone().sign_with(&domain, SecretKeyRef::new(&ONE_KEY));
        assert_eq!(unsigned.hash(&domain), signed.hash(&domain));
    }

    #[test]
    fn signing_round_trip_recovers_owner() {
        let domain = DomainSeparator::new(1, H160::from_low_u64_be(1));
        let key = ONE_KEY;
        let mut creation = sample_creation();
        creation.user_address = SecretKeyRef::new(&key).address();
        let creation = creation.sign_with(&domain, SecretKeyRef::new(&key));
        assert_eq!(
            creation.recover_signer(&domain).unwrap(),
            creation.user_address
        );
    }

    #[test]
    fn deserializes_camel_case_payload() {
        let value = json!({
            "userAddress": "0x63fc2ad3d021a4d7e64323529a55a9442c444da0",
            "tradingPair": "WETH-USDC",
            "baseToken": "0xa193e42526f1fea8c99af609dceabf30c1c29faa",
            "quoteToken": "0xfdfef9d10d929cb3905c71400ce6be1990ea0f34",
            "side": "buy",
            "orderType": "limit",
            "price": "2000000000000000000000",
            "amount": "1000000000000000000",
            "expiresAt": 0,
            "nonce": "1",
            "signature": "0x\
                0000000000000000000000000000000000000000000000000000000000000000\
                0000000000000000000000000000000000000000000000000000000000000000\
                00",
        });
        let creation: OrderCreation = serde_json::from_value(value).unwrap();
        assert_eq!(creation, sample_creation());
    }

    #[test]
    fn order_remaining_amount_saturates() {
        let order = OrderBuilder::default()
            .with_amount(U256::from(10))
            .build();
        assert_eq!(order.remaining_amount(), U256::from(10));
        let mut filled = order;
        filled.metadata.filled_amount = U256::from(4);
        assert_eq!(filled.remaining_amount(), U256::from(6));
    }

    #[test]
    fn quote_amount_truncates_toward_zero() {
        let one_base = U256::from(PRICE_SCALE);
        // 2000 quote wei per base unit.
        assert_eq!(
            quote_amount(U256::from(2000), one_base).unwrap(),
            U256::from(2000)
        );
        // Half a base unit at price 3 truncates 1.5 down to 1.
        assert_eq!(
            quote_amount(U256::from(3), one_base / 2).unwrap(),
            U256::from(1)
        );
        assert_eq!(quote_amount(U256::from(1), U256::from(1)).unwrap(), U256::zero());
    }

    #[test]
    fn quote_amount_overflow_is_none() {
        assert_eq!(quote_amount(U256::MAX, U256::MAX), None);
    }

    #[test]
    fn status_terminality() {
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(OrderStatus::Rejected.is_terminal());
        assert!(!OrderStatus::Open.is_terminal());
        assert!(!OrderStatus::PartiallyFilled.is_terminal());
        assert!(!OrderStatus::Pending.is_terminal());
    }
}
