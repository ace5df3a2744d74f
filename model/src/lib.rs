//! Contains the order, fill and snapshot types exchanged between the matching service, its
//! clients and the settlement contract, with serialization as exposed by the http api.

pub mod h160_hexadecimal;
pub mod h256_hexadecimal;
pub mod order;
pub mod orderbook;
pub mod signature;
pub mod trade;
pub mod u256_decimal;

use anyhow::{ensure, Result};
use ethabi::Token;
use primitive_types::{H160, U256};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::str::FromStr;
use web3::signing;

/// The EIP-712 domain separator all order signatures are bound to.
///
/// Computed over the fixed application name and version together with the chain id and the
/// verifying contract so that signatures cannot be replayed across applications, chains or
/// contract deployments.
#[derive(Copy, Eq, PartialEq, Clone, Default, Hash)]
pub struct DomainSeparator(pub [u8; 32]);

const DOMAIN_NAME: &[u8] = b"OrderBook DEX";
const DOMAIN_VERSION: &[u8] = b"1.0";

impl DomainSeparator {
    pub fn new(chain_id: u64, verifying_contract: H160) -> Self {
        lazy_static::lazy_static! {
            static ref DOMAIN_TYPE_HASH: [u8; 32] = signing::keccak256(
                b"EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)",
            );
        }
        let encoded = ethabi::encode(&[
            Token::FixedBytes(DOMAIN_TYPE_HASH.to_vec()),
            Token::FixedBytes(signing::keccak256(DOMAIN_NAME).to_vec()),
            Token::FixedBytes(signing::keccak256(DOMAIN_VERSION).to_vec()),
            Token::Uint(U256::from(chain_id)),
            Token::Address(verifying_contract),
        ]);
        Self(signing::keccak256(&encoded))
    }
}

impl fmt::Debug for DomainSeparator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut hex = [0u8; 64];
        // Unwrap because the length is always correct.
        hex::encode_to_slice(self.0, &mut hex).unwrap();
        // Unwrap because the encoding is always valid utf8.
        f.write_str(std::str::from_utf8(&hex).unwrap())
    }
}

/// A trading pair symbol like `WETH-USDC`. Base is the asset being bought or sold, quote is the
/// asset it is priced in; pair identity is the ordered tuple.
#[derive(Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize)]
#[serde(transparent)]
pub struct TradingPair(String);

impl<'de> Deserialize<'de> for TradingPair {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let symbol = String::deserialize(deserializer)?;
        symbol.parse().map_err(serde::de::Error::custom)
    }
}

impl TradingPair {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn base_symbol(&self) -> &str {
        self.0.split('-').next().unwrap_or_default()
    }

    pub fn quote_symbol(&self) -> &str {
        self.0.split('-').nth(1).unwrap_or_default()
    }
}

impl FromStr for TradingPair {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split('-');
        let base = parts.next().unwrap_or_default();
        let quote = parts.next().unwrap_or_default();
        ensure!(
            !base.is_empty() && !quote.is_empty() && parts.next().is_none(),
            "trading pair {:?} is not of the form BASE-QUOTE",
            s
        );
        ensure!(
            s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'),
            "trading pair {:?} contains invalid characters",
            s
        );
        Ok(Self(s.to_string()))
    }
}

impl Display for TradingPair {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}
