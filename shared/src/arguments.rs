//! Contains command line arguments and related helpers that are shared between the binaries.
use anyhow::{anyhow, ensure, Context, Result};
use primitive_types::{H160, H256, U256};
use std::{num::ParseFloatError, str::FromStr, time::Duration};
use url::Url;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(anyhow!("unknown log format {:?}", s)),
        }
    }
}

#[derive(Debug, structopt::StructOpt)]
pub struct Arguments {
    #[structopt(
        long,
        env = "LOG_FILTER",
        default_value = "warn,orderbook=debug,settlement=debug,shared=debug,model=debug"
    )]
    pub log_filter: String,

    /// Log output format, "text" or "json".
    #[structopt(long, env = "LOG_FORMAT", default_value = "text")]
    pub log_format: LogFormat,

    /// Address and port the http/websocket server binds to.
    #[structopt(long, env = "BIND_ADDRESS", default_value = "0.0.0.0:8080")]
    pub bind_address: std::net::SocketAddr,

    /// Timeout for reading a request body.
    #[structopt(long, env, default_value = "10", parse(try_from_str = duration_from_seconds))]
    pub read_timeout: Duration,

    /// Timeout for writing a response.
    #[structopt(long, env, default_value = "10", parse(try_from_str = duration_from_seconds))]
    pub write_timeout: Duration,

    /// The Ethereum node URL to connect to.
    #[structopt(long, env = "NODE_URL", default_value = "http://localhost:8545")]
    pub node_url: Url,

    /// The chain id the signed order domain is bound to.
    #[structopt(long, env = "CHAIN_ID", default_value = "1")]
    pub chain_id: u64,

    /// Address of the exchange contract the order domain is bound to.
    #[structopt(long, env = "CONTRACT_ADDRESS", parse(try_from_str = h160_from_str))]
    pub contract_address: H160,

    /// Address of the settlement contract batches are submitted to.
    #[structopt(long, env = "SETTLEMENT_ADDRESS", parse(try_from_str = h160_from_str))]
    pub settlement_address: H160,

    /// Private key of the settlement submitter account.
    #[structopt(long, env = "PRIVATE_KEY", hide_env_values = true, parse(try_from_str = h256_from_str))]
    pub private_key: H256,

    /// Whether incoming orders are matched immediately. When disabled orders only rest in the
    /// books until matching is re-enabled.
    #[structopt(long, env = "AUTO_MATCHING", default_value = "true", parse(try_from_str))]
    pub auto_matching: bool,

    /// When enabled a resting order owned by the taker is cancelled instead of matched against.
    #[structopt(long, env = "SELF_TRADE_PREVENTION")]
    pub self_trade_prevention: bool,

    /// Bounded-loss cap for market orders in basis points relative to the first matched price.
    #[structopt(long, env = "MAX_SLIPPAGE_BPS")]
    pub max_slippage_bps: Option<u32>,

    /// Smallest accepted order amount in base token wei.
    #[structopt(long, env = "MIN_ORDER_AMOUNT", default_value = "1", parse(try_from_str = u256_from_dec_str))]
    pub min_order_amount: U256,

    /// Largest accepted order amount in base token wei.
    #[structopt(
        long,
        env = "MAX_ORDER_AMOUNT",
        default_value = "1000000000000000000000000",
        parse(try_from_str = u256_from_dec_str)
    )]
    pub max_order_amount: U256,

    /// Maximum allowed deviation of a limit price from the current mid price in basis points.
    #[structopt(long, env = "MAX_PRICE_DEVIATION_BPS", default_value = "5000")]
    pub max_price_deviation_bps: u32,

    /// Maximum number of open orders a single user may have.
    #[structopt(long, env = "MAX_ORDERS_PER_USER", default_value = "100")]
    pub max_orders_per_user: usize,

    /// Maximum number of order placements per user per minute.
    #[structopt(long, env = "ORDER_RATE_PER_MINUTE", default_value = "60")]
    pub order_rate_per_minute: u32,

    /// Maximum number of cancellations per user per minute.
    #[structopt(long, env = "CANCEL_RATE_PER_MINUTE", default_value = "60")]
    pub cancel_rate_per_minute: u32,

    /// Whether available balances are checked and locked on order admission.
    #[structopt(long, env = "ENABLE_BALANCE_CHECK", default_value = "true", parse(try_from_str))]
    pub enable_balance_check: bool,

    /// Users that are not allowed to trade.
    #[structopt(long, env = "BLACKLISTED_USERS", use_delimiter = true, parse(try_from_str = h160_from_str))]
    pub blacklisted_users: Vec<H160>,

    /// Number of fills that triggers a settlement batch flush.
    #[structopt(long, env = "BATCH_SIZE", default_value = "50")]
    pub batch_size: usize,

    /// Maximum age of the oldest pending fill before a batch is flushed.
    #[structopt(long, env = "BATCH_TIMEOUT", default_value = "5", parse(try_from_str = duration_from_seconds))]
    pub batch_timeout: Duration,

    /// Factor applied to the gas price on every settlement retry.
    #[structopt(long, env = "GAS_MULTIPLIER_ON_RETRY", default_value = "1.25", parse(try_from_str = parse_factor))]
    pub gas_multiplier_on_retry: f64,

    /// How long to wait for a settlement transaction to be confirmed before retrying.
    #[structopt(long, env = "CONFIRMATION_TIMEOUT", default_value = "300", parse(try_from_str = duration_from_seconds))]
    pub confirmation_timeout: Duration,
}

fn parse_factor(s: &str) -> Result<f64> {
    let factor = f64::from_str(s)?;
    ensure!(factor.is_finite() && factor >= 1.0, "factor must be >= 1");
    Ok(factor)
}

pub fn duration_from_seconds(s: &str) -> Result<Duration, ParseFloatError> {
    Ok(Duration::from_secs_f32(s.parse()?))
}

pub fn h160_from_str(s: &str) -> Result<H160> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    s.parse().with_context(|| format!("invalid address {:?}", s))
}

pub fn h256_from_str(s: &str) -> Result<H256> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    s.parse().context("invalid 32 byte hex value")
}

pub fn u256_from_dec_str(s: &str) -> Result<U256> {
    U256::from_dec_str(s).with_context(|| format!("invalid decimal amount {:?}", s))
}
