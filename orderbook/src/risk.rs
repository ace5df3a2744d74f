//! Pre-admission risk checks: amount bounds, price deviation, rate limits, open order caps and
//! the blacklist. All checks run before funds are locked and never mutate the books.

use model::order::{OrderCreation, OrderKind};
use primitive_types::{H160, U256};
use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::Mutex,
    time::{Duration, Instant},
};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct RiskConfig {
    pub min_order_amount: U256,
    pub max_order_amount: U256,
    pub max_price_deviation_bps: u32,
    pub max_orders_per_user: usize,
    pub order_rate_per_minute: u32,
    pub cancel_rate_per_minute: u32,
    pub blacklisted_users: HashSet<H160>,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            min_order_amount: U256::one(),
            max_order_amount: U256::MAX,
            max_price_deviation_bps: 10_000,
            max_orders_per_user: 100,
            order_rate_per_minute: 60,
            cancel_rate_per_minute: 60,
            blacklisted_users: HashSet::new(),
        }
    }
}

#[derive(Debug, Error, Eq, PartialEq)]
pub enum RiskError {
    #[error("order amount below minimum")]
    OrderTooSmall,
    #[error("order amount above maximum")]
    OrderTooLarge,
    #[error("price deviates too far from the current market")]
    PriceDeviationTooLarge,
    #[error("too many requests, slow down")]
    RateLimited,
    #[error("too many open orders")]
    TooManyOpenOrders,
    #[error("user is not allowed to trade")]
    Blacklisted,
}

const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Sliding one minute window of event times per user.
#[derive(Default)]
struct RateWindow(HashMap<H160, VecDeque<Instant>>);

impl RateWindow {
    /// Records the event and reports whether the user stays under `limit` per minute.
    fn check(&mut self, user: H160, limit: u32, now: Instant) -> bool {
        let events = self.0.entry(user).or_default();
        while let Some(front) = events.front() {
            if now.duration_since(*front) >= RATE_WINDOW {
                events.pop_front();
            } else {
                break;
            }
        }
        if events.len() >= limit as usize {
            return false;
        }
        events.push_back(now);
        true
    }
}

pub struct RiskChecker {
    config: RiskConfig,
    order_events: Mutex<RateWindow>,
    cancel_events: Mutex<RateWindow>,
}

impl RiskChecker {
    pub fn new(config: RiskConfig) -> Self {
        Self {
            config,
            order_events: Mutex::new(RateWindow::default()),
            cancel_events: Mutex::new(RateWindow::default()),
        }
    }

    /// Validates a new order against the configured limits. `open_orders` is the user's current
    /// live order count, `reference_price` the pair's mid price when one exists.
    pub fn check_order(
        &self,
        order: &OrderCreation,
        open_orders: usize,
        reference_price: Option<U256>,
    ) -> Result<(), RiskError> {
        let user = order.user_address;
        if self.config.blacklisted_users.contains(&user) {
            return Err(RiskError::Blacklisted);
        }
        if order.amount < self.config.min_order_amount {
            return Err(RiskError::OrderTooSmall);
        }
        if order.amount > self.config.max_order_amount {
            return Err(RiskError::OrderTooLarge);
        }
        if open_orders >= self.config.max_orders_per_user {
            return Err(RiskError::TooManyOpenOrders);
        }
        if order.kind != OrderKind::Market {
            if let Some(reference) = reference_price {
                if deviation_exceeds(order.price, reference, self.config.max_price_deviation_bps)
                {
                    return Err(RiskError::PriceDeviationTooLarge);
                }
            }
        }
        let allowed = self.order_events.lock().unwrap().check(
            user,
            self.config.order_rate_per_minute,
            Instant::now(),
        );
        if !allowed {
            return Err(RiskError::RateLimited);
        }
        Ok(())
    }

    /// Rate limits cancellations per user.
    pub fn check_cancel(&self, user: H160) -> Result<(), RiskError> {
        let allowed = self.cancel_events.lock().unwrap().check(
            user,
            self.config.cancel_rate_per_minute,
            Instant::now(),
        );
        if allowed {
            Ok(())
        } else {
            Err(RiskError::RateLimited)
        }
    }
}

fn deviation_exceeds(price: U256, reference: U256, cap: u32) -> bool {
    if reference.is_zero() {
        return false;
    }
    let diff = if price > reference {
        price - reference
    } else {
        reference - price
    };
    diff.full_mul(U256::from(10_000u64)) > reference.full_mul(U256::from(cap))
}
