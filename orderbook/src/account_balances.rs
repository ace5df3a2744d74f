//! Virtual balance ledger: deposits are reflected administratively, admission locks the funds an
//! order may consume and fills move them between the two owners.

use chrono::{DateTime, Utc};
use model::order::{quote_amount, Order, OrderId, OrderKind, Side};
use primitive_types::{H160, U256};
use shared::maintenance::Maintaining;
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Balance {
    pub total: U256,
    pub locked: U256,
}

impl Balance {
    pub fn available(&self) -> U256 {
        // total >= locked is a ledger invariant.
        self.total.saturating_sub(self.locked)
    }
}

/// Funds reserved for one open order. BUY orders lock `price * amount` of quote, SELL orders
/// `amount` of base; `amount` shrinks as fills consume the reservation.
#[derive(Clone, Debug, Eq, PartialEq)]
struct FundLock {
    user: H160,
    token: H160,
    amount: U256,
    expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Error, Eq, PartialEq)]
pub enum BalanceError {
    #[error("insufficient available balance: required {required}, available {available}")]
    InsufficientBalance { required: U256, available: U256 },
    #[error("quote amount overflows 256 bits")]
    AmountOverflow,
    #[error("balance below locked amount")]
    BelowLocked,
}

#[derive(Default)]
struct Ledger {
    balances: HashMap<(H160, H160), Balance>,
    locks: HashMap<OrderId, FundLock>,
}

impl Ledger {
    fn balance_mut(&mut self, user: H160, token: H160) -> &mut Balance {
        self.balances.entry((user, token)).or_default()
    }
}

/// Both maps live under one mutex so the `sum of locks == locked` invariant can never be observed
/// broken. The mutex is never held across an engine call.
#[derive(Default)]
pub struct BalanceBook {
    ledger: Mutex<Ledger>,
}

impl BalanceBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Administrative reflection of an on-chain deposit or withdrawal.
    pub fn set_balance(&self, user: H160, token: H160, total: U256) -> Result<(), BalanceError> {
        let mut ledger = self.ledger.lock().unwrap();
        let balance = ledger.balance_mut(user, token);
        if total < balance.locked {
            return Err(BalanceError::BelowLocked);
        }
        balance.total = total;
        Ok(())
    }

    pub fn get_balance(&self, user: H160, token: H160) -> Balance {
        self.ledger
            .lock()
            .unwrap()
            .balances
            .get(&(user, token))
            .copied()
            .unwrap_or_default()
    }

    /// The token and amount an order reserves on admission.
    ///
    /// Market buys have no limit price to bound their quote cost, so nothing is reserved up
    /// front; the transfer on fill still checks the buyer's total.
    pub fn required_lock(order: &Order) -> Result<(H160, U256), BalanceError> {
        match order.creation.side {
            Side::Buy => {
                let amount = if order.creation.kind == OrderKind::Market {
                    U256::zero()
                } else {
                    quote_amount(order.creation.price, order.creation.amount)
                        .ok_or(BalanceError::AmountOverflow)?
                };
                Ok((order.creation.quote_token, amount))
            }
            Side::Sell => Ok((order.creation.base_token, order.creation.amount)),
        }
    }

    /// Reserves the order's funds. Fails without any state change when the available balance
    /// does not cover the requirement.
    pub fn lock_for_order(&self, order: &Order) -> Result<(), BalanceError> {
        let (token, required) = Self::required_lock(order)?;
        let user = order.creation.user_address;
        let mut ledger = self.ledger.lock().unwrap();
        let balance = ledger.balance_mut(user, token);
        let available = balance.available();
        if available < required {
            return Err(BalanceError::InsufficientBalance {
                required,
                available,
            });
        }
        balance.locked += required;
        ledger.locks.insert(
            order.metadata.id,
            FundLock {
                user,
                token,
                amount: required,
                expires_at: order.creation.expires_at_datetime(),
            },
        );
        Ok(())
    }

    /// Releases whatever is left of an order's reservation. No-op on an unknown id so terminal
    /// transitions can release unconditionally.
    pub fn unlock_for_order(&self, order_id: OrderId) {
        let mut ledger = self.ledger.lock().unwrap();
        if let Some(lock) = ledger.locks.remove(&order_id) {
            let balance = ledger.balance_mut(lock.user, lock.token);
            balance.locked = balance.locked.saturating_sub(lock.amount);
        }
    }

    /// Moves `amount` base from seller to buyer and the quote leg the other way, consuming both
    /// orders' reservations proportionally. All checks run before the first mutation so a failed
    /// transfer leaves the ledger untouched.
    pub fn transfer_on_fill(
        &self,
        taker: &Order,
        maker: &Order,
        price: U256,
        amount: U256,
    ) -> Result<(), BalanceError> {
        let (buyer, seller) = match taker.creation.side {
            Side::Buy => (taker, maker),
            Side::Sell => (maker, taker),
        };
        let base = taker.creation.base_token;
        let quote = taker.creation.quote_token;
        let quote_leg = quote_amount(price, amount).ok_or(BalanceError::AmountOverflow)?;
        let buyer_address = buyer.creation.user_address;
        let seller_address = seller.creation.user_address;

        let mut ledger = self.ledger.lock().unwrap();

        let seller_base = ledger
            .balances
            .get(&(seller_address, base))
            .copied()
            .unwrap_or_default();
        let buyer_quote = ledger
            .balances
            .get(&(buyer_address, quote))
            .copied()
            .unwrap_or_default();
        let seller_consumed = peek_lock(&ledger, seller.metadata.id, amount);
        let buyer_consumed = peek_lock(&ledger, buyer.metadata.id, quote_leg);
        // Each leg must be covered by the owner's total and must not eat into funds locked for
        // other orders (relevant for market buys, which reserve nothing up front).
        if seller_base.total < amount
            || seller_base.total - amount < seller_base.locked - seller_consumed
        {
            return Err(BalanceError::InsufficientBalance {
                required: amount,
                available: seller_base.available() + seller_consumed,
            });
        }
        if buyer_quote.total < quote_leg
            || buyer_quote.total - quote_leg < buyer_quote.locked - buyer_consumed
        {
            return Err(BalanceError::InsufficientBalance {
                required: quote_leg,
                available: buyer_quote.available() + buyer_consumed,
            });
        }

        // Commit. Reservations shrink by at most what the fill consumed; any surplus from price
        // improvement stays locked until the order unlocks on its terminal transition.
        let seller_consumed = consume_lock(&mut ledger, seller.metadata.id, amount);
        let balance = ledger.balance_mut(seller_address, base);
        balance.total -= amount;
        balance.locked -= seller_consumed;

        let buyer_consumed = consume_lock(&mut ledger, buyer.metadata.id, quote_leg);
        let balance = ledger.balance_mut(buyer_address, quote);
        balance.total -= quote_leg;
        balance.locked -= buyer_consumed;

        ledger.balance_mut(buyer_address, base).total += amount;
        ledger.balance_mut(seller_address, quote).total += quote_leg;
        Ok(())
    }

    /// Releases reservations whose order deadline has passed; the expiry sweep cancels the
    /// orders themselves.
    pub fn clean_expired_locks(&self, now: DateTime<Utc>) {
        let mut ledger = self.ledger.lock().unwrap();
        let expired: Vec<OrderId> = ledger
            .locks
            .iter()
            .filter(|(_, lock)| matches!(lock.expires_at, Some(deadline) if deadline <= now))
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            if let Some(lock) = ledger.locks.remove(&id) {
                let balance = ledger.balance_mut(lock.user, lock.token);
                balance.locked = balance.locked.saturating_sub(lock.amount);
            }
        }
    }

    #[cfg(test)]
    fn locked_sum(&self, user: H160, token: H160) -> U256 {
        let ledger = self.ledger.lock().unwrap();
        ledger
            .locks
            .values()
            .filter(|lock| lock.user == user && lock.token == token)
            .fold(U256::zero(), |sum, lock| sum + lock.amount)
    }
}

fn peek_lock(ledger: &Ledger, order_id: OrderId, amount: U256) -> U256 {
    ledger
        .locks
        .get(&order_id)
        .map(|lock| lock.amount.min(amount))
        .unwrap_or_default()
}

fn consume_lock(ledger: &mut Ledger, order_id: OrderId, amount: U256) -> U256 {
    match ledger.locks.get_mut(&order_id) {
        Some(lock) => {
            let consumed = lock.amount.min(amount);
            lock.amount -= consumed;
            consumed
        }
        None => U256::zero(),
    }
}

#[async_trait::async_trait]
impl Maintaining for BalanceBook {
    async fn run_maintenance(&self) -> anyhow::Result<()> {
        self.clean_expired_locks(Utc::now());
        Ok(())
    }
}
