//! Price-time priority order matching against reserved balances.
//!
//! Tie-break: among equal prices the earlier timestamp wins, and among equal
//! timestamps the order accepted first (lower insertion sequence) wins. A
//! trade executes at the price of the order that was already resting.

mod balances;
mod book;
mod order;

pub use balances::{Balance, Balances};
pub use book::OrderBook;
pub use order::{Order, OrderId, OrderRequest, Side, Trade, TradingPair};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Exchange errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExchangeError {
    #[error("{owner} has {available} {asset} available, needs {needed}")]
    InsufficientBalance {
        owner: String,
        asset: String,
        needed: u64,
        available: u64,
    },

    #[error("invalid order: {0}")]
    InvalidOrder(String),

    #[error("unknown order {0}")]
    UnknownOrder(OrderId),

    #[error("amount overflow")]
    Overflow,
}

/// Result of placing an order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub order_id: OrderId,
    pub trades: Vec<Trade>,
    /// The order as it rests on the book, if not fully filled
    pub resting: Option<Order>,
}

/// Bids and asks of one pair, best first
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BookSnapshot {
    pub bids: Vec<Order>,
    pub asks: Vec<Order>,
}

/// All order books plus the balances they settle against
#[derive(Debug, Default)]
pub struct Exchange {
    books: HashMap<TradingPair, OrderBook>,
    orders: HashMap<OrderId, Order>,
    balances: Balances,
    trades: Vec<Trade>,
    next_id: OrderId,
    next_seq: u64,
}

/// Quote needed to buy `quantity` at `price`
fn quote_cost(price: u64, quantity: u64) -> Result<u64, ExchangeError> {
    price.checked_mul(quantity).ok_or(ExchangeError::Overflow)
}

impl Exchange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deposit(&mut self, owner: &str, asset: &str, amount: u64) -> Result<Balance, ExchangeError> {
        if owner.is_empty() || asset.is_empty() {
            return Err(ExchangeError::InvalidOrder(
                "owner and asset must be named".to_string(),
            ));
        }
        self.balances.deposit(owner, asset, amount)?;
        Ok(self.balances.balance(owner, asset))
    }

    pub fn balance(&self, owner: &str, asset: &str) -> Balance {
        self.balances.balance(owner, asset)
    }

    /// Reserve funds for the order, rest it on the book, then match
    pub fn place_order(&mut self, request: OrderRequest) -> Result<Placement, ExchangeError> {
        if request.price == 0 {
            return Err(ExchangeError::InvalidOrder("price must be positive".to_string()));
        }
        if request.quantity == 0 {
            return Err(ExchangeError::InvalidOrder(
                "quantity must be positive".to_string(),
            ));
        }
        if request.owner.is_empty() {
            return Err(ExchangeError::InvalidOrder("owner must be named".to_string()));
        }

        match request.side {
            Side::Bid => {
                let cost = quote_cost(request.price, request.quantity)?;
                self.balances
                    .reserve(&request.owner, &request.pair.quote, cost)?;
            }
            Side::Ask => {
                self.balances
                    .reserve(&request.owner, &request.pair.base, request.quantity)?;
            }
        }

        let order = Order {
            id: self.next_id,
            owner: request.owner,
            pair: request.pair,
            side: request.side,
            price: request.price,
            quantity: request.quantity,
            original_quantity: request.quantity,
            timestamp: request.timestamp,
            seq: self.next_seq,
        };
        self.next_id += 1;
        self.next_seq += 1;

        let order_id = order.id;
        let pair = order.pair.clone();
        log::debug!(
            "Order {} accepted: {:?} {} {} @ {}",
            order_id,
            order.side,
            order.quantity,
            pair,
            order.price
        );

        self.books
            .entry(pair.clone())
            .or_insert_with(|| OrderBook::new(pair.clone()))
            .insert(&order);
        self.orders.insert(order_id, order);

        let trades = self.match_orders(&pair, order_id)?;
        Ok(Placement {
            order_id,
            trades,
            resting: self.orders.get(&order_id).cloned(),
        })
    }

    /// Cross the book while the best bid is at or above the best ask.
    /// `taker` is the order just placed; every fill executes at the price
    /// of the order it met on the book.
    pub fn match_orders(
        &mut self,
        pair: &TradingPair,
        taker: OrderId,
    ) -> Result<Vec<Trade>, ExchangeError> {
        let mut trades = Vec::new();

        loop {
            let Some(book) = self.books.get(pair) else {
                break;
            };
            let (Some(bid_id), Some(ask_id)) = (book.best_bid(), book.best_ask()) else {
                break;
            };
            let (Some(bid), Some(ask)) = (self.orders.get(&bid_id), self.orders.get(&ask_id))
            else {
                break;
            };
            if bid.price < ask.price {
                break;
            }

            let quantity = bid.quantity.min(ask.quantity);
            let maker_side = if ask.id == taker {
                Side::Bid
            } else if bid.id == taker || ask.precedes(bid) {
                Side::Ask
            } else {
                Side::Bid
            };
            let price = match maker_side {
                Side::Bid => bid.price,
                Side::Ask => ask.price,
            };

            let trade = Trade {
                pair: pair.clone(),
                buy_order: bid.id,
                sell_order: ask.id,
                buyer: bid.owner.clone(),
                seller: ask.owner.clone(),
                price,
                quantity,
                maker_side,
                timestamp: bid.timestamp.max(ask.timestamp),
            };
            let bid_price = bid.price;

            self.settle(&trade, bid_price)?;

            for id in [bid_id, ask_id] {
                self.fill(id, quantity);
            }

            log::debug!(
                "Trade {}: {} @ {} (bid {}, ask {})",
                pair,
                quantity,
                price,
                bid_id,
                ask_id
            );
            self.trades.push(trade.clone());
            trades.push(trade);
        }

        Ok(trades)
    }

    /// Move reserved funds for a fill and refund the bid's price improvement.
    /// Every credit is checked before any balance changes.
    fn settle(&mut self, trade: &Trade, bid_price: u64) -> Result<(), ExchangeError> {
        let paid = quote_cost(trade.price, trade.quantity)?;
        let reserved = quote_cost(bid_price, trade.quantity)?;

        // Upper bounds on what each side's available funds can gain
        let quote_credit = self
            .balances
            .balance(&trade.seller, &trade.pair.quote)
            .available
            .checked_add(reserved);
        let base_credit = self
            .balances
            .balance(&trade.buyer, &trade.pair.base)
            .available
            .checked_add(trade.quantity);
        if quote_credit.is_none() || base_credit.is_none() {
            return Err(ExchangeError::Overflow);
        }

        self.balances
            .transfer_reserved(&trade.buyer, &trade.seller, &trade.pair.quote, paid)?;
        self.balances
            .release(&trade.buyer, &trade.pair.quote, reserved - paid);
        self.balances.transfer_reserved(
            &trade.seller,
            &trade.buyer,
            &trade.pair.base,
            trade.quantity,
        )
    }

    /// Reduce an order's remaining quantity, removing it once filled
    fn fill(&mut self, id: OrderId, quantity: u64) {
        let Some(order) = self.orders.get_mut(&id) else {
            return;
        };
        order.quantity -= quantity;
        if !order.is_filled() {
            return;
        }

        if let Some(order) = self.orders.remove(&id) {
            if let Some(book) = self.books.get_mut(&order.pair) {
                book.remove(&order);
            }
        }
    }

    /// Withdraw a resting order and release what it still reserves
    pub fn cancel_order(&mut self, owner: &str, id: OrderId) -> Result<Order, ExchangeError> {
        let order = self
            .orders
            .get(&id)
            .filter(|order| order.owner == owner)
            .ok_or(ExchangeError::UnknownOrder(id))?;

        let (asset, amount) = match order.side {
            Side::Bid => (order.pair.quote.clone(), quote_cost(order.price, order.quantity)?),
            Side::Ask => (order.pair.base.clone(), order.quantity),
        };

        let order = self
            .orders
            .remove(&id)
            .ok_or(ExchangeError::UnknownOrder(id))?;
        if let Some(book) = self.books.get_mut(&order.pair) {
            book.remove(&order);
        }
        self.balances.release(owner, &asset, amount);

        log::debug!("Order {} cancelled, released {} {}", id, amount, asset);
        Ok(order)
    }

    pub fn get_orderbook(&self, pair: &TradingPair) -> BookSnapshot {
        let Some(book) = self.books.get(pair) else {
            return BookSnapshot::default();
        };
        let collect = |ids: &mut dyn Iterator<Item = OrderId>| -> Vec<Order> {
            ids.filter_map(|id| self.orders.get(&id).cloned()).collect()
        };

        BookSnapshot {
            bids: collect(&mut book.bids()),
            asks: collect(&mut book.asks()),
        }
    }

    /// Every trade executed so far, oldest first
    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }
}
