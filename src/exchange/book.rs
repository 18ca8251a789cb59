// Price-time priority queues for one trading pair

use super::order::{Order, OrderId, Side, TradingPair};
use std::cmp::Reverse;
use std::collections::BTreeMap;

type BidKey = (Reverse<u64>, u64, u64);
type AskKey = (u64, u64, u64);

/// Resting orders of one pair. Bids sort by price descending, asks by price
/// ascending; both then by timestamp and insertion sequence.
#[derive(Debug, Clone)]
pub struct OrderBook {
    pub pair: TradingPair,
    bids: BTreeMap<BidKey, OrderId>,
    asks: BTreeMap<AskKey, OrderId>,
}

impl OrderBook {
    pub fn new(pair: TradingPair) -> Self {
        Self {
            pair,
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
        }
    }

    fn bid_key(order: &Order) -> BidKey {
        (Reverse(order.price), order.timestamp, order.seq)
    }

    fn ask_key(order: &Order) -> AskKey {
        (order.price, order.timestamp, order.seq)
    }

    pub fn insert(&mut self, order: &Order) {
        match order.side {
            Side::Bid => self.bids.insert(Self::bid_key(order), order.id),
            Side::Ask => self.asks.insert(Self::ask_key(order), order.id),
        };
    }

    /// Returns false if the order was not resting here
    pub fn remove(&mut self, order: &Order) -> bool {
        match order.side {
            Side::Bid => self.bids.remove(&Self::bid_key(order)).is_some(),
            Side::Ask => self.asks.remove(&Self::ask_key(order)).is_some(),
        }
    }

    pub fn best_bid(&self) -> Option<OrderId> {
        self.bids.values().next().copied()
    }

    pub fn best_ask(&self) -> Option<OrderId> {
        self.asks.values().next().copied()
    }

    /// Bid ids, best first
    pub fn bids(&self) -> impl Iterator<Item = OrderId> + '_ {
        self.bids.values().copied()
    }

    /// Ask ids, best first
    pub fn asks(&self) -> impl Iterator<Item = OrderId> + '_ {
        self.asks.values().copied()
    }
}
