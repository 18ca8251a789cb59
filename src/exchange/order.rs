// Orders, trading pairs and fills

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub type OrderId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Buy base, pay quote
    Bid,
    /// Sell base, receive quote
    Ask,
}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bid" | "buy" => Ok(Side::Bid),
            "ask" | "sell" => Ok(Side::Ask),
            other => Err(format!("unknown side: {other}")),
        }
    }
}

/// Base asset priced in quote asset, e.g. `COIN/USD`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TradingPair {
    pub base: String,
    pub quote: String,
}

impl TradingPair {
    pub fn new(base: impl Into<String>, quote: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            quote: quote.into(),
        }
    }
}

impl fmt::Display for TradingPair {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

impl FromStr for TradingPair {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((base, quote)) if !base.is_empty() && !quote.is_empty() && base != quote => {
                Ok(Self::new(base, quote))
            }
            _ => Err(format!("expected BASE/QUOTE, got {s}")),
        }
    }
}

/// What a client submits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub owner: String,
    pub pair: TradingPair,
    pub side: Side,
    /// Quote units per base unit
    pub price: u64,
    /// Base units
    pub quantity: u64,
    pub timestamp: u64,
}

/// An order accepted by the exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub owner: String,
    pub pair: TradingPair,
    pub side: Side,
    pub price: u64,
    /// Remaining, unfilled quantity
    pub quantity: u64,
    pub original_quantity: u64,
    pub timestamp: u64,
    /// Insertion sequence; breaks timestamp ties
    pub seq: u64,
}

impl Order {
    /// Whether `self` was on the book before `other`
    pub fn precedes(&self, other: &Order) -> bool {
        (self.timestamp, self.seq) < (other.timestamp, other.seq)
    }

    pub fn is_filled(&self) -> bool {
        self.quantity == 0
    }
}

/// One fill between a bid and an ask
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    pub pair: TradingPair,
    pub buy_order: OrderId,
    pub sell_order: OrderId,
    pub buyer: String,
    pub seller: String,
    pub price: u64,
    pub quantity: u64,
    /// Side of the resting order whose price was used
    pub maker_side: Side,
    pub timestamp: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_parsing() {
        let pair: TradingPair = "COIN/USD".parse().unwrap();
        assert_eq!(pair, TradingPair::new("COIN", "USD"));
        assert_eq!(pair.to_string(), "COIN/USD");
        assert!("COIN".parse::<TradingPair>().is_err());
        assert!("USD/USD".parse::<TradingPair>().is_err());
    }

    #[test]
    fn test_side_parsing() {
        assert_eq!("buy".parse::<Side>().unwrap(), Side::Bid);
        assert_eq!("ASK".parse::<Side>().unwrap(), Side::Ask);
        assert!("hold".parse::<Side>().is_err());
    }
}
