//! Map-based [`BookSide`]: a straightforward ordered container, used as
//! a correctness reference and for symbols with unbounded price
//! dispersion.

use crossbeam_skiplist::SkipMap;
use tracing::warn;

use crate::book::error::SideError;
use crate::book::side::BookSide;
use crate::price::{HalfQuote, Price, Side, Tick, price_to_tick, tick_to_price};

/// An ordered, tick-indexed multiset backing one side of an
/// [`crate::book::OrderBook`].
pub struct MapSide {
    side: Side,
    levels: SkipMap<u32, u32>,
}

impl MapSide {
    /// Construct an empty side for `side`.
    pub fn new(side: Side) -> Self {
        MapSide {
            side,
            levels: SkipMap::new(),
        }
    }

    fn best_tick(&self) -> Option<u32> {
        match self.side {
            Side::Buy => self.levels.back().map(|e| *e.key()),
            Side::Sell => self.levels.front().map(|e| *e.key()),
        }
    }

    fn worst_tick(&self) -> Option<u32> {
        match self.side {
            Side::Buy => self.levels.front().map(|e| *e.key()),
            Side::Sell => self.levels.back().map(|e| *e.key()),
        }
    }

    fn quote_at(&self, tick: Option<u32>) -> HalfQuote {
        match tick {
            None => HalfQuote::empty(self.side),
            Some(t) => {
                let qty = self.levels.get(&t).map(|e| *e.value()).unwrap_or(0);
                HalfQuote {
                    price: tick_to_price(Tick(t)),
                    quantity: qty,
                }
            }
        }
    }
}

impl BookSide for MapSide {
    fn side(&self) -> Side {
        self.side
    }

    fn add_order(&mut self, price: Price, qty: u32) -> Result<bool, SideError> {
        if qty == 0 || price == self.side.empty_price() {
            return Err(SideError::InvalidParams {
                price,
                quantity: qty,
            });
        }
        let before = self.best_tick();
        let tick = price_to_tick(price).0;
        match self.levels.get(&tick) {
            Some(entry) => {
                self.levels.insert(tick, *entry.value() + qty);
            }
            None => {
                self.levels.insert(tick, qty);
            }
        }
        let after = self.best_tick();
        Ok(before != after)
    }

    fn reduce_order(&mut self, price: Price, qty: u32) -> Result<bool, SideError> {
        if qty == 0 || price == self.side.empty_price() {
            return Err(SideError::InvalidParams {
                price,
                quantity: qty,
            });
        }
        let tick = price_to_tick(price).0;
        let Some(entry) = self.levels.get(&tick) else {
            return Err(SideError::InvalidReduce { price });
        };
        let before = self.best_tick();
        let current = *entry.value();
        if qty > current {
            warn!(
                price = %price,
                requested = qty,
                available = current,
                "reduce exceeds resting quantity, clamping to zero"
            );
            entry.remove();
        } else if qty == current {
            entry.remove();
        } else {
            self.levels.insert(tick, current - qty);
        }
        let after = self.best_tick();
        Ok(before != after)
    }

    fn best_quote(&self) -> HalfQuote {
        self.quote_at(self.best_tick())
    }

    fn worst_quote(&self) -> HalfQuote {
        self.quote_at(self.worst_tick())
    }

    fn count(&self) -> usize {
        self.levels.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_side_reports_sentinel_quote() {
        let buy = MapSide::new(Side::Buy);
        assert_eq!(buy.best_quote(), HalfQuote::empty(Side::Buy));
        let sell = MapSide::new(Side::Sell);
        assert_eq!(sell.best_quote(), HalfQuote::empty(Side::Sell));
    }

    #[test]
    fn add_then_reduce_round_trips() {
        let mut side = MapSide::new(Side::Buy);
        let px = Price::new(100_0000).unwrap();
        assert!(side.add_order(px, 100).unwrap());
        assert_eq!(side.count(), 1);
        assert!(side.reduce_order(px, 100).unwrap());
        assert_eq!(side.count(), 0);
        assert_eq!(side.best_quote(), HalfQuote::empty(Side::Buy));
    }

    #[test]
    fn inside_only_changes_when_best_price_moves() {
        let mut side = MapSide::new(Side::Buy);
        let px = Price::new(100_0000).unwrap();
        assert!(side.add_order(px, 100).unwrap());
        // Adding more at the same (already-best) price does not move the inside.
        assert!(!side.add_order(px, 50).unwrap());
        let worse = Price::new(99_0000).unwrap();
        assert!(!side.add_order(worse, 10).unwrap());
    }

    #[test]
    fn reduce_missing_level_is_invalid() {
        let mut side = MapSide::new(Side::Sell);
        let px = Price::new(100_0000).unwrap();
        assert_eq!(
            side.reduce_order(px, 1).unwrap_err(),
            SideError::InvalidReduce { price: px }
        );
    }

    #[test]
    fn add_at_empty_sentinel_is_rejected() {
        let mut buy = MapSide::new(Side::Buy);
        assert!(buy.add_order(Price::NO_BID, 1).is_err());
        let mut sell = MapSide::new(Side::Sell);
        assert!(sell.add_order(Price::NO_OFFER, 1).is_err());
    }
}
