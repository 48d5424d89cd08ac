//! The order-book side contract (C2), the per-symbol order book, and
//! the book engine that drives both from an ITCH-5.0 message stream
//! (C3).

pub mod engine;
pub mod error;
pub mod event;
pub mod side;
pub mod side_array;
pub mod side_map;

pub use engine::Engine;
pub use error::{EngineError, SideError};
pub use event::BookUpdateEvent;
pub use side::{BookSide, SideKind};
pub use side_array::ArraySide;
pub use side_map::MapSide;

use crate::price::{HalfQuote, Side};

/// A pair of book sides for a single symbol: `(BUY side, SELL side)`
/// plus `count()` — the number of distinct price levels across both
/// sides.
pub struct OrderBook {
    buy: Box<dyn BookSide>,
    sell: Box<dyn BookSide>,
}

impl OrderBook {
    /// Construct an empty book, instantiating both sides with `kind`.
    pub fn new(kind: SideKind) -> Self {
        OrderBook {
            buy: make_side(Side::Buy, kind),
            sell: make_side(Side::Sell, kind),
        }
    }

    /// Borrow the requested side.
    pub fn side(&self, side: Side) -> &dyn BookSide {
        match side {
            Side::Buy => self.buy.as_ref(),
            Side::Sell => self.sell.as_ref(),
        }
    }

    /// Mutably borrow the requested side.
    pub fn side_mut(&mut self, side: Side) -> &mut dyn BookSide {
        match side {
            Side::Buy => self.buy.as_mut(),
            Side::Sell => self.sell.as_mut(),
        }
    }

    /// The current best bid.
    pub fn best_bid(&self) -> HalfQuote {
        self.buy.best_quote()
    }

    /// The current best offer.
    pub fn best_offer(&self) -> HalfQuote {
        self.sell.best_quote()
    }

    /// Number of distinct price levels across both sides.
    pub fn count(&self) -> usize {
        self.buy.count() + self.sell.count()
    }
}

fn make_side(side: Side, kind: SideKind) -> Box<dyn BookSide> {
    match kind {
        SideKind::Map => Box::new(MapSide::new(side)),
        SideKind::Array { max_size } => Box::new(ArraySide::new(side, max_size)),
    }
}
