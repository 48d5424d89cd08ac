//! The flat book-update event emitted on every successful engine
//! operation.

use crate::price::{Price, Side, Symbol};

/// A single book-state change, emitted by [`super::Engine`] on every
/// successful add, reduction, or replace.
///
/// For a plain add/reduce, only `price`/`delta_qty` describe the change
/// and `cxlreplx` is `false`. For a replace, `delta_qty` is the new
/// order's signed quantity and `old_price`/`old_delta_qty` describe the
/// reduction leg of the same atomic event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookUpdateEvent {
    /// Wall-clock time the triggering message was received.
    pub receive_time_ns: u64,
    /// The affected symbol.
    pub symbol: Symbol,
    /// The affected side.
    pub side: Side,
    /// The new/affected price.
    pub price: Price,
    /// Signed quantity change at `price`.
    pub delta_qty: i64,
    /// Whether this event represents a cancel-replace (two legs, one
    /// event).
    pub cxlreplx: bool,
    /// For a replace, the price of the order being replaced.
    pub old_price: Price,
    /// For a replace, the signed quantity change of the reduction leg
    /// (always `<= 0`).
    pub old_delta_qty: i64,
}

impl BookUpdateEvent {
    /// Build a plain (non-replace) event.
    pub fn plain(
        receive_time_ns: u64,
        symbol: Symbol,
        side: Side,
        price: Price,
        delta_qty: i64,
    ) -> Self {
        BookUpdateEvent {
            receive_time_ns,
            symbol,
            side,
            price,
            delta_qty,
            cxlreplx: false,
            old_price: price,
            old_delta_qty: 0,
        }
    }

    /// Build a cancel-replace event: one event, two legs.
    #[allow(clippy::too_many_arguments)]
    pub fn replace(
        receive_time_ns: u64,
        symbol: Symbol,
        side: Side,
        new_price: Price,
        new_qty: u32,
        old_price: Price,
        old_qty: u32,
    ) -> Self {
        BookUpdateEvent {
            receive_time_ns,
            symbol,
            side,
            price: new_price,
            delta_qty: i64::from(new_qty),
            cxlreplx: true,
            old_price,
            old_delta_qty: -i64::from(old_qty),
        }
    }
}
