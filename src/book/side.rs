//! The capability contract shared by both book-side implementations
//! (component C2).
//!
//! The map-based and array-based sides are not related by inheritance;
//! they both implement this trait and the engine stores whichever one
//! was selected at construction behind an `Either`.

use crate::book::error::SideError;
use crate::price::{HalfQuote, Price, Side};

/// A one-sided price ladder: a multiset of `(price, quantity)` keyed by
/// tick index, ordered best-to-worst for its [`Side`].
///
/// Implementations must uphold these invariants: every stored quantity
/// is strictly positive, and the empty side reports `(0, 0)` for BUY or
/// `(MAX, 0)` for SELL.
pub trait BookSide: Send {
    /// Which side of the book this ladder represents.
    fn side(&self) -> Side;

    /// Add `qty` units at `price`.
    ///
    /// Returns `Ok(true)` iff the best quote changed.
    ///
    /// # Errors
    /// [`SideError::InvalidParams`] if `qty == 0` or `price` is the
    /// side's empty-side sentinel.
    fn add_order(&mut self, price: Price, qty: u32) -> Result<bool, SideError>;

    /// Remove `qty` units at `price`.
    ///
    /// Returns `Ok(true)` iff the best quote changed. If the stored
    /// quantity at `price` would go negative, the implementation clamps
    /// to zero and removes the level (the caller is expected to log the
    /// anomaly — see [`crate::book::Engine`]).
    ///
    /// # Errors
    /// [`SideError::InvalidReduce`] if no level exists at `price`.
    fn reduce_order(&mut self, price: Price, qty: u32) -> Result<bool, SideError>;

    /// The best (innermost) quote: highest price for BUY, lowest for SELL.
    fn best_quote(&self) -> HalfQuote;

    /// The worst (outermost) quote currently resting on this side.
    fn worst_quote(&self) -> HalfQuote;

    /// Number of distinct price levels on this side.
    fn count(&self) -> usize;
}

/// Which [`BookSide`] implementation to instantiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SideKind {
    /// Ordered associative container keyed by tick index — a correctness
    /// reference, unbounded price dispersion.
    Map,
    /// Fixed-size dense array centered on the inside, with an ordered-map
    /// tail for prices that drift out of the window.
    Array {
        /// Width of the dense window. Must be in `(0, 10000]`.
        max_size: usize,
    },
}

impl Default for SideKind {
    fn default() -> Self {
        SideKind::Array { max_size: 5_000 }
    }
}
