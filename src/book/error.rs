//! Error types for the order-book side and engine (component C2/C3).

use crate::price::Price;

/// Errors from a single [`super::BookSide`] operation.
#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone, Copy)]
pub enum SideError {
    /// `add_order`/`reduce_order` received `qty == 0`, or a price outside
    /// the legal range.
    #[error("invalid params: price {price:?}, quantity {quantity}")]
    InvalidParams {
        /// The offending price.
        price: Price,
        /// The offending quantity.
        quantity: u32,
    },

    /// `reduce_order` targeted a price level that does not exist.
    #[error("invalid reduce: no resting quantity at {price:?}")]
    InvalidReduce {
        /// The price level that was missing.
        price: Price,
    },
}

/// Errors surfaced by [`super::Engine`] while applying an ITCH message.
///
/// All variants are "feed anomalies": the engine logs these at `warn`
/// and drops the offending message rather than propagating a hard
/// failure, so callers rarely need to match on this type directly — it
/// exists for observability and tests.
#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone)]
pub enum EngineError {
    /// An add-order message reused a reference number already live in
    /// the order index.
    #[error("duplicate order reference {reference}")]
    DuplicateOrder {
        /// The reused order reference number.
        reference: u64,
    },

    /// A reduction or replace referenced an order not present in the
    /// order index.
    #[error("order {reference} not found")]
    OrderNotFound {
        /// The missing order reference number.
        reference: u64,
    },

    /// A replace's new reference number was already live.
    #[error("replace target reference {reference} already exists")]
    ReplaceTargetExists {
        /// The reused new order reference number.
        reference: u64,
    },

    /// The underlying side rejected the operation.
    #[error(transparent)]
    Side(#[from] SideError),
}
