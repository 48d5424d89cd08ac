//! The book engine (C3): maintains per-symbol order books and an
//! order-reference index from a stream of ITCH-5.0 messages, emitting a
//! [`BookUpdateEvent`] on every successful mutation.

use std::collections::HashMap;

use tracing::warn;

use crate::book::error::EngineError;
use crate::book::event::BookUpdateEvent;
use crate::book::side::SideKind;
use crate::book::{BookSide, OrderBook};
use crate::itch::messages::ItchMessage;
use crate::price::{Price, Side, Symbol};

#[derive(Debug, Clone, Copy)]
struct OrderRow {
    symbol: Symbol,
    side: Side,
    price: Price,
    remaining: u32,
}

/// Per-symbol order books plus the order-reference index that routes
/// reductions.
pub struct Engine {
    side_kind: SideKind,
    books: HashMap<Symbol, OrderBook>,
    orders: HashMap<u64, OrderRow>,
    callback: Option<Box<dyn FnMut(&BookUpdateEvent) + Send>>,
}

impl Engine {
    /// Construct an engine with no books yet — each will be created on
    /// its first symbol-directory or add-order message.
    pub fn new(side_kind: SideKind) -> Self {
        Engine {
            side_kind,
            books: HashMap::new(),
            orders: HashMap::new(),
            callback: None,
        }
    }

    /// Construct an engine pre-populated from a known symbol directory.
    pub fn with_symbol_directory(
        side_kind: SideKind,
        symbols: impl IntoIterator<Item = Symbol>,
    ) -> Self {
        let mut engine = Engine::new(side_kind);
        for symbol in symbols {
            engine.books.entry(symbol).or_insert_with(|| OrderBook::new(side_kind));
        }
        engine
    }

    /// Register the callback invoked with every [`BookUpdateEvent`],
    /// e.g. a downstream encoder.
    pub fn on_update(&mut self, callback: impl FnMut(&BookUpdateEvent) + Send + 'static) {
        self.callback = Some(Box::new(callback));
    }

    /// Look up the book for `symbol`, if one has been created.
    pub fn book(&self, symbol: Symbol) -> Option<&OrderBook> {
        self.books.get(&symbol)
    }

    /// Number of order references currently live in the order index.
    pub fn order_count(&self) -> usize {
        self.orders.len()
    }

    fn emit(&mut self, event: BookUpdateEvent) {
        if let Some(callback) = self.callback.as_mut() {
            callback(&event);
        }
    }

    /// Apply one decoded ITCH-5.0 message.
    ///
    /// `receive_time_ns` is the host's wall-clock receive time (distinct
    /// from the message's own embedded timestamp), carried into the
    /// emitted [`BookUpdateEvent`]. Anomalies are logged at `warn` and
    /// reported as `Err` without leaving any partially-applied state;
    /// callers of a tolerant pipeline are expected to log the error and
    /// continue to the next message.
    pub fn handle(&mut self, receive_time_ns: u64, message: &ItchMessage) -> Result<(), EngineError> {
        match message {
            ItchMessage::SymbolDirectory { symbol, .. } => {
                self.books
                    .entry(*symbol)
                    .or_insert_with(|| OrderBook::new(self.side_kind));
                Ok(())
            }
            ItchMessage::AddOrder {
                reference,
                side,
                shares,
                symbol,
                price,
                ..
            } => self.add_order(receive_time_ns, *reference, *side, *shares, *symbol, *price),
            ItchMessage::OrderExecuted {
                reference, shares, ..
            } => self.apply_reduction(receive_time_ns, *reference, *shares),
            ItchMessage::OrderExecutedWithPrice {
                reference, shares, ..
            } => self.apply_reduction(receive_time_ns, *reference, *shares),
            ItchMessage::OrderCancel {
                reference,
                canceled_shares,
                ..
            } => self.apply_reduction(receive_time_ns, *reference, *canceled_shares),
            ItchMessage::OrderDelete { reference, .. } => self.order_delete(receive_time_ns, *reference),
            ItchMessage::OrderReplace {
                old_reference,
                new_reference,
                shares,
                price,
                ..
            } => self.replace(receive_time_ns, *old_reference, *new_reference, *shares, *price),
            ItchMessage::Other { .. } => Ok(()),
        }
    }

    fn add_order(
        &mut self,
        receive_time_ns: u64,
        reference: u64,
        side: Side,
        shares: u32,
        symbol: Symbol,
        price: Price,
    ) -> Result<(), EngineError> {
        if self.orders.contains_key(&reference) {
            warn!(reference, "duplicate add-order reference, dropping message");
            return Err(EngineError::DuplicateOrder { reference });
        }
        let book = self
            .books
            .entry(symbol)
            .or_insert_with(|| OrderBook::new(self.side_kind));
        book.side_mut(side).add_order(price, shares)?;
        self.orders.insert(
            reference,
            OrderRow {
                symbol,
                side,
                price,
                remaining: shares,
            },
        );
        self.emit(BookUpdateEvent::plain(
            receive_time_ns,
            symbol,
            side,
            price,
            i64::from(shares),
        ));
        Ok(())
    }

    fn order_delete(&mut self, receive_time_ns: u64, reference: u64) -> Result<(), EngineError> {
        let Some(row) = self.orders.get(&reference).copied() else {
            warn!(reference, "delete for unknown order reference, dropping message");
            return Err(EngineError::OrderNotFound { reference });
        };
        self.apply_reduction(receive_time_ns, reference, row.remaining)
    }

    fn apply_reduction(
        &mut self,
        receive_time_ns: u64,
        reference: u64,
        requested: u32,
    ) -> Result<(), EngineError> {
        let Some(row) = self.orders.get(&reference).copied() else {
            warn!(reference, "reduction for unknown order reference, dropping message");
            return Err(EngineError::OrderNotFound { reference });
        };
        let applied = if requested > row.remaining {
            warn!(
                reference,
                requested,
                available = row.remaining,
                "reduction exceeds resting quantity, clamping"
            );
            row.remaining
        } else {
            requested
        };
        let book = self
            .books
            .get_mut(&row.symbol)
            .expect("an indexed order always has a book");
        book.side_mut(row.side).reduce_order(row.price, applied)?;

        let remaining_after = row.remaining - applied;
        if remaining_after == 0 {
            self.orders.remove(&reference);
        } else {
            self.orders.get_mut(&reference).expect("just looked up").remaining = remaining_after;
        }
        self.emit(BookUpdateEvent::plain(
            receive_time_ns,
            row.symbol,
            row.side,
            row.price,
            -i64::from(applied),
        ));
        Ok(())
    }

    fn replace(
        &mut self,
        receive_time_ns: u64,
        old_reference: u64,
        new_reference: u64,
        shares: u32,
        price: Price,
    ) -> Result<(), EngineError> {
        if self.orders.contains_key(&new_reference) {
            warn!(
                new_reference,
                "replace target reference already exists, dropping message"
            );
            return Err(EngineError::ReplaceTargetExists {
                reference: new_reference,
            });
        }
        let Some(old_row) = self.orders.get(&old_reference).copied() else {
            warn!(old_reference, "replace for unknown original order, dropping message");
            return Err(EngineError::OrderNotFound {
                reference: old_reference,
            });
        };
        if shares == 0 || price == old_row.side.empty_price() {
            return Err(EngineError::Side(crate::book::error::SideError::InvalidParams {
                price,
                quantity: shares,
            }));
        }

        let book = self
            .books
            .get_mut(&old_row.symbol)
            .expect("an indexed order always has a book");
        // Both legs are now guaranteed to succeed: the reduction removes
        // exactly the resting quantity the index says is there, and the
        // add was validated above — so the two mutations below cannot
        // leave the book half-updated.
        book.side_mut(old_row.side)
            .reduce_order(old_row.price, old_row.remaining)?;
        book.side_mut(old_row.side).add_order(price, shares)?;

        self.orders.remove(&old_reference);
        self.orders.insert(
            new_reference,
            OrderRow {
                symbol: old_row.symbol,
                side: old_row.side,
                price,
                remaining: shares,
            },
        );
        self.emit(BookUpdateEvent::replace(
            receive_time_ns,
            old_row.symbol,
            old_row.side,
            price,
            shares,
            old_row.price,
            old_row.remaining,
        ));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::itch::messages::MessageHeader;
    use crate::price::HalfQuote;
    use std::sync::{Arc, Mutex};

    fn header(msg_type: u8) -> MessageHeader {
        MessageHeader {
            msg_type,
            stock_locate: 1,
            tracking_number: 1,
            timestamp_ns: 0,
        }
    }

    fn sym(s: &str) -> Symbol {
        Symbol::new(s).unwrap()
    }

    fn px(raw: i32) -> Price {
        Price::new(raw).unwrap()
    }

    #[test]
    fn simple_add_execute_delete() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let events_cb = events.clone();
        let mut engine = Engine::new(SideKind::Map);
        engine.on_update(move |e| events_cb.lock().unwrap().push(*e));

        let symbol = sym("HSART");
        engine
            .handle(
                0,
                &ItchMessage::SymbolDirectory {
                    header: header(b'R'),
                    symbol,
                },
            )
            .unwrap();
        let book = engine.book(symbol).unwrap();
        assert_eq!(book.best_bid(), HalfQuote::empty(Side::Buy));
        assert_eq!(book.best_offer(), HalfQuote::empty(Side::Sell));

        engine
            .handle(
                1,
                &ItchMessage::AddOrder {
                    header: header(b'A'),
                    reference: 2,
                    side: Side::Buy,
                    shares: 100,
                    symbol,
                    price: px(100000),
                    mpid: None,
                },
            )
            .unwrap();
        let book = engine.book(symbol).unwrap();
        assert_eq!(
            book.best_bid(),
            HalfQuote {
                price: px(100000),
                quantity: 100
            }
        );
        assert_eq!(book.best_offer(), HalfQuote::empty(Side::Sell));

        engine
            .handle(
                2,
                &ItchMessage::AddOrder {
                    header: header(b'A'),
                    reference: 3,
                    side: Side::Sell,
                    shares: 100,
                    symbol,
                    price: px(100100),
                    mpid: None,
                },
            )
            .unwrap();
        let book = engine.book(symbol).unwrap();
        assert_eq!(
            book.best_offer(),
            HalfQuote {
                price: px(100100),
                quantity: 100
            }
        );

        engine
            .handle(
                3,
                &ItchMessage::OrderExecuted {
                    header: header(b'E'),
                    reference: 2,
                    shares: 50,
                    match_number: 1,
                },
            )
            .unwrap();
        let book = engine.book(symbol).unwrap();
        assert_eq!(
            book.best_bid(),
            HalfQuote {
                price: px(100000),
                quantity: 50
            }
        );

        engine
            .handle(
                4,
                &ItchMessage::OrderDelete {
                    header: header(b'D'),
                    reference: 3,
                },
            )
            .unwrap();
        let book = engine.book(symbol).unwrap();
        assert_eq!(book.best_offer(), HalfQuote::empty(Side::Sell));
        assert_eq!(
            book.best_bid(),
            HalfQuote {
                price: px(100000),
                quantity: 50
            }
        );

        // spec.md S1 describes "5" values in its best-bid/best-offer
        // sequence, but that count includes the initial empty state before
        // any message is applied; the symbol-directory message itself emits
        // no event per §4.3 ("Symbol directory: create an empty book...").
        // Four messages mutate the book (2 adds, 1 execute, 1 delete), so
        // four events is the state-transition count behind those 5 states.
        let recorded = events.lock().unwrap();
        assert_eq!(recorded.len(), 4);
        let last = recorded.last().unwrap();
        assert_eq!(last.side, Side::Sell);
        assert_eq!(last.delta_qty, -100);
    }

    #[test]
    fn replace_is_one_atomic_event() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let events_cb = events.clone();
        let mut engine = Engine::new(SideKind::Map);
        engine.on_update(move |e| events_cb.lock().unwrap().push(*e));

        let symbol = sym("HSART");
        engine
            .handle(
                0,
                &ItchMessage::AddOrder {
                    header: header(b'A'),
                    reference: 1,
                    side: Side::Buy,
                    shares: 500,
                    symbol,
                    price: px(100000),
                    mpid: None,
                },
            )
            .unwrap();

        engine
            .handle(
                1,
                &ItchMessage::OrderReplace {
                    header: header(b'U'),
                    old_reference: 1,
                    new_reference: 3,
                    shares: 600,
                    price: px(100100),
                },
            )
            .unwrap();

        let recorded = events.lock().unwrap();
        assert_eq!(recorded.len(), 2);
        let replace_event = recorded[1];
        assert!(replace_event.cxlreplx);
        assert_eq!(replace_event.old_price, px(100000));
        assert_eq!(replace_event.old_delta_qty, -500);
        assert_eq!(replace_event.price, px(100100));
        assert_eq!(replace_event.delta_qty, 600);

        let book = engine.book(symbol).unwrap();
        assert_eq!(book.best_bid(), HalfQuote::empty(Side::Buy));
        assert_eq!(
            book.side(Side::Buy).count(),
            1,
            "the replacement order should be the only resting level"
        );
    }

    #[test]
    fn duplicate_add_is_rejected_and_state_is_unchanged() {
        let mut engine = Engine::new(SideKind::Map);
        let symbol = sym("HSART");
        engine
            .handle(
                0,
                &ItchMessage::AddOrder {
                    header: header(b'A'),
                    reference: 1,
                    side: Side::Buy,
                    shares: 10,
                    symbol,
                    price: px(100000),
                    mpid: None,
                },
            )
            .unwrap();
        let err = engine
            .handle(
                1,
                &ItchMessage::AddOrder {
                    header: header(b'A'),
                    reference: 1,
                    side: Side::Buy,
                    shares: 20,
                    symbol,
                    price: px(100100),
                    mpid: None,
                },
            )
            .unwrap_err();
        assert_eq!(err, EngineError::DuplicateOrder { reference: 1 });
        assert_eq!(
            engine.book(symbol).unwrap().best_bid(),
            HalfQuote {
                price: px(100000),
                quantity: 10
            }
        );
    }

    #[test]
    fn reduction_of_missing_order_is_reported_and_dropped() {
        let mut engine = Engine::new(SideKind::Map);
        let err = engine
            .handle(
                0,
                &ItchMessage::OrderDelete {
                    header: header(b'D'),
                    reference: 99,
                },
            )
            .unwrap_err();
        assert_eq!(err, EngineError::OrderNotFound { reference: 99 });
    }

    #[test]
    fn oversized_execution_clamps_to_remaining() {
        let mut engine = Engine::new(SideKind::Map);
        let symbol = sym("HSART");
        engine
            .handle(
                0,
                &ItchMessage::AddOrder {
                    header: header(b'A'),
                    reference: 1,
                    side: Side::Buy,
                    shares: 10,
                    symbol,
                    price: px(100000),
                    mpid: None,
                },
            )
            .unwrap();
        engine
            .handle(
                1,
                &ItchMessage::OrderExecuted {
                    header: header(b'E'),
                    reference: 1,
                    shares: 1_000,
                    match_number: 1,
                },
            )
            .unwrap();
        assert_eq!(engine.order_count(), 0);
        assert_eq!(
            engine.book(symbol).unwrap().best_bid(),
            HalfQuote::empty(Side::Buy)
        );
    }

    #[test]
    fn other_message_types_are_silently_consumed() {
        let mut engine = Engine::new(SideKind::Map);
        let msg = ItchMessage::Other {
            header: header(b'S'),
            payload: vec![1, 2, 3],
        };
        engine.handle(0, &msg).unwrap();
        assert_eq!(engine.order_count(), 0);
    }
}
