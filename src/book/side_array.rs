//! Array-based [`BookSide`]: a dense window of recent-to-inside prices
//! backed by a `Vec`, with an ordered-map "tail" for prices that drift
//! out of the window.
//!
//! Updates near the inside are O(1); updates far from the inside fall
//! back to the tail map and cost O(log n). Market-data traffic
//! concentrates near the inside, which is the whole point of the
//! layout.

use std::collections::BTreeMap;

use tracing::warn;

use crate::book::error::SideError;
use crate::book::side::BookSide;
use crate::price::{HalfQuote, Price, Side, Tick, max_legal_tick, price_to_tick, tick_to_price};

/// Dense-window + tail-map book side. See module docs above.
pub struct ArraySide {
    side: Side,
    max_size: usize,
    /// Quantity at each offset from `tk_begin_top`, growing best-ward.
    top_levels: Vec<u32>,
    /// Prices strictly worse than `tk_begin_top`, keyed by tick.
    tail: BTreeMap<i64, u32>,
    /// Tick at offset 0 of `top_levels` — the worst price the dense
    /// window currently spans.
    tk_begin_top: i64,
    /// The current best (inside) tick, or `None` if the side is empty.
    tk_inside: Option<i64>,
}

impl ArraySide {
    /// Construct an empty side with the given dense-window width.
    ///
    /// `max_size` must be in `(0, 10000]` — the caller (book/config
    /// construction) is responsible for validating that bound; this
    /// constructor only guards against the degenerate zero-width case
    /// that would make every offset computation invalid.
    pub fn new(side: Side, max_size: usize) -> Self {
        assert!(max_size > 0, "array book side requires max_size > 0");
        ArraySide {
            side,
            max_size,
            top_levels: vec![0; max_size],
            tail: BTreeMap::new(),
            tk_begin_top: 0,
            tk_inside: None,
        }
    }

    fn dir(&self) -> i64 {
        match self.side {
            Side::Buy => 1,
            Side::Sell => -1,
        }
    }

    fn offset(&self, tick: i64) -> i64 {
        (tick - self.tk_begin_top) * self.dir()
    }

    fn tick_at_offset(&self, offset: i64) -> i64 {
        self.tk_begin_top + offset * self.dir()
    }

    /// The best tail entry — the tail price closest to the dense window.
    fn tail_best(&self) -> Option<i64> {
        match self.side {
            Side::Buy => self.tail.keys().next_back().copied(),
            Side::Sell => self.tail.keys().next().copied(),
        }
    }

    /// The worst tail entry — the tail price farthest from the inside.
    fn tail_worst(&self) -> Option<i64> {
        match self.side {
            Side::Buy => self.tail.keys().next().copied(),
            Side::Sell => self.tail.keys().next_back().copied(),
        }
    }

    /// Recenter the dense window so `new_inside` sits at offset
    /// `max_size / 2` (clamped to the legal tick domain), spilling
    /// evicted entries into the tail and migrating tail entries that
    /// now fall inside the new window back into `top_levels`.
    fn recenter(&mut self, new_inside: i64) {
        let half = (self.max_size / 2) as i64;
        let dir = self.dir();
        let tick_max = i64::from(max_legal_tick().0);
        let (lo, hi) = if dir == 1 {
            (0i64, tick_max - self.max_size as i64 + 1)
        } else {
            (self.max_size as i64 - 1, tick_max)
        };
        let desired = new_inside - half * dir;
        let new_begin = desired.clamp(lo.min(hi), lo.max(hi));

        let old_begin = self.tk_begin_top;
        let old_top = std::mem::replace(&mut self.top_levels, vec![0u32; self.max_size]);
        for (offset, qty) in old_top.into_iter().enumerate() {
            if qty == 0 {
                continue;
            }
            let tick = old_begin + (offset as i64) * dir;
            let new_offset = (tick - new_begin) * dir;
            if (0..self.max_size as i64).contains(&new_offset) {
                self.top_levels[new_offset as usize] = qty;
            } else {
                *self.tail.entry(tick).or_insert(0) += qty;
            }
        }
        self.tk_begin_top = new_begin;

        let migrate: Vec<i64> = self
            .tail
            .keys()
            .copied()
            .filter(|&tick| {
                let off = (tick - new_begin) * dir;
                (0..self.max_size as i64).contains(&off)
            })
            .collect();
        for tick in migrate {
            let qty = self.tail.remove(&tick).expect("key just observed");
            let off = (tick - new_begin) * dir;
            self.top_levels[off as usize] += qty;
        }
    }

    fn price_at(&self, tick: i64) -> Price {
        tick_to_price(Tick(tick as u32))
    }
}

impl BookSide for ArraySide {
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
        let tick = i64::from(price_to_tick(price).0);

        let Some(inside) = self.tk_inside else {
            self.recenter(tick);
            self.tk_inside = Some(tick);
            let off = self.offset(tick) as usize;
            self.top_levels[off] += qty;
            return Ok(true);
        };

        let off_t = self.offset(tick);
        if off_t < 0 {
            *self.tail.entry(tick).or_insert(0) += qty;
            return Ok(false);
        }

        let off_inside = self.offset(inside);
        if off_t <= off_inside {
            self.top_levels[off_t as usize] += qty;
            return Ok(false);
        }

        if off_t < self.max_size as i64 {
            self.top_levels[off_t as usize] += qty;
            self.tk_inside = Some(tick);
            return Ok(true);
        }

        self.recenter(tick);
        self.tk_inside = Some(tick);
        let off = self.offset(tick) as usize;
        self.top_levels[off] += qty;
        Ok(true)
    }

    fn reduce_order(&mut self, price: Price, qty: u32) -> Result<bool, SideError> {
        if qty == 0 || price == self.side.empty_price() {
            return Err(SideError::InvalidParams {
                price,
                quantity: qty,
            });
        }
        let tick = i64::from(price_to_tick(price).0);

        let Some(inside) = self.tk_inside else {
            return Err(SideError::InvalidReduce { price });
        };

        let off_t = self.offset(tick);
        if off_t < 0 {
            let Some(current) = self.tail.get(&tick).copied() else {
                return Err(SideError::InvalidReduce { price });
            };
            if qty >= current {
                if qty > current {
                    warn!(
                        price = %price,
                        requested = qty,
                        available = current,
                        "reduce exceeds resting tail quantity, clamping to zero"
                    );
                }
                self.tail.remove(&tick);
            } else {
                self.tail.insert(tick, current - qty);
            }
            return Ok(false);
        }

        let off_inside = self.offset(inside);
        if off_t > off_inside {
            return Err(SideError::InvalidReduce { price });
        }

        let idx = off_t as usize;
        let current = self.top_levels[idx];
        if current == 0 {
            return Err(SideError::InvalidReduce { price });
        }
        let new_val = if qty > current {
            warn!(
                price = %price,
                requested = qty,
                available = current,
                "reduce exceeds resting quantity, clamping to zero"
            );
            0
        } else {
            current - qty
        };
        self.top_levels[idx] = new_val;

        if tick != inside {
            return Ok(false);
        }
        if new_val > 0 {
            return Ok(false);
        }

        // The inside level emptied out — find the next best price.
        let mut scan = idx;
        while scan > 0 {
            scan -= 1;
            if self.top_levels[scan] != 0 {
                self.tk_inside = Some(self.tick_at_offset(scan as i64));
                return Ok(true);
            }
        }
        match self.tail_best() {
            Some(next) => {
                self.recenter(next);
                self.tk_inside = Some(next);
            }
            None => {
                self.tk_inside = None;
            }
        }
        Ok(true)
    }

    fn best_quote(&self) -> HalfQuote {
        match self.tk_inside {
            None => HalfQuote::empty(self.side),
            Some(tick) => HalfQuote {
                price: self.price_at(tick),
                quantity: self.top_levels[self.offset(tick) as usize],
            },
        }
    }

    fn worst_quote(&self) -> HalfQuote {
        let Some(_inside) = self.tk_inside else {
            return HalfQuote::empty(self.side);
        };
        if let Some(tick) = self.tail_worst() {
            return HalfQuote {
                price: self.price_at(tick),
                quantity: self.tail[&tick],
            };
        }
        for (offset, &qty) in self.top_levels.iter().enumerate() {
            if qty != 0 {
                return HalfQuote {
                    price: self.price_at(self.tick_at_offset(offset as i64)),
                    quantity: qty,
                };
            }
        }
        HalfQuote::empty(self.side)
    }

    fn count(&self) -> usize {
        self.tail.len() + self.top_levels.iter().filter(|&&q| q != 0).count()
    }
}
