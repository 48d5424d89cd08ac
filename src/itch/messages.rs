//! The seven order-state-relevant ITCH-5.0 message types, plus an
//! opaque passthrough for everything else.

use tracing::error;

use crate::price::{Price, PriceError, Side, Symbol, SymbolError};

/// The 11-byte common header prefixing every ITCH-5.0 message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// The single-byte message type tag (`'A'`, `'E'`, …).
    pub msg_type: u8,
    /// Exchange-assigned locate code for the security.
    pub stock_locate: u16,
    /// Exchange-assigned tracking number for this message.
    pub tracking_number: u16,
    /// Nanoseconds since midnight, as a 48-bit big-endian integer.
    pub timestamp_ns: u64,
}

const HEADER_LEN: usize = 11;
const U48_MASK: u64 = (1 << 48) - 1;

fn read_u48(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf[2..].copy_from_slice(&bytes[..6]);
    u64::from_be_bytes(buf)
}

fn write_u48(value: u64, out: &mut Vec<u8>) {
    let bytes = (value & U48_MASK).to_be_bytes();
    out.extend_from_slice(&bytes[2..]);
}

impl MessageHeader {
    fn decode(bytes: &[u8]) -> Result<Self, ItchError> {
        if bytes.len() < HEADER_LEN {
            return Err(ItchError::Truncated {
                expected: HEADER_LEN,
                got: bytes.len(),
            });
        }
        Ok(MessageHeader {
            msg_type: bytes[0],
            stock_locate: u16::from_be_bytes([bytes[1], bytes[2]]),
            tracking_number: u16::from_be_bytes([bytes[3], bytes[4]]),
            timestamp_ns: read_u48(&bytes[5..11]),
        })
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.msg_type);
        out.extend_from_slice(&self.stock_locate.to_be_bytes());
        out.extend_from_slice(&self.tracking_number.to_be_bytes());
        write_u48(self.timestamp_ns, out);
    }
}

/// Errors decoding an ITCH-5.0 message.
#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone)]
pub enum ItchError {
    /// The buffer was shorter than the fixed layout for its message type
    /// (or shorter than the common header itself).
    #[error("truncated ITCH message: expected at least {expected} bytes, got {got}")]
    Truncated {
        /// Minimum length required.
        expected: usize,
        /// Actual buffer length.
        got: usize,
    },
    /// The buy/sell indicator byte was neither `'B'` nor `'S'`.
    #[error("invalid buy/sell indicator byte {0:#04x}")]
    InvalidSideIndicator(u8),
    /// A price field failed to decode.
    #[error(transparent)]
    Price(#[from] PriceError),
    /// A symbol field failed to decode.
    #[error(transparent)]
    Symbol(#[from] SymbolError),
}

fn encode_side(side: Side) -> u8 {
    match side {
        Side::Buy => b'B',
        Side::Sell => b'S',
    }
}

fn decode_side(byte: u8) -> Result<Side, ItchError> {
    match byte {
        b'B' => Ok(Side::Buy),
        b'S' => Ok(Side::Sell),
        other => Err(ItchError::InvalidSideIndicator(other)),
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes(bytes.try_into().expect("4-byte slice"))
}

fn read_u64(bytes: &[u8]) -> u64 {
    u64::from_be_bytes(bytes.try_into().expect("8-byte slice"))
}

fn read_price(bytes: &[u8]) -> Result<Price, ItchError> {
    Ok(Price::new(read_u32(bytes) as i32)?)
}

fn require_len(bytes: &[u8], expected: usize) -> Result<(), ItchError> {
    if bytes.len() < expected {
        return Err(ItchError::Truncated {
            expected,
            got: bytes.len(),
        });
    }
    Ok(())
}

/// One decoded ITCH-5.0 message.
///
/// The seven variants below are the ones [`crate::book::Engine`] acts
/// on; [`ItchMessage::Other`] carries every other message type as
/// an opaque, already-length-framed byte span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItchMessage {
    /// Stock Directory (`'R'`) — creates an empty book for the symbol.
    SymbolDirectory {
        /// Common header.
        header: MessageHeader,
        /// The security symbol.
        symbol: Symbol,
    },
    /// Add Order (`'A'`) / Add Order with MPID Attribution (`'F'`).
    ///
    /// Both wire types carry identical book-relevant fields; `mpid`
    /// distinguishes which one was decoded so `encode` round-trips.
    AddOrder {
        /// Common header.
        header: MessageHeader,
        /// Exchange-assigned order reference number.
        reference: u64,
        /// BUY or SELL.
        side: Side,
        /// Order quantity.
        shares: u32,
        /// The security symbol.
        symbol: Symbol,
        /// Limit price.
        price: Price,
        /// Market participant attribution, present only for `'F'`.
        mpid: Option<[u8; 4]>,
    },
    /// Order Executed (`'E'`).
    OrderExecuted {
        /// Common header.
        header: MessageHeader,
        /// The order being executed against.
        reference: u64,
        /// Shares executed.
        shares: u32,
        /// Exchange-assigned match number.
        match_number: u64,
    },
    /// Order Executed With Price (`'C'`) — the carried price is
    /// informational only; treated identically to
    /// [`ItchMessage::OrderExecuted`] by the engine.
    OrderExecutedWithPrice {
        /// Common header.
        header: MessageHeader,
        /// The order being executed against.
        reference: u64,
        /// Shares executed.
        shares: u32,
        /// Exchange-assigned match number.
        match_number: u64,
        /// Whether the execution should be reflected in public reports.
        printable: bool,
        /// Informational execution price.
        price: Price,
    },
    /// Order Cancel (`'X'`) — partial cancel.
    OrderCancel {
        /// Common header.
        header: MessageHeader,
        /// The order being reduced.
        reference: u64,
        /// Shares canceled.
        canceled_shares: u32,
    },
    /// Order Delete (`'D'`) — full cancel.
    OrderDelete {
        /// Common header.
        header: MessageHeader,
        /// The order being removed.
        reference: u64,
    },
    /// Order Replace (`'U'`) — cancel-replace.
    OrderReplace {
        /// Common header.
        header: MessageHeader,
        /// The order being replaced.
        old_reference: u64,
        /// The reference number of the replacement order.
        new_reference: u64,
        /// New order quantity.
        shares: u32,
        /// New limit price.
        price: Price,
    },
    /// Any other ITCH-5.0 message type, carried as an opaque,
    /// already-length-framed span.
    Other {
        /// Common header.
        header: MessageHeader,
        /// The bytes following the common header.
        payload: Vec<u8>,
    },
}

impl ItchMessage {
    /// The message's common header.
    pub fn header(&self) -> MessageHeader {
        match self {
            ItchMessage::SymbolDirectory { header, .. }
            | ItchMessage::AddOrder { header, .. }
            | ItchMessage::OrderExecuted { header, .. }
            | ItchMessage::OrderExecutedWithPrice { header, .. }
            | ItchMessage::OrderCancel { header, .. }
            | ItchMessage::OrderDelete { header, .. }
            | ItchMessage::OrderReplace { header, .. }
            | ItchMessage::Other { header, .. } => *header,
        }
    }

    /// Decode one complete message from `bytes`.
    ///
    /// `bytes` must contain exactly one message (the caller — typically
    /// a MoldUDP64 block reader — is responsible for framing). Unknown
    /// message types are not an error: they round-trip through
    /// [`ItchMessage::Other`]. A buffer too short even for the common
    /// header is logged and reported as [`ItchError::Truncated`].
    pub fn decode(bytes: &[u8]) -> Result<Self, ItchError> {
        let header = match MessageHeader::decode(bytes) {
            Ok(h) => h,
            Err(e) => {
                error!(error = %e, "failed to decode ITCH message header");
                return Err(e);
            }
        };
        let body = &bytes[HEADER_LEN..];
        match header.msg_type {
            b'R' => {
                require_len(body, 15)?;
                let symbol = Symbol::from_wire(body[0..8].try_into().unwrap());
                Ok(ItchMessage::SymbolDirectory { header, symbol })
            }
            b'A' | b'F' => {
                let has_mpid = header.msg_type == b'F';
                let fixed_len = if has_mpid { 29 } else { 25 };
                require_len(body, fixed_len)?;
                let reference = read_u64(&body[0..8]);
                let side = decode_side(body[8])?;
                let shares = read_u32(&body[9..13]);
                let symbol = Symbol::from_wire(body[13..21].try_into().unwrap());
                let price = read_price(&body[21..25])?;
                let mpid = if has_mpid {
                    Some(body[25..29].try_into().unwrap())
                } else {
                    None
                };
                Ok(ItchMessage::AddOrder {
                    header,
                    reference,
                    side,
                    shares,
                    symbol,
                    price,
                    mpid,
                })
            }
            b'E' => {
                require_len(body, 20)?;
                let reference = read_u64(&body[0..8]);
                let shares = read_u32(&body[8..12]);
                let match_number = read_u64(&body[12..20]);
                Ok(ItchMessage::OrderExecuted {
                    header,
                    reference,
                    shares,
                    match_number,
                })
            }
            b'C' => {
                require_len(body, 25)?;
                let reference = read_u64(&body[0..8]);
                let shares = read_u32(&body[8..12]);
                let match_number = read_u64(&body[12..20]);
                let printable = body[20] == b'Y';
                let price = read_price(&body[21..25])?;
                Ok(ItchMessage::OrderExecutedWithPrice {
                    header,
                    reference,
                    shares,
                    match_number,
                    printable,
                    price,
                })
            }
            b'X' => {
                require_len(body, 12)?;
                let reference = read_u64(&body[0..8]);
                let canceled_shares = read_u32(&body[8..12]);
                Ok(ItchMessage::OrderCancel {
                    header,
                    reference,
                    canceled_shares,
                })
            }
            b'D' => {
                require_len(body, 8)?;
                let reference = read_u64(&body[0..8]);
                Ok(ItchMessage::OrderDelete { header, reference })
            }
            b'U' => {
                require_len(body, 24)?;
                let old_reference = read_u64(&body[0..8]);
                let new_reference = read_u64(&body[8..16]);
                let shares = read_u32(&body[16..20]);
                let price = read_price(&body[20..24])?;
                Ok(ItchMessage::OrderReplace {
                    header,
                    old_reference,
                    new_reference,
                    shares,
                    price,
                })
            }
            _ => Ok(ItchMessage::Other {
                header,
                payload: body.to_vec(),
            }),
        }
    }

    /// Encode this message back to its wire bytes. Inverse of
    /// [`ItchMessage::decode`]: decoding then encoding any message is the
    /// identity on the bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(40);
        self.header().encode(&mut out);
        match self {
            ItchMessage::SymbolDirectory { symbol, .. } => {
                out.extend_from_slice(&symbol.to_wire());
                out.extend_from_slice(&[0u8; 7]);
            }
            ItchMessage::AddOrder {
                reference,
                side,
                shares,
                symbol,
                price,
                mpid,
                ..
            } => {
                out.extend_from_slice(&reference.to_be_bytes());
                out.push(encode_side(*side));
                out.extend_from_slice(&shares.to_be_bytes());
                out.extend_from_slice(&symbol.to_wire());
                out.extend_from_slice(&price.raw().to_be_bytes());
                if let Some(attribution) = mpid {
                    out.extend_from_slice(attribution);
                }
            }
            ItchMessage::OrderExecuted {
                reference,
                shares,
                match_number,
                ..
            } => {
                out.extend_from_slice(&reference.to_be_bytes());
                out.extend_from_slice(&shares.to_be_bytes());
                out.extend_from_slice(&match_number.to_be_bytes());
            }
            ItchMessage::OrderExecutedWithPrice {
                reference,
                shares,
                match_number,
                printable,
                price,
                ..
            } => {
                out.extend_from_slice(&reference.to_be_bytes());
                out.extend_from_slice(&shares.to_be_bytes());
                out.extend_from_slice(&match_number.to_be_bytes());
                out.push(if *printable { b'Y' } else { b'N' });
                out.extend_from_slice(&price.raw().to_be_bytes());
            }
            ItchMessage::OrderCancel {
                reference,
                canceled_shares,
                ..
            } => {
                out.extend_from_slice(&reference.to_be_bytes());
                out.extend_from_slice(&canceled_shares.to_be_bytes());
            }
            ItchMessage::OrderDelete { reference, .. } => {
                out.extend_from_slice(&reference.to_be_bytes());
            }
            ItchMessage::OrderReplace {
                old_reference,
                new_reference,
                shares,
                price,
                ..
            } => {
                out.extend_from_slice(&old_reference.to_be_bytes());
                out.extend_from_slice(&new_reference.to_be_bytes());
                out.extend_from_slice(&shares.to_be_bytes());
                out.extend_from_slice(&price.raw().to_be_bytes());
            }
            ItchMessage::Other { payload, .. } => {
                out.extend_from_slice(payload);
            }
        }
        out
    }
}
