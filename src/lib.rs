//! # JayBeams core
//!
//! Market-data and distributed-coordination building blocks for
//! low-latency trading infrastructure.
//!
//! Four subsystems make up the core:
//!
//! - [`book`] — an ITCH-5.0 order-book engine that maintains per-symbol
//!   limit-order books from a raw exchange feed.
//! - [`moldudp`] — a pacer that re-serializes ITCH messages into timed
//!   MoldUDP64 datagrams.
//! - [`etcd`] — an asynchronous completion-queue wrapper with a
//!   lease-session and leader-election protocol against an etcd cluster.
//! - [`stats`] — offline feed statistics (inter-arrival, processing
//!   latency, message rate histograms) consumed by the book engine.
//!
//! [`price`] and [`itch`] provide the value types and wire decoders the
//! above are built on. [`admin`] is the dispatch/acceptor surface shared
//! by every long-lived daemon, and [`config`] binds YAML files and CLI
//! flags into the per-subsystem configuration structs.

pub mod admin;
pub mod book;
pub mod config;
pub mod etcd;
pub mod itch;
pub mod moldudp;
pub mod price;
pub mod stats;
pub mod utils;

pub mod prelude {
    //! Commonly used types, re-exported for convenience.

    pub use crate::book::{
        BookSide, BookUpdateEvent, Engine, EngineError, OrderBook, SideError, SideKind,
    };
    pub use crate::config::{AdminConfig, BookConfig, EtcdConfig};
    pub use crate::itch::messages::ItchMessage;
    pub use crate::moldudp::{Pacer, PacerConfig, PacerError};
    pub use crate::price::{Price, PriceError, Side, Symbol, Tick};
}
