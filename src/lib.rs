// Author: Lukas Bower
// Purpose: Host-side transport core for the P1150 current-measurement
// instrument: COBS framing, a byte ring, serial worker threads, and the
// symbolic log-frame decoder.
//! Host-side transport core for the P1150 current-measurement instrument.
//!
//! This crate is the hard part of a larger instrument driver: a
//! COBS/CBOR-framed serial link running at roughly 2,500 frames/s. It
//! covers three things, independent of each other and of instrument
//! semantics:
//!
//! - [`cobs`] — zero-free frame encoding/decoding.
//! - [`ring`], [`port`], [`workers`], [`manager`] — the SPSC ring, serial
//!   adapter, worker loops, and [`manager::SerialManager`] that ties them
//!   together into three cooperating threads (reader, deliverer, writer).
//! - [`decoder`] — a CBOR-described symbol table and the decoder that turns
//!   raw `(target, address, bytes)` records into structured log events.
//!
//! Instrument command semantics, calibration sequencing and any user
//! interface are out of scope; callers interact with this crate purely in
//! terms of byte frames via [`queue::FrameQueue`].

#![warn(missing_docs)]

pub mod cobs;
pub mod decoder;
pub mod error;
pub mod manager;
pub mod port;
pub mod queue;
pub mod ring;
pub mod workers;

pub use error::{CobsError, SerialError, SymbolTableError};
pub use manager::SerialManager;
pub use queue::{ChannelQueue, FrameQueue};
