// Author: Lukas Bower
// Purpose: Error types for the serial transport core and log-frame decoder.

use thiserror::Error;

/// Errors surfaced while decoding a single COBS frame.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CobsError {
    /// A `0x00` byte appeared inside the frame body instead of terminating it.
    #[error("interior zero byte at offset {0}")]
    InteriorZero(usize),
    /// A block's code byte was itself zero.
    #[error("zero code byte at offset {0}")]
    ZeroCode(usize),
    /// A block's code implied more bytes than remained in the input.
    #[error("code at offset {0} overruns the frame")]
    Overrun(usize),
    /// The caller-supplied output buffer is too small for the decoded data.
    #[error("output buffer exhausted after {0} bytes")]
    OutputExhausted(usize),
}

/// Errors surfaced by [`crate::manager::SerialManager::start`] and by the
/// platform serial port adapter.
#[derive(Debug, Error)]
pub enum SerialError {
    /// The serial device could not be opened.
    #[error("failed to open serial port {port}: {source}")]
    PortOpen {
        /// Platform-native port identifier that failed to open.
        port: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The manager was already running when `start` was called a second time.
    #[error("serial manager is already running")]
    AlreadyRunning,
    /// A configuration value (e.g. baud rate) was rejected by the platform.
    #[error("invalid serial configuration: {0}")]
    InvalidConfig(String),
}

/// Errors surfaced while loading a symbol table CBOR file for the log decoder.
#[derive(Debug, Error)]
pub enum SymbolTableError {
    /// The file could not be read from disk.
    #[error("failed to read symbol table {path}: {source}")]
    Io {
        /// Path that failed to load.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The file's bytes were not valid CBOR.
    #[error("failed to parse symbol table as CBOR: {0}")]
    Cbor(String),
    /// The CBOR value was structurally valid but did not match the expected
    /// symbol table shape (e.g. a map key of the wrong type).
    #[error("symbol table has unexpected shape at {0}")]
    Shape(String),
}
