// Author: Lukas Bower
// Purpose: Turn raw (target, address, bytes) log records into structured text.
//!
//! [`LogDecoder`] wraps a [`dataset::LogDataset`] loaded once from a CBOR
//! symbol table and exposes [`LogDecoder::decode`]. It is entirely
//! independent of the serial transport in [`crate::manager`] — callers feed
//! it whatever records the instrument's log target produces, however they
//! arrived.

pub mod dataset;
mod format;
mod value;

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use log::trace;
use serde::Serialize;

use crate::error::SymbolTableError;
use dataset::{FormatRecord, LogDataset, ParserAtom};
use value::DecodedValue;

/// Fixed level table indexed by a format record's `level`. See §4.8.
const LEVEL_NAMES: &[&str] = &["INFO", "TRACE ", "WARN ", "ERROR", "FATAL", "PANIC"];

/// Window a `sym` or `pointer` field is resolved against, mirroring
/// [`dataset::VARIABLE_WINDOW`].
const SYMBOL_FORMAT_WIDTH: usize = 8;

/// One decoded log event, corresponding to the tuple the original decoder
/// returns. See §6 ("Application interfaces exposed by the log decoder").
///
/// Implements [`Serialize`] so embedders can export a decoded stream as
/// JSON/CBOR the way `AuditJournalEntry` does for the host audit log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogRecord {
    /// Monotonically increasing count of records this decoder has produced.
    pub count: u64,
    /// Seconds since the decoder was constructed.
    pub timestamp: f64,
    /// One of the fixed level names, or `"<bad level>"`.
    pub level: String,
    /// Source file recorded in the symbol table, or `"?"` for `UNDECODED`.
    pub file: String,
    /// Source line recorded in the symbol table, or `0` for `UNDECODED`.
    pub line: i64,
    /// Fully substituted (or fallback) message text.
    pub text: String,
}

/// Decodes raw log records against a [`LogDataset`]. See §4.8.
pub struct LogDecoder {
    dataset: LogDataset,
    counter: AtomicU64,
}

impl LogDecoder {
    /// Load the symbol table at `path` and build a decoder over it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SymbolTableError> {
        Ok(Self::from_dataset(LogDataset::load(path)?))
    }

    /// Build a decoder over an already-loaded dataset. Exposed so tests and
    /// the demo binary can construct a table in-process.
    pub fn from_dataset(dataset: LogDataset) -> Self {
        Self {
            dataset,
            counter: AtomicU64::new(0),
        }
    }

    /// `(saddr >> 20) & 0xF`. See §4.8.
    pub fn target(&self) -> u32 {
        self.dataset.target()
    }

    /// Read-only access to the underlying symbol table, for callers that
    /// want to inspect `enums`/`variables`/`functions` directly.
    pub fn dataset(&self) -> &LogDataset {
        &self.dataset
    }

    /// Decode one `(target, address, frame_bytes)` record into a
    /// [`LogRecord`]. Never fails: malformed records degrade to an
    /// `UNDECODED` record or an in-text error note rather than an `Err`,
    /// per the error-handling table in §7.
    pub fn decode(&self, target: u32, address: u32, frame_bytes: &[u8]) -> LogRecord {
        let kind = address & 0x3;
        let clean = address & !0x3;
        let count = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let timestamp = self.dataset.reference.elapsed().as_secs_f64();
        trace!("decoding frame kind={kind} addr=0x{clean:08x} target={target}");

        let record = match self.dataset.fmts.get(&clean) {
            Some(FormatRecord::Decoded { level: Some(level), file, line, format, parsers }) => {
                self.decode_fields(*level, file, *line, format, parsers, frame_bytes)
            }
            _ => undecoded(target, address, frame_bytes),
        };

        LogRecord {
            count,
            timestamp,
            level: record.0,
            file: record.1,
            line: record.2,
            text: record.3,
        }
    }

    fn decode_fields(
        &self,
        level: i64,
        file: &str,
        line: i64,
        format: &str,
        parsers: &[ParserAtom],
        frame_bytes: &[u8],
    ) -> (String, String, i64, String) {
        let level_name = LEVEL_NAMES
            .get(level as usize)
            .map(|s| s.to_string())
            .unwrap_or_else(|| "<bad level>".to_string());

        match self.parse_fields(parsers, frame_bytes) {
            Ok(values) => match format::render(format, &values) {
                Ok(text) => (level_name, file.to_string(), line, text),
                Err(_) => {
                    let args_repr = values
                        .iter()
                        .map(DecodedValue::as_display)
                        .collect::<Vec<_>>()
                        .join(", ");
                    let text = format!("{format} (FORMATTING FAILED) [{args_repr}]");
                    (level_name, file.to_string(), line, text)
                }
            },
            Err(error) => {
                let text = format!("{format} [{} - {error}]", hex::encode(frame_bytes));
                (level_name, file.to_string(), line, text)
            }
        }
    }

    fn parse_fields(&self, parsers: &[ParserAtom], frame_bytes: &[u8]) -> Result<Vec<DecodedValue>, String> {
        let mut offset = 0usize;
        let mut values = Vec::with_capacity(parsers.len());

        for atom in parsers {
            let (value, next) = self.parse_one(atom, frame_bytes, offset)?;
            values.push(value);
            offset = next;
        }

        if offset != frame_bytes.len() {
            return Err(format!(
                "{} trailing byte(s) after last parser",
                frame_bytes.len() - offset
            ));
        }

        Ok(values)
    }

    fn parse_one(&self, atom: &ParserAtom, bytes: &[u8], offset: usize) -> Result<(DecodedValue, usize), String> {
        match atom {
            ParserAtom::Int32 => {
                let (v, next) = read_i32(bytes, offset)?;
                Ok((DecodedValue::Int(v as i64), next))
            }
            ParserAtom::Uint32 => {
                let (v, next) = read_u32(bytes, offset)?;
                Ok((DecodedValue::UInt(v as u64), next))
            }
            ParserAtom::Int64 => {
                let (v, next) = read_i64(bytes, offset)?;
                Ok((DecodedValue::Int(v), next))
            }
            ParserAtom::Uint64 => {
                let (v, next) = read_u64(bytes, offset)?;
                Ok((DecodedValue::UInt(v), next))
            }
            ParserAtom::Double => {
                let (v, next) = read_u64(bytes, offset)?;
                Ok((DecodedValue::Double(f64::from_bits(v)), next))
            }
            ParserAtom::Pointer => {
                let (v, next) = read_u32(bytes, offset)?;
                Ok((DecodedValue::Symbol(format!("0x{v:0width$x}", width = SYMBOL_FORMAT_WIDTH)), next))
            }
            ParserAtom::Bytes => Ok((DecodedValue::Bytes(bytes[offset..].to_vec()), bytes.len())),
            ParserAtom::Str => {
                let nul = bytes[offset..]
                    .iter()
                    .position(|&b| b == 0)
                    .ok_or_else(|| "no NUL terminator for string field".to_string())?;
                let s = std::str::from_utf8(&bytes[offset..offset + nul])
                    .map_err(|e| format!("string field is not valid UTF-8: {e}"))?
                    .to_string();
                Ok((DecodedValue::Str(s), offset + nul + 1))
            }
            ParserAtom::Sym => {
                let (addr, next) = read_u32(bytes, offset)?;
                Ok((DecodedValue::Symbol(self.resolve_symbol(addr)), next))
            }
            ParserAtom::Enum(name) => {
                let (raw, next) = read_i32(bytes, offset)?;
                Ok((DecodedValue::Enum(self.resolve_enum(name, raw)), next))
            }
        }
    }

    fn resolve_symbol(&self, addr: u32) -> String {
        if let Some((name, offset)) = self.dataset.lookup_function(addr) {
            return format!("{name}+0x{offset:x}");
        }
        if let Some((name, offset)) = self.dataset.lookup_variable(addr) {
            return format!("{name}+0x{offset:x}");
        }
        format!("0x{addr:0width$x}", width = SYMBOL_FORMAT_WIDTH)
    }

    fn resolve_enum(&self, name: &str, value: i32) -> String {
        let value = value as i64;
        if let Some(members) = self.dataset.enums.get(name).or_else(|| self.dataset.tdenums.get(name)) {
            return members
                .get(&value)
                .cloned()
                .unwrap_or_else(|| format!("<{name}:{value}>"));
        }
        format!("<!{name}:{value}>")
    }
}

fn undecoded(target: u32, address: u32, frame_bytes: &[u8]) -> (String, String, i64, String) {
    (
        "RAW".to_string(),
        "?".to_string(),
        0,
        format!(
            "UNDECODED: TGT={target} ADDR=0x{address:0width$x} FRAME={}",
            hex::encode(frame_bytes),
            width = SYMBOL_FORMAT_WIDTH,
        ),
    )
}

fn read_u32(bytes: &[u8], offset: usize) -> Result<(u32, usize), String> {
    let end = offset + 4;
    let slice = bytes
        .get(offset..end)
        .ok_or_else(|| format!("need 4 bytes at offset {offset}, have {}", bytes.len().saturating_sub(offset)))?;
    Ok((u32::from_le_bytes(slice.try_into().unwrap()), end))
}

fn read_i32(bytes: &[u8], offset: usize) -> Result<(i32, usize), String> {
    let (v, next) = read_u32(bytes, offset)?;
    Ok((v as i32, next))
}

fn read_u64(bytes: &[u8], offset: usize) -> Result<(u64, usize), String> {
    let end = offset + 8;
    let slice = bytes
        .get(offset..end)
        .ok_or_else(|| format!("need 8 bytes at offset {offset}, have {}", bytes.len().saturating_sub(offset)))?;
    Ok((u64::from_le_bytes(slice.try_into().unwrap()), end))
}

fn read_i64(bytes: &[u8], offset: usize) -> Result<(i64, usize), String> {
    let (v, next) = read_u64(bytes, offset)?;
    Ok((v as i64, next))
}
