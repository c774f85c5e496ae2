// Author: Lukas Bower
// Purpose: CBOR-loaded symbol table backing the log-frame decoder.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use ciborium::value::{Integer, Value};

use crate::error::SymbolTableError;

/// Window (in address units) within which a `vars` lookup considers a
/// preceding entry "nearest" rather than unrelated. See §3.
pub const VARIABLE_WINDOW: u32 = 0x3000;

/// A single parser atom from a format record's field list, pre-compiled at
/// load time (string atoms and `["enum", name]` pairs both become a single
/// enum variant rather than being re-parsed on every decode call).
#[derive(Debug, Clone, PartialEq)]
pub enum ParserAtom {
    /// Signed 32-bit little-endian integer.
    Int32,
    /// Unsigned 32-bit little-endian integer.
    Uint32,
    /// Signed 64-bit little-endian integer.
    Int64,
    /// Unsigned 64-bit little-endian integer.
    Uint64,
    /// 64-bit little-endian IEEE-754 float.
    Double,
    /// 32-bit little-endian address, formatted as `0x{:08x}`.
    Pointer,
    /// Consumes the entire remainder of the frame.
    Bytes,
    /// NUL-terminated UTF-8 string.
    Str,
    /// 32-bit little-endian address resolved against `functions`/`variables`.
    Sym,
    /// 32-bit little-endian signed value resolved against the named enum.
    Enum(String),
}

/// One entry of the `fmts` table.
#[derive(Debug, Clone)]
pub enum FormatRecord {
    /// The opaque 3-tuple form; always decodes to an `UNDECODED` record.
    Opaque,
    /// The 5-tuple form. `level` is `None` when the symbol table stores a
    /// CBOR null there, which also forces `UNDECODED` per §4.8.
    Decoded {
        /// Log severity level index into the fixed level table.
        level: Option<i64>,
        /// Source file the log call site is in.
        file: String,
        /// Source line the log call site is at.
        line: i64,
        /// Format string with positional `%`-style placeholders.
        format: String,
        /// Pre-compiled field parsers, in argument order.
        parsers: Vec<ParserAtom>,
    },
}

/// Immutable symbol table bundle loaded once from a CBOR file. See §3 and
/// §6 ("Symbol table file format").
pub struct LogDataset {
    /// `name -> (value -> member name)`.
    pub enums: HashMap<String, HashMap<i64, String>>,
    /// Typedef enums, same shape as `enums`, searched as a fallback.
    pub tdenums: HashMap<String, HashMap<i64, String>>,
    /// `address -> name`, searched by nearest-preceding address.
    pub variables: BTreeMap<u32, String>,
    /// `(low, high, name)`, sorted by `low`, searched by containing range.
    pub functions: Vec<(u32, u32, String)>,
    /// Raw `saddr` metadata; bits 20..23 are the target id.
    pub saddr: u32,
    /// `address -> format record`.
    pub fmts: HashMap<u32, FormatRecord>,
    /// Reference monotonic instant captured at construction; frame
    /// timestamps are deltas against this.
    pub(crate) reference: std::time::Instant,
}

impl LogDataset {
    /// Load and compile a symbol table from the CBOR file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SymbolTableError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| SymbolTableError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_cbor_bytes(&bytes)
    }

    /// Parse and compile a symbol table already read into memory. Exposed
    /// for tests that build a fixture in-process rather than via a file.
    pub fn from_cbor_bytes(bytes: &[u8]) -> Result<Self, SymbolTableError> {
        let value: Value =
            ciborium::de::from_reader(bytes).map_err(|e| SymbolTableError::Cbor(e.to_string()))?;
        Self::from_value(value)
    }

    fn from_value(value: Value) -> Result<Self, SymbolTableError> {
        let top = value
            .into_map()
            .map_err(|_| SymbolTableError::Shape("top-level value is not a map".into()))?;
        let mut top: HashMap<String, Value> = top
            .into_iter()
            .map(|(k, v)| {
                let key = k
                    .into_text()
                    .map_err(|_| SymbolTableError::Shape("top-level key is not a string".into()))?;
                Ok((key, v))
            })
            .collect::<Result<_, SymbolTableError>>()?;

        let enums = parse_enum_table(top.remove("enums").unwrap_or(Value::Map(vec![])))?;
        let tdenums = parse_enum_table(top.remove("tdenums").unwrap_or(Value::Map(vec![])))?;
        let variables = parse_vars(top.remove("vars").unwrap_or(Value::Map(vec![])))?;
        let functions = parse_fns(top.remove("fns").unwrap_or(Value::Map(vec![])))?;
        let saddr = parse_int(top.remove("saddr").unwrap_or(Value::Integer(0.into())), "saddr")? as u32;
        let fmts = parse_fmts(top.remove("fmts").unwrap_or(Value::Map(vec![])))?;

        Ok(Self {
            enums,
            tdenums,
            variables,
            functions,
            saddr,
            fmts,
            reference: std::time::Instant::now(),
        })
    }

    /// `(saddr >> 20) & 0xF`. See §4.8.
    pub fn target(&self) -> u32 {
        (self.saddr >> 20) & 0xF
    }

    /// Look up the containing function range for `address`, masking its low
    /// bit first (Thumb/ARM-style function pointer convention carried over
    /// from the original symbol table format).
    pub fn lookup_function(&self, address: u32) -> Option<(&str, u32)> {
        let masked = address & !1;
        // `functions` is sorted by `low`; binary-search the greatest entry
        // whose `low <= masked`, then check it actually contains `masked`.
        let idx = self.functions.partition_point(|(low, _, _)| *low <= masked);
        if idx == 0 {
            return None;
        }
        let (low, high, name) = &self.functions[idx - 1];
        if masked >= *low && masked < *high {
            Some((name.as_str(), masked - low))
        } else {
            None
        }
    }

    /// Look up the nearest variable at or before `address`, within
    /// [`VARIABLE_WINDOW`].
    pub fn lookup_variable(&self, address: u32) -> Option<(&str, u32)> {
        self.variables
            .range(..=address)
            .next_back()
            .filter(|(base, _)| address - **base <= VARIABLE_WINDOW)
            .map(|(base, name)| (name.as_str(), address - base))
    }
}

fn parse_int(value: Value, field: &str) -> Result<i128, SymbolTableError> {
    match value {
        Value::Integer(i) => Ok(i.into()),
        _ => Err(SymbolTableError::Shape(format!("{field} is not an integer"))),
    }
}

fn integer_to_i64(i: Integer) -> i64 {
    let wide: i128 = i.into();
    wide as i64
}

fn parse_enum_table(value: Value) -> Result<HashMap<String, HashMap<i64, String>>, SymbolTableError> {
    let map = value
        .into_map()
        .map_err(|_| SymbolTableError::Shape("enum table is not a map".into()))?;
    let mut out = HashMap::with_capacity(map.len());
    for (k, v) in map {
        let name = k
            .into_text()
            .map_err(|_| SymbolTableError::Shape("enum name is not a string".into()))?;
        let members = v
            .into_map()
            .map_err(|_| SymbolTableError::Shape(format!("enum {name} members are not a map")))?;
        let mut member_map = HashMap::with_capacity(members.len());
        for (mk, mv) in members {
            let value = match mk {
                Value::Integer(i) => integer_to_i64(i),
                _ => {
                    return Err(SymbolTableError::Shape(format!(
                        "enum {name} member key is not an integer"
                    )))
                }
            };
            let name_str = mv
                .into_text()
                .map_err(|_| SymbolTableError::Shape(format!("enum {name} member value is not a string")))?;
            member_map.insert(value, name_str);
        }
        out.insert(name, member_map);
    }
    Ok(out)
}

fn parse_vars(value: Value) -> Result<BTreeMap<u32, String>, SymbolTableError> {
    let map = value
        .into_map()
        .map_err(|_| SymbolTableError::Shape("vars is not a map".into()))?;
    let mut out = BTreeMap::new();
    for (k, v) in map {
        let addr = match k {
            Value::Integer(i) => integer_to_i64(i) as u32,
            _ => return Err(SymbolTableError::Shape("vars key is not an integer".into())),
        };
        let name = v
            .into_text()
            .map_err(|_| SymbolTableError::Shape("vars value is not a string".into()))?;
        out.insert(addr, name);
    }
    Ok(out)
}

fn parse_fns(value: Value) -> Result<Vec<(u32, u32, String)>, SymbolTableError> {
    let map = value
        .into_map()
        .map_err(|_| SymbolTableError::Shape("fns is not a map".into()))?;
    let mut out = Vec::with_capacity(map.len());
    for (k, v) in map {
        let pair = k
            .into_array()
            .map_err(|_| SymbolTableError::Shape("fns key is not a 2-array".into()))?;
        if pair.len() != 2 {
            return Err(SymbolTableError::Shape("fns key is not a 2-array".into()));
        }
        let mut it = pair.into_iter();
        let low = match it.next().unwrap() {
            Value::Integer(i) => integer_to_i64(i) as u32,
            _ => return Err(SymbolTableError::Shape("fns range bound is not an integer".into())),
        };
        let high = match it.next().unwrap() {
            Value::Integer(i) => integer_to_i64(i) as u32,
            _ => return Err(SymbolTableError::Shape("fns range bound is not an integer".into())),
        };
        let name = v
            .into_text()
            .map_err(|_| SymbolTableError::Shape("fns value is not a string".into()))?;
        out.push((low, high, name));
    }
    out.sort_by_key(|(low, _, _)| *low);
    Ok(out)
}

fn parse_atom(value: Value) -> Result<ParserAtom, SymbolTableError> {
    match value {
        Value::Text(s) => match s.as_str() {
            "int32" => Ok(ParserAtom::Int32),
            "uint32" => Ok(ParserAtom::Uint32),
            "int64" => Ok(ParserAtom::Int64),
            "uint64" => Ok(ParserAtom::Uint64),
            "double" => Ok(ParserAtom::Double),
            "pointer" => Ok(ParserAtom::Pointer),
            "bytes" => Ok(ParserAtom::Bytes),
            "string" => Ok(ParserAtom::Str),
            "sym" => Ok(ParserAtom::Sym),
            other => Err(SymbolTableError::Shape(format!("unknown parser atom {other:?}"))),
        },
        Value::Array(items) => {
            if items.len() != 2 {
                return Err(SymbolTableError::Shape("enum atom is not a 2-array".into()));
            }
            let mut it = items.into_iter();
            let tag = it
                .next()
                .unwrap()
                .into_text()
                .map_err(|_| SymbolTableError::Shape("enum atom tag is not a string".into()))?;
            if tag != "enum" {
                return Err(SymbolTableError::Shape(format!("unknown array atom tag {tag:?}")));
            }
            let name = it
                .next()
                .unwrap()
                .into_text()
                .map_err(|_| SymbolTableError::Shape("enum atom name is not a string".into()))?;
            Ok(ParserAtom::Enum(name))
        }
        other => Err(SymbolTableError::Shape(format!("parser atom has unexpected shape: {other:?}"))),
    }
}

fn parse_fmts(value: Value) -> Result<HashMap<u32, FormatRecord>, SymbolTableError> {
    let map = value
        .into_map()
        .map_err(|_| SymbolTableError::Shape("fmts is not a map".into()))?;
    let mut out = HashMap::with_capacity(map.len());
    for (k, v) in map {
        let addr = match k {
            Value::Integer(i) => integer_to_i64(i) as u32,
            _ => return Err(SymbolTableError::Shape("fmts key is not an integer".into())),
        };
        let items = v
            .into_array()
            .map_err(|_| SymbolTableError::Shape(format!("fmts[{addr:#x}] is not an array")))?;
        let record = match items.len() {
            3 => FormatRecord::Opaque,
            5 => {
                let mut it = items.into_iter();
                let level_value = it.next().unwrap();
                let level = match level_value {
                    Value::Null => None,
                    Value::Integer(i) => Some(integer_to_i64(i)),
                    _ => return Err(SymbolTableError::Shape(format!("fmts[{addr:#x}] level is invalid"))),
                };
                let file = it
                    .next()
                    .unwrap()
                    .into_text()
                    .map_err(|_| SymbolTableError::Shape(format!("fmts[{addr:#x}] file is not a string")))?;
                let line = match it.next().unwrap() {
                    Value::Integer(i) => integer_to_i64(i),
                    _ => return Err(SymbolTableError::Shape(format!("fmts[{addr:#x}] line is not an integer"))),
                };
                let format = it
                    .next()
                    .unwrap()
                    .into_text()
                    .map_err(|_| SymbolTableError::Shape(format!("fmts[{addr:#x}] format is not a string")))?;
                let parser_values = it
                    .next()
                    .unwrap()
                    .into_array()
                    .map_err(|_| SymbolTableError::Shape(format!("fmts[{addr:#x}] parsers is not an array")))?;
                let parsers = parser_values
                    .into_iter()
                    .map(parse_atom)
                    .collect::<Result<Vec<_>, _>>()?;
                FormatRecord::Decoded {
                    level,
                    file,
                    line,
                    format,
                    parsers,
                }
            }
            n => {
                return Err(SymbolTableError::Shape(format!(
                    "fmts[{addr:#x}] has {n} elements, expected 3 or 5"
                )))
            }
        };
        out.insert(addr, record);
    }
    Ok(out)
}
