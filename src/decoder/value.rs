// Author: Lukas Bower
// Purpose: One decoded log-record field, after parsing but before formatting.

/// A single field extracted from a log frame's payload by walking its
/// [`super::dataset::ParserAtom`] list.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedValue {
    /// A signed integer field (`int32`, `int64`).
    Int(i64),
    /// An unsigned integer field (`uint32`, `uint64`).
    UInt(u64),
    /// A floating-point field (`double`).
    Double(f64),
    /// A resolved or unresolved symbolic address (`pointer`, `sym`).
    Symbol(String),
    /// The tail of the frame, consumed whole (`bytes`).
    Bytes(Vec<u8>),
    /// A NUL-terminated string field (`string`).
    Str(String),
    /// An enum-resolved value, already rendered to its member name or the
    /// `<Name:value>` miss form.
    Enum(String),
}

impl DecodedValue {
    pub(super) fn as_signed(&self) -> Result<i64, String> {
        match self {
            DecodedValue::Int(v) => Ok(*v),
            DecodedValue::UInt(v) => Ok(*v as i64),
            other => Err(format!("{other:?} is not an integer field")),
        }
    }

    pub(super) fn as_unsigned(&self) -> Result<u64, String> {
        match self {
            DecodedValue::Int(v) => Ok(*v as u64),
            DecodedValue::UInt(v) => Ok(*v),
            other => Err(format!("{other:?} is not an integer field")),
        }
    }

    pub(super) fn as_double(&self) -> Result<f64, String> {
        match self {
            DecodedValue::Double(v) => Ok(*v),
            DecodedValue::Int(v) => Ok(*v as f64),
            DecodedValue::UInt(v) => Ok(*v as f64),
            other => Err(format!("{other:?} is not a floating-point field")),
        }
    }

    /// Renders a value for `%s`, and for the "(FORMATTING FAILED)" fallback
    /// representation of an entire argument list.
    pub(super) fn as_display(&self) -> String {
        match self {
            DecodedValue::Int(v) => v.to_string(),
            DecodedValue::UInt(v) => v.to_string(),
            DecodedValue::Double(v) => v.to_string(),
            DecodedValue::Symbol(s) => s.clone(),
            DecodedValue::Bytes(b) => format!("0x{}", hex::encode(b)),
            DecodedValue::Str(s) => s.clone(),
            DecodedValue::Enum(s) => s.clone(),
        }
    }
}
