//! Compact self-describing binary codec used for exchange payloads and RPC
//! envelopes.
//!
//! Every value starts with a one-byte tag:
//!
//! | tag | value    | body                                              |
//! |-----|----------|---------------------------------------------------|
//! | `n` | None     | (empty)                                           |
//! | `b` | bool     | one byte, `0` or `1`                              |
//! | `i` | integer  | i64, big-endian                                   |
//! | `f` | float    | IEEE-754 binary64 bits, big-endian                |
//! | `s` | string   | u32 big-endian byte length, UTF-8 bytes           |
//! | `l` | sequence | u32 big-endian item count, items                  |
//! | `d` | mapping  | u32 big-endian entry count, (string key, value)*  |
//!
//! Mapping keys are written without a tag (always strings) and in sorted
//! order. The layout is frozen: the agent and the server may run different
//! builds, so any change here is a protocol break.

use std::collections::BTreeMap;

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

const TAG_NONE: u8 = b'n';
const TAG_BOOL: u8 = b'b';
const TAG_INT: u8 = b'i';
const TAG_FLOAT: u8 = b'f';
const TAG_STR: u8 = b's';
const TAG_LIST: u8 = b'l';
const TAG_MAP: u8 = b'd';

/// Maximum nesting of sequences and mappings, on both encode and decode.
pub const MAX_DEPTH: usize = 64;

// ── Errors ────────────────────────────────────────────────────────────────────

/// Local codec failures. Never coerced into a default value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The input cannot be represented in the restricted value set.
    #[error("unsupported value: {0}")]
    Unsupported(String),

    /// The byte stream is malformed or truncated, or a value does not have
    /// the expected shape.
    #[error("malformed payload: {0}")]
    Decode(String),
}

// ── Value ─────────────────────────────────────────────────────────────────────

/// A value of the restricted type set carried by the wire format.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    /// Short name of the variant, for error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "none",
            Value::Bool(_) => "bool",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::List(_) => "sequence",
            Value::Map(_) => "mapping",
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Value::Map(map)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map_or(Value::None, Into::into)
    }
}

impl TryFrom<serde_json::Value> for Value {
    type Error = CodecError;

    fn try_from(json: serde_json::Value) -> Result<Self, Self::Error> {
        Ok(match json {
            serde_json::Value::Null => Value::None,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if n.is_u64() {
                    return Err(CodecError::Unsupported(format!(
                        "integer {n} does not fit in 64 signed bits"
                    )));
                } else {
                    let f = n
                        .as_f64()
                        .ok_or_else(|| CodecError::Unsupported(format!("number {n}")))?;
                    Value::Float(f)
                }
            }
            serde_json::Value::String(s) => Value::Str(s),
            serde_json::Value::Array(items) => Value::List(
                items
                    .into_iter()
                    .map(Value::try_from)
                    .collect::<Result<_, _>>()?,
            ),
            serde_json::Value::Object(map) => Value::Map(
                map.into_iter()
                    .map(|(k, v)| Ok((k, Value::try_from(v)?)))
                    .collect::<Result<_, CodecError>>()?,
            ),
        })
    }
}

impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        match value {
            Value::None => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Int(i) => serde_json::Value::from(i),
            Value::Float(f) => serde_json::Value::from(f),
            Value::Str(s) => serde_json::Value::String(s),
            Value::List(items) => {
                serde_json::Value::Array(items.into_iter().map(Into::into).collect())
            }
            Value::Map(map) => {
                serde_json::Value::Object(map.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

/// Convert any serializable type into a [`Value`].
///
/// Types that do not map onto the restricted set (non-string map keys,
/// unsigned integers above `i64::MAX`) fail with [`CodecError::Unsupported`].
pub fn to_value<T: Serialize + ?Sized>(value: &T) -> Result<Value, CodecError> {
    let json = serde_json::to_value(value).map_err(|e| CodecError::Unsupported(e.to_string()))?;
    Value::try_from(json)
}

/// Interpret a [`Value`] as a typed structure.
pub fn from_value<T: DeserializeOwned>(value: Value) -> Result<T, CodecError> {
    serde_json::from_value(value.into()).map_err(|e| CodecError::Decode(e.to_string()))
}

// ── Encoding ──────────────────────────────────────────────────────────────────

/// Encode a value into its binary form.
pub fn encode(value: &Value) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::new();
    encode_into(value, &mut out, 0)?;
    Ok(out)
}

fn encode_into(value: &Value, out: &mut Vec<u8>, depth: usize) -> Result<(), CodecError> {
    match value {
        Value::None => out.push(TAG_NONE),
        Value::Bool(b) => {
            out.push(TAG_BOOL);
            out.push(u8::from(*b));
        }
        Value::Int(i) => {
            out.push(TAG_INT);
            out.extend_from_slice(&i.to_be_bytes());
        }
        Value::Float(f) => {
            out.push(TAG_FLOAT);
            out.extend_from_slice(&f.to_bits().to_be_bytes());
        }
        Value::Str(s) => {
            out.push(TAG_STR);
            put_str(s, out)?;
        }
        Value::List(items) => {
            check_depth(depth)?;
            out.push(TAG_LIST);
            put_len(items.len(), out)?;
            for item in items {
                encode_into(item, out, depth + 1)?;
            }
        }
        Value::Map(map) => {
            check_depth(depth)?;
            out.push(TAG_MAP);
            put_len(map.len(), out)?;
            for (key, item) in map {
                put_str(key, out)?;
                encode_into(item, out, depth + 1)?;
            }
        }
    }
    Ok(())
}

fn check_depth(depth: usize) -> Result<(), CodecError> {
    if depth >= MAX_DEPTH {
        return Err(CodecError::Unsupported(format!(
            "nesting deeper than {MAX_DEPTH} levels"
        )));
    }
    Ok(())
}

fn put_len(len: usize, out: &mut Vec<u8>) -> Result<(), CodecError> {
    let len = u32::try_from(len)
        .map_err(|_| CodecError::Unsupported(format!("length {len} exceeds 32 bits")))?;
    out.extend_from_slice(&len.to_be_bytes());
    Ok(())
}

fn put_str(s: &str, out: &mut Vec<u8>) -> Result<(), CodecError> {
    put_len(s.len(), out)?;
    out.extend_from_slice(s.as_bytes());
    Ok(())
}

// ── Decoding ──────────────────────────────────────────────────────────────────

/// Decode one value. The whole input must be consumed.
pub fn decode(bytes: &[u8]) -> Result<Value, CodecError> {
    let mut reader = Reader { buf: bytes, pos: 0 };
    let value = reader.value(0)?;
    if reader.pos != bytes.len() {
        return Err(reader.error(format!(
            "{} trailing bytes",
            bytes.len() - reader.pos
        )));
    }
    Ok(value)
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn error(&self, reason: impl std::fmt::Display) -> CodecError {
        CodecError::Decode(format!("{reason} at byte {}", self.pos))
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| self.error(format!("truncated input, wanted {n} bytes")))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn fixed<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn len(&mut self) -> Result<usize, CodecError> {
        Ok(u32::from_be_bytes(self.fixed::<4>()?) as usize)
    }

    fn string(&mut self) -> Result<String, CodecError> {
        let len = self.len()?;
        let start = self.pos;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| CodecError::Decode(format!("invalid UTF-8 in string at byte {start}")))
    }

    fn value(&mut self, depth: usize) -> Result<Value, CodecError> {
        let [tag] = self.fixed::<1>()?;
        match tag {
            TAG_NONE => Ok(Value::None),
            TAG_BOOL => match self.fixed::<1>()? {
                [0] => Ok(Value::Bool(false)),
                [1] => Ok(Value::Bool(true)),
                [other] => Err(self.error(format!("invalid boolean byte {other}"))),
            },
            TAG_INT => Ok(Value::Int(i64::from_be_bytes(self.fixed::<8>()?))),
            TAG_FLOAT => Ok(Value::Float(f64::from_bits(u64::from_be_bytes(
                self.fixed::<8>()?,
            )))),
            TAG_STR => Ok(Value::Str(self.string()?)),
            TAG_LIST => {
                self.enter(depth)?;
                let count = self.len()?;
                // Every item takes at least one byte; cap the preallocation
                // by what is actually left in the buffer.
                let mut items = Vec::with_capacity(count.min(self.remaining()));
                for _ in 0..count {
                    items.push(self.value(depth + 1)?);
                }
                Ok(Value::List(items))
            }
            TAG_MAP => {
                self.enter(depth)?;
                let count = self.len()?;
                let mut map = BTreeMap::new();
                for _ in 0..count {
                    let key = self.string()?;
                    let item = self.value(depth + 1)?;
                    if map.insert(key.clone(), item).is_some() {
                        return Err(self.error(format!("duplicate key {key:?}")));
                    }
                }
                Ok(Value::Map(map))
            }
            other => Err(CodecError::Decode(format!(
                "unknown type tag 0x{other:02x} at byte {}",
                self.pos - 1
            ))),
        }
    }

    fn enter(&self, depth: usize) -> Result<(), CodecError> {
        if depth >= MAX_DEPTH {
            return Err(self.error(format!("nesting deeper than {MAX_DEPTH} levels")));
        }
        Ok(())
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }
}
