//! Envelopes and framing for the local privileged-RPC channel.
//!
//! A connection carries a strict request/response sequence. Each envelope
//! is one codec mapping written as a frame: a 4-byte big-endian length
//! followed by that many payload bytes.

use std::collections::BTreeMap;
use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::codec::{self, CodecError, Value};

/// Largest frame either side accepts (16 MiB).
pub const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

/// Error class returned for methods outside the server's allow-list.
pub const UNKNOWN_METHOD_ERROR: &str = "UnknownMethodError";

/// Error class returned when a request envelope cannot be understood.
pub const BAD_REQUEST_ERROR: &str = "BadRequestError";

/// A single method invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcRequest {
    pub method: String,
    pub args: Vec<Value>,
    pub kwargs: BTreeMap<String, Value>,
}

/// A structured failure: the class name of the error plus its message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFailure {
    pub class: String,
    pub message: String,
}

/// The single reply to an [`RpcRequest`].
#[derive(Debug, Clone, PartialEq)]
pub enum RpcResponse {
    Ok(Value),
    Err(RemoteFailure),
}

impl RpcRequest {
    #[must_use]
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            args: Vec::new(),
            kwargs: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    #[must_use]
    pub fn kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }

    /// Look up an argument by keyword, falling back to its position.
    #[must_use]
    pub fn argument(&self, index: usize, name: &str) -> Option<&Value> {
        self.kwargs
            .get(name)
            .or_else(|| self.args.get(index))
            .filter(|value| !value.is_none())
    }

    #[must_use]
    pub fn into_value(self) -> Value {
        Value::Map(BTreeMap::from([
            ("method".to_string(), Value::Str(self.method)),
            ("args".to_string(), Value::List(self.args)),
            ("kwargs".to_string(), Value::Map(self.kwargs)),
        ]))
    }

    pub fn from_value(value: Value) -> Result<Self, CodecError> {
        let mut map = match value {
            Value::Map(map) => map,
            other => {
                return Err(CodecError::Decode(format!(
                    "request must be a mapping, got {}",
                    other.type_name()
                )));
            }
        };
        let method = match map.remove("method") {
            Some(Value::Str(method)) => method,
            _ => return Err(CodecError::Decode("request has no method name".to_string())),
        };
        let args = match map.remove("args") {
            None | Some(Value::None) => Vec::new(),
            Some(Value::List(args)) => args,
            Some(other) => {
                return Err(CodecError::Decode(format!(
                    "args must be a sequence, got {}",
                    other.type_name()
                )));
            }
        };
        let kwargs = match map.remove("kwargs") {
            None | Some(Value::None) => BTreeMap::new(),
            Some(Value::Map(kwargs)) => kwargs,
            Some(other) => {
                return Err(CodecError::Decode(format!(
                    "kwargs must be a mapping, got {}",
                    other.type_name()
                )));
            }
        };
        Ok(Self {
            method,
            args,
            kwargs,
        })
    }
}

impl RpcResponse {
    #[must_use]
    pub fn failure(class: impl Into<String>, message: impl Into<String>) -> Self {
        RpcResponse::Err(RemoteFailure {
            class: class.into(),
            message: message.into(),
        })
    }

    #[must_use]
    pub fn into_value(self) -> Value {
        let map = match self {
            RpcResponse::Ok(value) => BTreeMap::from([
                ("ok".to_string(), Value::Bool(true)),
                ("value".to_string(), value),
            ]),
            RpcResponse::Err(failure) => BTreeMap::from([
                ("ok".to_string(), Value::Bool(false)),
                ("error-class".to_string(), Value::Str(failure.class)),
                ("error-message".to_string(), Value::Str(failure.message)),
            ]),
        };
        Value::Map(map)
    }

    pub fn from_value(value: Value) -> Result<Self, CodecError> {
        let mut map = match value {
            Value::Map(map) => map,
            other => {
                return Err(CodecError::Decode(format!(
                    "response must be a mapping, got {}",
                    other.type_name()
                )));
            }
        };
        match map.remove("ok") {
            Some(Value::Bool(true)) => Ok(RpcResponse::Ok(map.remove("value").unwrap_or_default())),
            Some(Value::Bool(false)) => {
                let class = match map.remove("error-class") {
                    Some(Value::Str(class)) => class,
                    _ => return Err(CodecError::Decode("failure has no error class".to_string())),
                };
                let message = match map.remove("error-message") {
                    Some(Value::Str(message)) => message,
                    _ => String::new(),
                };
                Ok(RpcResponse::Err(RemoteFailure { class, message }))
            }
            _ => Err(CodecError::Decode("response has no ok flag".to_string())),
        }
    }
}

// ── Framing ───────────────────────────────────────────────────────────────────

/// Write one frame.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|len| *len <= MAX_FRAME_LEN)
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("frame of {} bytes exceeds {MAX_FRAME_LEN}", payload.len()),
            )
        })?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await
}

/// Read one frame. Returns `None` on a clean end of stream between frames.
pub async fn read_frame<R>(reader: &mut R) -> io::Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let len = u32::from_be_bytes(header);
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {len} bytes exceeds {MAX_FRAME_LEN}"),
        ));
    }
    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

/// Encode and write an envelope value as one frame.
pub async fn send_value<W>(writer: &mut W, value: &Value) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let payload =
        codec::encode(value).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    write_frame(writer, &payload).await
}
