//! Wire types shared by the fleet agent and its privileged helper: the
//! binary codec, messages and batches, and the RPC envelopes.

#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod codec;
pub mod message;
pub mod rpc;

pub use codec::{CodecError, Value, decode, encode, from_value, to_value};
pub use message::{Batch, Message, decode_batch, encode_batch, keys};
pub use rpc::{RemoteFailure, RpcRequest, RpcResponse};
