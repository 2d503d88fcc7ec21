//! Local privileged-RPC channel over a Unix domain socket.

pub mod client;
pub mod server;

pub use client::{ChannelState, RpcClient};
pub use server::RpcServer;
