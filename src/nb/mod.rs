//! NooBaa management API adapter

pub mod rpc;

pub use rpc::{RpcClient, RpcConnector};
