pub mod connection;
pub mod dispatch;
pub mod message;

pub use connection::RpcConnection;
pub use dispatch::{Handler, HandlerTable};
pub use message::{RpcOutcome, RpcRequest};
