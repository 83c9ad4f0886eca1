//! HTTP/2 客户端连接池
//!
//! - [`Dispatcher`] —— 对外入口：提交请求，得到响应的 Future
//! - [`ConnectionPool`] —— 持有所有端点的连接，决定每个请求跑在哪条连接上
//! - [`Stream`] —— 绑定到某条连接上的一次请求/响应交换，
//!   适合需要自己驱动交换过程的调用方
//! - [`connect`] —— 与底层传输之间的接口，[`conn`] 中是内置的连接器实现

pub mod conn;
pub mod connect;
// 连接池内部的单连接记账，不对外公开
mod connection;
mod dispatch;
mod pool;
mod stream;

pub use self::connection::ConnectionState;
pub use self::dispatch::{Dispatcher, ResponseFuture};
pub use self::pool::{Checkout, ConnectionPool};
pub use self::stream::{Stream, StreamState};
