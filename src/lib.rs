// 以下 lint 属性控制编译器的警告行为：
#![deny(missing_docs)]                          // 所有公共 API 必须有文档注释
#![deny(missing_debug_implementations)]         // 所有公共类型必须实现 Debug trait
#![cfg_attr(test, deny(rust_2018_idioms))]      // 测试时要求使用 Rust 2018 惯用写法
#![cfg_attr(docsrs, feature(doc_cfg))]          // docs.rs 构建时在文档中显示 feature 标记

//! # h2pool
//!
//! h2pool is a client-side **HTTP/2 connection pool** that multiplexes
//! requests onto a bounded set of connections per endpoint.
//!
//! For every request the pool decides whether to put it on an existing
//! connection or open a new one. It never exceeds the configured number of
//! connections to an endpoint, and it never places more streams on a
//! connection than the *effective* limit allows: the lesser of the local
//! multiplexing limit and the `SETTINGS_MAX_CONCURRENT_STREAMS` the peer
//! advertised. Requests that do not fit wait in a FIFO queue and are served
//! as slots free up.
//!
//! For `N` concurrent requests to one endpoint the pool therefore opens
//! `min(max_connections, ceil(N / effective_limit))` connections.
//!
//! ## Overview
//!
//! - [`client::Dispatcher`] is the entry point: submit a request, get a
//!   future of its response.
//! - [`client::ConnectionPool`] holds the connections and makes every
//!   admission decision.
//! - [`client::conn::http2::HttpConnector`] opens cleartext HTTP/2
//!   connections over TCP; other transports implement
//!   [`client::connect::Connect`].
//! - [`Snapshot`] is a consistent, read-only view of the pool's counters.
//!
//! # Optional Features
//!
//! - `tracing` (enabled by default): emit diagnostics through the `tracing`
//!   crate.

// 重新导出 http crate，方便用户直接使用与本 crate 相同版本的类型
#[doc(hidden)]
pub use http;

#[doc(no_inline)]
pub use http::{Request, Response, Uri};

// 公共 API 的顶层导出
pub use crate::config::{Builder as ConfigBuilder, Config};
pub use crate::endpoint::{Endpoint, Scheme};
pub use crate::error::{BoxError, Error, Result};
pub use crate::snapshot::Snapshot;

// 日志宏模块必须最先引入，后续模块才能使用 trace!/debug! 等宏
#[macro_use]
mod trace;

pub mod client;
mod config;
mod endpoint;
mod error;
pub mod rt;
pub mod snapshot;
