//! 请求分发模块
//!
//! [`Dispatcher`] 是本 crate 的对外入口：把请求交给 [`ConnectionPool`] 准入，
//! 拿到流之后发送，并把途中的任何失败统一包装成 "request failed" 错误。

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::future::{self, BoxFuture, FutureExt};
use http::{Request, Response};

use super::pool::ConnectionPool;
use crate::endpoint::Endpoint;
use crate::snapshot::Snapshot;

/// 通过 [`ConnectionPool`] 发送请求。
///
/// 每个请求在提交时即被连接池准入，返回的 [`ResponseFuture`] 在收到响应时完成。
/// 途中的任何失败（建连失败、连接关闭、传输错误）都报告为同一种
/// "request failed" 错误，其 [`source`](std::error::Error::source) 是底层原因。
///
/// # Example
///
/// ```no_run
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// use bytes::Bytes;
/// use h2pool::client::{conn::http2::HttpConnector, ConnectionPool, Dispatcher};
/// use h2pool::rt::TokioExecutor;
/// use h2pool::{Config, Endpoint, Scheme};
///
/// let config = Config::builder()
///     .max_connections(10)
///     .multiplex_limit(100)
///     .build()?;
/// let connector = HttpConnector::new(TokioExecutor::new());
/// let pool = ConnectionPool::new(config, connector, TokioExecutor::new());
/// let dispatcher = Dispatcher::new(pool);
///
/// let endpoint = Endpoint::new(Scheme::Http, "localhost", 8080)?;
/// let req = http::Request::get("/nnrf-nfm/v1/nf-instances").body(Bytes::new())?;
/// let res = dispatcher.submit(&endpoint, req).await?;
/// println!("status: {}", res.status());
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct Dispatcher {
    pool: ConnectionPool,
}

/// 已分发请求的响应 Future。
#[must_use = "futures do nothing unless polled"]
pub struct ResponseFuture {
    inner: BoxFuture<'static, crate::Result<Response<Bytes>>>,
}

impl Dispatcher {
    /// 基于 `pool` 创建分发器。
    pub fn new(pool: ConnectionPool) -> Dispatcher {
        Dispatcher { pool }
    }

    /// 向 `endpoint` 提交 `req`。
    ///
    /// 返回之前请求已经完成准入：要么绑定到有空闲槽位的连接上，
    /// 要么排在先前的请求后面。仍在排队的请求会在 future 被丢弃时撤回。
    pub fn submit(&self, endpoint: &Endpoint, req: Request<Bytes>) -> ResponseFuture {
        let checkout = self.pool.acquire_stream(endpoint, req);
        ResponseFuture::new(async move {
            let mut stream = checkout.await.map_err(request_failed)?;
            stream.send().await.map_err(request_failed)
        })
    }

    /// 把 `req` 提交给其绝对 URI 所指的端点。
    pub fn send(&self, req: Request<Bytes>) -> ResponseFuture {
        match Endpoint::from_uri(req.uri()) {
            Ok(endpoint) => self.submit(&endpoint, req),
            Err(err) => ResponseFuture::error(request_failed(err)),
        }
    }

    /// 连接池在当前时刻的快照。
    pub fn snapshot(&self) -> Snapshot {
        self.pool.snapshot()
    }

    /// 该分发器所使用的连接池。
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }
}

// 超出容量说明记账出了问题，按错误级别记录；其余失败属于正常情况
fn request_failed(err: crate::Error) -> crate::Error {
    if err.is_capacity_exceeded() {
        error!("stream opened past its connection's limit: {:?}", err);
    } else {
        debug!("request failed: {}", err);
    }
    crate::Error::new_request_failed(err)
}

impl ResponseFuture {
    fn new<F>(fut: F) -> ResponseFuture
    where
        F: Future<Output = crate::Result<Response<Bytes>>> + Send + 'static,
    {
        ResponseFuture { inner: fut.boxed() }
    }

    fn error(err: crate::Error) -> ResponseFuture {
        ResponseFuture {
            inner: future::ready(Err(err)).boxed(),
        }
    }
}

impl Future for ResponseFuture {
    type Output = crate::Result<Response<Bytes>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.as_mut().poll(cx)
    }
}

impl fmt::Debug for ResponseFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad("Future<Response>")
    }
}
