//! 连接器接口模块
//!
//! 连接池自己从不接触 socket。需要新连接时，它请求 [`Connect`] 实现为某个
//! [`Endpoint`] 完成整个握手，拿回一个 [`Connected`]：
//!
//! - 一个可以承载多个流的 [`Transport`]
//! - 建连过程中对端通告的并发流上限
//!
//! [`HttpConnector`](super::conn::http2::HttpConnector) 是基于 TCP 的明文
//! HTTP/2 连接器。自定义连接器（TLS、内存中的测试替身、代理等）实现本模块
//! 的两个 trait 即可。

use std::fmt;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use http::{Request, Response};

use crate::endpoint::Endpoint;
use crate::error::BoxError;

/// 打开到端点的连接。
pub trait Connect: Send + Sync + 'static {
    /// 为 `endpoint` 完成传输层和 HTTP/2 握手。
    ///
    /// 返回的 future 应当在对端 SETTINGS 已知之后才完成，
    /// 这样 [`Connected::max_concurrent_streams`] 才是准确的。
    fn connect(&self, endpoint: &Endpoint) -> BoxFuture<'static, Result<Connected, BoxError>>;
}

/// 一条已建立、可并发承载多个流的连接。
pub trait Transport: Send + Sync + 'static {
    /// 在新流上发送 `req`，完成时返回完整的响应。
    ///
    /// 在完成之前丢弃返回的 future，只能重置这一个流，不能影响同一连接上
    /// 的其他流。
    fn send_request(&self, req: Request<Bytes>) -> BoxFuture<'static, Result<Response<Bytes>, BoxError>>;

    /// 连接因任何原因关闭后完成。
    fn closed(&self) -> BoxFuture<'static, ()>;

    /// 开始关闭连接。
    fn close(&self);
}

/// 握手成功的结果。
pub struct Connected {
    pub(crate) transport: Box<dyn Transport>,
    pub(crate) max_concurrent_streams: Option<usize>,
}

impl Connected {
    /// 包装一个已建立的传输层。
    ///
    /// `max_concurrent_streams` 是对端通告的 `SETTINGS_MAX_CONCURRENT_STREAMS`，
    /// 对端未设置上限时为 `None`。
    pub fn new<T: Transport>(transport: T, max_concurrent_streams: Option<usize>) -> Connected {
        Connected {
            transport: Box::new(transport),
            max_concurrent_streams,
        }
    }

    /// 对端通告的并发流上限。
    pub fn max_concurrent_streams(&self) -> Option<usize> {
        self.max_concurrent_streams
    }
}

impl fmt::Debug for Connected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connected")
            .field("max_concurrent_streams", &self.max_concurrent_streams)
            .finish()
    }
}
