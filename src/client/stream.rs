//! 流：绑定到单条连接上的一次请求/响应交换

use std::fmt;

use bytes::Bytes;
use futures_util::future::{self, Either};
use http::{Request, Response};

use super::connection::Slot;
use super::pool::{Grant, Lease, Outcome};
use crate::endpoint::Endpoint;

/// [`Stream`] 在其唯一一次请求/响应交换中所处的阶段。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StreamState {
    /// 已占用连接槽位，请求尚未写出
    Pending,
    /// 交换进行中
    Active,
    /// 收到了响应
    Completed,
    /// 交换失败
    Failed,
}

/// 绑定到单条连接上的一次请求/响应交换。
///
/// 从连接池交出 `Stream` 的那一刻起，它就占用所在连接的一个并发流槽位。
/// 交换结束或 `Stream` 被丢弃时（以先发生者为准），槽位归还给连接池。
pub struct Stream {
    state: StreamState,
    // `send` 时取走，之后为 None
    request: Option<Request<Bytes>>,
    slot: Slot,
    // 被丢弃时以 Canceled 归还槽位
    lease: Lease,
}

impl Stream {
    pub(super) fn new(grant: Grant, request: Request<Bytes>) -> Stream {
        Stream {
            state: StreamState::Pending,
            request: Some(request),
            slot: grant.slot,
            lease: grant.lease,
        }
    }

    /// 流的当前状态。
    pub fn state(&self) -> StreamState {
        self.state
    }

    /// 流所在连接属于哪个端点。
    pub fn endpoint(&self) -> &Endpoint {
        self.lease.endpoint()
    }

    /// 承载该流的连接在连接池内的唯一 id。
    pub fn connection_id(&self) -> u64 {
        self.lease.connection_id()
    }

    /// 写出请求并等待完整的响应。
    ///
    /// 请求可以只带路径，端点的 scheme 和 authority 会被自动补上。
    /// 交换过程中连接被关闭时，流以 "connection closed" 错误失败。
    ///
    /// 一个流只承载一个请求，再次调用 `send` 会返回错误。
    pub async fn send(&mut self) -> crate::Result<Response<Bytes>> {
        let request = match self.request.take() {
            Some(request) => request,
            None => return Err(crate::Error::new_user_stream_reused()),
        };
        self.state = StreamState::Active;

        let result = self.exchange(request).await;
        let outcome = match result {
            Ok(_) => {
                self.state = StreamState::Completed;
                Outcome::Completed
            }
            Err(ref _err) => {
                trace!(
                    "stream on connection {} to {} failed: {}",
                    self.connection_id(),
                    self.endpoint(),
                    _err
                );
                self.state = StreamState::Failed;
                Outcome::Failed
            }
        };
        self.lease.release(outcome);
        result
    }

    /// 发送请求，同时监视连接的 shutdown 信号，两者谁先完成取谁。
    async fn exchange(&self, mut request: Request<Bytes>) -> crate::Result<Response<Bytes>> {
        let uri = self.lease.endpoint().absolute_uri(request.uri())?;
        *request.uri_mut() = uri;

        // 连接已经关闭时这里会立即完成
        let mut shutdown = self.slot.shutdown.clone();
        let closed = Box::pin(async move {
            let _ = shutdown.wait_for(|closed| *closed).await;
        });
        let response = self.slot.transport.send_request(request);

        match future::select(response, closed).await {
            Either::Left((Ok(response), _)) => Ok(response),
            Either::Left((Err(err), _)) => {
                if *self.slot.shutdown.borrow() {
                    Err(crate::Error::new_connection_closed().with(err))
                } else {
                    Err(crate::Error::new_transport(err))
                }
            }
            Either::Right(((), _)) => Err(crate::Error::new_connection_closed()),
        }
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("state", &self.state)
            .field("endpoint", self.lease.endpoint())
            .field("connection", &self.lease.connection_id())
            .finish()
    }
}
