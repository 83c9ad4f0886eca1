//! 基于 TCP 的明文 HTTP/2 连接器
//!
//! 本模块提供 [`HttpConnector`]，负责：
//!
//! 1. 建立 TCP 连接（可选超时），设置 `TCP_NODELAY`
//! 2. 使用 `h2` 完成 HTTP/2 握手
//! 3. 一次 PING 往返，确保对端的 SETTINGS 已经生效
//! 4. 把连接驱动任务（`ConnTask`）spawn 到执行器上
//! 5. 返回 `H2Transport`，供连接池在该连接上开流

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_util::future::{poll_fn, BoxFuture};
use h2::client::{Connection, SendRequest};
use http::{Request, Response};
use pin_project_lite::pin_project;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, watch};

use crate::client::connect::{Connect, Connected, Transport};
use crate::endpoint::{Endpoint, Scheme};
use crate::error::BoxError;
use crate::rt::{BoxSendFuture, Exec, Executor};

// 以下默认值按资源不受限的对端设置；协议默认的 64kb 窗口会拖慢大响应
// 连接级流控窗口
const DEFAULT_CONN_WINDOW: u32 = 1024 * 1024 * 5; // 5mb
// 流级流控窗口
const DEFAULT_STREAM_WINDOW: u32 = 1024 * 1024 * 2; // 2mb
const DEFAULT_MAX_FRAME_SIZE: u32 = 1024 * 16; // 16kb
const DEFAULT_MAX_SEND_BUF_SIZE: usize = 1024 * 1024; // 1mb
const DEFAULT_MAX_HEADER_LIST_SIZE: u32 = 1024 * 16; // 16kb

// 收到对端 SETTINGS 之前允许打开的流数。
// 连接器本来就会等 SETTINGS 到达，这个值只对 h2 内部有意义
const DEFAULT_INITIAL_MAX_SEND_STREAMS: usize = 100;

/// 基于明文 TCP、prior knowledge 方式的 HTTP/2 [`Connect`] 实现。
///
/// 连接器依次完成 TCP 连接、HTTP/2 preface 和一次 PING 往返，之后才报告
/// 连接可用。此时对端的第一个 SETTINGS 帧已经生效，因此在连接上放置任何流
/// 之前，连接池就已经知道对端通告的 `SETTINGS_MAX_CONCURRENT_STREAMS`。
///
/// `https` 端点会被拒绝，TLS 需要单独的连接器。
#[derive(Clone)]
pub struct HttpConnector {
    exec: Exec,
    config: Arc<Config>,
}

/// 连接器配置，多个克隆之间通过 `Arc` 共享，修改时写时复制。
#[derive(Clone, Debug)]
struct Config {
    nodelay: bool,
    connect_timeout: Option<Duration>,
    initial_conn_window_size: u32,
    initial_stream_window_size: u32,
    max_frame_size: u32,
    max_header_list_size: u32,
    max_send_buffer_size: usize,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            nodelay: true,
            connect_timeout: None,
            initial_conn_window_size: DEFAULT_CONN_WINDOW,
            initial_stream_window_size: DEFAULT_STREAM_WINDOW,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_header_list_size: DEFAULT_MAX_HEADER_LIST_SIZE,
            max_send_buffer_size: DEFAULT_MAX_SEND_BUF_SIZE,
        }
    }
}

impl HttpConnector {
    /// 创建连接器，每条连接的驱动任务都 spawn 到 `exec` 上。
    pub fn new<E>(exec: E) -> HttpConnector
    where
        E: Executor<BoxSendFuture> + Send + Sync + 'static,
    {
        HttpConnector {
            exec: Exec::new(exec),
            config: Arc::new(Config::default()),
        }
    }

    /// 设置 socket 的 `TCP_NODELAY`。
    ///
    /// 默认值为 `true`。
    pub fn set_nodelay(&mut self, nodelay: bool) {
        self.config_mut().nodelay = nodelay;
    }

    /// 设置 TCP 连接超时。
    ///
    /// 默认值为 `None`。
    pub fn set_connect_timeout(&mut self, dur: Option<Duration>) {
        self.config_mut().connect_timeout = dur;
    }

    /// 设置 HTTP/2 流级流量控制的 [`SETTINGS_INITIAL_WINDOW_SIZE`][rfc] 选项。
    ///
    /// 默认值为 2MB。
    ///
    /// [rfc]: https://httpwg.org/specs/rfc9113.html#SETTINGS_INITIAL_WINDOW_SIZE
    pub fn set_initial_stream_window_size(&mut self, sz: u32) {
        self.config_mut().initial_stream_window_size = sz;
    }

    /// 设置 HTTP/2 连接级流量控制窗口。
    ///
    /// 默认值为 5MB。
    pub fn set_initial_connection_window_size(&mut self, sz: u32) {
        self.config_mut().initial_conn_window_size = sz;
    }

    /// 设置 HTTP/2 使用的最大帧大小。
    ///
    /// 默认值为 16KB。
    pub fn set_max_frame_size(&mut self, sz: u32) {
        self.config_mut().max_frame_size = sz;
    }

    // 配置被其他克隆共享时先复制一份
    fn config_mut(&mut self) -> &mut Config {
        Arc::make_mut(&mut self.config)
    }

    async fn call(self, endpoint: Endpoint) -> crate::Result<Connected> {
        if endpoint.scheme() != Scheme::Http {
            return Err(crate::Error::new_connect(
                "HttpConnector only speaks cleartext HTTP/2",
            ));
        }

        // IPv6 字面量去掉方括号后才能交给 TcpStream::connect
        let host = endpoint.host().trim_start_matches('[').trim_end_matches(']');
        let connecting = TcpStream::connect((host, endpoint.port()));
        let io = match self.config.connect_timeout {
            Some(dur) => match tokio::time::timeout(dur, connecting).await {
                Ok(res) => res,
                Err(elapsed) => return Err(crate::Error::new_connect(elapsed)),
            },
            None => connecting.await,
        }
        .map_err(crate::Error::new_connect)?;
        io.set_nodelay(self.config.nodelay)
            .map_err(crate::Error::new_connect)?;

        trace!("client handshake HTTP/2 with {}", endpoint);
        let (send_request, mut conn) = new_builder(&self.config)
            .handshake::<_, Bytes>(io)
            .await
            .map_err(crate::Error::new_connect)?;
        let max_concurrent_streams = settle(&mut conn).await?;
        debug!(
            "HTTP/2 connection to {} ready, peer allows {:?} streams",
            endpoint, max_concurrent_streams
        );

        // close_tx：连接池主动关闭连接；closed_tx：驱动任务结束时通知监视者
        let (close_tx, close_rx) = oneshot::channel();
        let (closed_tx, closed_rx) = watch::channel(false);
        self.exec.execute(ConnTask {
            conn,
            closing: close_rx,
            closed: closed_tx,
        });

        let transport = H2Transport {
            send_request,
            close_tx: Mutex::new(Some(close_tx)),
            closed: closed_rx,
        };
        Ok(Connected::new(transport, max_concurrent_streams))
    }
}

impl Connect for HttpConnector {
    fn connect(&self, endpoint: &Endpoint) -> BoxFuture<'static, Result<Connected, BoxError>> {
        let this = self.clone();
        let endpoint = endpoint.clone();
        Box::pin(async move { this.call(endpoint).await.map_err(BoxError::from) })
    }
}

impl fmt::Debug for HttpConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpConnector")
            .field("config", &self.config)
            .finish()
    }
}

/// 按连接器配置创建 h2 客户端构建器，服务端推送总是关闭。
fn new_builder(config: &Config) -> h2::client::Builder {
    let mut builder = h2::client::Builder::default();
    builder
        .initial_max_send_streams(DEFAULT_INITIAL_MAX_SEND_STREAMS)
        .initial_window_size(config.initial_stream_window_size)
        .initial_connection_window_size(config.initial_conn_window_size)
        .max_frame_size(config.max_frame_size)
        .max_header_list_size(config.max_header_list_size)
        .max_send_buffer_size(config.max_send_buffer_size)
        .enable_push(false);
    builder
}

/// 驱动连接完成一次 PING 往返，并返回对端的流上限。
///
/// 对端的 SETTINGS 帧先于 PING ack 到达，因此看到 pong 时 SETTINGS 已经生效。
/// h2 用 `usize::MAX` 表示对端没有设置上限，这里转为 `None`。
async fn settle<T>(conn: &mut Connection<T, Bytes>) -> crate::Result<Option<usize>>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    if let Some(mut ping_pong) = conn.ping_pong() {
        let pong = ping_pong.ping(h2::Ping::opaque());
        futures_util::pin_mut!(pong);
        poll_fn(|cx| {
            // 连接必须被同时驱动，PING 才能收发
            if let Poll::Ready(res) = Pin::new(&mut *conn).poll(cx) {
                return Poll::Ready(match res {
                    Ok(()) => Err(crate::Error::new_connect(
                        "connection closed during handshake",
                    )),
                    Err(err) => Err(crate::Error::new_connect(err)),
                });
            }
            pong.as_mut()
                .poll(cx)
                .map(|res| res.map(|_| ()).map_err(crate::Error::new_connect))
        })
        .await?;
    }

    Ok(match conn.max_concurrent_send_streams() {
        usize::MAX => None,
        max => Some(max),
    })
}

pin_project! {
    /// 驱动 HTTP/2 连接，直到连接结束或被连接池关闭。
    ///
    /// 结束时把 `closed` 置为 true，连接池的监视任务据此淘汰这条连接。
    struct ConnTask<T>
    where
        T: AsyncRead,
        T: AsyncWrite,
        T: Unpin,
    {
        #[pin]
        conn: Connection<T, Bytes>,
        closing: oneshot::Receiver<()>,
        closed: watch::Sender<bool>,
    }
}

impl<T> Future for ConnTask<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        // 显式关闭，或者传输层句柄已被丢弃，都会让 closing 完成
        if Pin::new(this.closing).poll(cx).is_ready() {
            trace!("closing HTTP/2 connection");
            this.closed.send_replace(true);
            return Poll::Ready(());
        }

        match this.conn.poll(cx) {
            Poll::Ready(Ok(())) => {
                debug!("HTTP/2 connection closed");
            }
            Poll::Ready(Err(_err)) => {
                debug!("HTTP/2 connection error: {}", _err);
            }
            Poll::Pending => return Poll::Pending,
        }
        this.closed.send_replace(true);
        Poll::Ready(())
    }
}

/// 连接池眼中的一条 h2 连接。
struct H2Transport {
    send_request: SendRequest<Bytes>,
    close_tx: Mutex<Option<oneshot::Sender<()>>>,
    closed: watch::Receiver<bool>,
}

impl Transport for H2Transport {
    fn send_request(&self, req: Request<Bytes>) -> BoxFuture<'static, Result<Response<Bytes>, BoxError>> {
        let tx = self.send_request.clone();
        Box::pin(async move { exchange(tx, req).await.map_err(BoxError::from) })
    }

    fn closed(&self) -> BoxFuture<'static, ()> {
        let mut closed = self.closed.clone();
        Box::pin(async move {
            // 返回错误说明驱动任务已经不在了，同样视为关闭
            let _ = closed.wait_for(|closed| *closed).await;
        })
    }

    fn close(&self) {
        let tx = self
            .close_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tx) = tx {
            let _ = tx.send(());
        }
    }
}

/// 在一个新的 h2 流上完成一次完整的请求/响应交换。
///
/// 丢弃这个 future 会丢弃 h2 的流句柄，h2 随之只重置这一个流。
async fn exchange(tx: SendRequest<Bytes>, req: Request<Bytes>) -> crate::Result<Response<Bytes>> {
    let mut tx = tx.ready().await.map_err(crate::Error::new_h2)?;

    let (head, body) = req.into_parts();
    let eos = body.is_empty();
    let (response, mut send_stream) = tx
        .send_request(Request::from_parts(head, ()), eos)
        .map_err(crate::Error::new_h2)?;
    if !eos {
        // 请求体一次性交给 h2，由它按流控窗口排队发送
        send_stream
            .send_data(body, true)
            .map_err(crate::Error::new_h2)?;
    }

    let (head, mut recv_stream) = response.await.map_err(crate::Error::new_h2)?.into_parts();
    let mut body = BytesMut::new();
    while let Some(chunk) = recv_stream.data().await {
        let chunk = chunk.map_err(crate::Error::new_h2)?;
        // 及时归还窗口，否则大响应会卡在流控上
        let _ = recv_stream.flow_control().release_capacity(chunk.len());
        body.extend_from_slice(&chunk);
    }
    Ok(Response::from_parts(head, body.freeze()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rt::TokioExecutor;

    #[tokio::test]
    async fn https_is_refused() {
        let connector = HttpConnector::new(TokioExecutor::new());
        let endpoint = Endpoint::new(Scheme::Https, "localhost", 443).unwrap();
        let err = connector.connect(&endpoint).await.unwrap_err();
        let err = crate::Error::new_transport(err);
        assert!(err.is_connect());
    }

    #[tokio::test]
    async fn connect_refused_is_connect_error() {
        // 先绑定再释放，得到一个没有人监听的端口
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let connector = HttpConnector::new(TokioExecutor::new());
        let endpoint = Endpoint::new(Scheme::Http, "127.0.0.1", port).unwrap();
        let err = connector.connect(&endpoint).await.unwrap_err();
        assert!(crate::Error::new_transport(err).is_connect());
    }

    #[test]
    fn setters_do_not_touch_clones() {
        let mut connector = HttpConnector::new(TokioExecutor::new());
        let before = connector.clone();
        connector.set_nodelay(false);
        connector.set_connect_timeout(Some(Duration::from_secs(1)));
        assert!(before.config.nodelay);
        assert!(!connector.config.nodelay);
        assert_eq!(connector.config.connect_timeout, Some(Duration::from_secs(1)));
    }
}
