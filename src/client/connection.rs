//! 单条 HTTP/2 连接在连接池一侧的记账
//!
//! `Connection` 自己从不做 I/O，它只记录：
//!
//! - 连接处于生命周期的哪个阶段（[`ConnectionState`]）
//! - 最多可以承载多少个流（本地上限与对端上限取小）
//! - 当前承载了多少个流
//!
//! 握手完成后包装的 [`Transport`] 负责真正的收发。正在进行的流会订阅连接的
//! shutdown 信号，连接关闭时它们能立即失败，而不是一直挂起。
//!
//! ## 状态转换
//!
//! ```text
//! Connecting --握手成功--> Open --drain()--> Draining --流全部结束--> Closed
//! Open / Draining --close() 或传输层断开--> Closed
//! ```
//!
//! 握手失败的连接不会进入 `Closed`，连接池直接把它移除。

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;

use super::connect::{Connected, Transport};
use crate::config::effective_limit;
use crate::snapshot::ConnectionStats;

/// 连接的生命周期状态。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// 握手进行中，对端的流上限尚不可知
    Connecting,
    /// 已建立，接受新的流
    Open,
    /// 已建立，正在完成现有的流，不再接受新流
    Draining,
    /// 已关闭
    Closed,
}

/// 流从连接那里拿到的东西：一个发送通道，以及一个得知连接已关闭的途径。
pub(crate) struct Slot {
    pub(crate) transport: Arc<dyn Transport>,
    // 值变为 true 表示连接已关闭
    pub(crate) shutdown: watch::Receiver<bool>,
}

/// 连接池中的一条连接。
pub(crate) struct Connection {
    /// 连接池内唯一的 id，同时反映创建顺序
    id: u64,
    state: ConnectionState,
    /// 本地多路复用上限，来自 `Config`
    local_limit: Option<usize>,
    /// 对端 SETTINGS 中的 MAX_CONCURRENT_STREAMS，握手完成前为 `None`
    peer_limit: Option<usize>,
    /// 握手完成后才有
    transport: Option<Arc<dyn Transport>>,
    open_streams: usize,
    /// 已完成或失败的流数，未发送就归还的槽位不计入
    served: u64,
    // 每次连接变为空闲时递增，过期的空闲计时器据此判断连接在此期间是否被用过
    idle_epoch: u64,
    // 是否为替补连接（顶替一条握手失败的连接）
    replacement: bool,
    /// 向所有在途流广播连接关闭
    shutdown: watch::Sender<bool>,
}

impl Connection {
    pub(crate) fn connecting(id: u64, local_limit: Option<usize>) -> Connection {
        let (shutdown, _) = watch::channel(false);
        Connection {
            id,
            state: ConnectionState::Connecting,
            local_limit,
            peer_limit: None,
            transport: None,
            open_streams: 0,
            served: 0,
            idle_epoch: 0,
            replacement: false,
            shutdown,
        }
    }

    /// 记录握手完成，状态转为 `Open`。
    ///
    /// 返回传输层，调用方据此监视连接何时关闭。
    pub(crate) fn establish(&mut self, connected: Connected) -> Arc<dyn Transport> {
        debug_assert_eq!(self.state, ConnectionState::Connecting);
        let transport: Arc<dyn Transport> = Arc::from(connected.transport);
        self.peer_limit = connected.max_concurrent_streams;
        self.transport = Some(transport.clone());
        self.state = ConnectionState::Open;
        self.idle_epoch += 1;
        transport
    }

    /// 标记为替补连接。替补连接握手失败时不会再被替补。
    pub(crate) fn replacing(mut self) -> Connection {
        self.replacement = true;
        self
    }

    pub(crate) fn is_replacement(&self) -> bool {
        self.replacement
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.state
    }

    pub(crate) fn open_streams(&self) -> usize {
        self.open_streams
    }

    pub(crate) fn idle_epoch(&self) -> u64 {
        self.idle_epoch
    }

    /// 握手中、已打开、排空中的连接都占用 socket，都计入端点的连接数上限。
    pub(crate) fn is_live(&self) -> bool {
        self.state != ConnectionState::Closed
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.state == ConnectionState::Open && self.open_streams == 0
    }

    /// 该连接同时最多可承载的流数。
    ///
    /// 握手完成前对端上限未知，只有本地上限生效。
    pub(crate) fn effective_limit(&self) -> Option<usize> {
        effective_limit(self.local_limit, self.peer_limit)
    }

    /// 握手中的连接在建立后预计能接走多少个排队请求。
    /// `None` 表示可能全部接走。
    pub(crate) fn presumed_capacity(&self) -> Option<usize> {
        debug_assert_eq!(self.state, ConnectionState::Connecting);
        self.local_limit
    }

    pub(crate) fn has_capacity(&self) -> bool {
        self.state == ConnectionState::Open
            && self
                .effective_limit()
                .map_or(true, |limit| self.open_streams < limit)
    }

    /// 占用一个流槽位。
    ///
    /// 连接池会先检查 `has_capacity`，因此这里返回错误意味着连接池记账
    /// 有 bug，而不是调用方可以恢复的情况。
    pub(crate) fn open_stream(&mut self) -> crate::Result<Slot> {
        let transport = match (self.state, &self.transport) {
            (ConnectionState::Open, Some(transport)) => transport.clone(),
            _ => return Err(crate::Error::new_connection_closed()),
        };
        if !self.has_capacity() {
            return Err(crate::Error::new_capacity_exceeded());
        }
        self.open_streams += 1;
        Ok(Slot {
            transport,
            shutdown: self.shutdown.subscribe(),
        })
    }

    /// 归还一个已经跑过请求的槽位，计入 `served`。
    pub(crate) fn release_stream(&mut self) {
        self.unreserve();
        self.served += 1;
    }

    /// 归还一个占用了但从未发送过请求的槽位，不计入 `served`。
    pub(crate) fn unreserve(&mut self) {
        debug_assert!(self.open_streams > 0, "stream count underflow");
        self.open_streams = self.open_streams.saturating_sub(1);
        if self.open_streams == 0 {
            self.idle_epoch += 1;
        }
    }

    /// 停止接受新流。如果连接上已经没有流、当场关闭，返回 true。
    pub(crate) fn drain(&mut self) -> bool {
        if self.state == ConnectionState::Open {
            self.state = ConnectionState::Draining;
        }
        if self.state == ConnectionState::Draining && self.open_streams == 0 {
            self.close();
            return true;
        }
        false
    }

    /// 关闭连接，并中止其上所有仍在运行的流。
    pub(crate) fn close(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        self.state = ConnectionState::Closed;
        self.shutdown.send_replace(true);
        if let Some(transport) = self.transport.take() {
            transport.close();
        }
    }

    pub(crate) fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            id: self.id,
            state: self.state,
            open_streams: self.open_streams,
            max_streams: self.effective_limit(),
            served: self.served,
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("open_streams", &self.open_streams)
            .field("limit", &self.effective_limit())
            .finish()
    }
}
