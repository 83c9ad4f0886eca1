//! 按端点划分的连接池
//!
//! ## 准入流程
//!
//! 一个端点的所有准入决策都在该端点的锁内完成：
//!
//! 1. 请求追加到端点的 FIFO 等待队列
//! 2. 立即调度（dispatch）：把队首交给第一条（按创建顺序）有空闲槽位的
//!    已打开连接
//! 3. 队列长度超过握手中连接的预计容量时，继续开新连接，直到达到端点的
//!    连接数上限
//!
//! ## 预计容量
//!
//! 握手中的连接被假定能承载本地多路复用上限那么多的流；没有设置本地上限时，
//! 假定它能接走全部排队请求。对端 SETTINGS 到达后才知道真实容量，此时会再
//! 调度一次，对端更严格的话就再开连接。
//!
//! ## 握手失败
//!
//! - 端点已没有其他连接：所有排队请求以建连错误失败
//! - 还有其他连接：失败的连接被替补一次；替补也失败时，现有连接接不下的
//!   那部分请求以建连错误失败，不会对着一个挂掉的端点反复重连
//!
//! ## 锁
//!
//! 锁是普通的 `std::sync::Mutex`，从不跨 `.await` 持有。归还流槽位需要拿锁，
//! 因此持锁期间绝不丢弃任何可能归还槽位的对象（`Lease`、`Grant`）。

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{self, Poll};

use bytes::Bytes;
use futures_util::ready;
use http::Request;
use tokio::sync::oneshot;

use super::connect::{Connect, Connected};
use super::connection::{Connection, ConnectionState, Slot};
use super::stream::Stream;
use crate::config::Config;
use crate::endpoint::Endpoint;
use crate::error::BoxError;
use crate::rt::{BoxSendFuture, Exec, Executor};
use crate::snapshot::{EndpointStats, Snapshot};

/// 按 [`Endpoint`] 划分的 HTTP/2 连接池。
///
/// 克隆开销很小，各克隆共享同一组连接。
///
/// 端点条目与连接池同生命周期：即使 [`close`] 之后端点已没有任何连接，
/// 条目仍然保留，其完成数和失败数在 [`snapshot`] 中依然可见。
/// 之后再向该端点发请求会复用这个条目。
///
/// [`close`]: ConnectionPool::close
/// [`snapshot`]: ConnectionPool::snapshot
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

/// 连接池的共享状态。
struct PoolInner {
    config: Config,
    connector: Box<dyn Connect>,
    exec: Exec,
    // 只增不减，见 `ConnectionPool` 的文档
    // 外层锁只保护这张表，端点内部状态由各自的锁保护
    endpoints: Mutex<HashMap<Endpoint, Arc<Shared>>>,
    // 连接 id 与请求 id 共用的递增计数器
    next_id: AtomicU64,
}

struct Shared {
    endpoint: Endpoint,
    state: Mutex<EndpointPool>,
}

/// 单个端点的连接与等待队列，由 `Shared::state` 的锁保护。
struct EndpointPool {
    // 按创建顺序排列
    conns: Vec<Connection>,
    // FIFO 等待队列
    waiters: VecDeque<Waiter>,
    completed: u64,
    failed: u64,
}

/// 排队中的请求，通过 oneshot 把分配结果交回给 `Checkout`。
struct Waiter {
    id: u64,
    tx: oneshot::Sender<crate::Result<Grant>>,
}

/// 连接池交给等待中 checkout 的一个流槽位。
pub(crate) struct Grant {
    pub(crate) lease: Lease,
    pub(crate) slot: Slot,
}

/// 占用某条连接的一个流槽位，直到被归还。
///
/// 丢弃时若尚未归还，以 `Outcome::Canceled` 归还。
pub(crate) struct Lease {
    endpoint: EndpointRef,
    conn_id: u64,
    // 尚未归还
    armed: bool,
}

/// 归还槽位时流的结局，决定计数器如何变化。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Outcome {
    Completed,
    Failed,
    Canceled,
}

/// 对某个端点条目的强引用。
#[derive(Clone)]
struct EndpointRef {
    pool: Arc<PoolInner>,
    shared: Arc<Shared>,
}

/// 后台任务持有的弱引用，后台任务因此不会让连接池一直存活。
struct WeakRef {
    pool: Weak<PoolInner>,
    shared: Weak<Shared>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // 没有跨越 panic 点的不变量，锁中毒后数据仍然可用
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ===== impl ConnectionPool =====

impl ConnectionPool {
    /// 创建一个空的连接池。
    ///
    /// `connector` 负责建立连接，`executor` 负责运行连接池的后台任务：
    /// 握手、传输层监视和空闲计时器。空闲计时器使用 `tokio::time`，
    /// 因此执行器必须在 tokio 运行时中运行这些 future。
    pub fn new<C, E>(config: Config, connector: C, executor: E) -> ConnectionPool
    where
        C: Connect,
        E: Executor<BoxSendFuture> + Send + Sync + 'static,
    {
        ConnectionPool {
            inner: Arc::new(PoolInner {
                config,
                connector: Box::new(connector),
                exec: Exec::new(executor),
                endpoints: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// 连接池的配置。
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// 为 `request` 预留一个到 `endpoint` 的流。
    ///
    /// 返回之前准入决策已经做出：请求要么绑定到有空闲槽位的连接上，
    /// 要么进入等待队列（上限允许时顺带开新连接）。返回的 [`Checkout`]
    /// 在分配到槽位时完成。
    ///
    /// 丢弃 `Checkout` 即撤回请求。
    pub fn acquire_stream(&self, endpoint: &Endpoint, request: Request<Bytes>) -> Checkout {
        let endpoint = self.endpoint_ref(endpoint);
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        {
            let mut state = endpoint.lock();
            state.waiters.push_back(Waiter { id, tx });
            trace!(
                "request {} queued for {}, {} waiting",
                id,
                endpoint.shared.endpoint,
                state.waiters.len()
            );
            state.dispatch(&endpoint);
        }
        Checkout {
            endpoint,
            waiter: Some(id),
            rx,
            request: Some(request),
        }
    }

    /// 所有端点的连接和计数器的一致视图。
    ///
    /// 先复制端点列表再逐个加锁，不会同时持有两把锁。
    pub fn snapshot(&self) -> Snapshot {
        let entries: Vec<Arc<Shared>> = lock(&self.inner.endpoints).values().cloned().collect();
        let mut snapshot = Snapshot::default();
        for shared in entries {
            let stats = lock(&shared.state).stats();
            snapshot.insert(shared.endpoint.clone(), stats);
        }
        snapshot
    }

    /// 不再往端点现有的连接上放新流。
    ///
    /// 每条连接在其上的流全部结束后关闭。现在或之后排队的请求，
    /// 会在旧连接腾出连接数额度后由新连接承载。
    pub fn drain(&self, endpoint: &Endpoint) {
        let Some(endpoint) = self.existing(endpoint) else {
            return;
        };
        let mut state = endpoint.lock();
        debug!("draining connections to {}", endpoint.shared.endpoint);
        state.conns.retain_mut(|conn| !conn.drain());
        state.dispatch(&endpoint);
    }

    /// 关闭到该端点的所有连接。
    ///
    /// 运行中的流和排队中的请求都以 "connection closed" 错误失败。
    pub fn close(&self, endpoint: &Endpoint) {
        let Some(endpoint) = self.existing(endpoint) else {
            return;
        };
        let (conns, waiters) = {
            let mut state = endpoint.lock();
            debug!(
                "closing {} connections to {}",
                state.conns.len(),
                endpoint.shared.endpoint
            );
            for conn in state.conns.iter_mut() {
                conn.close();
            }
            (
                std::mem::take(&mut state.conns),
                std::mem::take(&mut state.waiters),
            )
        };
        // 连接和等待者都在锁外丢弃/通知
        drop(conns);
        for waiter in waiters {
            let _ = waiter.tx.send(Err(crate::Error::new_connection_closed()));
        }
    }

    fn endpoint_ref(&self, endpoint: &Endpoint) -> EndpointRef {
        let shared = lock(&self.inner.endpoints)
            .entry(endpoint.clone())
            .or_insert_with(|| {
                Arc::new(Shared {
                    endpoint: endpoint.clone(),
                    state: Mutex::new(EndpointPool::new()),
                })
            })
            .clone();
        EndpointRef {
            pool: self.inner.clone(),
            shared,
        }
    }

    fn existing(&self, endpoint: &Endpoint) -> Option<EndpointRef> {
        let shared = lock(&self.inner.endpoints).get(endpoint).cloned()?;
        Some(EndpointRef {
            pool: self.inner.clone(),
            shared,
        })
    }
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("config", &self.inner.config)
            .finish()
    }
}

// ===== impl EndpointPool =====

impl EndpointPool {
    fn new() -> EndpointPool {
        EndpointPool {
            conns: Vec::new(),
            waiters: VecDeque::new(),
            completed: 0,
            failed: 0,
        }
    }

    fn position(&self, conn_id: u64) -> Option<usize> {
        self.conns.iter().position(|conn| conn.id() == conn_id)
    }

    fn live_connections(&self) -> usize {
        self.conns.iter().filter(|conn| conn.is_live()).count()
    }

    /// 先用已打开的连接服务队列，剩下的再开新连接去承接。
    fn dispatch(&mut self, endpoint: &EndpointRef) {
        self.assign_waiters(endpoint);
        self.connect_for_waiters(endpoint);
    }

    /// 按 FIFO 顺序把队首请求交给第一条有空闲槽位的连接。
    fn assign_waiters(&mut self, endpoint: &EndpointRef) {
        while !self.waiters.is_empty() {
            let conn = match self.conns.iter_mut().find(|conn| conn.has_capacity()) {
                Some(conn) => conn,
                None => return,
            };
            let waiter = match self.waiters.pop_front() {
                Some(waiter) => waiter,
                None => return,
            };
            // checkout 已被丢弃
            if waiter.tx.is_closed() {
                continue;
            }
            let slot = match conn.open_stream() {
                Ok(slot) => slot,
                Err(err) => {
                    error!("connection {} refused a stream: {}", conn.id(), err);
                    let _ = waiter.tx.send(Err(err));
                    continue;
                }
            };
            trace!(
                "request {} assigned to connection {} ({} open)",
                waiter.id,
                conn.id(),
                conn.open_streams()
            );
            let grant = Grant {
                lease: Lease {
                    endpoint: endpoint.clone(),
                    conn_id: conn.id(),
                    armed: true,
                },
                slot,
            };
            if let Err(Ok(grant)) = waiter.tx.send(Ok(grant)) {
                // checkout 在 `is_closed` 检查之后才被丢弃。
                // 此时正持有锁，lease 不能走加锁的归还路径
                grant.lease.disarm();
                conn.unreserve();
            }
        }
    }

    /// 握手中的连接预计接不走的排队请求数。
    fn shortfall(&mut self) -> usize {
        self.waiters.retain(|waiter| !waiter.tx.is_closed());
        let mut presumed = 0usize;
        for conn in self
            .conns
            .iter()
            .filter(|conn| conn.state() == ConnectionState::Connecting)
        {
            match conn.presumed_capacity() {
                Some(capacity) => presumed = presumed.saturating_add(capacity),
                None => return 0,
            }
        }
        self.waiters.len().saturating_sub(presumed)
    }

    /// 端点的存活连接数是否已达上限。
    fn at_capacity(&self, endpoint: &EndpointRef) -> bool {
        let max_connections = endpoint.pool.config.max_connections();
        if self.live_connections() < max_connections {
            return false;
        }
        trace!(
            "{} at {} connections, {} requests waiting",
            endpoint.shared.endpoint,
            max_connections,
            self.waiters.len()
        );
        true
    }

    fn connect_for_waiters(&mut self, endpoint: &EndpointRef) {
        while self.shortfall() > 0 && !self.at_capacity(endpoint) {
            self.connect(endpoint, false);
        }
    }

    /// 还有其他连接时处理一次握手失败，返回需要以建连错误失败的等待者。
    ///
    /// 失败的连接会被替补一次。替补也失败时，原本指望它的那些请求
    /// （即队尾超出剩余连接预计容量的部分）以建连错误失败，
    /// 而不是在已经占满的连接后面一直等下去。
    fn recover_from_failed(
        &mut self,
        endpoint: &EndpointRef,
        failed: &Connection,
        _cause: &Arc<dyn std::error::Error + Send + Sync>,
    ) -> Vec<Waiter> {
        self.assign_waiters(endpoint);
        let shortfall = self.shortfall();
        if shortfall == 0 || self.at_capacity(endpoint) {
            return Vec::new();
        }
        if !failed.is_replacement() {
            self.connect(endpoint, true);
            return Vec::new();
        }
        warn!(
            "replacement connection to {} failed, {} requests fail: {}",
            endpoint.shared.endpoint, shortfall, _cause
        );
        // 队首的请求留给剩余连接，保持 FIFO
        let keep = self.waiters.len() - shortfall;
        self.waiters.split_off(keep).into_iter().collect()
    }

    /// 登记一条握手中的连接，并把握手交给执行器。
    fn connect(&mut self, endpoint: &EndpointRef, replacement: bool) {
        let pool = &endpoint.pool;
        let id = pool.next_id.fetch_add(1, Ordering::Relaxed);
        let conn = Connection::connecting(id, pool.config.multiplex_limit());
        self.conns
            .push(if replacement { conn.replacing() } else { conn });
        debug!(
            "connecting to {} (connection {}, {} live)",
            endpoint.shared.endpoint,
            id,
            self.live_connections()
        );

        let handshake = pool.connector.connect(&endpoint.shared.endpoint);
        let weak = endpoint.downgrade();
        pool.exec.execute(async move {
            let result = handshake.await;
            match weak.upgrade() {
                Some(endpoint) => endpoint.connected(id, result),
                None => {
                    // 连接池已经不在了
                    if let Ok(connected) = result {
                        connected.transport.close();
                    }
                }
            }
        });
    }

    /// 为空闲连接启动计时器。到期时若 `idle_epoch` 未变，说明期间没被
    /// 使用过，关闭该连接。
    fn arm_idle_timer(&self, endpoint: &EndpointRef, idx: usize) {
        let timeout = match endpoint.pool.config.idle_timeout() {
            Some(timeout) => timeout,
            None => return,
        };
        let conn = &self.conns[idx];
        let (id, epoch) = (conn.id(), conn.idle_epoch());
        let weak = endpoint.downgrade();
        endpoint.pool.exec.execute(async move {
            tokio::time::sleep(timeout).await;
            if let Some(endpoint) = weak.upgrade() {
                endpoint.reap_idle(id, epoch);
            }
        });
    }

    fn stats(&self) -> EndpointStats {
        let mut stats = EndpointStats {
            queued: self.waiters.iter().filter(|w| !w.tx.is_closed()).count(),
            completed_responses: self.completed,
            failed_requests: self.failed,
            ..EndpointStats::default()
        };
        for conn in &self.conns {
            match conn.state() {
                ConnectionState::Connecting => stats.connecting += 1,
                ConnectionState::Open | ConnectionState::Draining => stats.open_connections += 1,
                ConnectionState::Closed => {}
            }
            stats.connections.push(conn.stats());
        }
        stats
    }
}

// ===== impl EndpointRef =====

impl EndpointRef {
    fn lock(&self) -> MutexGuard<'_, EndpointPool> {
        lock(&self.shared.state)
    }

    fn downgrade(&self) -> WeakRef {
        WeakRef {
            pool: Arc::downgrade(&self.pool),
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// 握手任务结束后的回调。
    fn connected(&self, id: u64, result: Result<Connected, BoxError>) {
        let mut state = self.lock();
        let idx = match state.position(id) {
            Some(idx) => idx,
            None => {
                // 握手期间端点被 close() 了
                if let Ok(connected) = result {
                    connected.transport.close();
                }
                return;
            }
        };

        match result {
            Ok(connected) => {
                let conn = &mut state.conns[idx];
                let transport = conn.establish(connected);
                debug!(
                    "connection {} to {} established, limit {:?}",
                    id,
                    self.shared.endpoint,
                    conn.effective_limit()
                );

                // 监视传输层，连接断开时从连接池中淘汰
                let closed = transport.closed();
                let weak = self.downgrade();
                self.pool.exec.execute(async move {
                    closed.await;
                    if let Some(endpoint) = weak.upgrade() {
                        endpoint.lost(id);
                    }
                });

                state.dispatch(self);
                if let Some(idx) = state.position(id) {
                    if state.conns[idx].is_idle() {
                        state.arm_idle_timer(self, idx);
                    }
                }
            }
            Err(cause) => {
                debug!(
                    "connection {} to {} failed: {}",
                    id, self.shared.endpoint, cause
                );
                let failed = state.conns.remove(idx);
                let cause: Arc<dyn std::error::Error + Send + Sync> = Arc::from(cause);
                let waiters = if state.live_connections() > 0 {
                    state.recover_from_failed(self, &failed, &cause)
                } else {
                    std::mem::take(&mut state.waiters).into()
                };
                drop(state);
                for waiter in waiters {
                    let _ = waiter.tx.send(Err(crate::Error::new_connect(cause.clone())));
                }
            }
        }
    }

    /// 传输层断开。其上的流由各自的 shutdown 信号得知，这里只负责淘汰连接，
    /// 并为排队请求重新调度。
    fn lost(&self, id: u64) {
        let mut state = self.lock();
        let idx = match state.position(id) {
            Some(idx) => idx,
            None => return,
        };
        debug!(
            "connection {} to {} closed by transport",
            id, self.shared.endpoint
        );
        state.conns.remove(idx);
        state.dispatch(self);
    }

    /// 归还槽位并更新计数器。
    fn release(&self, conn_id: u64, outcome: Outcome) {
        let mut state = self.lock();
        match outcome {
            Outcome::Completed => state.completed += 1,
            Outcome::Failed => state.failed += 1,
            Outcome::Canceled => {}
        }
        if let Some(idx) = state.position(conn_id) {
            let conn = &mut state.conns[idx];
            // 未发送就被丢弃的流不计入 served
            if outcome == Outcome::Canceled {
                conn.unreserve();
            } else {
                conn.release_stream();
            }
            trace!(
                "connection {} released a stream, {} open",
                conn_id,
                conn.open_streams()
            );
            if conn.state() == ConnectionState::Draining {
                if conn.drain() {
                    debug!("drained connection {} closed", conn_id);
                    state.conns.remove(idx);
                }
            } else if conn.is_idle() {
                state.arm_idle_timer(self, idx);
            }
        }
        state.dispatch(self);
    }

    fn reap_idle(&self, id: u64, epoch: u64) {
        let mut state = self.lock();
        let idx = match state.position(id) {
            Some(idx) => idx,
            None => return,
        };
        let conn = &state.conns[idx];
        if !conn.is_idle() || conn.idle_epoch() != epoch {
            return;
        }
        debug!(
            "closing idle connection {} to {}",
            id, self.shared.endpoint
        );
        state.conns.remove(idx);
    }

    /// 从等待队列中移除一个被撤回的请求。
    fn cancel(&self, waiter_id: u64) {
        let mut state = self.lock();
        if let Some(pos) = state.waiters.iter().position(|w| w.id == waiter_id) {
            state.waiters.remove(pos);
            trace!("request {} withdrawn", waiter_id);
        }
    }
}

impl WeakRef {
    fn upgrade(&self) -> Option<EndpointRef> {
        Some(EndpointRef {
            pool: self.pool.upgrade()?,
            shared: self.shared.upgrade()?,
        })
    }
}

// ===== impl Lease =====

impl Lease {
    pub(crate) fn endpoint(&self) -> &Endpoint {
        &self.endpoint.shared.endpoint
    }

    pub(crate) fn connection_id(&self) -> u64 {
        self.conn_id
    }

    /// 把槽位还给连接池。只有第一次调用生效。
    pub(crate) fn release(&mut self, outcome: Outcome) {
        if self.armed {
            self.armed = false;
            self.endpoint.release(self.conn_id, outcome);
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.release(Outcome::Canceled);
    }
}

// ===== impl Checkout =====

/// 等待中的流预留，由 [`ConnectionPool::acquire_stream`] 返回。
#[must_use = "futures do nothing unless polled"]
pub struct Checkout {
    endpoint: EndpointRef,
    // 仍在端点等待队列中时为 Some
    waiter: Option<u64>,
    rx: oneshot::Receiver<crate::Result<Grant>>,
    request: Option<Request<Bytes>>,
}

impl Future for Checkout {
    type Output = crate::Result<Stream>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut task::Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        let result = ready!(Pin::new(&mut this.rx).poll(cx));
        this.waiter = None;
        Poll::Ready(match result {
            Ok(Ok(grant)) => match this.request.take() {
                Some(request) => Ok(Stream::new(grant, request)),
                None => Err(crate::Error::new_canceled()),
            },
            Ok(Err(err)) => Err(err),
            Err(_recv) => Err(crate::Error::new_canceled()),
        })
    }
}

impl Drop for Checkout {
    fn drop(&mut self) {
        if let Some(id) = self.waiter.take() {
            self.rx.close();
            // 与 drop 竞争到的 grant 归还时要拿锁，所以必须在 cancel
            // 拿锁之前先丢弃它
            if let Ok(Ok(grant)) = self.rx.try_recv() {
                drop(grant);
            }
            self.endpoint.cancel(id);
        }
    }
}

impl fmt::Debug for Checkout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Checkout")
            .field("endpoint", &self.endpoint.shared.endpoint)
            .field("queued", &self.waiter.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use futures_util::future::{self, BoxFuture};
    use http::Response;
    use tokio_test::{assert_pending, assert_ready, task};

    use crate::client::connect::Transport;
    use crate::endpoint::Scheme;
    use crate::rt::TokioExecutor;

    /// 立即连上一个流上限固定的对端；永远不发响应，因此分配出去的流一直占着。
    struct Stalled {
        peer_limit: Option<usize>,
        connects: Arc<AtomicUsize>,
    }

    struct Silent;

    impl Transport for Silent {
        fn send_request(
            &self,
            _req: Request<Bytes>,
        ) -> BoxFuture<'static, Result<Response<Bytes>, BoxError>> {
            Box::pin(future::pending())
        }

        fn closed(&self) -> BoxFuture<'static, ()> {
            Box::pin(future::pending())
        }

        fn close(&self) {}
    }

    impl Connect for Stalled {
        fn connect(&self, _endpoint: &Endpoint) -> BoxFuture<'static, Result<Connected, BoxError>> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            let limit = self.peer_limit;
            Box::pin(async move { Ok(Connected::new(Silent, limit)) })
        }
    }

    fn pool(max_connections: usize, local: Option<usize>, peer: Option<usize>) -> (ConnectionPool, Arc<AtomicUsize>) {
        let connects = Arc::new(AtomicUsize::new(0));
        let config = Config::builder()
            .max_connections(max_connections)
            .multiplex_limit(local)
            .idle_timeout(None)
            .build()
            .unwrap();
        let connector = Stalled {
            peer_limit: peer,
            connects: connects.clone(),
        };
        (ConnectionPool::new(config, connector, TokioExecutor::new()), connects)
    }

    fn endpoint() -> Endpoint {
        Endpoint::new(Scheme::Http, "localhost", 8080).unwrap()
    }

    fn req() -> Request<Bytes> {
        Request::get("/").body(Bytes::new()).unwrap()
    }

    #[tokio::test]
    async fn admission_opens_connection_before_returning() {
        let _ = pretty_env_logger::try_init();
        let (pool, connects) = pool(4, Some(2), None);

        let mut checkouts: Vec<_> = (0..3)
            .map(|_| task::spawn(pool.acquire_stream(&endpoint(), req())))
            .collect();

        // 3 个请求、每连接 2 个流，需要 2 条连接，且是同步决定的
        assert_eq!(connects.load(Ordering::SeqCst), 2);
        let stats = pool.snapshot().endpoint(&endpoint());
        assert_eq!(stats.connecting, 2);
        assert_eq!(stats.queued, 3);

        for checkout in checkouts.iter_mut() {
            assert_pending!(checkout.poll());
        }
    }

    #[tokio::test]
    async fn unbounded_local_limit_opens_one_connection() {
        let (pool, connects) = pool(8, None, None);

        let mut streams = Vec::new();
        let checkouts: Vec<_> = (0..50)
            .map(|_| pool.acquire_stream(&endpoint(), req()))
            .collect();
        for checkout in checkouts {
            streams.push(checkout.await.unwrap());
        }

        assert_eq!(connects.load(Ordering::SeqCst), 1);
        let stats = pool.snapshot().endpoint(&endpoint());
        assert_eq!(stats.open_connections, 1);
        assert_eq!(stats.open_streams(), 50);
    }

    #[tokio::test]
    async fn peer_limit_forces_more_connections() {
        let (pool, connects) = pool(30, Some(10), Some(5));

        let mut streams = Vec::new();
        let checkouts: Vec<_> = (0..100)
            .map(|_| pool.acquire_stream(&endpoint(), req()))
            .collect();
        for checkout in checkouts {
            streams.push(checkout.await.unwrap());
        }

        assert_eq!(connects.load(Ordering::SeqCst), 20);
        let stats = pool.snapshot().endpoint(&endpoint());
        assert_eq!(stats.open_connections, 20);
        for conn in &stats.connections {
            assert_eq!(conn.open_streams, 5);
            assert_eq!(conn.max_streams, Some(5));
        }
    }

    #[tokio::test]
    async fn dropping_queued_checkout_leaves_counts_alone() {
        let (pool, _) = pool(1, Some(1), None);

        let first = pool.acquire_stream(&endpoint(), req()).await.unwrap();
        let mut queued = task::spawn(pool.acquire_stream(&endpoint(), req()));
        assert_pending!(queued.poll());
        assert_eq!(pool.snapshot().endpoint(&endpoint()).queued, 1);

        drop(queued);
        let stats = pool.snapshot().endpoint(&endpoint());
        assert_eq!(stats.queued, 0);
        assert_eq!(stats.open_streams(), 1);
        assert_eq!(stats.failed_requests, 0);

        drop(first);
        let stats = pool.snapshot().endpoint(&endpoint());
        assert_eq!(stats.open_streams(), 0);
        assert_eq!(stats.completed_responses, 0);
        // 从未发送，不计入 served
        assert_eq!(stats.connections[0].served, 0);
    }

    /// 测试：释放的槽位交给队首，其余请求继续等待。
    #[tokio::test]
    async fn freed_slot_goes_to_queue_head() {
        let (pool, _) = pool(1, Some(1), None);

        let first = pool.acquire_stream(&endpoint(), req()).await.unwrap();
        let mut second = task::spawn(pool.acquire_stream(&endpoint(), req()));
        let mut third = task::spawn(pool.acquire_stream(&endpoint(), req()));
        assert_pending!(second.poll());
        assert_pending!(third.poll());

        drop(first);
        assert!(second.is_woken());
        let stream = assert_ready!(second.poll()).unwrap();
        assert_pending!(third.poll());
        assert_eq!(stream.state(), crate::client::StreamState::Pending);
    }

    #[tokio::test]
    async fn close_fails_queued_requests() {
        let (pool, _) = pool(1, Some(1), None);

        let _first = pool.acquire_stream(&endpoint(), req()).await.unwrap();
        let queued = pool.acquire_stream(&endpoint(), req());

        pool.close(&endpoint());
        let err = queued.await.unwrap_err();
        assert!(err.is_connection_closed());
        assert_eq!(pool.snapshot().endpoint(&endpoint()).open_connections, 0);
    }

    /// 测试：close() 之后端点条目仍然保留。
    ///
    /// 验证流程：
    /// 1. 一个流在途时关闭端点，流以 connection closed 失败
    /// 2. 快照中仍有该端点，失败计数为 1，连接列表为空
    /// 3. 再次请求复用同一条目，开一条新连接，计数器不清零
    #[tokio::test]
    async fn closed_endpoint_keeps_its_counters() {
        let (pool, connects) = pool(1, Some(1), None);

        let mut stream = pool.acquire_stream(&endpoint(), req()).await.unwrap();
        let mut sending = task::spawn(async move { stream.send().await });
        assert_pending!(sending.poll());

        pool.close(&endpoint());
        assert!(assert_ready!(sending.poll()).unwrap_err().is_connection_closed());

        let snapshot = pool.snapshot();
        let stats = snapshot.get(&endpoint()).expect("entry kept after close");
        assert_eq!(stats.failed_requests, 1);
        assert!(stats.connections.is_empty());

        let _again = pool.acquire_stream(&endpoint(), req()).await.unwrap();
        assert_eq!(connects.load(Ordering::SeqCst), 2);
        assert_eq!(pool.snapshot().endpoint(&endpoint()).failed_requests, 1);
    }
}
