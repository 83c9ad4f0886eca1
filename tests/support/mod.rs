#![allow(dead_code)]

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use h2pool::client::connect::{Connect, Connected, Transport};
use h2pool::client::{ConnectionPool, Dispatcher};
use h2pool::rt::TokioExecutor;
use h2pool::{BoxError, Config, Endpoint, Request, Response, Scheme, Snapshot};
use tokio::sync::watch;

pub fn endpoint() -> Endpoint {
    Endpoint::new(Scheme::Http, "localhost", 8080).unwrap()
}

pub fn get(path: &str) -> Request<Bytes> {
    Request::get(path).body(Bytes::new()).unwrap()
}

pub fn config(max_connections: usize, multiplex_limit: Option<usize>) -> Config {
    Config::builder()
        .max_connections(max_connections)
        .multiplex_limit(multiplex_limit)
        .build()
        .unwrap()
}

pub fn dispatcher<C: Connect>(config: Config, connector: C) -> Dispatcher {
    Dispatcher::new(ConnectionPool::new(config, connector, TokioExecutor::new()))
}

/// 反复获取快照直到 `cond` 成立，每次之间让出运行时。超时后 panic。
pub async fn wait_until<F>(dispatcher: &Dispatcher, mut cond: F) -> Snapshot
where
    F: FnMut(&Snapshot) -> bool,
{
    let wait = async {
        loop {
            let snapshot = dispatcher.snapshot();
            if cond(&snapshot) {
                return snapshot;
            }
            tokio::task::yield_now().await;
        }
    };
    timeout(wait).await
}

pub async fn timeout<F: Future>(fut: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(10), fut)
        .await
        .expect("timed out")
}

/// 内存中的连接器。每条连接都报告 `peer_limit` 作为对端流上限，
/// 响应在闸门（gate）打开之前一直被扣住。
#[derive(Clone)]
pub struct MockConnector {
    state: Arc<MockState>,
}

struct MockState {
    peer_limit: Option<usize>,
    connects: AtomicUsize,
    refuse: AtomicBool,
    refused: Mutex<Vec<usize>>,
    gate: watch::Sender<bool>,
    transports: Mutex<Vec<Arc<MockTransport>>>,
}

pub struct MockTransport {
    closed: watch::Sender<bool>,
    gate: watch::Receiver<bool>,
}

impl MockConnector {
    pub fn new(peer_limit: Option<usize>) -> MockConnector {
        let (gate, _) = watch::channel(false);
        MockConnector {
            state: Arc::new(MockState {
                peer_limit,
                connects: AtomicUsize::new(0),
                refuse: AtomicBool::new(false),
                refused: Mutex::new(Vec::new()),
                gate,
                transports: Mutex::new(Vec::new()),
            }),
        }
    }

    /// 响应立即返回，不等闸门。
    pub fn ungated(peer_limit: Option<usize>) -> MockConnector {
        let connector = MockConnector::new(peer_limit);
        connector.open_gate();
        connector
    }

    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn open_gate(&self) {
        self.state.gate.send_replace(true);
    }

    pub fn refuse(&self, refuse: bool) {
        self.state.refuse.store(refuse, Ordering::SeqCst);
    }

    /// 让第 `n` 次建连失败（从 0 开始计数）。
    pub fn refuse_nth(&self, n: usize) {
        self.state.refused.lock().unwrap().push(n);
    }

    /// 模拟对端断开第 `n` 条连接（按建连成功的顺序）。
    pub fn kill(&self, n: usize) {
        let transport = self.state.transports.lock().unwrap()[n].clone();
        transport.closed.send_replace(true);
    }

    pub fn is_closed(&self, n: usize) -> bool {
        *self.state.transports.lock().unwrap()[n].closed.borrow()
    }
}

impl Connect for MockConnector {
    fn connect(&self, _endpoint: &Endpoint) -> BoxFuture<'static, Result<Connected, BoxError>> {
        let attempt = self.state.connects.fetch_add(1, Ordering::SeqCst);
        let state = self.state.clone();
        Box::pin(async move {
            tokio::task::yield_now().await;
            if state.refuse.load(Ordering::SeqCst)
                || state.refused.lock().unwrap().contains(&attempt)
            {
                return Err("connection refused".into());
            }
            let (closed, _) = watch::channel(false);
            let transport = Arc::new(MockTransport {
                closed,
                gate: state.gate.subscribe(),
            });
            state.transports.lock().unwrap().push(transport.clone());
            Ok(Connected::new(SharedTransport(transport), state.peer_limit))
        })
    }
}

struct SharedTransport(Arc<MockTransport>);

impl Transport for SharedTransport {
    fn send_request(&self, req: Request<Bytes>) -> BoxFuture<'static, Result<Response<Bytes>, BoxError>> {
        let mut gate = self.0.gate.clone();
        let body = Bytes::from(req.uri().path().to_owned());
        Box::pin(async move {
            // 连接关闭由连接池发现并中止流，mock 自己只是永远不回应
            let _ = gate.wait_for(|open| *open).await;
            Ok(Response::new(body))
        })
    }

    fn closed(&self) -> BoxFuture<'static, ()> {
        let mut closed = self.0.closed.subscribe();
        Box::pin(async move {
            let _ = closed.wait_for(|closed| *closed).await;
        })
    }

    fn close(&self) {
        self.0.closed.send_replace(true);
    }
}
