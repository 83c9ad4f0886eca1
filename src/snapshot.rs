//! 连接池状态快照模块
//!
//! [`Snapshot`] 是某一时刻连接池各端点统计数据的只读副本，
//! 获取快照不会改变连接池的任何状态。

use std::collections::btree_map::{self, BTreeMap};

use crate::client::ConnectionState;
use crate::endpoint::Endpoint;

/// 连接池每端点统计数据的一致副本。
///
/// 每个端点的数据都在该端点的锁内读取，因此彼此一致。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Snapshot {
    endpoints: BTreeMap<Endpoint, EndpointStats>,
}

/// 单个端点的统计数据。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct EndpointStats {
    /// 已完成握手且尚未关闭的连接数，包括排空中的连接
    pub open_connections: usize,
    /// 仍在握手中的连接数
    pub connecting: usize,
    /// 等待流槽位的请求数
    pub queued: usize,
    /// 收到响应的请求数
    pub completed_responses: u64,
    /// 分配到流之后失败的请求数
    pub failed_requests: u64,
    /// 每条连接的详情，按创建顺序排列
    pub connections: Vec<ConnectionStats>,
}

/// 单条连接的统计数据。
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub struct ConnectionStats {
    /// 连接池内唯一的连接 id
    pub id: u64,
    /// 生命周期状态
    pub state: ConnectionState,
    /// 当前在该连接上运行的流数
    pub open_streams: usize,
    /// 有效流上限。握手期间只有本地上限生效；`None` 表示不限制
    pub max_streams: Option<usize>,
    /// 该连接承载过、且已完成或失败的流数。
    /// 分配后未发送就被丢弃的流不计入
    pub served: u64,
}

impl Snapshot {
    pub(crate) fn insert(&mut self, endpoint: Endpoint, stats: EndpointStats) {
        self.endpoints.insert(endpoint, stats);
    }

    /// `endpoint` 的统计数据，连接池从未见过该端点时返回 `None`。
    pub fn get(&self, endpoint: &Endpoint) -> Option<&EndpointStats> {
        self.endpoints.get(endpoint)
    }

    /// `endpoint` 的统计数据，连接池从未见过该端点时全部为零。
    pub fn endpoint(&self, endpoint: &Endpoint) -> EndpointStats {
        self.get(endpoint).cloned().unwrap_or_default()
    }

    /// 按端点排序迭代。
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            inner: self.endpoints.iter(),
        }
    }

    /// 所有端点已建立的连接总数。
    pub fn open_connections(&self) -> usize {
        self.endpoints.values().map(|s| s.open_connections).sum()
    }

    /// 所有端点收到的响应总数。
    pub fn completed_responses(&self) -> u64 {
        self.endpoints.values().map(|s| s.completed_responses).sum()
    }
}

impl EndpointStats {
    /// 该端点所有连接上正在运行的流总数。
    pub fn open_streams(&self) -> usize {
        self.connections.iter().map(|c| c.open_streams).sum()
    }
}

/// [`Snapshot`] 中各端点的迭代器。
#[derive(Debug)]
pub struct Iter<'a> {
    inner: btree_map::Iter<'a, Endpoint, EndpointStats>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = (&'a Endpoint, &'a EndpointStats);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}

impl<'a> IntoIterator for &'a Snapshot {
    type Item = (&'a Endpoint, &'a EndpointStats);
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Iter<'a> {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::Scheme;

    #[test]
    fn unknown_endpoint_reads_as_zero() {
        let snapshot = Snapshot::default();
        let ep = Endpoint::new(Scheme::Http, "localhost", 8080).unwrap();
        assert!(snapshot.get(&ep).is_none());
        assert_eq!(snapshot.endpoint(&ep), EndpointStats::default());
        assert_eq!(snapshot.open_connections(), 0);
    }

    #[test]
    fn totals_sum_endpoints() {
        let mut snapshot = Snapshot::default();
        for port in [8080, 8081] {
            let ep = Endpoint::new(Scheme::Http, "localhost", port).unwrap();
            snapshot.insert(
                ep,
                EndpointStats {
                    open_connections: 2,
                    completed_responses: 5,
                    ..EndpointStats::default()
                },
            );
        }
        assert_eq!(snapshot.open_connections(), 4);
        assert_eq!(snapshot.completed_responses(), 10);
        let ports: Vec<u16> = snapshot.iter().map(|(ep, _)| ep.port()).collect();
        assert_eq!(ports, [8080, 8081]);
    }
}
