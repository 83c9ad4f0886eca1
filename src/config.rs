//! 连接池配置模块
//!
//! [`Config`] 保存每个端点的限制：最大连接数、本地多路复用上限、空闲超时。
//! 通过 [`Builder`] 构造，`build()` 负责校验取值范围。
//!
//! 有效流上限（effective limit）= 本地上限与对端 `SETTINGS_MAX_CONCURRENT_STREAMS`
//! 中较小的一个，任一方缺省时视为不限制。

use std::time::Duration;

// 默认每个端点只开一条连接
const DEFAULT_MAX_CONNECTIONS: usize = 1;
// 默认空闲 90 秒后关闭连接
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// [`ConnectionPool`](crate::client::ConnectionPool) 的每端点限制，
/// 构造后不可变，且已经过校验。
///
/// 通过 [`Config::builder`] 构造。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// 每个端点的连接数硬上限（握手中、已打开、排空中的都计入）
    max_connections: usize,
    /// 本地多路复用上限，`None` 表示完全交给对端决定
    multiplex_limit: Option<usize>,
    /// 空闲超时，`None` 表示不主动关闭空闲连接
    idle_timeout: Option<Duration>,
}

/// 连接池配置构建器。
///
/// **注意**：各选项的默认值*不保证稳定*，随时可能调整。
#[derive(Clone, Debug)]
pub struct Builder {
    max_connections: usize,
    multiplex_limit: Option<usize>,
    idle_timeout: Option<Duration>,
}

impl Config {
    /// 创建一个使用默认设置的构建器。
    pub fn builder() -> Builder {
        Builder::new()
    }

    /// 到单个端点的同时连接数上限（握手中、已打开、排空中都计入）。
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// 调用方期望的单连接流上限。`None` 表示完全以对端为准。
    pub fn multiplex_limit(&self) -> Option<usize> {
        self.multiplex_limit
    }

    /// 连接在没有任何流的情况下最多保留多久。
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout
    }

    /// 给定对端在 SETTINGS 帧中通告的值，计算一条连接同时可承载的流数。
    ///
    /// 对端的值只会收紧本地上限。`None` 表示双方都不限制。
    pub fn effective_limit(&self, peer: Option<usize>) -> Option<usize> {
        effective_limit(self.multiplex_limit, peer)
    }
}

impl Default for Config {
    fn default() -> Config {
        Config {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            multiplex_limit: None,
            idle_timeout: Some(DEFAULT_IDLE_TIMEOUT),
        }
    }
}

/// 取两者中较小的一个，缺省一方视为无穷大。
pub(crate) fn effective_limit(local: Option<usize>, peer: Option<usize>) -> Option<usize> {
    match (local, peer) {
        (Some(local), Some(peer)) => Some(local.min(peer)),
        (Some(limit), None) | (None, Some(limit)) => Some(limit),
        (None, None) => None,
    }
}

impl Builder {
    /// 创建一个使用默认设置的构建器。
    pub fn new() -> Builder {
        let defaults = Config::default();
        Builder {
            max_connections: defaults.max_connections,
            multiplex_limit: defaults.multiplex_limit,
            idle_timeout: defaults.idle_timeout,
        }
    }

    /// 设置到单个端点的最大连接数。
    ///
    /// 至少为 1。默认值为 1。
    pub fn max_connections(&mut self, max: usize) -> &mut Self {
        self.max_connections = max;
        self
    }

    /// 设置本地多路复用上限：无论对端允许多少，连接池在一条连接上最多
    /// 放这么多个流。
    ///
    /// 传入 `None` 则完全以对端的 `SETTINGS_MAX_CONCURRENT_STREAMS` 为准。
    /// 传入 0 会被 [`build`](Builder::build) 拒绝。
    ///
    /// 默认值为 `None`。
    pub fn multiplex_limit(&mut self, limit: impl Into<Option<usize>>) -> &mut Self {
        self.multiplex_limit = limit.into();
        self
    }

    /// 设置空闲连接保留多久。
    ///
    /// 传入 `None` 则空闲连接一直保留，直到对端关闭。
    ///
    /// 默认值为 90 秒。
    pub fn idle_timeout(&mut self, timeout: impl Into<Option<Duration>>) -> &mut Self {
        self.idle_timeout = timeout.into();
        self
    }

    /// 校验各选项并生成 [`Config`]。
    pub fn build(&self) -> crate::Result<Config> {
        if self.max_connections == 0 {
            return Err(crate::Error::new_user_config("max_connections must be at least 1"));
        }
        if self.multiplex_limit == Some(0) {
            return Err(crate::Error::new_user_config("multiplex_limit must be at least 1"));
        }
        if self.idle_timeout == Some(Duration::ZERO) {
            return Err(crate::Error::new_user_config("idle_timeout must be non-zero"));
        }
        Ok(Config {
            max_connections: self.max_connections,
            multiplex_limit: self.multiplex_limit,
            idle_timeout: self.idle_timeout,
        })
    }
}

impl Default for Builder {
    fn default() -> Builder {
        Builder::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_build() {
        let config = Config::builder().build().unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.max_connections(), 1);
        assert_eq!(config.multiplex_limit(), None);
    }

    #[test]
    fn zero_caps_are_rejected() {
        let err = Config::builder().max_connections(0).build().unwrap_err();
        assert!(err.is_user());

        let err = Config::builder().multiplex_limit(0).build().unwrap_err();
        assert!(err.is_user());

        let err = Config::builder()
            .idle_timeout(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(err.is_user());
    }

    #[test]
    fn effective_limit_takes_the_lesser() {
        assert_eq!(effective_limit(Some(10), None), Some(10));
        assert_eq!(effective_limit(None, Some(250)), Some(250));
        assert_eq!(effective_limit(Some(5), Some(10)), Some(5));
        assert_eq!(effective_limit(Some(20), Some(10)), Some(10));
        assert_eq!(effective_limit(None, None), None);
    }

    #[test]
    fn builder_accepts_unset_limit() {
        let config = Config::builder()
            .max_connections(8)
            .multiplex_limit(None)
            .idle_timeout(None)
            .build()
            .unwrap();
        assert_eq!(config.multiplex_limit(), None);
        assert_eq!(config.idle_timeout(), None);
        assert_eq!(config.effective_limit(Some(250)), Some(250));
    }
}
