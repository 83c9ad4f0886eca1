//! h2pool 错误与结果类型模块
//!
//! 连接池中所有可能发生的错误（建连失败、连接中途关闭、传输错误、
//! HTTP/2 协议错误、非法的用户输入等）都统一封装在 [`Error`] 中。
//!
//! 用户通过 `Error` 上的 `is_*` 方法判断错误类别；内部的 `Kind`、`User`
//! 枚举是 `pub(super)` 可见性，不对外暴露。
//!
//! 分发器（[`Dispatcher`](crate::client::Dispatcher)）会把连接池内部的错误
//! 再包一层 `RequestFailed`，`is_*` 查询会穿透这层包装去看真正的原因。

// 重命名为 StdError，避免与本模块的 Error 类型冲突
use std::error::Error as StdError;
use std::fmt;

/// h2pool 方法常用的 Result 类型别名。
pub type Result<T> = std::result::Result<T, Error>;

/// 类型擦除的错误。
///
/// [`Connect`](crate::client::connect::Connect) 和
/// [`Transport`](crate::client::connect::Transport) 的实现用它返回错误，
/// `Send + Sync` 约束保证错误可以在任务之间传递。
pub type BoxError = Box<dyn StdError + Send + Sync>;

type Cause = BoxError;

/// 连接池管理连接、在连接上交换请求时可能发生的错误。
///
/// # 格式化
///
/// `Display` 只打印当前层级的错误描述，即使它由另一个错误引起。
/// 要打印完整的 source 链，请使用 `std::error::Report` 或等效的第三方类型。
///
/// # Source
///
/// `h2pool::Error` 可能由另一个错误引起，通过 `Error::source()` 暴露。
/// 在连接池内部失败的请求，会被分发器报告为一个 "request failed" 错误，
/// 其 source 是真正导致失败的连接池错误。
pub struct Error {
    // Box 使 Error 在栈上只占一个指针宽度，Result<T, Error> 因此保持小巧
    inner: Box<ErrorImpl>,
}

/// 错误的内部实现：分类 + 可选的底层原因。
struct ErrorImpl {
    kind: Kind,
    cause: Option<Cause>,
}

/// 错误分类枚举，仅供 crate 内部使用。
#[derive(Debug)]
pub(super) enum Kind {
    /// 建立连接失败（TCP 连接或 HTTP/2 握手）
    Connect,
    /// 在没有空闲槽位的连接上打开了流。
    /// 连接池记账正确时不应出现。
    CapacityExceeded,
    /// 承载流的连接在响应到达之前关闭
    ConnectionClosed,
    /// 等待中的请求在分配到流之前，连接池一侧先消失了
    Canceled,
    /// 分发器对外报告时使用的包装错误
    RequestFailed,
    /// 自定义传输层报告的错误
    Transport,
    /// 在连接上交换数据时发生的 `io::Error`
    Io,
    /// 来自 h2 库的通用错误
    Http2,
    /// 用户输入引起的错误，包含具体的子类型
    User(User),
}

/// 用户错误的子类型。
#[derive(Debug)]
pub(super) enum User {
    /// 端点的 host 为空、端口为 0 或 scheme 不受支持
    InvalidEndpoint,
    /// 连接池配置的限制值超出范围
    InvalidConfig,
    /// 同一个流上调用了两次 `send`
    StreamReused,
}

/// `Error` 的方法实现。
///
/// 包括公共的 `is_*` 查询方法和内部的 `new_*` 构造方法。
impl Error {
    /// 如果建立连接失败，返回 `true`。
    pub fn is_connect(&self) -> bool {
        matches!(self.root_kind(), Kind::Connect)
    }

    /// 如果在已饱和的连接上打开了流，返回 `true`。
    ///
    /// 这表示连接池的记账出了 bug，正常运行时不会出现。
    pub fn is_capacity_exceeded(&self) -> bool {
        matches!(self.root_kind(), Kind::CapacityExceeded)
    }

    /// 如果流所在的连接在流完成之前关闭，返回 `true`。
    pub fn is_connection_closed(&self) -> bool {
        matches!(self.root_kind(), Kind::ConnectionClosed)
    }

    /// 如果这是关于一个被取消的等待中请求，返回 `true`。
    pub fn is_canceled(&self) -> bool {
        matches!(self.root_kind(), Kind::Canceled)
    }

    /// 如果这是分发器对连接池错误的包装，返回 `true`。
    pub fn is_request_failed(&self) -> bool {
        matches!(self.inner.kind, Kind::RequestFailed)
    }

    /// 如果此错误来自 `h2` 库，返回 `true`。
    pub fn is_http2(&self) -> bool {
        matches!(self.root_kind(), Kind::Http2)
    }

    /// 如果交换过程被 `io::Error` 中断，返回 `true`。
    pub fn is_io(&self) -> bool {
        matches!(self.root_kind(), Kind::Io)
    }

    /// 如果此错误由被拒绝的用户输入引起，返回 `true`。
    pub fn is_user(&self) -> bool {
        matches!(self.root_kind(), Kind::User(_))
    }

    pub(super) fn new(kind: Kind) -> Error {
        Error {
            inner: Box::new(ErrorImpl { kind, cause: None }),
        }
    }

    pub(super) fn with<C: Into<Cause>>(mut self, cause: C) -> Error {
        self.inner.cause = Some(cause.into());
        self
    }

    /// 决定 `is_*` 结果的分类：`RequestFailed` 包装会转而使用它携带的
    /// 连接池错误的分类。
    fn root_kind(&self) -> &Kind {
        match self.inner.kind {
            Kind::RequestFailed => self
                .inner
                .cause
                .as_ref()
                .and_then(|cause| cause.downcast_ref::<Error>())
                .map(Error::root_kind)
                .unwrap_or(&self.inner.kind),
            ref kind => kind,
        }
    }

    /// 沿着 source 链查找第一个类型为 `E` 的错误。
    pub(crate) fn find_source<E: StdError + 'static>(&self) -> Option<&E> {
        let mut cause = self.source();
        while let Some(err) = cause {
            if let Some(typed) = err.downcast_ref() {
                return Some(typed);
            }
            cause = err.source();
        }

        // 没找到
        None
    }

    pub(super) fn new_connect<E: Into<Cause>>(cause: E) -> Error {
        Error::new(Kind::Connect).with(cause)
    }

    pub(super) fn new_capacity_exceeded() -> Error {
        Error::new(Kind::CapacityExceeded)
    }

    pub(super) fn new_connection_closed() -> Error {
        Error::new(Kind::ConnectionClosed)
    }

    pub(super) fn new_canceled() -> Error {
        Error::new(Kind::Canceled)
    }

    pub(super) fn new_request_failed(cause: Error) -> Error {
        Error::new(Kind::RequestFailed).with(cause)
    }

    pub(super) fn new_io(cause: std::io::Error) -> Error {
        Error::new(Kind::Io).with(cause)
    }

    /// h2 内部的 I/O 错误被拆出来，归为 `Io` 类别。
    pub(super) fn new_h2(cause: ::h2::Error) -> Error {
        if cause.is_io() {
            match cause.into_io() {
                Some(io) => Error::new_io(io),
                None => Error::new(Kind::Http2),
            }
        } else {
            Error::new(Kind::Http2).with(cause)
        }
    }

    /// 传输层装箱的如果本来就是 `Error` 则原样取回，否则包装为 `Transport`。
    pub(super) fn new_transport(cause: BoxError) -> Error {
        match cause.downcast::<Error>() {
            Ok(err) => *err,
            Err(other) => Error::new(Kind::Transport).with(other),
        }
    }

    pub(super) fn new_user_endpoint<C: Into<Cause>>(cause: C) -> Error {
        Error::new(Kind::User(User::InvalidEndpoint)).with(cause)
    }

    pub(super) fn new_user_config<C: Into<Cause>>(cause: C) -> Error {
        Error::new(Kind::User(User::InvalidConfig)).with(cause)
    }

    pub(super) fn new_user_stream_reused() -> Error {
        Error::new(Kind::User(User::StreamReused))
    }

    /// 从错误链中提取 HTTP/2 的 reason code（如果有）。
    pub fn h2_reason(&self) -> Option<h2::Reason> {
        self.find_source::<h2::Error>()
            .and_then(|h2_err| h2_err.reason())
    }

    /// 各分类对应的错误描述，`Display` 只输出这一层。
    fn description(&self) -> &str {
        match self.inner.kind {
            Kind::Connect => "error trying to connect",
            Kind::CapacityExceeded => "connection has no free stream slot",
            Kind::ConnectionClosed => "connection closed before the response completed",
            Kind::Canceled => "operation was canceled",
            Kind::RequestFailed => "request failed",
            Kind::Transport => "transport error",
            Kind::Io => "connection error",
            Kind::Http2 => "http2 error",
            Kind::User(User::InvalidEndpoint) => "invalid endpoint",
            Kind::User(User::InvalidConfig) => "invalid pool configuration",
            Kind::User(User::StreamReused) => "stream was already used for a request",
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut f = f.debug_tuple("h2pool::Error");
        f.field(&self.inner.kind);
        if let Some(ref cause) = self.inner.cause {
            f.field(cause);
        }
        f.finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner
            .cause
            .as_ref()
            .map(|cause| &**cause as &(dyn StdError + 'static))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem;

    fn assert_send_sync<T: Send + Sync + 'static>() {}

    #[test]
    fn error_satisfies_send_sync() {
        assert_send_sync::<Error>()
    }

    #[test]
    fn error_size_of() {
        assert_eq!(mem::size_of::<Error>(), mem::size_of::<usize>());
    }

    #[test]
    fn request_failed_looks_through_to_cause() {
        let err = Error::new_request_failed(Error::new_connection_closed());
        assert!(err.is_request_failed());
        assert!(err.is_connection_closed());
        assert!(!err.is_connect());
        assert_eq!(err.to_string(), "request failed");

        let source = err.source().expect("source");
        assert_eq!(source.to_string(), "connection closed before the response completed");
    }

    #[test]
    fn transport_errors_round_trip_through_box() {
        let boxed: BoxError = Box::new(Error::new_capacity_exceeded());
        assert!(Error::new_transport(boxed).is_capacity_exceeded());

        let foreign: BoxError = "socket vanished".into();
        let err = Error::new_transport(foreign);
        assert!(!err.is_capacity_exceeded());
        assert_eq!(err.to_string(), "transport error");
    }

    #[test]
    fn h2_reason_unknown() {
        let closed = Error::new_connection_closed();
        assert_eq!(closed.h2_reason(), None);
    }

    #[test]
    fn h2_reason_nested() {
        let recvd = Error::new_h2(h2::Error::from(h2::Reason::REFUSED_STREAM));
        let failed = Error::new_request_failed(recvd);
        assert!(failed.is_http2());
        assert_eq!(failed.h2_reason(), Some(h2::Reason::REFUSED_STREAM));
    }
}
