//! 日志追踪（tracing）宏模块
//!
//! 对 `tracing` crate 的日志宏做条件包装：
//!
//! 1. `tracing` feature 启用时，宏展开为对应的 `tracing::*` 调用
//! 2. 未启用时展开为空，不产生任何运行时开销
//!
//! 宏展开结果是一个带 `#[cfg]` 的语句块，因此只能用在语句位置，
//! 不能作为 match 分支的表达式直接使用（需要用 `{ ... }` 包一层）。

/// `debug!` —— 调试级别日志
///
/// 连接的建立、失败、淘汰和空闲回收都记录在这一级别。
macro_rules! debug {
    ($($arg:tt)+) => {
        #[cfg(feature = "tracing")]
        {
            tracing::debug!($($arg)+);
        }
    };
}

/// `error!` —— 错误级别日志
///
/// 只用于连接池内部记账出现不一致的情况。
macro_rules! error {
    ($($arg:tt)+) => {
        #[cfg(feature = "tracing")]
        {
            tracing::error!($($arg)+);
        }
    };
}

/// `trace!` —— 追踪级别日志，逐个请求、逐个流的事件
macro_rules! trace {
    ($($arg:tt)+) => {
        #[cfg(feature = "tracing")]
        {
            tracing::trace!($($arg)+);
        }
    };
}

/// `warn!` —— 警告级别日志
///
/// 可恢复但值得注意的情况，例如替补连接也握手失败。
macro_rules! warn {
    ($($arg:tt)+) => {
        #[cfg(feature = "tracing")]
        {
            tracing::warn!($($arg)+);
        }
    };
}
