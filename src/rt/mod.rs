//! 运行时组件
//!
//! 连接池本身不拥有运行时。握手、连接驱动任务、空闲计时器、传输层监视任务
//! 都交给构造时传入的 [`Executor`] 去执行。
//!
//! [`TokioExecutor`] 把任务 spawn 到当前的 tokio 运行时上，适合大多数用户。

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Future 执行器。
///
/// 通过这个 trait，连接池可以不绑定具体的异步运行时。
/// 为自己的类型实现它即可接入其他运行时。
///
/// # Example
///
/// ```
/// # use h2pool::rt::Executor;
/// # use std::future::Future;
/// #[derive(Clone)]
/// struct TokioExecutor;
///
/// impl<F> Executor<F> for TokioExecutor
/// where
///     F: Future + Send + 'static,
///     F::Output: Send + 'static,
/// {
///     fn execute(&self, future: F) {
///         tokio::spawn(future);
///     }
/// }
/// ```
pub trait Executor<Fut> {
    /// 把 future 放入执行器中运行。
    fn execute(&self, fut: Fut);
}

/// 基于 `tokio` 线程的 Future 执行器。
#[non_exhaustive]
#[derive(Default, Debug, Clone, Copy)]
pub struct TokioExecutor {}

impl TokioExecutor {
    /// 创建一个通过 [`tokio::spawn`] 执行 future 的执行器。
    pub fn new() -> Self {
        Self {}
    }
}

impl<Fut> Executor<Fut> for TokioExecutor
where
    Fut: Future + Send + 'static,
    Fut::Output: Send + 'static,
{
    fn execute(&self, fut: Fut) {
        tokio::spawn(fut);
    }
}

// 装箱后的后台任务类型，连接池内部统一用它与执行器交互
pub(crate) type BoxSendFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// 类型擦除后的执行器，由连接池及其后台任务共享。
#[derive(Clone)]
pub(crate) struct Exec(Arc<dyn Executor<BoxSendFuture> + Send + Sync>);

impl Exec {
    pub(crate) fn new<E>(inner: E) -> Self
    where
        E: Executor<BoxSendFuture> + Send + Sync + 'static,
    {
        Exec(Arc::new(inner))
    }

    pub(crate) fn execute<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.0.execute(Box::pin(fut))
    }
}

impl std::fmt::Debug for Exec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Exec").finish()
    }
}
