//! # 调用计时装饰
//!
//! ## 教案式概览
//! - **意图（Why）**：把“开始计时 → 等待完成信号终止 → 按结果记录一次样本”从四种适配器中抽出，
//!   以显式组合（包装 Future / Stream）代替切面注入，保证每种交互模型共用同一套恰好一次语义；
//! - **契约（What）**：
//!   - [`Instrumentation::bind`] 在注册期把路由解析为计时器句柄，热路径不再查表；
//!   - [`InvocationTimer`] 恰好记录一次：显式 `finish`、或在 `Drop` 时补记
//!     （线程正在 panic 时记为 `error`，否则记为 `cancelled`）；
//!   - 内层信号在 `poll` 中 panic 时先记为 `error`，再把 panic 原样继续抛出；
//!   - 指标后端返回错误或自身 panic 时只输出 `warn!` 日志，绝不影响调用结果；
//! - **实现（How）**：[`Timed`] 与 [`TimedStream`] 包装 `Unpin` 的内层信号（适配器中总是
//!   `BoxFuture`/`BoxStream`），因此无需结构化 pin 投影；
//! - **风险（Trade-offs）**：若指标后端在 Handler panic 展开期间再次 panic，进程会按 Rust
//!   的双重 panic 规则中止，后端实现应保证 `record` 不 panic。

use std::{
    fmt,
    future::Future,
    panic::{AssertUnwindSafe, catch_unwind, resume_unwind},
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::{Duration, Instant},
};

use futures::Stream;
use tracing::{trace, warn};

use crate::{
    config::{DEFAULT_METRICS_CATEGORY, DEFAULT_ROUTE_TAG, IpcServices},
    metrics::{Counter, MetricsRegistry, Outcome, Timer},
    route::Route,
};

/// 元素计数器名称后缀。
pub const ELEMENTS_SUFFIX: &str = "elements";

/// 计时装饰的注册期配置。
///
/// # 教案式说明
/// - **契约 (What)**：`category` 为计时器名称，`tag_key` 为唯一标签的键，标签值始终是路由；
///   `count_elements` 为真时流式交互额外解析 `{category}.elements` 计数器；
/// - **执行 (How)**：本结构本身不持有任何句柄，只有 [`Instrumentation::bind`] 才会访问注册表。
#[derive(Clone)]
pub struct Instrumentation {
    registry: Arc<dyn MetricsRegistry>,
    category: Arc<str>,
    tag_key: Arc<str>,
    count_elements: bool,
}

impl Instrumentation {
    /// 以给定类别构造，标签键为 `route`，开启元素计数。
    pub fn new(registry: Arc<dyn MetricsRegistry>, category: impl Into<Arc<str>>) -> Self {
        Self {
            registry,
            category: category.into(),
            tag_key: Arc::from(DEFAULT_ROUTE_TAG),
            count_elements: true,
        }
    }

    /// 使用服务束中的注册表与配置。
    pub fn from_services(services: &IpcServices) -> Self {
        let config = services.config();
        Self {
            registry: Arc::clone(services.metrics()),
            category: Arc::from(config.metrics_category.as_str()),
            tag_key: Arc::from(config.route_tag.as_str()),
            count_elements: config.count_stream_elements,
        }
    }

    /// 默认类别 `rsocket.server`。
    pub fn with_default_category(registry: Arc<dyn MetricsRegistry>) -> Self {
        Self::new(registry, DEFAULT_METRICS_CATEGORY)
    }

    pub fn with_category(mut self, category: impl Into<Arc<str>>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_tag_key(mut self, tag_key: impl Into<Arc<str>>) -> Self {
        self.tag_key = tag_key.into();
        self
    }

    pub fn with_element_counting(mut self, enabled: bool) -> Self {
        self.count_elements = enabled;
        self
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn tag_key(&self) -> &str {
        &self.tag_key
    }

    /// 为路由解析句柄。每个适配器只调用一次。
    pub fn bind(&self, route: &Route) -> BoundInstrumentation {
        let timer = self.registry.timer(&self.category, &self.tag_key, route.as_str());
        let elements = self.count_elements.then(|| {
            let name = format!("{}.{ELEMENTS_SUFFIX}", self.category);
            self.registry.counter(&name, &self.tag_key, route.as_str())
        });
        BoundInstrumentation {
            route: route.clone(),
            timer,
            elements,
        }
    }
}

impl fmt::Debug for Instrumentation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instrumentation")
            .field("category", &self.category)
            .field("tag_key", &self.tag_key)
            .field("count_elements", &self.count_elements)
            .finish_non_exhaustive()
    }
}

/// 已绑定路由的计时句柄。
#[derive(Clone)]
pub struct BoundInstrumentation {
    route: Route,
    timer: Arc<dyn Timer>,
    elements: Option<Arc<dyn Counter>>,
}

impl BoundInstrumentation {
    pub fn route(&self) -> &Route {
        &self.route
    }

    /// 开始一次单值调用的计时。
    pub fn start(&self) -> InvocationTimer {
        InvocationTimer::new(self.route.clone(), Arc::clone(&self.timer), None)
    }

    /// 开始一次流式调用的计时，附带元素计数。
    pub fn start_stream(&self) -> InvocationTimer {
        InvocationTimer::new(
            self.route.clone(),
            Arc::clone(&self.timer),
            self.elements.clone(),
        )
    }
}

impl fmt::Debug for BoundInstrumentation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundInstrumentation")
            .field("route", &self.route)
            .field("count_elements", &self.elements.is_some())
            .finish_non_exhaustive()
    }
}

/// 单次调用的计时器。
///
/// # 教案式说明
/// - **契约 (What)**：构造即开始计时；`finish` 或 `Drop` 二者之一记录样本，另一方不再记录；
/// - **风险 (Trade-offs)**：`Drop` 路径通过 `std::thread::panicking` 区分取消与 panic，
///   因此在 panic 展开中被丢弃的计时器总是记为 `error`。
pub struct InvocationTimer {
    route: Route,
    timer: Arc<dyn Timer>,
    elements: Option<Arc<dyn Counter>>,
    emitted: u64,
    started: Instant,
    finished: bool,
}

impl InvocationTimer {
    fn new(route: Route, timer: Arc<dyn Timer>, elements: Option<Arc<dyn Counter>>) -> Self {
        Self {
            route,
            timer,
            elements,
            emitted: 0,
            started: Instant::now(),
            finished: false,
        }
    }

    /// 记录一个已发出的流元素。
    pub fn record_element(&mut self) {
        self.emitted += 1;
    }

    /// 已发出的元素数量。
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// 以给定结果结束计时。
    pub fn finish(mut self, outcome: Outcome) {
        self.complete(outcome);
    }

    fn complete(&mut self, outcome: Outcome) {
        if self.finished {
            return;
        }
        self.finished = true;
        let elapsed = self.started.elapsed();
        self.record_timer(elapsed, outcome);
        if let Some(counter) = &self.elements {
            let emitted = self.emitted;
            report(&self.route, "counter", outcome, || counter.add(emitted, outcome));
        }
    }

    fn record_timer(&self, elapsed: Duration, outcome: Outcome) {
        let recorded = report(&self.route, "timer", outcome, || {
            self.timer.record(elapsed, outcome)
        });
        if recorded {
            trace!(
                route = %self.route,
                outcome = outcome.as_label(),
                elapsed_us = elapsed.as_micros() as u64,
                "ipc invocation recorded"
            );
        }
    }
}

impl Drop for InvocationTimer {
    fn drop(&mut self) {
        if !self.finished {
            let outcome = if std::thread::panicking() {
                Outcome::Error
            } else {
                Outcome::Cancelled
            };
            self.complete(outcome);
        }
    }
}

impl fmt::Debug for InvocationTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationTimer")
            .field("route", &self.route)
            .field("emitted", &self.emitted)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

/// 执行一次指标写入；失败与 panic 只记日志。返回是否成功写入。
fn report<F>(route: &Route, instrument: &'static str, outcome: Outcome, write: F) -> bool
where
    F: FnOnce() -> Result<(), crate::error::MetricsError>,
{
    match catch_unwind(AssertUnwindSafe(write)) {
        Ok(Ok(())) => true,
        Ok(Err(error)) => {
            warn!(
                route = %route,
                instrument,
                outcome = outcome.as_label(),
                error = %error,
                "ipc metrics recording failed"
            );
            false
        }
        Err(_) => {
            warn!(
                route = %route,
                instrument,
                outcome = outcome.as_label(),
                "ipc metrics backend panicked while recording"
            );
            false
        }
    }
}

/// 为单值完成信号计时的 Future 包装。
///
/// `Ok` 记为 `success`，`Err` 记为 `error`，未完成即被丢弃记为 `cancelled`。
pub struct Timed<F> {
    inner: F,
    timer: Option<InvocationTimer>,
}

impl<F> Timed<F> {
    pub fn new(inner: F, timer: InvocationTimer) -> Self {
        Self {
            inner,
            timer: Some(timer),
        }
    }
}

impl<F, T, E> Future for Timed<F>
where
    F: Future<Output = Result<T, E>> + Unpin,
{
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let polled = catch_unwind(AssertUnwindSafe(|| Pin::new(&mut this.inner).poll(cx)));
        let output = match polled {
            Ok(Poll::Ready(output)) => output,
            Ok(Poll::Pending) => return Poll::Pending,
            Err(payload) => {
                if let Some(timer) = this.timer.take() {
                    timer.finish(Outcome::Error);
                }
                resume_unwind(payload);
            }
        };
        if let Some(timer) = this.timer.take() {
            timer.finish(if output.is_ok() {
                Outcome::Success
            } else {
                Outcome::Error
            });
        }
        Poll::Ready(output)
    }
}

/// 为流式完成信号计时的 Stream 包装。
///
/// # 教案式说明
/// - **契约 (What)**：
///   - 每个 `Ok` 元素计数一次；
///   - 内层流结束记为 `success`；
///   - 第一个 `Err` 原样转交后立即终止：丢弃内层流、记为 `error`，之后始终返回 `None`；
///   - 终止前被丢弃记为 `cancelled`，已发出的元素数仍会写入计数器；
/// - **风险 (Trade-offs)**：终止后的内层流会被立即释放，Handler 不会再收到轮询。
pub struct TimedStream<S> {
    inner: Option<S>,
    timer: Option<InvocationTimer>,
}

impl<S> TimedStream<S> {
    pub fn new(inner: S, timer: InvocationTimer) -> Self {
        Self {
            inner: Some(inner),
            timer: Some(timer),
        }
    }

    fn terminate(&mut self, outcome: Outcome) {
        self.inner = None;
        if let Some(timer) = self.timer.take() {
            timer.finish(outcome);
        }
    }
}

impl<S, T, E> Stream for TimedStream<S>
where
    S: Stream<Item = Result<T, E>> + Unpin,
{
    type Item = Result<T, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let Some(inner) = this.inner.as_mut() else {
            return Poll::Ready(None);
        };
        let polled = catch_unwind(AssertUnwindSafe(|| Pin::new(inner).poll_next(cx)));
        let polled = match polled {
            Ok(polled) => polled,
            Err(payload) => {
                this.terminate(Outcome::Error);
                resume_unwind(payload);
            }
        };
        match polled {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Ok(item))) => {
                if let Some(timer) = this.timer.as_mut() {
                    timer.record_element();
                }
                Poll::Ready(Some(Ok(item)))
            }
            Poll::Ready(Some(Err(error))) => {
                this.terminate(Outcome::Error);
                Poll::Ready(Some(Err(error)))
            }
            Poll::Ready(None) => {
                this.terminate(Outcome::Success);
                Poll::Ready(None)
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match &self.inner {
            Some(inner) => inner.size_hint(),
            None => (0, Some(0)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::InMemoryMetricsRegistry;
    use futures::{FutureExt, StreamExt, executor::block_on, future, stream};

    fn bound(registry: &InMemoryMetricsRegistry, route: &str) -> BoundInstrumentation {
        Instrumentation::with_default_category(Arc::new(registry.clone())).bind(&Route::from(route))
    }

    #[test]
    fn timed_future_records_success_and_error() {
        let registry = InMemoryMetricsRegistry::new();
        let bound = bound(&registry, "orders.create");

        let ok = block_on(Timed::new(future::ready(Ok::<_, ()>(1)), bound.start()));
        let err = block_on(Timed::new(future::ready(Err::<(), _>("boom")), bound.start()));

        assert_eq!(ok, Ok(1));
        assert_eq!(err, Err("boom"));
        let outcomes: Vec<_> = registry.timer_samples().iter().map(|s| s.outcome).collect();
        assert_eq!(outcomes, [Outcome::Success, Outcome::Error]);
    }

    #[test]
    fn dropping_pending_future_records_cancelled_once() {
        let registry = InMemoryMetricsRegistry::new();
        let bound = bound(&registry, "orders.create");

        let mut timed = Timed::new(future::pending::<Result<(), ()>>().boxed(), bound.start());
        assert!((&mut timed).now_or_never().is_none());
        drop(timed);

        let samples = registry.timer_samples();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].outcome, Outcome::Cancelled);
    }

    #[test]
    fn stream_stops_after_first_error() {
        let registry = InMemoryMetricsRegistry::new();
        let bound = bound(&registry, "orders.list");
        let items = stream::iter(vec![Ok(1), Err("bad"), Ok(3)]);

        let collected: Vec<_> = block_on(TimedStream::new(items, bound.start_stream()).collect());

        assert_eq!(collected, vec![Ok(1), Err("bad")]);
        let samples = registry.timer_samples();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].outcome, Outcome::Error);
        let counts = registry.counter_samples();
        assert_eq!(counts.len(), 1);
        assert_eq!(counts[0].name, "rsocket.server.elements");
        assert_eq!(counts[0].value, 1);
    }

    #[test]
    fn finished_timer_is_not_recorded_again_on_drop() {
        let registry = InMemoryMetricsRegistry::new();
        let timer = bound(&registry, "orders.create").start();
        timer.finish(Outcome::Success);
        assert_eq!(registry.timer_samples().len(), 1);
    }

    #[test]
    fn panicking_backend_does_not_escape() {
        struct Exploding;
        impl MetricsRegistry for Exploding {
            fn timer(&self, _: &str, _: &str, _: &str) -> Arc<dyn Timer> {
                struct Bomb;
                impl Timer for Bomb {
                    fn record(
                        &self,
                        _: Duration,
                        _: Outcome,
                    ) -> Result<(), crate::error::MetricsError> {
                        panic!("metrics backend exploded");
                    }
                }
                Arc::new(Bomb)
            }
        }

        let bound = Instrumentation::with_default_category(Arc::new(Exploding))
            .bind(&Route::from("orders.create"));
        let out = block_on(Timed::new(future::ready(Ok::<_, ()>(7)), bound.start()));
        assert_eq!(out, Ok(7));
    }
}
