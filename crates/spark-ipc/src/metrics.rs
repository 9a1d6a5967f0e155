//! # 指标契约与内置后端
//!
//! ## 教案式概览
//! - **意图（Why）**：分发层只需要“按类别 + 单个标签解析计时器，并在调用终止时记录一次耗时与结果”
//!   这一个能力；把它抽象成 [`MetricsRegistry`] / [`Timer`]，即可对接任意指标后端；
//! - **契约（What）**：
//!   - 计时器在注册阶段解析一次，之后每次调用只做 `record`；
//!   - `record` / `add` 失败返回 [`MetricsError`]，调用方只记日志，绝不把失败带入调用结果；
//!   - 实现必须可并发调用（`Send + Sync`）；
//! - **实现（How）**：内置 [`NoopMetricsRegistry`]（丢弃全部样本）与
//!   [`InMemoryMetricsRegistry`]（按序列缓存句柄、保留全部样本，适合测试与调试）。
//! - **风险（Trade-offs）**：标签值是路由，基数等于注册的路由数量；
//!   切勿把用户输入拼入路由。

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::error::MetricsError;

/// 调用终止的结果分类。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// 成功完成。
    Success,
    /// 以错误终止（包括编码失败与 Handler panic）。
    Error,
    /// 订阅方在终止前取消。
    Cancelled,
}

impl Outcome {
    /// 指标标签值。
    pub const fn as_label(self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Error => "error",
            Outcome::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// 已解析的计时器句柄。
pub trait Timer: Send + Sync {
    /// 记录一次调用耗时。
    fn record(&self, elapsed: Duration, outcome: Outcome) -> Result<(), MetricsError>;
}

/// 已解析的计数器句柄。
pub trait Counter: Send + Sync {
    /// 累加计数。
    fn add(&self, value: u64, outcome: Outcome) -> Result<(), MetricsError>;
}

/// 指标注册表：按名称与单个标签解析句柄。
///
/// # 教案式说明
/// - **契约 (What)**：同一 `(category, tag_key, tag_value)` 多次解析应返回指向同一序列的句柄；
///   解析本身不得失败，后端不可用时应返回丢弃样本的句柄；
/// - **风险 (Trade-offs)**：`counter` 提供默认的空实现，仅需要计时的后端可以忽略它。
pub trait MetricsRegistry: Send + Sync + 'static {
    fn timer(&self, category: &str, tag_key: &str, tag_value: &str) -> Arc<dyn Timer>;

    fn counter(&self, name: &str, tag_key: &str, tag_value: &str) -> Arc<dyn Counter> {
        let _ = (name, tag_key, tag_value);
        Arc::new(NoopInstrument)
    }
}

/// 丢弃全部样本的空句柄。
#[derive(Clone, Copy, Debug, Default)]
struct NoopInstrument;

impl Timer for NoopInstrument {
    fn record(&self, _elapsed: Duration, _outcome: Outcome) -> Result<(), MetricsError> {
        Ok(())
    }
}

impl Counter for NoopInstrument {
    fn add(&self, _value: u64, _outcome: Outcome) -> Result<(), MetricsError> {
        Ok(())
    }
}

/// 不采集任何指标的注册表。
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopMetricsRegistry;

impl MetricsRegistry for NoopMetricsRegistry {
    fn timer(&self, _category: &str, _tag_key: &str, _tag_value: &str) -> Arc<dyn Timer> {
        Arc::new(NoopInstrument)
    }
}

/// 计时样本。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimerSample {
    pub category: String,
    pub tag_key: String,
    pub tag_value: String,
    pub outcome: Outcome,
    pub elapsed: Duration,
}

/// 计数样本。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CounterSample {
    pub name: String,
    pub tag_key: String,
    pub tag_value: String,
    pub outcome: Outcome,
    pub value: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct SeriesKey {
    name: String,
    tag_key: String,
    tag_value: String,
}

impl SeriesKey {
    fn new(name: &str, tag_key: &str, tag_value: &str) -> Self {
        Self {
            name: name.to_owned(),
            tag_key: tag_key.to_owned(),
            tag_value: tag_value.to_owned(),
        }
    }
}

/// 样本日志与故障开关；句柄只持有这一部分，不反向引用句柄缓存。
#[derive(Default)]
struct SampleLog {
    timer_samples: Mutex<Vec<TimerSample>>,
    counter_samples: Mutex<Vec<CounterSample>>,
    failing: AtomicBool,
}

impl SampleLog {
    fn check_backend(&self) -> Result<(), MetricsError> {
        if self.failing.load(Ordering::Acquire) {
            return Err(MetricsError::new(
                InMemoryMetricsRegistry::BACKEND,
                "backend marked as failing",
            ));
        }
        Ok(())
    }
}

#[derive(Default)]
struct InMemoryState {
    timers: DashMap<SeriesKey, Arc<InMemoryTimer>>,
    counters: DashMap<SeriesKey, Arc<InMemoryCounter>>,
    log: Arc<SampleLog>,
    timer_resolutions: AtomicUsize,
}

struct InMemoryTimer {
    key: SeriesKey,
    log: Arc<SampleLog>,
}

impl Timer for InMemoryTimer {
    fn record(&self, elapsed: Duration, outcome: Outcome) -> Result<(), MetricsError> {
        self.log.check_backend()?;
        self.log.timer_samples.lock().push(TimerSample {
            category: self.key.name.clone(),
            tag_key: self.key.tag_key.clone(),
            tag_value: self.key.tag_value.clone(),
            outcome,
            elapsed,
        });
        Ok(())
    }
}

struct InMemoryCounter {
    key: SeriesKey,
    log: Arc<SampleLog>,
}

impl Counter for InMemoryCounter {
    fn add(&self, value: u64, outcome: Outcome) -> Result<(), MetricsError> {
        self.log.check_backend()?;
        self.log.counter_samples.lock().push(CounterSample {
            name: self.key.name.clone(),
            tag_key: self.key.tag_key.clone(),
            tag_value: self.key.tag_value.clone(),
            outcome,
            value,
        });
        Ok(())
    }
}

/// 在内存中保留全部样本的注册表。
///
/// # 教案式说明
/// - **意图 (Why)**：测试需要断言“记录了几次、记在哪个序列、结果是什么”，
///   调试时也需要一个零依赖的后端；
/// - **契约 (What)**：
///   - 克隆共享同一份状态；
///   - 同一序列重复解析返回同一句柄，[`InMemoryMetricsRegistry::timer_resolutions`]
///     统计 `timer` 被调用的次数；
///   - [`InMemoryMetricsRegistry::set_failing`] 打开后所有记录操作返回 [`MetricsError`]，
///     用于验证“指标失败不影响调用结果”；
/// - **实现 (How)**：句柄缓存使用 `DashMap`，样本列表使用 `parking_lot::Mutex`。
#[derive(Clone, Default)]
pub struct InMemoryMetricsRegistry {
    state: Arc<InMemoryState>,
}

impl InMemoryMetricsRegistry {
    /// 后端名称，出现在 [`MetricsError`] 中。
    pub const BACKEND: &'static str = "in-memory";

    pub fn new() -> Self {
        Self::default()
    }

    /// 全部计时样本，按记录顺序排列。
    pub fn timer_samples(&self) -> Vec<TimerSample> {
        self.state.log.timer_samples.lock().clone()
    }

    /// 全部计数样本，按记录顺序排列。
    pub fn counter_samples(&self) -> Vec<CounterSample> {
        self.state.log.counter_samples.lock().clone()
    }

    /// 标签值等于 `route` 的计时样本。
    pub fn samples_for(&self, route: &str) -> Vec<TimerSample> {
        self.state
            .log
            .timer_samples
            .lock()
            .iter()
            .filter(|sample| sample.tag_value == route)
            .cloned()
            .collect()
    }

    /// `timer` 被调用的累计次数。
    pub fn timer_resolutions(&self) -> usize {
        self.state.timer_resolutions.load(Ordering::Acquire)
    }

    /// 切换后端故障模式。
    pub fn set_failing(&self, failing: bool) {
        self.state.log.failing.store(failing, Ordering::Release);
    }

    /// 清空样本，保留已解析的句柄。
    pub fn clear(&self) {
        self.state.log.timer_samples.lock().clear();
        self.state.log.counter_samples.lock().clear();
    }
}

impl fmt::Debug for InMemoryMetricsRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryMetricsRegistry")
            .field("timer_series", &self.state.timers.len())
            .field("counter_series", &self.state.counters.len())
            .field("timer_samples", &self.state.log.timer_samples.lock().len())
            .finish()
    }
}

impl MetricsRegistry for InMemoryMetricsRegistry {
    fn timer(&self, category: &str, tag_key: &str, tag_value: &str) -> Arc<dyn Timer> {
        self.state.timer_resolutions.fetch_add(1, Ordering::AcqRel);
        let key = SeriesKey::new(category, tag_key, tag_value);
        self.state
            .timers
            .entry(key.clone())
            .or_insert_with(|| {
                Arc::new(InMemoryTimer {
                    key,
                    log: Arc::clone(&self.state.log),
                })
            })
            .clone()
    }

    fn counter(&self, name: &str, tag_key: &str, tag_value: &str) -> Arc<dyn Counter> {
        let key = SeriesKey::new(name, tag_key, tag_value);
        self.state
            .counters
            .entry(key.clone())
            .or_insert_with(|| {
                Arc::new(InMemoryCounter {
                    key,
                    log: Arc::clone(&self.state.log),
                })
            })
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_series_shares_one_handle() {
        let registry = InMemoryMetricsRegistry::new();
        let first = registry.timer("rsocket.server", "route", "orders.create");
        let second = registry.timer("rsocket.server", "route", "orders.create");

        first.record(Duration::from_millis(3), Outcome::Success).unwrap();
        second.record(Duration::from_millis(5), Outcome::Error).unwrap();

        assert_eq!(registry.timer_resolutions(), 2);
        let samples = registry.samples_for("orders.create");
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].category, "rsocket.server");
        assert_eq!(samples[1].outcome, Outcome::Error);
        assert!(registry.samples_for("orders.cancel").is_empty());
    }

    #[test]
    fn failing_backend_reports_error_without_recording() {
        let registry = InMemoryMetricsRegistry::new();
        let timer = registry.timer("rsocket.server", "route", "orders.create");
        let counter = registry.counter("rsocket.server.elements", "route", "orders.create");
        registry.set_failing(true);

        let err = timer.record(Duration::ZERO, Outcome::Success).unwrap_err();
        assert_eq!(err.backend(), InMemoryMetricsRegistry::BACKEND);
        assert!(counter.add(1, Outcome::Success).is_err());
        assert!(registry.timer_samples().is_empty());
        assert!(registry.counter_samples().is_empty());
    }

    /// 句柄不反向持有注册表：注册表与句柄都释放后，状态与样本随之释放。
    #[test]
    fn registry_state_is_released_after_handles_drop() {
        let registry = InMemoryMetricsRegistry::new();
        let state = Arc::downgrade(&registry.state);
        let log = Arc::downgrade(&registry.state.log);

        let timer = registry.timer("rsocket.server", "route", "orders.create");
        let counter = registry.counter("rsocket.server.elements", "route", "orders.create");
        timer.record(Duration::from_millis(1), Outcome::Success).unwrap();
        counter.add(2, Outcome::Success).unwrap();

        drop(registry);
        assert!(state.upgrade().is_none(), "注册表释放后句柄缓存不应存活");
        assert!(log.upgrade().is_some(), "存活的句柄仍可写入样本日志");

        drop(timer);
        drop(counter);
        assert!(log.upgrade().is_none(), "句柄全部释放后样本日志应被回收");
    }

    #[test]
    fn noop_registry_accepts_everything() {
        let registry = NoopMetricsRegistry;
        assert!(registry.timer("c", "k", "v").record(Duration::ZERO, Outcome::Cancelled).is_ok());
        assert!(registry.counter("c", "k", "v").add(7, Outcome::Success).is_ok());
    }

    #[test]
    fn outcome_labels_are_stable() {
        assert_eq!(Outcome::Success.as_label(), "success");
        assert_eq!(Outcome::Error.as_label(), "error");
        assert_eq!(Outcome::Cancelled.to_string(), "cancelled");
    }
}
