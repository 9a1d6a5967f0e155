#![deny(unsafe_code)]
#![doc = r#"
# spark-ipc-router

## 设计动机（Why）
- 分发层本身不拥有路由表，只按路由消费 [`DispatchAdapter`]；本 crate 提供默认的路由表实现，
  负责“信封 → 元数据 → 路由 → 适配器”这一步定位。
- 沿用 `spark-router` 的热更新模式：读路径通过 `ArcSwap::load` 取快照，零锁；
  写路径整表复制后一次 `store` 替换。

## 核心契约（What）
- 每个 `(交互模型, 路由)` 至多一个适配器，重复注册返回 [`RouterError::DuplicateRoute`]；
- 入口方法只解码一次元数据：解码失败返回 `DispatchError::Metadata`，
  路由缺失返回 `DispatchError::RouteNotFound`，二者都不触碰指标；
- 命中后调用适配器的 `apply_with_metadata`，完成信号原样返回。

## 实现策略（How）
- 路由表按交互模型分为四张 `HashMap<Route, DispatchAdapter>`，`Route: Borrow<str>`
  使查找可以直接使用解码出的 `&str`；
- 写者之间以 `parking_lot::Mutex` 串行化，保证“检查重复 → 复制 → 替换”原子完成；
- 每次成功变更递增 `revision`，便于观测热更新。

## 风险与考量（Trade-offs）
- 写路径复制整张表，注册成本与路由数量线性相关；路由数量通常在启动期确定，可以接受。
"#]

mod error;
mod service;

use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use spark_ipc::{
    DispatchAdapter, DispatchError, Envelope, FireAndForgetSignal, InteractionModel, IpcServices,
    Metadata, MetadataDecoder, PayloadStream, ResponseSignal, Route, StreamSignal,
    adapter::{failed_future, failed_stream},
};
use tracing::debug;

pub use error::RouterError;
pub use service::SelfRegistration;

/// 路由快照：四种交互模型各一张表。
#[derive(Clone, Default)]
struct RouteTable {
    by_model: [HashMap<Route, DispatchAdapter>; 4],
}

impl RouteTable {
    fn models(&self, model: InteractionModel) -> &HashMap<Route, DispatchAdapter> {
        &self.by_model[slot(model)]
    }

    fn models_mut(&mut self, model: InteractionModel) -> &mut HashMap<Route, DispatchAdapter> {
        &mut self.by_model[slot(model)]
    }

    fn len(&self) -> usize {
        self.by_model.iter().map(HashMap::len).sum()
    }
}

fn slot(model: InteractionModel) -> usize {
    match model {
        InteractionModel::FireAndForget => 0,
        InteractionModel::RequestResponse => 1,
        InteractionModel::RequestStream => 2,
        InteractionModel::RequestChannel => 3,
    }
}

/// 基于 `ArcSwap` 的 IPC 路由器。
///
/// # 教案式说明
/// - **意图 (Why)**：传输层收到信封后只需调用与交互模型对应的入口方法，
///   其余的元数据解码、路由定位与模型匹配均由路由器完成；
/// - **契约 (What)**：
///   - `register` / `deregister` 可与调用并发执行，正在进行的调用使用变更前的快照；
///   - 入口方法从不 panic，所有失败都以完成信号中的错误报告；
/// - **执行 (How)**：读者 `load` 快照后按 `&str` 查表并克隆适配器（`Arc` 计数），
///   随即释放快照再分发。
pub struct IpcRouter {
    table: ArcSwap<RouteTable>,
    writer: Mutex<()>,
    decoder: Arc<dyn MetadataDecoder>,
    revision: AtomicU64,
}

impl IpcRouter {
    /// 以给定元数据解码器构造空路由器。
    pub fn new(decoder: Arc<dyn MetadataDecoder>) -> Self {
        Self {
            table: ArcSwap::from_pointee(RouteTable::default()),
            writer: Mutex::new(()),
            decoder,
            revision: AtomicU64::new(0),
        }
    }

    /// 使用服务束中的元数据解码器。
    pub fn from_services(services: &IpcServices) -> Self {
        Self::new(Arc::clone(services.metadata_decoder()))
    }

    /// 注册适配器；同一 `(模型, 路由)` 已存在时拒绝。
    pub fn register(&self, adapter: DispatchAdapter) -> Result<(), RouterError> {
        let model = adapter.model();
        let route = adapter.route().clone();
        let _guard = self.writer.lock();

        let current = self.table.load_full();
        if current.models(model).contains_key(&route) {
            debug!(route = %route, model = model.as_str(), "ipc route rejected: duplicate");
            return Err(RouterError::DuplicateRoute { model, route });
        }
        let mut next = RouteTable::clone(&current);
        next.models_mut(model).insert(route.clone(), adapter);
        self.table.store(Arc::new(next));
        let revision = self.revision.fetch_add(1, Ordering::AcqRel) + 1;

        debug!(route = %route, model = model.as_str(), revision, "ipc route registered");
        Ok(())
    }

    /// 移除适配器，返回被移除的条目。
    pub fn deregister(&self, model: InteractionModel, route: &str) -> Option<DispatchAdapter> {
        let _guard = self.writer.lock();

        let current = self.table.load_full();
        if !current.models(model).contains_key(route) {
            return None;
        }
        let mut next = RouteTable::clone(&current);
        let removed = next.models_mut(model).remove(route);
        self.table.store(Arc::new(next));
        let revision = self.revision.fetch_add(1, Ordering::AcqRel) + 1;

        debug!(route, model = model.as_str(), revision, "ipc route deregistered");
        removed
    }

    /// 查找适配器。
    pub fn get(&self, model: InteractionModel, route: &str) -> Option<DispatchAdapter> {
        self.table.load().models(model).get(route).cloned()
    }

    /// 已注册路由的排序快照。
    pub fn routes(&self) -> Vec<(InteractionModel, Route)> {
        let table = self.table.load();
        let mut routes: Vec<_> = InteractionModel::ALL
            .iter()
            .flat_map(|&model| table.models(model).keys().map(move |route| (model, route.clone())))
            .collect();
        routes.sort();
        routes
    }

    pub fn len(&self) -> usize {
        self.table.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 成功变更的累计次数。
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }

    /// 分发 fire-and-forget 调用。
    pub fn fire_and_forget(&self, envelope: &dyn Envelope) -> FireAndForgetSignal {
        match self.locate(InteractionModel::FireAndForget, envelope) {
            Ok((adapter, metadata)) => adapter.fire_and_forget(envelope, metadata),
            Err(error) => failed_future(error),
        }
    }

    /// 分发 request-response 调用。
    pub fn request_response(&self, envelope: &dyn Envelope) -> ResponseSignal {
        match self.locate(InteractionModel::RequestResponse, envelope) {
            Ok((adapter, metadata)) => adapter.request_response(envelope, metadata),
            Err(error) => failed_future(error),
        }
    }

    /// 分发 request-stream 调用。
    pub fn request_stream(&self, envelope: &dyn Envelope) -> StreamSignal {
        match self.locate(InteractionModel::RequestStream, envelope) {
            Ok((adapter, metadata)) => adapter.request_stream(envelope, metadata),
            Err(error) => failed_stream(error),
        }
    }

    /// 分发 request-channel 调用；路由取自首个信封。
    pub fn request_channel(&self, first: &dyn Envelope, rest: PayloadStream) -> StreamSignal {
        match self.locate(InteractionModel::RequestChannel, first) {
            Ok((adapter, metadata)) => adapter.request_channel(first, metadata, rest),
            Err(error) => failed_stream(error),
        }
    }

    fn locate(
        &self,
        model: InteractionModel,
        envelope: &dyn Envelope,
    ) -> Result<(DispatchAdapter, Metadata), DispatchError> {
        let metadata = self.decoder.decode(envelope.metadata()).map_err(|error| {
            debug!(model = model.as_str(), error = %error, "ipc envelope rejected: metadata");
            DispatchError::Metadata(error)
        })?;
        match self.get(model, metadata.route().as_str()) {
            Some(adapter) => Ok((adapter, metadata)),
            None => {
                debug!(route = %metadata.route(), model = model.as_str(), "ipc route not found");
                Err(DispatchError::RouteNotFound {
                    model,
                    route: metadata.route().clone(),
                })
            }
        }
    }
}

impl fmt::Debug for IpcRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IpcRouter")
            .field("routes", &self.len())
            .field("revision", &self.revision())
            .finish_non_exhaustive()
    }
}
