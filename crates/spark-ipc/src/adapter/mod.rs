//! # 指标感知的分发适配器
//!
//! ## 教案式概览
//! - **意图（Why）**：每个注册的 Handler 都被包装成一个适配器，适配器负责
//!   “解码 → 计时 → 调用 → 装饰 → 返回”，路由器只需按路由找到适配器并调用 `apply`；
//! - **契约（What）**：
//!   - 步骤顺序固定：元数据解码 → 数据解码 → 启动计时 → 调用 Handler → 装饰完成信号；
//!   - 解码失败返回已终止的信号（[`DispatchError::Metadata`] / [`DispatchError::Data`]），
//!     Handler 不会被调用，也不会记录样本；
//!   - Handler 的成功值与业务错误原样透传，指标装饰不改变结果；
//! - **实现（How）**：四个泛型适配器在注册期经 [`Registrar`] 擦除为 [`IpcFunction`] /
//!   [`IpcChannelFunction`] 对象，并以 [`DispatchAdapter`] 枚举区分交互模型，
//!   热路径上只有一次虚调用。
//! - **风险（Trade-offs）**：适配器持有的计时器句柄在注册时解析；若指标后端在运行期被替换，
//!   需要重新注册路由才能生效。

mod fire_and_forget;
mod registrar;
mod request_channel;
mod request_response;
mod request_stream;

use std::{fmt, sync::Arc};

use bytes::Bytes;
use futures::{
    FutureExt, StreamExt,
    future::{self, BoxFuture},
    stream::{self, BoxStream},
};
use tracing::debug;

use crate::{
    codec::Unmarshaller,
    error::{DecodeStage, DispatchError},
    functions::InteractionModel,
    metadata::{Metadata, MetadataDecoder},
    payload::{Envelope, PayloadStream},
    route::Route,
};

pub use fire_and_forget::FireAndForgetAdapter;
pub use registrar::Registrar;
pub use request_channel::RequestChannelAdapter;
pub use request_response::RequestResponseAdapter;
pub use request_stream::RequestStreamAdapter;

/// fire-and-forget 的完成信号：只报告成功或失败。
pub type FireAndForgetSignal = BoxFuture<'static, Result<(), DispatchError>>;

/// request-response 的完成信号：编码后的响应。
pub type ResponseSignal = BoxFuture<'static, Result<Bytes, DispatchError>>;

/// request-stream / request-channel 的完成信号：编码后的响应序列，第一个 `Err` 即终止。
pub type StreamSignal = BoxStream<'static, Result<Bytes, DispatchError>>;

/// 擦除了输入/输出类型的单信封调用入口。
pub trait IpcFunction<S>: Send + Sync + 'static {
    /// 注册时绑定的路由。
    fn route(&self) -> &Route;

    /// 自行解码元数据后分发。
    fn apply(&self, envelope: &dyn Envelope) -> S;

    /// 使用路由器已解码的元数据分发。
    fn apply_with_metadata(&self, envelope: &dyn Envelope, metadata: Metadata) -> S;
}

/// 擦除了输入/输出类型的 request-channel 调用入口。
///
/// `first` 是携带路由元数据的首个信封，`rest` 为后续信封，只读取其数据区。
pub trait IpcChannelFunction: Send + Sync + 'static {
    fn route(&self) -> &Route;

    fn apply(&self, first: &dyn Envelope, rest: PayloadStream) -> StreamSignal;

    fn apply_with_metadata(
        &self,
        first: &dyn Envelope,
        metadata: Metadata,
        rest: PayloadStream,
    ) -> StreamSignal;
}

/// 已注册的适配器，按交互模型区分。
///
/// # 教案式说明
/// - **意图 (Why)**：路由表需要在同一张表里存放四种签名不同的入口；
///   用枚举而不是 `dyn Any` 保留静态类型，模型错配在调用时以错误信号报告；
/// - **契约 (What)**：四个入口方法在变体匹配时委托 `apply_with_metadata`，
///   否则返回携带 [`DispatchError::ModelMismatch`] 的已终止信号；
/// - **执行 (How)**：变体内部均为 `Arc`，克隆只增加引用计数。
#[derive(Clone)]
pub enum DispatchAdapter {
    FireAndForget(Arc<dyn IpcFunction<FireAndForgetSignal>>),
    RequestResponse(Arc<dyn IpcFunction<ResponseSignal>>),
    RequestStream(Arc<dyn IpcFunction<StreamSignal>>),
    RequestChannel(Arc<dyn IpcChannelFunction>),
}

impl DispatchAdapter {
    pub fn route(&self) -> &Route {
        match self {
            DispatchAdapter::FireAndForget(f) => f.route(),
            DispatchAdapter::RequestResponse(f) => f.route(),
            DispatchAdapter::RequestStream(f) => f.route(),
            DispatchAdapter::RequestChannel(f) => f.route(),
        }
    }

    pub fn model(&self) -> InteractionModel {
        match self {
            DispatchAdapter::FireAndForget(_) => InteractionModel::FireAndForget,
            DispatchAdapter::RequestResponse(_) => InteractionModel::RequestResponse,
            DispatchAdapter::RequestStream(_) => InteractionModel::RequestStream,
            DispatchAdapter::RequestChannel(_) => InteractionModel::RequestChannel,
        }
    }

    pub fn fire_and_forget(
        &self,
        envelope: &dyn Envelope,
        metadata: Metadata,
    ) -> FireAndForgetSignal {
        match self {
            DispatchAdapter::FireAndForget(f) => f.apply_with_metadata(envelope, metadata),
            other => failed_future(other.mismatch(InteractionModel::FireAndForget)),
        }
    }

    pub fn request_response(&self, envelope: &dyn Envelope, metadata: Metadata) -> ResponseSignal {
        match self {
            DispatchAdapter::RequestResponse(f) => f.apply_with_metadata(envelope, metadata),
            other => failed_future(other.mismatch(InteractionModel::RequestResponse)),
        }
    }

    pub fn request_stream(&self, envelope: &dyn Envelope, metadata: Metadata) -> StreamSignal {
        match self {
            DispatchAdapter::RequestStream(f) => f.apply_with_metadata(envelope, metadata),
            other => failed_stream(other.mismatch(InteractionModel::RequestStream)),
        }
    }

    pub fn request_channel(
        &self,
        first: &dyn Envelope,
        metadata: Metadata,
        rest: PayloadStream,
    ) -> StreamSignal {
        match self {
            DispatchAdapter::RequestChannel(f) => f.apply_with_metadata(first, metadata, rest),
            other => failed_stream(other.mismatch(InteractionModel::RequestChannel)),
        }
    }

    fn mismatch(&self, expected: InteractionModel) -> DispatchError {
        DispatchError::ModelMismatch {
            route: self.route().clone(),
            expected,
            actual: self.model(),
        }
    }
}

impl fmt::Debug for DispatchAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchAdapter")
            .field("model", &self.model())
            .field("route", self.route())
            .finish()
    }
}

/// 解码元数据；失败时输出调试日志。
pub(crate) fn decode_metadata(
    decoder: &dyn MetadataDecoder,
    envelope: &dyn Envelope,
) -> Result<Metadata, DispatchError> {
    decoder.decode(envelope.metadata()).map_err(|error| {
        debug!(stage = %DecodeStage::Metadata, error = %error, "ipc envelope rejected");
        DecodeStage::Metadata.wrap(error)
    })
}

/// 解码数据区；失败时输出带路由的调试日志。
pub(crate) fn decode_data<I, U>(
    route: &Route,
    unmarshaller: &U,
    data: &[u8],
) -> Result<I, DispatchError>
where
    U: Unmarshaller<I> + ?Sized,
{
    unmarshaller.unmarshal(data).map_err(|error| {
        debug!(route = %route, stage = %DecodeStage::Data, error = %error, "ipc envelope rejected");
        DecodeStage::Data.wrap(error)
    })
}

/// 已终止的单值信号，供路由层报告定位失败。
pub fn failed_future<T>(error: DispatchError) -> BoxFuture<'static, Result<T, DispatchError>>
where
    T: Send + 'static,
{
    future::ready(Err(error)).boxed()
}

/// 只含一个错误元素的流信号。
pub fn failed_stream<T>(error: DispatchError) -> BoxStream<'static, Result<T, DispatchError>>
where
    T: Send + 'static,
{
    stream::once(future::ready(Err(error))).boxed()
}
