#![deny(unsafe_code)]
#![doc = r#"
# spark-ipc

## 设计动机（Why）
- **定位**：RPC 框架在二进制帧异步传输之上的分发层。入站调用以“元数据 + 数据”两段字节的
  信封形式到达，本 crate 负责把信封解码成领域类型、交给注册的业务 Handler，并在不改变
  Handler 结果的前提下为每次调用记录一次耗时/结果指标。
- **架构角色**：路由器（见 `spark-ipc-router`）按路由找到 [`DispatchAdapter`] 后只调用它的
  `apply` 系列入口；连接管理、帧格式与指标后端都以契约形式注入。

## 核心契约（What）
- **四种交互模型**：fire-and-forget、request-response、request-stream、request-channel，
  分别由 [`functions`] 中的 Handler 契约与 [`adapter`] 中的适配器实现；
- **解码先于调用**：元数据解码 → 数据解码 → 启动计时 → 调用 Handler；任何解码失败都以
  [`DispatchError::Metadata`]/[`DispatchError::Data`] 终止，既不调用 Handler 也不产生指标样本；
- **恰好一次**：每次进入 Handler 的调用在成功、失败或取消（丢弃完成信号）时恰好记录一个
  计时样本，标签为固定类别 + 路由。

## 实现策略（How）
- 完成信号统一为 `futures` 的 [`BoxFuture`](futures::future::BoxFuture) /
  [`BoxStream`](futures::stream::BoxStream)，取消即 `Drop`；
- 指标装饰以显式组合实现（[`instrument::Timed`] 与 [`instrument::TimedStream`]），
  不依赖继承或切面注入，可以单独测试；
- 注册期把泛型 Handler/编解码器擦除为对象安全的 [`IpcFunction`]，调用热路径上不做运行时类型检查。

## 风险与考量（Trade-offs）
- Handler 返回的 Future 会被装箱一次；`dispatch_overhead` 基准用于观察这部分开销；
- 指标后端在记录时失败只会被记录为 `warn!` 日志，不会影响调用结果。
"#]

pub mod adapter;
pub mod codec;
pub mod config;
pub mod error;
pub mod functions;
pub mod instrument;
pub mod metadata;
pub mod metrics;
pub mod payload;
pub mod route;

pub use adapter::{
    DispatchAdapter, FireAndForgetAdapter, FireAndForgetSignal, IpcChannelFunction, IpcFunction,
    Registrar, RequestChannelAdapter, RequestResponseAdapter, RequestStreamAdapter,
    ResponseSignal, StreamSignal,
};
pub use codec::{
    BytesCodec, JsonCodec, Marshaller, Unmarshaller, Utf8Codec, marshaller_fn, unmarshaller_fn,
};
pub use config::{DispatchConfig, IpcServices};
pub use error::{
    ConfigError, DecodeError, DispatchError, EncodeError, HandlerError, MetricsError,
};
pub use functions::{
    FireAndForget, InteractionModel, RequestChannel, RequestResponse, RequestStream,
};
pub use instrument::{BoundInstrumentation, Instrumentation, InvocationTimer, Timed, TimedStream};
pub use metadata::{BinaryMetadataCodec, Metadata, MetadataDecoder, TraceContext};
pub use metrics::{
    Counter, CounterSample, InMemoryMetricsRegistry, MetricsRegistry, NoopMetricsRegistry, Outcome,
    Timer, TimerSample,
};
pub use payload::{Envelope, Payload, PayloadStream};
pub use route::Route;
