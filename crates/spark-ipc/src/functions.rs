//! # 交互模型与 Handler 契约
//!
//! ## 教案式概览
//! - **意图（Why）**：四种交互模型（fire-and-forget、request-response、request-stream、
//!   request-channel）各自对应一个 Handler trait，Handler 只处理已解码的领域对象与元数据，
//!   完全不感知字节与指标；
//! - **契约（What）**：
//!   - 完成信号一律为 `'static` 的 [`BoxFuture`] / [`BoxStream`]，可在任意执行器上驱动；
//!   - 返回的信号是惰性的：Handler 可以在调用时做少量同步准备，但真正的工作应在被轮询时进行；
//!   - 丢弃信号即取消，Handler 不应假定信号一定被驱动到终止；
//! - **实现（How）**：除显式实现 trait 外，签名匹配的闭包自动成为 Handler，
//!   便于测试与轻量服务直接注册。

use std::fmt;

use futures::{future::BoxFuture, stream::BoxStream};

use crate::{
    error::{DispatchError, HandlerError},
    metadata::Metadata,
};

/// 交互模型。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InteractionModel {
    FireAndForget,
    RequestResponse,
    RequestStream,
    RequestChannel,
}

impl InteractionModel {
    /// 全部交互模型，顺序固定。
    pub const ALL: [InteractionModel; 4] = [
        InteractionModel::FireAndForget,
        InteractionModel::RequestResponse,
        InteractionModel::RequestStream,
        InteractionModel::RequestChannel,
    ];

    /// 稳定的短标签，用于日志字段。
    pub const fn as_str(self) -> &'static str {
        match self {
            InteractionModel::FireAndForget => "fire_and_forget",
            InteractionModel::RequestResponse => "request_response",
            InteractionModel::RequestStream => "request_stream",
            InteractionModel::RequestChannel => "request_channel",
        }
    }
}

impl fmt::Display for InteractionModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单向调用：只关心是否成功接收。
pub trait FireAndForget<I>: Send + Sync + 'static {
    fn fire_and_forget(
        &self,
        input: I,
        metadata: Metadata,
    ) -> BoxFuture<'static, Result<(), HandlerError>>;
}

/// 一问一答。
pub trait RequestResponse<I, O>: Send + Sync + 'static {
    fn request_response(
        &self,
        input: I,
        metadata: Metadata,
    ) -> BoxFuture<'static, Result<O, HandlerError>>;
}

/// 单请求、多响应。
///
/// 流中出现的第一个 `Err` 视为终止信号，之后的元素不会再被消费。
pub trait RequestStream<I, O>: Send + Sync + 'static {
    fn request_stream(
        &self,
        input: I,
        metadata: Metadata,
    ) -> BoxStream<'static, Result<O, HandlerError>>;
}

/// 双向流。
///
/// # 教案式说明
/// - **契约 (What)**：`inputs` 的第一个元素是首个信封解码后的结果，之后依次是后续信封；
///   后续信封解码失败以 `Err(DispatchError::Data(..))` 的形式出现在 `inputs` 中，
///   由 Handler 决定是终止还是跳过；
/// - **风险 (Trade-offs)**：`inputs` 只有在 Handler 轮询时才会拉取上游，
///   Handler 不读取输入时上游背压自然生效。
pub trait RequestChannel<I, O>: Send + Sync + 'static {
    fn request_channel(
        &self,
        inputs: BoxStream<'static, Result<I, DispatchError>>,
        metadata: Metadata,
    ) -> BoxStream<'static, Result<O, HandlerError>>;
}

impl<I, F> FireAndForget<I> for F
where
    F: Fn(I, Metadata) -> BoxFuture<'static, Result<(), HandlerError>> + Send + Sync + 'static,
{
    fn fire_and_forget(
        &self,
        input: I,
        metadata: Metadata,
    ) -> BoxFuture<'static, Result<(), HandlerError>> {
        self(input, metadata)
    }
}

impl<I, O, F> RequestResponse<I, O> for F
where
    F: Fn(I, Metadata) -> BoxFuture<'static, Result<O, HandlerError>> + Send + Sync + 'static,
{
    fn request_response(
        &self,
        input: I,
        metadata: Metadata,
    ) -> BoxFuture<'static, Result<O, HandlerError>> {
        self(input, metadata)
    }
}

impl<I, O, F> RequestStream<I, O> for F
where
    F: Fn(I, Metadata) -> BoxStream<'static, Result<O, HandlerError>> + Send + Sync + 'static,
{
    fn request_stream(
        &self,
        input: I,
        metadata: Metadata,
    ) -> BoxStream<'static, Result<O, HandlerError>> {
        self(input, metadata)
    }
}

impl<I, O, F> RequestChannel<I, O> for F
where
    F: Fn(
            BoxStream<'static, Result<I, DispatchError>>,
            Metadata,
        ) -> BoxStream<'static, Result<O, HandlerError>>
        + Send
        + Sync
        + 'static,
{
    fn request_channel(
        &self,
        inputs: BoxStream<'static, Result<I, DispatchError>>,
        metadata: Metadata,
    ) -> BoxStream<'static, Result<O, HandlerError>> {
        self(inputs, metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{FutureExt, StreamExt, executor::block_on, stream};

    #[test]
    fn closures_implement_handler_traits() {
        let echo =
            |input: String, _meta: Metadata| async move { Ok::<_, HandlerError>(input) }.boxed();
        let out = block_on(RequestResponse::request_response(
            &echo,
            "ping".to_owned(),
            Metadata::new("echo"),
        ))
        .expect("闭包 Handler 应成功");
        assert_eq!(out, "ping");

        let repeat = |input: u32, _meta: Metadata| {
            stream::iter((0..input).map(Ok::<_, HandlerError>)).boxed()
        };
        let items: Vec<_> =
            block_on(RequestStream::request_stream(&repeat, 3, Metadata::new("repeat")).collect());
        assert_eq!(items.len(), 3);
    }

    #[test]
    fn model_labels_are_stable() {
        let labels: Vec<_> = InteractionModel::ALL.iter().map(|m| m.as_str()).collect();
        assert_eq!(
            labels,
            ["fire_and_forget", "request_response", "request_stream", "request_channel"]
        );
    }
}
