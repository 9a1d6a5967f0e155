use std::{fmt, marker::PhantomData, sync::Arc};

use futures::{
    StreamExt,
    future,
    stream::{self, BoxStream},
};
use tracing::debug;

use crate::{
    codec::{Marshaller, Unmarshaller},
    error::DispatchError,
    functions::RequestChannel,
    instrument::{BoundInstrumentation, Instrumentation, TimedStream},
    metadata::{Metadata, MetadataDecoder},
    payload::{Envelope, PayloadStream},
    route::Route,
};

use super::{
    IpcChannelFunction, StreamSignal, decode_data, decode_metadata, failed_stream,
    request_stream::encode_element,
};

/// request-channel 适配器。
///
/// # 教案式说明
/// - **意图 (Why)**：双向流以首个信封确定路由，首个信封的数据与后续信封一起构成 Handler 的输入流；
/// - **契约 (What)**：
///   - 首个信封的数据解码失败时，Handler 不被调用，信号以 [`DispatchError::Data`] 终止；
///   - 后续信封只读取数据区，解码失败以 `Err` 元素交给 Handler 自行处置；
///   - 输出侧语义与 request-stream 相同：一个计时样本，第一个错误即终止；
/// - **风险 (Trade-offs)**：后续信封的解码在 Handler 轮询输入流时惰性发生，
///   其耗时计入本次调用的计时样本。
pub struct RequestChannelAdapter<I, O, U, M, H> {
    route: Route,
    unmarshaller: Arc<U>,
    marshaller: Arc<M>,
    handler: H,
    decoder: Arc<dyn MetadataDecoder>,
    instrumentation: BoundInstrumentation,
    _types: PhantomData<fn(I) -> O>,
}

impl<I, O, U, M, H> RequestChannelAdapter<I, O, U, M, H>
where
    I: Send + 'static,
    O: Send + 'static,
    U: Unmarshaller<I>,
    M: Marshaller<O>,
    H: RequestChannel<I, O>,
{
    pub fn new(
        route: impl Into<Route>,
        unmarshaller: U,
        marshaller: M,
        handler: H,
        decoder: Arc<dyn MetadataDecoder>,
        instrumentation: &Instrumentation,
    ) -> Self {
        let route = route.into();
        debug!(
            route = %route,
            model = "request_channel",
            category = instrumentation.category(),
            "ipc adapter constructed"
        );
        Self {
            instrumentation: instrumentation.bind(&route),
            route,
            unmarshaller: Arc::new(unmarshaller),
            marshaller: Arc::new(marshaller),
            handler,
            decoder,
            _types: PhantomData,
        }
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    fn inputs(
        &self,
        first: I,
        rest: PayloadStream,
    ) -> BoxStream<'static, Result<I, DispatchError>> {
        let route = self.route.clone();
        let unmarshaller = Arc::clone(&self.unmarshaller);
        let rest = rest.map(move |payload| decode_data(&route, &*unmarshaller, payload.data()));
        stream::once(future::ready(Ok(first))).chain(rest).boxed()
    }
}

impl<I, O, U, M, H> IpcChannelFunction for RequestChannelAdapter<I, O, U, M, H>
where
    I: Send + 'static,
    O: Send + 'static,
    U: Unmarshaller<I>,
    M: Marshaller<O>,
    H: RequestChannel<I, O>,
{
    fn route(&self) -> &Route {
        &self.route
    }

    fn apply(&self, first: &dyn Envelope, rest: PayloadStream) -> StreamSignal {
        match decode_metadata(self.decoder.as_ref(), first) {
            Ok(metadata) => self.apply_with_metadata(first, metadata, rest),
            Err(error) => failed_stream(error),
        }
    }

    fn apply_with_metadata(
        &self,
        first: &dyn Envelope,
        metadata: Metadata,
        rest: PayloadStream,
    ) -> StreamSignal {
        let input = match decode_data(&self.route, &*self.unmarshaller, first.data()) {
            Ok(input) => input,
            Err(error) => return failed_stream(error),
        };
        let inputs = self.inputs(input, rest);
        let timer = self.instrumentation.start_stream();
        let marshaller = Arc::clone(&self.marshaller);
        let outputs = self
            .handler
            .request_channel(inputs, metadata)
            .map(move |item| encode_element(&*marshaller, item));
        TimedStream::new(outputs, timer).boxed()
    }
}

impl<I, O, U, M, H> fmt::Debug for RequestChannelAdapter<I, O, U, M, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestChannelAdapter")
            .field("route", &self.route)
            .finish_non_exhaustive()
    }
}
