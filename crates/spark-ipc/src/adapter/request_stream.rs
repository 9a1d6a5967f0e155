use std::{fmt, marker::PhantomData, sync::Arc};

use bytes::Bytes;
use futures::StreamExt;
use tracing::debug;

use crate::{
    codec::{Marshaller, Unmarshaller},
    error::{DispatchError, HandlerError},
    functions::RequestStream,
    instrument::{BoundInstrumentation, Instrumentation, TimedStream},
    metadata::{Metadata, MetadataDecoder},
    payload::Envelope,
    route::Route,
};

use super::{IpcFunction, StreamSignal, decode_data, decode_metadata, failed_stream};

/// request-stream 适配器。
///
/// 整条响应流对应一个计时样本；元素逐个编码，第一个编码失败或业务错误即终止流。
pub struct RequestStreamAdapter<I, O, U, M, H> {
    route: Route,
    unmarshaller: U,
    marshaller: Arc<M>,
    handler: H,
    decoder: Arc<dyn MetadataDecoder>,
    instrumentation: BoundInstrumentation,
    _types: PhantomData<fn(I) -> O>,
}

impl<I, O, U, M, H> RequestStreamAdapter<I, O, U, M, H>
where
    I: Send + 'static,
    O: Send + 'static,
    U: Unmarshaller<I>,
    M: Marshaller<O>,
    H: RequestStream<I, O>,
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
            model = "request_stream",
            category = instrumentation.category(),
            "ipc adapter constructed"
        );
        Self {
            instrumentation: instrumentation.bind(&route),
            route,
            unmarshaller,
            marshaller: Arc::new(marshaller),
            handler,
            decoder,
            _types: PhantomData,
        }
    }

    pub fn route(&self) -> &Route {
        &self.route
    }
}

impl<I, O, U, M, H> IpcFunction<StreamSignal> for RequestStreamAdapter<I, O, U, M, H>
where
    I: Send + 'static,
    O: Send + 'static,
    U: Unmarshaller<I>,
    M: Marshaller<O>,
    H: RequestStream<I, O>,
{
    fn route(&self) -> &Route {
        &self.route
    }

    fn apply(&self, envelope: &dyn Envelope) -> StreamSignal {
        match decode_metadata(self.decoder.as_ref(), envelope) {
            Ok(metadata) => self.apply_with_metadata(envelope, metadata),
            Err(error) => failed_stream(error),
        }
    }

    fn apply_with_metadata(&self, envelope: &dyn Envelope, metadata: Metadata) -> StreamSignal {
        let input = match decode_data(&self.route, &self.unmarshaller, envelope.data()) {
            Ok(input) => input,
            Err(error) => return failed_stream(error),
        };
        let timer = self.instrumentation.start_stream();
        let marshaller = Arc::clone(&self.marshaller);
        let outputs = self
            .handler
            .request_stream(input, metadata)
            .map(move |item| encode_element(&*marshaller, item));
        TimedStream::new(outputs, timer).boxed()
    }
}

/// 编码单个流元素；业务错误原样包装。
pub(super) fn encode_element<O, M>(
    marshaller: &M,
    item: Result<O, HandlerError>,
) -> Result<Bytes, DispatchError>
where
    M: Marshaller<O> + ?Sized,
{
    let output = item?;
    marshaller.marshal(&output).map_err(DispatchError::from)
}

impl<I, O, U, M, H> fmt::Debug for RequestStreamAdapter<I, O, U, M, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestStreamAdapter")
            .field("route", &self.route)
            .finish_non_exhaustive()
    }
}
