use std::{fmt, marker::PhantomData, sync::Arc};

use bytes::Bytes;
use futures::FutureExt;
use tracing::debug;

use crate::{
    codec::{Marshaller, Unmarshaller},
    error::DispatchError,
    functions::RequestResponse,
    instrument::{BoundInstrumentation, Instrumentation, Timed},
    metadata::{Metadata, MetadataDecoder},
    payload::Envelope,
    route::Route,
};

use super::{IpcFunction, ResponseSignal, decode_data, decode_metadata, failed_future};

/// request-response 适配器。
///
/// # 教案式说明
/// - **契约 (What)**：Handler 成功值经 `M` 编码后作为响应；编码失败计为一次失败调用，
///   调用方收到 [`DispatchError::Encode`]，计时器记为 `error`；
/// - **执行 (How)**：编码发生在计时包装之内，因此样本的耗时包含编码开销。
pub struct RequestResponseAdapter<I, O, U, M, H> {
    route: Route,
    unmarshaller: U,
    marshaller: Arc<M>,
    handler: H,
    decoder: Arc<dyn MetadataDecoder>,
    instrumentation: BoundInstrumentation,
    _types: PhantomData<fn(I) -> O>,
}

impl<I, O, U, M, H> RequestResponseAdapter<I, O, U, M, H>
where
    I: Send + 'static,
    O: Send + 'static,
    U: Unmarshaller<I>,
    M: Marshaller<O>,
    H: RequestResponse<I, O>,
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
            model = "request_response",
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

impl<I, O, U, M, H> IpcFunction<ResponseSignal> for RequestResponseAdapter<I, O, U, M, H>
where
    I: Send + 'static,
    O: Send + 'static,
    U: Unmarshaller<I>,
    M: Marshaller<O>,
    H: RequestResponse<I, O>,
{
    fn route(&self) -> &Route {
        &self.route
    }

    fn apply(&self, envelope: &dyn Envelope) -> ResponseSignal {
        match decode_metadata(self.decoder.as_ref(), envelope) {
            Ok(metadata) => self.apply_with_metadata(envelope, metadata),
            Err(error) => failed_future(error),
        }
    }

    fn apply_with_metadata(&self, envelope: &dyn Envelope, metadata: Metadata) -> ResponseSignal {
        let input = match decode_data(&self.route, &self.unmarshaller, envelope.data()) {
            Ok(input) => input,
            Err(error) => return failed_future(error),
        };
        let timer = self.instrumentation.start();
        let marshaller = Arc::clone(&self.marshaller);
        let signal = self
            .handler
            .request_response(input, metadata)
            .map(move |result| -> Result<Bytes, DispatchError> {
                let output = result?;
                marshaller.marshal(&output).map_err(DispatchError::from)
            });
        Timed::new(signal, timer).boxed()
    }
}

impl<I, O, U, M, H> fmt::Debug for RequestResponseAdapter<I, O, U, M, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestResponseAdapter")
            .field("route", &self.route)
            .finish_non_exhaustive()
    }
}
