use std::{fmt, marker::PhantomData, sync::Arc};

use futures::{FutureExt, TryFutureExt};
use tracing::debug;

use crate::{
    codec::Unmarshaller,
    error::DispatchError,
    functions::FireAndForget,
    instrument::{BoundInstrumentation, Instrumentation, Timed},
    metadata::{Metadata, MetadataDecoder},
    payload::Envelope,
    route::Route,
};

use super::{FireAndForgetSignal, IpcFunction, decode_data, decode_metadata};

/// fire-and-forget 适配器。
///
/// 完成信号在 Handler 报告接收完成时以 `Ok(())` 终止；业务错误原样转为
/// [`DispatchError::Handler`]。
pub struct FireAndForgetAdapter<I, U, H> {
    route: Route,
    unmarshaller: U,
    handler: Arc<H>,
    decoder: Arc<dyn MetadataDecoder>,
    instrumentation: BoundInstrumentation,
    _input: PhantomData<fn(I)>,
}

impl<I, U, H> FireAndForgetAdapter<I, U, H>
where
    I: Send + 'static,
    U: Unmarshaller<I>,
    H: FireAndForget<I>,
{
    pub fn new(
        route: impl Into<Route>,
        unmarshaller: U,
        handler: H,
        decoder: Arc<dyn MetadataDecoder>,
        instrumentation: &Instrumentation,
    ) -> Self {
        let route = route.into();
        debug!(
            route = %route,
            model = "fire_and_forget",
            category = instrumentation.category(),
            "ipc adapter constructed"
        );
        Self {
            instrumentation: instrumentation.bind(&route),
            route,
            unmarshaller,
            handler: Arc::new(handler),
            decoder,
            _input: PhantomData,
        }
    }

    pub fn route(&self) -> &Route {
        &self.route
    }
}

impl<I, U, H> IpcFunction<FireAndForgetSignal> for FireAndForgetAdapter<I, U, H>
where
    I: Send + 'static,
    U: Unmarshaller<I>,
    H: FireAndForget<I>,
{
    fn route(&self) -> &Route {
        &self.route
    }

    fn apply(&self, envelope: &dyn Envelope) -> FireAndForgetSignal {
        match decode_metadata(self.decoder.as_ref(), envelope) {
            Ok(metadata) => self.apply_with_metadata(envelope, metadata),
            Err(error) => super::failed_future(error),
        }
    }

    fn apply_with_metadata(
        &self,
        envelope: &dyn Envelope,
        metadata: Metadata,
    ) -> FireAndForgetSignal {
        let input = match decode_data(&self.route, &self.unmarshaller, envelope.data()) {
            Ok(input) => input,
            Err(error) => return super::failed_future(error),
        };
        let timer = self.instrumentation.start();
        let signal = self
            .handler
            .fire_and_forget(input, metadata)
            .map_err(DispatchError::from);
        Timed::new(signal, timer).boxed()
    }
}

impl<I, U, H> fmt::Debug for FireAndForgetAdapter<I, U, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FireAndForgetAdapter")
            .field("route", &self.route)
            .finish_non_exhaustive()
    }
}
