use std::{fmt, sync::Arc};

use crate::{
    codec::{Marshaller, Unmarshaller},
    config::IpcServices,
    functions::{FireAndForget, RequestChannel, RequestResponse, RequestStream},
    instrument::Instrumentation,
    metadata::MetadataDecoder,
    route::Route,
};

use super::{
    DispatchAdapter, FireAndForgetAdapter, RequestChannelAdapter, RequestResponseAdapter,
    RequestStreamAdapter,
};

/// 注册边界：把“路由 + 编解码器 + Handler”组装为指标感知的 [`DispatchAdapter`]。
///
/// # 教案式说明
/// - **意图 (Why)**：生成的服务桩只需要按方法逐个调用这里的四个入口，
///   不需要了解指标、元数据解码器或适配器的泛型参数；
/// - **契约 (What)**：
///   - 每次调用构造一个新适配器，并在构造时解析该路由的计时器句柄；
///   - 返回值尚未进入任何路由表，是否注册由调用方决定；
/// - **执行 (How)**：持有服务束中的元数据解码器与 [`Instrumentation`]，
///   [`Registrar::with_category`] 可为一组路由覆盖指标类别。
#[derive(Clone)]
pub struct Registrar {
    decoder: Arc<dyn MetadataDecoder>,
    instrumentation: Instrumentation,
}

impl Registrar {
    pub fn new(services: &IpcServices) -> Self {
        Self {
            decoder: Arc::clone(services.metadata_decoder()),
            instrumentation: Instrumentation::from_services(services),
        }
    }

    /// 覆盖指标类别。
    pub fn with_category(mut self, category: impl Into<Arc<str>>) -> Self {
        self.instrumentation = self.instrumentation.with_category(category);
        self
    }

    pub fn instrumentation(&self) -> &Instrumentation {
        &self.instrumentation
    }

    pub fn fire_and_forget<I, U, H>(
        &self,
        route: impl Into<Route>,
        unmarshaller: U,
        handler: H,
    ) -> DispatchAdapter
    where
        I: Send + 'static,
        U: Unmarshaller<I>,
        H: FireAndForget<I>,
    {
        let adapter = FireAndForgetAdapter::new(
            route,
            unmarshaller,
            handler,
            Arc::clone(&self.decoder),
            &self.instrumentation,
        );
        DispatchAdapter::FireAndForget(Arc::new(adapter))
    }

    pub fn request_response<I, O, U, M, H>(
        &self,
        route: impl Into<Route>,
        unmarshaller: U,
        marshaller: M,
        handler: H,
    ) -> DispatchAdapter
    where
        I: Send + 'static,
        O: Send + 'static,
        U: Unmarshaller<I>,
        M: Marshaller<O>,
        H: RequestResponse<I, O>,
    {
        let adapter = RequestResponseAdapter::new(
            route,
            unmarshaller,
            marshaller,
            handler,
            Arc::clone(&self.decoder),
            &self.instrumentation,
        );
        DispatchAdapter::RequestResponse(Arc::new(adapter))
    }

    pub fn request_stream<I, O, U, M, H>(
        &self,
        route: impl Into<Route>,
        unmarshaller: U,
        marshaller: M,
        handler: H,
    ) -> DispatchAdapter
    where
        I: Send + 'static,
        O: Send + 'static,
        U: Unmarshaller<I>,
        M: Marshaller<O>,
        H: RequestStream<I, O>,
    {
        let adapter = RequestStreamAdapter::new(
            route,
            unmarshaller,
            marshaller,
            handler,
            Arc::clone(&self.decoder),
            &self.instrumentation,
        );
        DispatchAdapter::RequestStream(Arc::new(adapter))
    }

    pub fn request_channel<I, O, U, M, H>(
        &self,
        route: impl Into<Route>,
        unmarshaller: U,
        marshaller: M,
        handler: H,
    ) -> DispatchAdapter
    where
        I: Send + 'static,
        O: Send + 'static,
        U: Unmarshaller<I>,
        M: Marshaller<O>,
        H: RequestChannel<I, O>,
    {
        let adapter = RequestChannelAdapter::new(
            route,
            unmarshaller,
            marshaller,
            handler,
            Arc::clone(&self.decoder),
            &self.instrumentation,
        );
        DispatchAdapter::RequestChannel(Arc::new(adapter))
    }
}

impl fmt::Debug for Registrar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registrar")
            .field("instrumentation", &self.instrumentation)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        codec::{JsonCodec, Utf8Codec},
        error::{DispatchError, HandlerError},
        functions::InteractionModel,
        metadata::{BinaryMetadataCodec, Metadata},
        metrics::{InMemoryMetricsRegistry, Outcome},
        payload::Payload,
    };
    use bytes::Bytes;
    use futures::{FutureExt, StreamExt, executor::block_on, stream};

    fn services(registry: &InMemoryMetricsRegistry) -> IpcServices {
        IpcServices::new(Arc::new(registry.clone()))
    }

    fn envelope(route: &str, data: &'static [u8]) -> Payload {
        let metadata = BinaryMetadataCodec::new()
            .encode(&Metadata::new(route))
            .expect("测试元数据应可编码");
        Payload::new(metadata, data)
    }

    #[test]
    fn adapter_resolves_timer_once_at_registration() {
        let registry = InMemoryMetricsRegistry::new();
        let registrar = Registrar::new(&services(&registry));
        let adapter = registrar.request_response(
            "echo",
            Utf8Codec,
            Utf8Codec,
            |input: String, _meta: Metadata| async move { Ok::<_, HandlerError>(input) }.boxed(),
        );
        assert_eq!(registry.timer_resolutions(), 1);

        for _ in 0..3 {
            let out =
                block_on(adapter.request_response(&envelope("echo", b"hi"), Metadata::new("echo")));
            assert_eq!(out.expect("应成功"), Bytes::from_static(b"hi"));
        }
        assert_eq!(registry.timer_resolutions(), 1, "热路径不应重复解析计时器");
        assert_eq!(registry.samples_for("echo").len(), 3);
    }

    #[test]
    fn self_decoding_apply_reads_metadata() {
        let registry = InMemoryMetricsRegistry::new();
        let adapter = Registrar::new(&services(&registry)).request_response(
            "greet",
            Utf8Codec,
            Utf8Codec,
            |input: String, meta: Metadata| {
                async move { Ok::<_, HandlerError>(format!("{}:{input}", meta.route())) }.boxed()
            },
        );
        let DispatchAdapter::RequestResponse(function) = &adapter else {
            panic!("应为 request-response 适配器");
        };

        let out = block_on(function.apply(&envelope("greet", b"ann"))).expect("应成功");
        assert_eq!(out, Bytes::from_static(b"greet:ann"));

        let err = block_on(function.apply(&Payload::new(&b"\x00"[..], &b"ann"[..]))).unwrap_err();
        assert!(matches!(err, DispatchError::Metadata(_)));
        assert_eq!(registry.samples_for("greet").len(), 1, "元数据失败不应产生样本");
    }

    #[test]
    fn encode_failure_is_recorded_as_error() {
        let registry = InMemoryMetricsRegistry::new();
        let adapter = Registrar::new(&services(&registry)).request_response(
            "broken",
            Utf8Codec,
            crate::codec::marshaller_fn(|_: &String| {
                Err(crate::error::EncodeError::new("test", "unsupported"))
            }),
            |input: String, _meta: Metadata| async move { Ok::<_, HandlerError>(input) }.boxed(),
        );

        let err = block_on(
            adapter.request_response(&envelope("broken", b"x"), Metadata::new("broken")),
        )
        .unwrap_err();
        assert!(matches!(err, DispatchError::Encode(_)));
        let samples = registry.samples_for("broken");
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].outcome, Outcome::Error);
    }

    #[test]
    fn wrong_model_entry_point_reports_mismatch() {
        let registry = InMemoryMetricsRegistry::new();
        let adapter = Registrar::new(&services(&registry)).fire_and_forget(
            "audit",
            Utf8Codec,
            |_input: String, _meta: Metadata| async { Ok::<_, HandlerError>(()) }.boxed(),
        );
        assert_eq!(adapter.model(), InteractionModel::FireAndForget);

        let err = block_on(
            adapter.request_response(&envelope("audit", b"x"), Metadata::new("audit")),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            DispatchError::ModelMismatch {
                expected: InteractionModel::RequestResponse,
                actual: InteractionModel::FireAndForget,
                ..
            }
        ));
        assert!(registry.timer_samples().is_empty());
    }

    #[test]
    fn category_override_applies_to_new_adapters() {
        let registry = InMemoryMetricsRegistry::new();
        let registrar = Registrar::new(&services(&registry)).with_category("ipc.internal");
        let adapter = registrar.request_stream(
            "numbers",
            JsonCodec::<u32>::new(),
            JsonCodec::<u32>::new(),
            |count: u32, _meta: Metadata| {
                stream::iter((0..count).map(Ok::<_, HandlerError>)).boxed()
            },
        );

        let items: Vec<_> = block_on(
            adapter
                .request_stream(&envelope("numbers", b"3"), Metadata::new("numbers"))
                .collect(),
        );
        assert_eq!(items.len(), 3);
        let samples = registry.samples_for("numbers");
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].category, "ipc.internal");
        let counts = registry.counter_samples();
        assert_eq!(counts[0].name, "ipc.internal.elements");
        assert_eq!(counts[0].value, 3);
    }
}
