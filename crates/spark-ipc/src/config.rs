//! # 分发配置与运行时服务束
//!
//! ## 教案式概览
//! - **意图（Why）**：指标类别、标签键与元数据上限属于部署决策，应当集中在一处声明，
//!   并可以从 TOML 片段加载；
//! - **契约（What）**：
//!   - [`DispatchConfig`] 的每个字段都有默认值，空 TOML 即得到默认配置；
//!   - [`DispatchConfig::validate`] 拒绝空类别、空标签键与零上限；
//!   - [`IpcServices`] 把指标注册表、元数据解码器与配置打包，注册器与路由器共享同一份；
//! - **实现（How）**：`serde` 派生 + `toml` 解析；服务束内部全部是 `Arc`，克隆廉价。

use std::{fmt, sync::Arc};

use serde::Deserialize;

use crate::{
    error::ConfigError,
    metadata::{BinaryMetadataCodec, MetadataDecoder},
    metrics::{MetricsRegistry, NoopMetricsRegistry},
};

/// 默认指标类别。
pub const DEFAULT_METRICS_CATEGORY: &str = "rsocket.server";

/// 默认标签键。
pub const DEFAULT_ROUTE_TAG: &str = "route";

/// 分发层配置。
///
/// ```toml
/// metrics_category = "rsocket.server"
/// route_tag = "route"
/// count_stream_elements = true
/// max_metadata_len = 65536
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DispatchConfig {
    /// 计时器类别名。
    pub metrics_category: String,
    /// 标签键，标签值始终为路由。
    pub route_tag: String,
    /// 是否为流式交互额外记录 `{category}.elements` 计数。
    pub count_stream_elements: bool,
    /// 元数据区允许的最大字节数。
    pub max_metadata_len: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            metrics_category: DEFAULT_METRICS_CATEGORY.to_owned(),
            route_tag: DEFAULT_ROUTE_TAG.to_owned(),
            count_stream_elements: true,
            max_metadata_len: BinaryMetadataCodec::DEFAULT_MAX_LEN,
        }
    }
}

impl DispatchConfig {
    /// 从 TOML 文本加载并校验。
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: DispatchConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// 校验字段取值。
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.metrics_category.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "metrics_category",
                reason: "must not be empty",
            });
        }
        if self.route_tag.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "route_tag",
                reason: "must not be empty",
            });
        }
        if self.max_metadata_len == 0 {
            return Err(ConfigError::Invalid {
                field: "max_metadata_len",
                reason: "must be greater than zero",
            });
        }
        Ok(())
    }
}

/// 分发层的运行时依赖束。
///
/// # 教案式说明
/// - **意图 (Why)**：注册器需要指标注册表与配置，路由器需要元数据解码器；
///   用一个可克隆的服务束传递，避免在每个构造函数上重复三个参数；
/// - **契约 (What)**：默认解码器为 [`BinaryMetadataCodec`]，上限始终取自当前的
///   [`DispatchConfig::max_metadata_len`]，[`IpcServices::with_config`] 会按新上限重建它；
///   经 [`IpcServices::with_metadata_decoder`] 注入的自定义解码器自行负责上限，替换配置时保持不变。
#[derive(Clone)]
pub struct IpcServices {
    metrics: Arc<dyn MetricsRegistry>,
    metadata_decoder: Arc<dyn MetadataDecoder>,
    custom_decoder: bool,
    config: DispatchConfig,
}

impl IpcServices {
    /// 以默认配置与默认元数据解码器构造。
    pub fn new(metrics: Arc<dyn MetricsRegistry>) -> Self {
        let config = DispatchConfig::default();
        Self {
            metrics,
            metadata_decoder: default_decoder(&config),
            custom_decoder: false,
            config,
        }
    }

    /// 以给定配置构造，默认解码器按配置的上限创建。
    pub fn with_dispatch_config(
        metrics: Arc<dyn MetricsRegistry>,
        config: DispatchConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            metrics,
            metadata_decoder: default_decoder(&config),
            custom_decoder: false,
            config,
        })
    }

    /// 不采集指标的服务束。
    pub fn noop() -> Self {
        Self::new(Arc::new(NoopMetricsRegistry))
    }

    /// 替换元数据解码器。
    pub fn with_metadata_decoder(mut self, decoder: Arc<dyn MetadataDecoder>) -> Self {
        self.metadata_decoder = decoder;
        self.custom_decoder = true;
        self
    }

    /// 替换配置；默认解码器随新的 `max_metadata_len` 重建。
    pub fn with_config(mut self, config: DispatchConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        if !self.custom_decoder {
            self.metadata_decoder = default_decoder(&config);
        }
        self.config = config;
        Ok(self)
    }

    pub fn metrics(&self) -> &Arc<dyn MetricsRegistry> {
        &self.metrics
    }

    pub fn metadata_decoder(&self) -> &Arc<dyn MetadataDecoder> {
        &self.metadata_decoder
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }
}

fn default_decoder(config: &DispatchConfig) -> Arc<dyn MetadataDecoder> {
    Arc::new(BinaryMetadataCodec::with_max_len(config.max_metadata_len))
}

impl fmt::Debug for IpcServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IpcServices")
            .field("config", &self.config)
            .field("custom_decoder", &self.custom_decoder)
            .finish_non_exhaustive()
    }
}
