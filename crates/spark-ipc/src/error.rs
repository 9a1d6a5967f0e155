//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 分发层自身只会“制造”一类错误：解码失败；其余错误要么来自 Handler（原样透传），
//!   要么来自指标后端（只记录日志，绝不进入调用结果）；
//! - 为这几类语义分别建模，使调用方可以精确区分“调用从未开始”和“调用失败”。
//!
//! ## 设计要求（What）
//! - 所有错误类型派生 `thiserror::Error`，满足 `Send + Sync + 'static`；
//! - 每个错误都暴露稳定错误码 `code()`，遵循 `<域>.<语义>` 的命名约定，供日志与告警聚合；
//! - [`DispatchError`] 是所有完成信号唯一的错误类型。

use std::{borrow::Cow, error::Error as StdError, fmt};

use thiserror::Error;

use crate::{functions::InteractionModel, route::Route};

/// 元数据或数据区解码失败。
///
/// # 教案式说明
/// - **意图 (Why)**：解码发生在 Handler 调用之前，失败时分发层必须以终止信号告知调用方，
///   并保证不触发 Handler、不记录指标；
/// - **契约 (What)**：变体覆盖截断、版本、UTF-8、空路由、未知标志位、尾随字节、超限以及
///   编解码器自定义的格式错误；错误值可克隆、可比较，方便测试断言；
/// - **风险 (Trade-offs)**：`Malformed` 的 `detail` 为自由文本，可能带来较高基数，
///   指标侧应只使用 [`DecodeError::code`]。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// 字段所需字节数超过剩余长度。
    #[error("truncated `{field}`: need {needed} bytes, {remaining} remaining")]
    Truncated {
        field: &'static str,
        needed: usize,
        remaining: usize,
    },

    /// 元数据版本号不受支持。
    #[error("unsupported metadata version {0}")]
    UnsupportedVersion(u16),

    /// 文本字段不是合法 UTF-8。
    #[error("`{field}` is not valid UTF-8")]
    InvalidUtf8 { field: &'static str },

    /// 路由字段为空。
    #[error("metadata carries an empty route")]
    EmptyRoute,

    /// 标志位中出现保留位。
    #[error("unknown metadata flags {0:#04x}")]
    UnknownFlags(u8),

    /// 元数据解析完成后仍有剩余字节。
    #[error("{0} trailing bytes after metadata")]
    TrailingBytes(usize),

    /// 字段长度超过配置上限。
    #[error("`{field}` length {len} exceeds limit {limit}")]
    TooLarge {
        field: &'static str,
        len: usize,
        limit: usize,
    },

    /// 编解码器报告的格式错误。
    #[error("{codec} failed to decode: {detail}")]
    Malformed { codec: &'static str, detail: String },
}

impl DecodeError {
    /// 构造编解码器格式错误。
    pub fn malformed(codec: &'static str, detail: impl Into<String>) -> Self {
        DecodeError::Malformed {
            codec,
            detail: detail.into(),
        }
    }

    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            DecodeError::Truncated { .. } => "ipc.decode.truncated",
            DecodeError::UnsupportedVersion(_) => "ipc.decode.version",
            DecodeError::InvalidUtf8 { .. } => "ipc.decode.utf8",
            DecodeError::EmptyRoute => "ipc.decode.empty_route",
            DecodeError::UnknownFlags(_) => "ipc.decode.flags",
            DecodeError::TrailingBytes(_) => "ipc.decode.trailing",
            DecodeError::TooLarge { .. } => "ipc.decode.too_large",
            DecodeError::Malformed { .. } => "ipc.decode.malformed",
        }
    }
}

/// 编码 Handler 输出失败。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{codec} failed to encode: {detail}")]
pub struct EncodeError {
    codec: &'static str,
    detail: String,
}

impl EncodeError {
    /// 构造编码错误。
    pub fn new(codec: &'static str, detail: impl Into<String>) -> Self {
        Self {
            codec,
            detail: detail.into(),
        }
    }

    /// 出错的编解码器名称。
    pub fn codec(&self) -> &'static str {
        self.codec
    }

    /// 人类可读的失败原因。
    pub fn detail(&self) -> &str {
        &self.detail
    }

    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        "ipc.encode"
    }
}

/// Handler 完成信号携带的业务错误。
///
/// # 教案式说明
/// - **意图 (Why)**：对分发层而言，业务错误是不透明的领域数据，只需原样交还调用方并在指标中
///   记为 `error`；因此结构只承载错误码、消息与可选根因，与 spark-core 的 `CoreError` 同构；
/// - **契约 (What)**：`code` 由 Handler 作者选择，建议遵循 `<领域>.<语义>`；
///   适配器绝不修改三者中的任何一项；
/// - **风险 (Trade-offs)**：根因以 `Box<dyn Error>` 保存，因此不实现 `Clone`，
///   需要比较时请使用 [`HandlerError::code`] 与 [`HandlerError::message`]。
#[derive(Debug, Error)]
#[error("[{code}] {message}")]
pub struct HandlerError {
    code: Cow<'static, str>,
    message: Cow<'static, str>,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
}

impl HandlerError {
    /// 以错误码与消息构造业务错误。
    pub fn new(code: impl Into<Cow<'static, str>>, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            source: None,
        }
    }

    /// 把任意错误包装为业务错误，消息取自其 `Display`。
    pub fn from_error(
        code: impl Into<Cow<'static, str>>,
        error: impl StdError + Send + Sync + 'static,
    ) -> Self {
        let message = error.to_string();
        Self::new(code, message).with_source(error)
    }

    /// 附带根因。
    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// 指标后端在记录样本时的失败。只会被记录为日志。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("metrics backend `{backend}` failed: {detail}")]
pub struct MetricsError {
    backend: &'static str,
    detail: String,
}

impl MetricsError {
    pub fn new(backend: &'static str, detail: impl Into<String>) -> Self {
        Self {
            backend,
            detail: detail.into(),
        }
    }

    pub fn backend(&self) -> &'static str {
        self.backend
    }
}

/// 配置加载或校验失败。
#[derive(Debug, Error)]
pub enum ConfigError {
    /// TOML 文本无法解析为 [`DispatchConfig`](crate::config::DispatchConfig)。
    #[error("failed to parse dispatch config: {0}")]
    Parse(#[from] toml::de::Error),

    /// 字段取值不满足约束。
    #[error("invalid dispatch config field `{field}`: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

/// 完成信号统一的错误类型。
///
/// # 教案式说明
/// - **意图 (Why)**：路由器只需要面对一种错误类型即可把结果回写给传输层，同时保留
///   “解码失败（调用未开始）”与“Handler 失败（调用已开始）”的区别；
/// - **契约 (What)**：
///   - `Metadata` / `Data`：分发层自身产生，调用从未开始，不产生指标；
///   - `Encode`：Handler 输出无法编码，计为一次失败调用；
///   - `Handler`：透明包装，`Display` 与 `source` 均直接委托给 [`HandlerError`]；
///   - `RouteNotFound` / `ModelMismatch`：路由层的定位失败，同样不产生指标。
/// - **风险 (Trade-offs)**：`Handler` 变体使用 `transparent`，调用方若需要区分层次应匹配变体，
///   而不是解析字符串。
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("metadata decode failed: {0}")]
    Metadata(#[source] DecodeError),

    #[error("data decode failed: {0}")]
    Data(#[source] DecodeError),

    #[error("response encode failed: {0}")]
    Encode(#[source] EncodeError),

    #[error(transparent)]
    Handler(HandlerError),

    #[error("no {model} handler registered for route `{route}`")]
    RouteNotFound { model: InteractionModel, route: Route },

    #[error("route `{route}` is registered as {actual}, not {expected}")]
    ModelMismatch {
        route: Route,
        expected: InteractionModel,
        actual: InteractionModel,
    },
}

impl DispatchError {
    /// 稳定错误码；Handler 错误直接返回业务错误码。
    pub fn code(&self) -> &str {
        match self {
            DispatchError::Metadata(err) | DispatchError::Data(err) => err.code(),
            DispatchError::Encode(err) => err.code(),
            DispatchError::Handler(err) => err.code(),
            DispatchError::RouteNotFound { .. } => "ipc.route.not_found",
            DispatchError::ModelMismatch { .. } => "ipc.route.model_mismatch",
        }
    }

    /// 是否为解码阶段（调用开始之前）的失败。
    pub fn is_decode(&self) -> bool {
        matches!(self, DispatchError::Metadata(_) | DispatchError::Data(_))
    }

    /// 借出 Handler 错误。
    pub fn as_handler(&self) -> Option<&HandlerError> {
        match self {
            DispatchError::Handler(err) => Some(err),
            _ => None,
        }
    }

    /// 取回 Handler 错误的所有权。
    pub fn into_handler(self) -> Result<HandlerError, Self> {
        match self {
            DispatchError::Handler(err) => Ok(err),
            other => Err(other),
        }
    }
}

impl From<HandlerError> for DispatchError {
    fn from(value: HandlerError) -> Self {
        DispatchError::Handler(value)
    }
}

impl From<EncodeError> for DispatchError {
    fn from(value: EncodeError) -> Self {
        DispatchError::Encode(value)
    }
}

/// 解码阶段标签，用于日志字段。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum DecodeStage {
    Metadata,
    Data,
}

impl DecodeStage {
    pub(crate) fn wrap(self, error: DecodeError) -> DispatchError {
        match self {
            DecodeStage::Metadata => DispatchError::Metadata(error),
            DecodeStage::Data => DispatchError::Data(error),
        }
    }
}

impl fmt::Display for DecodeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DecodeStage::Metadata => "metadata",
            DecodeStage::Data => "data",
        })
    }
}
