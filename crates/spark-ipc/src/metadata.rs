//! # 元数据解码器
//!
//! ## 核心意图（Why）
//! - 路由器需要先从信封的元数据区取出路由键才能定位适配器；Handler 还可能需要链路追踪上下文
//!   与应用自定义元数据。本模块把这段字节解码为结构化、不可变的 [`Metadata`]。
//!
//! ## 行为契约（What）
//! - [`MetadataDecoder::decode`] 对合法输入是纯函数且全定义；输入截断或格式错误时返回
//!   [`DecodeError`]，不会 panic，也不持有任何共享可变状态，可并发调用；
//! - 解码结果不借用输入：应用元数据会被复制出来，调用结束后信封即可释放。
//!
//! ## 线格式（How）
//! [`BinaryMetadataCodec`] 使用的 v1 格式（大端序）：
//!
//! ```text
//! +---------+-----------+-------------+----------+--------------------------------+-------------+-----------+
//! | u16 ver | u16 rlen  | route utf-8 | u8 flags | trace? 16B id | 8B span | 1B f  | u32 ulen    | user      |
//! +---------+-----------+-------------+----------+--------------------------------+-------------+-----------+
//! ```
//!
//! - `flags` 仅允许 bit0（携带 trace）；其它位必须为 0；
//! - 解析完成后不得剩余字节。
//!
//! ## 风险提示（Trade-offs）
//! - 复制应用元数据会产生一次分配；换来的是信封生命周期与调用生命周期完全解耦。

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{
    error::{DecodeError, EncodeError},
    route::Route,
};

/// 当前线格式版本。
pub const METADATA_VERSION: u16 = 1;

const FLAG_TRACE: u8 = 0b0000_0001;
const TRACE_LEN: usize = 16 + 8 + 1;
const CODEC_NAME: &str = "metadata.binary.v1";

/// W3C 风格的链路追踪上下文。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TraceContext {
    pub trace_id: [u8; 16],
    pub span_id: [u8; 8],
    pub flags: u8,
}

impl TraceContext {
    pub const FLAG_SAMPLED: u8 = 0x01;

    pub fn new(trace_id: [u8; 16], span_id: [u8; 8], flags: u8) -> Self {
        Self {
            trace_id,
            span_id,
            flags,
        }
    }

    pub fn is_sampled(&self) -> bool {
        self.flags & Self::FLAG_SAMPLED != 0
    }
}

/// 单次调用的结构化元数据。
///
/// # 教案式说明
/// - **意图 (Why)**：为 Handler 提供路由、追踪上下文与应用元数据，且与信封字节解耦；
/// - **契约 (What)**：创建后不可变；克隆只增加引用计数；
/// - **生命周期**：由一次调用独占，调用结束后丢弃。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Metadata {
    route: Route,
    trace: Option<TraceContext>,
    user: Bytes,
}

impl Metadata {
    pub fn new(route: impl Into<Route>) -> Self {
        Self {
            route: route.into(),
            trace: None,
            user: Bytes::new(),
        }
    }

    pub fn with_trace(mut self, trace: TraceContext) -> Self {
        self.trace = Some(trace);
        self
    }

    pub fn with_user_metadata(mut self, user: impl Into<Bytes>) -> Self {
        self.user = user.into();
        self
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    pub fn trace(&self) -> Option<&TraceContext> {
        self.trace.as_ref()
    }

    /// 应用自定义元数据。
    pub fn user_metadata(&self) -> &Bytes {
        &self.user
    }
}

/// 元数据解码契约。
///
/// # 契约说明（What）
/// - **输入**：信封元数据区的只读切片；
/// - **输出**：成功时返回拥有所有权的 [`Metadata`]；
/// - **线程安全**：实现必须 `Send + Sync`，同一实例会被所有调用并发共享。
pub trait MetadataDecoder: Send + Sync + 'static {
    fn decode(&self, raw: &[u8]) -> Result<Metadata, DecodeError>;
}

impl<F> MetadataDecoder for F
where
    F: Fn(&[u8]) -> Result<Metadata, DecodeError> + Send + Sync + 'static,
{
    fn decode(&self, raw: &[u8]) -> Result<Metadata, DecodeError> {
        self(raw)
    }
}

/// v1 二进制元数据编解码器。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BinaryMetadataCodec {
    max_len: usize,
}

impl BinaryMetadataCodec {
    /// 默认允许的元数据区上限。
    pub const DEFAULT_MAX_LEN: usize = 64 * 1024;

    pub fn new() -> Self {
        Self::with_max_len(Self::DEFAULT_MAX_LEN)
    }

    pub fn with_max_len(max_len: usize) -> Self {
        Self { max_len }
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// 将元数据编码为 v1 线格式，供客户端与测试构造信封。
    pub fn encode(&self, metadata: &Metadata) -> Result<Bytes, EncodeError> {
        let route = metadata.route.as_str().as_bytes();
        if route.is_empty() {
            return Err(EncodeError::new(CODEC_NAME, "route must not be empty"));
        }
        let route_len = u16::try_from(route.len())
            .map_err(|_| EncodeError::new(CODEC_NAME, "route longer than u16::MAX"))?;
        let user_len = u32::try_from(metadata.user.len())
            .map_err(|_| EncodeError::new(CODEC_NAME, "user metadata longer than u32::MAX"))?;

        let trace_len = if metadata.trace.is_some() { TRACE_LEN } else { 0 };
        let mut buf =
            BytesMut::with_capacity(2 + 2 + route.len() + 1 + trace_len + 4 + metadata.user.len());
        buf.put_u16(METADATA_VERSION);
        buf.put_u16(route_len);
        buf.put_slice(route);
        match &metadata.trace {
            Some(trace) => {
                buf.put_u8(FLAG_TRACE);
                buf.put_slice(&trace.trace_id);
                buf.put_slice(&trace.span_id);
                buf.put_u8(trace.flags);
            }
            None => buf.put_u8(0),
        }
        buf.put_u32(user_len);
        buf.put_slice(&metadata.user);

        if buf.len() > self.max_len {
            return Err(EncodeError::new(CODEC_NAME, "encoded metadata exceeds max_len"));
        }
        Ok(buf.freeze())
    }
}

impl Default for BinaryMetadataCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataDecoder for BinaryMetadataCodec {
    fn decode(&self, raw: &[u8]) -> Result<Metadata, DecodeError> {
        if raw.len() > self.max_len {
            return Err(DecodeError::TooLarge {
                field: "metadata",
                len: raw.len(),
                limit: self.max_len,
            });
        }

        let mut buf = raw;
        ensure(&buf, "version", 2)?;
        let version = buf.get_u16();
        if version != METADATA_VERSION {
            return Err(DecodeError::UnsupportedVersion(version));
        }

        ensure(&buf, "route_len", 2)?;
        let route_len = usize::from(buf.get_u16());
        ensure(&buf, "route", route_len)?;
        let route = std::str::from_utf8(&buf[..route_len])
            .map_err(|_| DecodeError::InvalidUtf8 { field: "route" })?;
        if route.is_empty() {
            return Err(DecodeError::EmptyRoute);
        }
        let route = Route::from(route);
        buf.advance(route_len);

        ensure(&buf, "flags", 1)?;
        let flags = buf.get_u8();
        if flags & !FLAG_TRACE != 0 {
            return Err(DecodeError::UnknownFlags(flags));
        }

        let trace = if flags & FLAG_TRACE != 0 {
            ensure(&buf, "trace", TRACE_LEN)?;
            let mut trace_id = [0u8; 16];
            let mut span_id = [0u8; 8];
            buf.copy_to_slice(&mut trace_id);
            buf.copy_to_slice(&mut span_id);
            Some(TraceContext::new(trace_id, span_id, buf.get_u8()))
        } else {
            None
        };

        ensure(&buf, "user_len", 4)?;
        let user_len = buf.get_u32() as usize;
        ensure(&buf, "user", user_len)?;
        let user = Bytes::copy_from_slice(&buf[..user_len]);
        buf.advance(user_len);

        if buf.has_remaining() {
            return Err(DecodeError::TrailingBytes(buf.remaining()));
        }

        Ok(Metadata { route, trace, user })
    }
}

fn ensure(buf: &&[u8], field: &'static str, needed: usize) -> Result<(), DecodeError> {
    if buf.remaining() < needed {
        return Err(DecodeError::Truncated {
            field,
            needed,
            remaining: buf.remaining(),
        });
    }
    Ok(())
}
