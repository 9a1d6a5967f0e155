//! 传输边界：入站信封的只读视图。
//!
//! # 教案式说明
//! - **意图（Why）**：分发层只读取信封的两段字节区，不关心帧格式与切片实现；
//!   以 trait 暴露只读视图，传输层可以直接把自己的帧对象交进来而无需复制；
//! - **契约（What）**：`metadata()` 与 `data()` 返回逻辑上互不重叠的两段字节，调用期间保持不变；
//!   分发层在解码完成后不会保留任何指向信封字节的引用；
//! - **实现（How）**：[`Payload`] 是基于 [`bytes::Bytes`] 的默认实现，克隆与切片均为引用计数操作。

use bytes::Bytes;
use futures::stream::BoxStream;

/// 入站信封的只读视图。
pub trait Envelope: Send + Sync {
    /// 元数据区。
    fn metadata(&self) -> &[u8];

    /// 数据区。
    fn data(&self) -> &[u8];
}

/// 基于 `Bytes` 的默认信封实现。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Payload {
    metadata: Bytes,
    data: Bytes,
}

impl Payload {
    pub fn new(metadata: impl Into<Bytes>, data: impl Into<Bytes>) -> Self {
        Self {
            metadata: metadata.into(),
            data: data.into(),
        }
    }

    /// 仅携带数据区的信封，常见于 request-channel 的后续帧。
    pub fn from_data(data: impl Into<Bytes>) -> Self {
        Self {
            metadata: Bytes::new(),
            data: data.into(),
        }
    }

    /// 元数据区的共享句柄。
    pub fn metadata_bytes(&self) -> &Bytes {
        &self.metadata
    }

    /// 数据区的共享句柄。
    pub fn data_bytes(&self) -> &Bytes {
        &self.data
    }

    pub fn into_parts(self) -> (Bytes, Bytes) {
        (self.metadata, self.data)
    }
}

impl Envelope for Payload {
    fn metadata(&self) -> &[u8] {
        &self.metadata
    }

    fn data(&self) -> &[u8] {
        &self.data
    }
}

/// request-channel 的入站信封序列。
pub type PayloadStream = BoxStream<'static, Payload>;
