//! # 编解码器对（Marshaller / Unmarshaller）
//!
//! ## 教案式概览
//! - **意图（Why）**：Handler 只面对领域类型；领域对象与原始字节之间的转换由注册时绑定的
//!   编解码器负责，分发层对具体格式一无所知；
//! - **契约（What）**：
//!   - [`Unmarshaller::unmarshal`] 在格式错误时返回 [`DecodeError`]；
//!   - [`Marshaller::marshal`] 在类型不受支持时返回 [`EncodeError`]；
//!   - 对编解码器承诺支持的任意值满足 `unmarshal(marshal(x)) == x`（值相等，不要求字节一致）；
//! - **实现（How）**：内置 [`JsonCodec`]（`serde_json`）、[`BytesCodec`]（透传）、
//!   [`Utf8Codec`]（文本）；任意闭包可经 [`unmarshaller_fn`] / [`marshaller_fn`] 适配。

use std::{fmt, marker::PhantomData};

use bytes::Bytes;
use serde::{Serialize, de::DeserializeOwned};

use crate::error::{DecodeError, EncodeError};

/// 字节 → 领域对象。
pub trait Unmarshaller<T>: Send + Sync + 'static {
    fn unmarshal(&self, data: &[u8]) -> Result<T, DecodeError>;
}

/// 领域对象 → 字节。
pub trait Marshaller<T>: Send + Sync + 'static {
    fn marshal(&self, value: &T) -> Result<Bytes, EncodeError>;
}

/// 基于 `serde_json` 的编解码器。
///
/// - **契约 (What)**：`T` 需同时实现 `Serialize` 与 `DeserializeOwned`；
///   解码失败时错误详情取自 `serde_json::Error` 的描述（包含行列号）。
pub struct JsonCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonCodec<T> {
    pub const NAME: &'static str = "json";

    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for JsonCodec<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> Copy for JsonCodec<T> {}

impl<T> fmt::Debug for JsonCodec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonCodec")
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}

impl<T> Unmarshaller<T> for JsonCodec<T>
where
    T: DeserializeOwned + 'static,
{
    fn unmarshal(&self, data: &[u8]) -> Result<T, DecodeError> {
        serde_json::from_slice(data)
            .map_err(|err| DecodeError::malformed(Self::NAME, err.to_string()))
    }
}

impl<T> Marshaller<T> for JsonCodec<T>
where
    T: Serialize + 'static,
{
    fn marshal(&self, value: &T) -> Result<Bytes, EncodeError> {
        serde_json::to_vec(value)
            .map(Bytes::from)
            .map_err(|err| EncodeError::new(Self::NAME, err.to_string()))
    }
}

/// 原样透传字节；解码时复制数据区，避免保留对信封的引用。
#[derive(Clone, Copy, Debug, Default)]
pub struct BytesCodec;

impl Unmarshaller<Bytes> for BytesCodec {
    fn unmarshal(&self, data: &[u8]) -> Result<Bytes, DecodeError> {
        Ok(Bytes::copy_from_slice(data))
    }
}

impl Marshaller<Bytes> for BytesCodec {
    fn marshal(&self, value: &Bytes) -> Result<Bytes, EncodeError> {
        Ok(value.clone())
    }
}

/// UTF-8 文本编解码器。
#[derive(Clone, Copy, Debug, Default)]
pub struct Utf8Codec;

impl Unmarshaller<String> for Utf8Codec {
    fn unmarshal(&self, data: &[u8]) -> Result<String, DecodeError> {
        std::str::from_utf8(data)
            .map(str::to_owned)
            .map_err(|_| DecodeError::InvalidUtf8 { field: "data" })
    }
}

impl Marshaller<String> for Utf8Codec {
    fn marshal(&self, value: &String) -> Result<Bytes, EncodeError> {
        Ok(Bytes::copy_from_slice(value.as_bytes()))
    }
}

/// 闭包形式的解码器，见 [`unmarshaller_fn`]。
#[derive(Clone, Copy)]
pub struct FnUnmarshaller<F>(F);

/// 闭包形式的编码器，见 [`marshaller_fn`]。
#[derive(Clone, Copy)]
pub struct FnMarshaller<F>(F);

/// 把 `Fn(&[u8]) -> Result<T, DecodeError>` 适配为 [`Unmarshaller`]。
pub fn unmarshaller_fn<T, F>(f: F) -> FnUnmarshaller<F>
where
    F: Fn(&[u8]) -> Result<T, DecodeError> + Send + Sync + 'static,
{
    FnUnmarshaller(f)
}

/// 把 `Fn(&T) -> Result<Bytes, EncodeError>` 适配为 [`Marshaller`]。
pub fn marshaller_fn<T, F>(f: F) -> FnMarshaller<F>
where
    F: Fn(&T) -> Result<Bytes, EncodeError> + Send + Sync + 'static,
{
    FnMarshaller(f)
}

impl<T, F> Unmarshaller<T> for FnUnmarshaller<F>
where
    F: Fn(&[u8]) -> Result<T, DecodeError> + Send + Sync + 'static,
{
    fn unmarshal(&self, data: &[u8]) -> Result<T, DecodeError> {
        (self.0)(data)
    }
}

impl<T, F> Marshaller<T> for FnMarshaller<F>
where
    F: Fn(&T) -> Result<Bytes, EncodeError> + Send + Sync + 'static,
{
    fn marshal(&self, value: &T) -> Result<Bytes, EncodeError> {
        (self.0)(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Order {
        sku: String,
        qty: u32,
    }

    #[test]
    fn json_rejects_malformed_input() {
        let codec = JsonCodec::<Order>::new();
        let err = codec.unmarshal(b"{\"sku\":").unwrap_err();
        assert!(matches!(err, DecodeError::Malformed { codec: "json", .. }));
    }

    #[test]
    fn utf8_codec_rejects_invalid_text() {
        assert_eq!(
            Utf8Codec.unmarshal(&[0xff, 0xfe]).unwrap_err(),
            DecodeError::InvalidUtf8 { field: "data" }
        );
    }

    #[test]
    fn closures_are_adapted() {
        let unmarshal = unmarshaller_fn(|data: &[u8]| {
            data.first()
                .copied()
                .ok_or_else(|| DecodeError::malformed("u8", "empty"))
        });
        let marshal = marshaller_fn(|value: &u8| Ok(Bytes::copy_from_slice(&[*value])));

        let bytes = marshal.marshal(&42u8).unwrap();
        let value: u8 = unmarshal.unmarshal(&bytes).unwrap();
        assert_eq!(value, 42);
        assert!(unmarshal.unmarshal(&[]).is_err());
    }

    proptest! {
        #[test]
        fn json_round_trip_preserves_value(sku in "[A-Z][0-9]{0,6}", qty in any::<u32>()) {
            let codec = JsonCodec::<Order>::new();
            let order = Order { sku, qty };
            let bytes = codec.marshal(&order).unwrap();
            prop_assert_eq!(codec.unmarshal(&bytes).unwrap(), order);
        }

        #[test]
        fn utf8_round_trip_preserves_value(text in ".*") {
            let bytes = Utf8Codec.marshal(&text).unwrap();
            prop_assert_eq!(Utf8Codec.unmarshal(&bytes).unwrap(), text);
        }
    }
}
