//! 路由键。
//!
//! 路由是注册表内唯一标识 Handler 的不可变字符串；生成的服务桩使用 `"{service}.{method}"`
//! 的命名约定，例如 `"io.example.Orders.create"`。

use std::{borrow::Borrow, fmt, ops::Deref, sync::Arc};

/// 不可变、可廉价克隆的路由键。
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Route(Arc<str>);

impl Route {
    pub fn new(route: impl Into<Arc<str>>) -> Self {
        Self(route.into())
    }

    /// 按 `"{service}.{method}"` 约定拼接路由。
    pub fn for_method(service: &str, method: &str) -> Self {
        Self(Arc::from(format!("{service}.{method}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Deref for Route {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Route {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Route {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Route {
    fn from(value: &str) -> Self {
        Self(Arc::from(value))
    }
}

impl From<String> for Route {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

impl From<Arc<str>> for Route {
    fn from(value: Arc<str>) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn for_method_joins_service_and_method() {
        let route = Route::for_method("io.example.Orders", "create");
        assert_eq!(route.as_str(), "io.example.Orders.create");
        assert_eq!(route, Route::from("io.example.Orders.create"));
    }
}
