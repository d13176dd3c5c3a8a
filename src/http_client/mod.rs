//! HTTP 客户端模块
//!
//! 把指纹配置落到三个协议栈上的客户端实现：
//! - 按 profile 顺序发送头的 HTTP/1.1；
//! - 手工编帧的 HTTP/2（Settings 顺序、HPACK 索引策略、优先级全部可控）；
//! - quinn + h3 的 HTTP/3（QUIC 传输参数按 profile 顺序下发）。
//!
//! 跨请求状态（Cookie、TLS 票据、ECH 配置、协议能力）集中在 `Session`。

pub mod cookie;
pub mod hpack;
pub mod http1;
pub mod http2;
pub mod http3;
pub mod pool;
pub mod request;
pub mod response;
pub mod session;
pub mod session_cache;
pub mod tls;
pub mod warmup;

pub use cookie::{Cookie, CookieJar, SameSite};
pub use pool::{Capability, ConnectionPool, ProtocolSupport};
pub use request::{FetchMode, HttpMethod, HttpRequest};
pub use response::HttpResponse;
pub use session::{Session, SessionConfig};
pub use session_cache::TlsSessionCache;
pub use warmup::{WarmupPlanner, WarmupReport};

use std::fmt;

/// 协商出的应用协议
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    H1,
    H2,
    H3,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::H1 => "h1",
            Protocol::H2 => "h2",
            Protocol::H3 => "h3",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 源：(scheme, host, port) 三元组
///
/// 协议能力缓存与连接池都以它为键。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Origin {
    pub scheme: String,
    pub host: String,
    pub port: u16,
}

impl Origin {
    pub fn new(scheme: &str, host: &str, port: u16) -> Self {
        Self {
            scheme: scheme.to_lowercase(),
            host: host.to_lowercase(),
            port,
        }
    }

    /// 从 URL 提取源
    pub fn from_url(url: &url::Url) -> Option<Self> {
        let host = url.host_str()?;
        let port = url.port_or_known_default()?;
        Some(Self::new(url.scheme(), host, port))
    }

    pub fn is_https(&self) -> bool {
        self.scheme == "https"
    }

    /// 连接键 `host:port`
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_origin_from_url() {
        let url = url::Url::parse("https://Example.Test/page").unwrap();
        let origin = Origin::from_url(&url).unwrap();
        assert_eq!(origin.scheme, "https");
        assert_eq!(origin.host, "example.test");
        assert_eq!(origin.port, 443);

        let url = url::Url::parse("http://example.test:8080/").unwrap();
        let origin = Origin::from_url(&url).unwrap();
        assert_eq!(origin.port, 8080);
        assert!(!origin.is_https());
    }

    #[test]
    fn test_protocol_tags() {
        assert_eq!(Protocol::H1.as_str(), "h1");
        assert_eq!(Protocol::H2.as_str(), "h2");
        assert_eq!(Protocol::H3.as_str(), "h3");
    }
}
