//! # cloakhttp
//!
//! 浏览器伪装 HTTPS 客户端库。出站 HTTP/1.1、HTTP/2、HTTP/3 请求的线上
//! 字节形态（TLS ClientHello 布局、HTTP/2 SETTINGS 顺序与取值、HPACK
//! 索引选择、QUIC 传输参数、逐请求头顺序）与目标浏览器不可区分。
//!
//! ## 特性
//!
//! - ✅ **全维度指纹记录**：TLS、HTTP/2、HTTP/3、请求头模板来自同一浏览器家族，禁止混搭
//! - ✅ **TLS ClientHello 构造**：密码套件顺序、扩展顺序、GREASE 位置、填充逐字节对齐
//! - ✅ **真实 / GREASE ECH**：HTTPS (type 65) 记录获取 ECHConfig，无配置时按家族发 GREASE
//! - ✅ **HTTP/2 手工编帧**：SETTINGS 只发 profile 声明的键并保序、连接级 WINDOW_UPDATE、
//!   伪头顺序、HEADERS 优先级、初始 PRIORITY 树
//! - ✅ **HPACK 索引策略**：连接级动态表单调前进，Chrome 形态 / 全不索引 / 全索引 / 自定义
//! - ✅ **HTTP/3**：QUIC 传输参数按 profile 顺序下发，0-RTT 按票据与 profile 判定
//! - ✅ **多协议连接池**：每源能力三态记忆、H3 先行竞速拨号、类型化失败才降级
//! - ✅ **RFC 6265 Cookie**：host-only / 前导点域、路径边界匹配、Secure 通道约束
//! - ✅ **会话快照**：带版本 JSON（cookie、TLS 票据、ECH 配置），v4 自动迁移
//! - ✅ **页面预热**：子资源发现、Chrome 节奏的批次与并发上限
//!
//! ## 快速开始
//!
//! ```rust,no_run
//! use cloakhttp::{HttpRequest, Session, SessionConfig};
//!
//! # async fn run() -> cloakhttp::Result<()> {
//! let session = Session::new("chrome-143", SessionConfig::default())?;
//! let (response, _request) = session.execute(HttpRequest::get("https://example.test/")).await?;
//! println!("{} via {}", response.status_code, response.protocol);
//! # Ok(())
//! # }
//! ```

pub mod dicttls;
pub mod dns;
pub mod error;
pub mod headers;
pub mod http2_config;
pub mod http_client;
pub mod profiles;
pub mod tls_config;
pub mod tls_extensions;

pub use error::{
    BodyError, CloakError, ConnectionError, HandshakeError, PolicyError, Result, StreamError,
};
pub use headers::{HeaderTemplate, SubresourceType};
pub use http2_config::{
    akamai_fingerprint, chrome_http2_settings, chrome_pseudo_header_order,
    firefox_http2_settings, firefox_pseudo_header_order, safari_http2_settings,
    safari_pseudo_header_order, HTTP2Priority, HTTP2PriorityParam, HTTP2SettingID, HTTP2Settings,
    HpackIndexing, HpackIndexingPolicy, PriorityTreeMode,
};
pub use http_client::{
    Capability, ConnectionPool, Cookie, CookieJar, FetchMode, HttpMethod, HttpRequest,
    HttpResponse, Origin, Protocol, ProtocolSupport, SameSite, Session, SessionConfig,
    TlsSessionCache, WarmupPlanner, WarmupReport,
};
pub use profiles::{BrowserFamily, BrowserProfile, KeepAlivePolicy};
pub use tls_config::{
    filter_grease_values, is_grease_value, ClientHelloSpec, EchOffer, GreasePolicy, HelloParams,
    Ja4Fingerprint, ParsedClientHello, PskOffer, TransportMode, TLS_GREASE_VALUES,
};
pub use tls_extensions::{TLSExtension, QUIC_FORBIDDEN_EXTENSIONS};

/// 列出全部可用的 profile 名称
pub fn available_profiles() -> Vec<&'static str> {
    profiles::list()
}
