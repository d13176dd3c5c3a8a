//! HTTP/2 指纹配置模块
//!
//! 提供 HTTP/2 Settings（带顺序）、Pseudo Header 顺序、连接级流控增量、
//! HEADERS 优先级、初始 PRIORITY 帧与 HPACK 索引策略。
//! 这些维度合起来构成 Akamai 风格的 HTTP/2 指纹。

use std::collections::HashMap;

/// HTTP/2 Setting ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HTTP2SettingID {
    HeaderTableSize = 1,
    EnablePush = 2,
    MaxConcurrentStreams = 3,
    InitialWindowSize = 4,
    MaxFrameSize = 5,
    MaxHeaderListSize = 6,
    EnableConnectProtocol = 8,
    NoRfc7540Priorities = 9,
}

impl HTTP2SettingID {
    pub fn as_u16(&self) -> u16 {
        *self as u16
    }
}

/// HTTP/2 Settings 值表
pub type HTTP2Settings = HashMap<u16, u32>;

/// HEADERS 帧携带的优先级参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HTTP2PriorityParam {
    /// 线上值 = weight - 1（0 表示 weight 1，255 表示 weight 256）
    pub weight: u8,
    pub stream_dependency: u32,
    pub exclusive: bool,
}

impl HTTP2PriorityParam {
    pub fn new(weight: u8, stream_dependency: u32, exclusive: bool) -> Self {
        Self {
            weight,
            stream_dependency,
            exclusive,
        }
    }
}

/// 连接建立后立即发送的 PRIORITY 帧
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HTTP2Priority {
    pub stream_id: u32,
    pub exclusive: bool,
    pub depends_on: u32,
    pub weight: u8,
}

/// 流优先级树形态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriorityTreeMode {
    /// Chrome：优先级通过 HEADERS 帧携带，不发独立 PRIORITY 帧
    Chrome,
    /// Firefox：连接建立时构建 6 个占位流的优先级树
    Firefox,
    Off,
}

/// HPACK 字段表示形式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HpackIndexing {
    /// 增量索引（写入动态表）
    Incremental,
    /// 字面量，不索引
    WithoutIndexing,
    /// 字面量，永不索引（中间设备也不得缓存）
    NeverIndexed,
}

/// Chrome 对敏感头使用 NeverIndexed
const CHROME_SENSITIVE_HEADERS: &[&str] = &[
    "cookie",
    "authorization",
    "proxy-authorization",
    "set-cookie",
];

/// Chrome 对稳定的短头使用增量索引
const CHROME_INCREMENTAL_ALLOWLIST: &[&str] = &[
    "user-agent",
    "accept",
    "accept-encoding",
    "accept-language",
    "cache-control",
    "pragma",
    "upgrade-insecure-requests",
    "sec-ch-ua",
    "sec-ch-ua-mobile",
    "sec-ch-ua-platform",
    "sec-fetch-site",
    "sec-fetch-mode",
    "sec-fetch-user",
    "sec-fetch-dest",
    "priority",
];

/// HPACK 索引策略
#[derive(Clone)]
pub enum HpackIndexingPolicy {
    /// Chrome 形态：敏感头 NeverIndexed，允许表内增量索引，其余不索引
    ChromeLike,
    /// 全部字面量不索引
    Never,
    /// 全部增量索引
    Always,
    /// 按头名的自定义谓词
    Custom(fn(&str) -> HpackIndexing),
}

impl std::fmt::Debug for HpackIndexingPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ChromeLike => write!(f, "ChromeLike"),
            Self::Never => write!(f, "Never"),
            Self::Always => write!(f, "Always"),
            Self::Custom(_) => write!(f, "Custom"),
        }
    }
}

impl HpackIndexingPolicy {
    /// 决定某个头（名字已小写）的表示形式
    pub fn indexing_for(&self, name: &str) -> HpackIndexing {
        match self {
            Self::ChromeLike => {
                if CHROME_SENSITIVE_HEADERS.contains(&name) {
                    HpackIndexing::NeverIndexed
                } else if CHROME_INCREMENTAL_ALLOWLIST.contains(&name) || name.starts_with(':') {
                    HpackIndexing::Incremental
                } else {
                    HpackIndexing::WithoutIndexing
                }
            }
            Self::Never => HpackIndexing::WithoutIndexing,
            Self::Always => HpackIndexing::Incremental,
            Self::Custom(f) => f(name),
        }
    }
}

/// Chrome 的 HTTP/2 Settings
///
/// 注意：Chrome 不发送 MAX_CONCURRENT_STREAMS，该键的缺席本身是指纹的一部分。
pub fn chrome_http2_settings() -> (HTTP2Settings, Vec<u16>) {
    let mut settings = HashMap::new();
    settings.insert(HTTP2SettingID::HeaderTableSize.as_u16(), 65536);
    settings.insert(HTTP2SettingID::EnablePush.as_u16(), 0);
    settings.insert(HTTP2SettingID::InitialWindowSize.as_u16(), 6291456);
    settings.insert(HTTP2SettingID::MaxHeaderListSize.as_u16(), 262144);

    let settings_order = vec![
        HTTP2SettingID::HeaderTableSize.as_u16(),
        HTTP2SettingID::EnablePush.as_u16(),
        HTTP2SettingID::InitialWindowSize.as_u16(),
        HTTP2SettingID::MaxHeaderListSize.as_u16(),
    ];

    (settings, settings_order)
}

/// Firefox 的 HTTP/2 Settings
pub fn firefox_http2_settings() -> (HTTP2Settings, Vec<u16>) {
    let mut settings = HashMap::new();
    settings.insert(HTTP2SettingID::HeaderTableSize.as_u16(), 65536);
    settings.insert(HTTP2SettingID::InitialWindowSize.as_u16(), 131072);
    settings.insert(HTTP2SettingID::MaxFrameSize.as_u16(), 16384);

    let settings_order = vec![
        HTTP2SettingID::HeaderTableSize.as_u16(),
        HTTP2SettingID::InitialWindowSize.as_u16(),
        HTTP2SettingID::MaxFrameSize.as_u16(),
    ];

    (settings, settings_order)
}

/// Safari 的 HTTP/2 Settings
pub fn safari_http2_settings() -> (HTTP2Settings, Vec<u16>) {
    let mut settings = HashMap::new();
    settings.insert(HTTP2SettingID::EnablePush.as_u16(), 0);
    settings.insert(HTTP2SettingID::InitialWindowSize.as_u16(), 2097152);
    settings.insert(HTTP2SettingID::MaxConcurrentStreams.as_u16(), 100);

    let settings_order = vec![
        HTTP2SettingID::EnablePush.as_u16(),
        HTTP2SettingID::InitialWindowSize.as_u16(),
        HTTP2SettingID::MaxConcurrentStreams.as_u16(),
    ];

    (settings, settings_order)
}

/// Chrome 的 Pseudo Header 顺序
pub fn chrome_pseudo_header_order() -> Vec<String> {
    vec![
        ":method".to_string(),
        ":authority".to_string(),
        ":scheme".to_string(),
        ":path".to_string(),
    ]
}

/// Firefox 的 Pseudo Header 顺序
pub fn firefox_pseudo_header_order() -> Vec<String> {
    vec![
        ":method".to_string(),
        ":path".to_string(),
        ":authority".to_string(),
        ":scheme".to_string(),
    ]
}

/// Safari 的 Pseudo Header 顺序
pub fn safari_pseudo_header_order() -> Vec<String> {
    vec![
        ":method".to_string(),
        ":scheme".to_string(),
        ":path".to_string(),
        ":authority".to_string(),
    ]
}

/// Chrome 的连接级 WINDOW_UPDATE 增量
pub const CHROME_CONNECTION_FLOW: u32 = 15663105;

/// Firefox 的连接级 WINDOW_UPDATE 增量
pub const FIREFOX_CONNECTION_FLOW: u32 = 12517377;

/// Safari 的连接级 WINDOW_UPDATE 增量
pub const SAFARI_CONNECTION_FLOW: u32 = 10485760;

/// Chrome 的 HEADERS 优先级（线上 weight = 256）
pub fn chrome_header_priority() -> HTTP2PriorityParam {
    HTTP2PriorityParam::new(255, 0, true)
}

/// Firefox 的 HEADERS 优先级
pub fn firefox_header_priority() -> HTTP2PriorityParam {
    HTTP2PriorityParam::new(41, 13, false)
}

/// Firefox 建连时的优先级树（6 个占位流）
pub fn firefox_initial_priorities() -> Vec<HTTP2Priority> {
    vec![
        HTTP2Priority { stream_id: 3, exclusive: false, depends_on: 0, weight: 200 },
        HTTP2Priority { stream_id: 5, exclusive: false, depends_on: 0, weight: 100 },
        HTTP2Priority { stream_id: 7, exclusive: false, depends_on: 0, weight: 0 },
        HTTP2Priority { stream_id: 9, exclusive: false, depends_on: 7, weight: 0 },
        HTTP2Priority { stream_id: 11, exclusive: false, depends_on: 3, weight: 0 },
        HTTP2Priority { stream_id: 13, exclusive: false, depends_on: 0, weight: 240 },
    ]
}

/// Akamai 风格的 HTTP/2 指纹字符串
///
/// 形如 `1:65536;2:0;4:6291456;6:262144|15663105|0|m,a,s,p`
pub fn akamai_fingerprint(
    settings: &HTTP2Settings,
    settings_order: &[u16],
    connection_flow: u32,
    priorities: &[HTTP2Priority],
    pseudo_header_order: &[String],
) -> String {
    let settings_part = settings_order
        .iter()
        .filter_map(|id| settings.get(id).map(|v| format!("{}:{}", id, v)))
        .collect::<Vec<_>>()
        .join(";");

    let priority_part = if priorities.is_empty() {
        "0".to_string()
    } else {
        priorities
            .iter()
            .map(|p| {
                format!(
                    "{}:{}:{}:{}",
                    p.stream_id,
                    u8::from(p.exclusive),
                    p.depends_on,
                    p.weight
                )
            })
            .collect::<Vec<_>>()
            .join(",")
    };

    let pseudo_part = pseudo_header_order
        .iter()
        .filter_map(|h| h.strip_prefix(':').and_then(|s| s.chars().next()))
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(",");

    format!(
        "{}|{}|{}|{}",
        settings_part, connection_flow, priority_part, pseudo_part
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chrome_settings_omit_max_concurrent_streams() {
        let (settings, order) = chrome_http2_settings();
        assert_eq!(order, vec![1, 2, 4, 6]);
        assert!(!settings.contains_key(&HTTP2SettingID::MaxConcurrentStreams.as_u16()));
        assert_eq!(settings[&1], 65536);
        assert_eq!(settings[&4], 6291456);
    }

    #[test]
    fn test_akamai_fingerprint_chrome() {
        let (settings, order) = chrome_http2_settings();
        let fp = akamai_fingerprint(
            &settings,
            &order,
            CHROME_CONNECTION_FLOW,
            &[],
            &chrome_pseudo_header_order(),
        );
        assert_eq!(fp, "1:65536;2:0;4:6291456;6:262144|15663105|0|m,a,s,p");
    }

    #[test]
    fn test_chrome_indexing_policy() {
        let policy = HpackIndexingPolicy::ChromeLike;
        assert_eq!(policy.indexing_for("cookie"), HpackIndexing::NeverIndexed);
        assert_eq!(policy.indexing_for("user-agent"), HpackIndexing::Incremental);
        assert_eq!(policy.indexing_for(":path"), HpackIndexing::Incremental);
        assert_eq!(
            policy.indexing_for("x-custom-header"),
            HpackIndexing::WithoutIndexing
        );
    }

    #[test]
    fn test_never_and_always_policies() {
        assert_eq!(
            HpackIndexingPolicy::Never.indexing_for("user-agent"),
            HpackIndexing::WithoutIndexing
        );
        assert_eq!(
            HpackIndexingPolicy::Always.indexing_for("x-anything"),
            HpackIndexing::Incremental
        );
    }

    #[test]
    fn test_firefox_priority_tree() {
        let priorities = firefox_initial_priorities();
        assert_eq!(priorities.len(), 6);
        assert_eq!(priorities[0].stream_id, 3);
        assert_eq!(priorities[3].depends_on, 7);
    }
}
