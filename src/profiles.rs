//! 指纹配置目录
//!
//! `BrowserProfile` 把一个浏览器家族的全部指纹维度捆绑为一条不可变记录：
//! TLS ClientHello、HTTP/2 Settings 与顺序、伪头顺序、默认头顺序与模板、
//! HPACK 索引策略、优先级行为、QUIC 传输参数、keep-alive 纪律。
//! 维度混搭本身就是一种指纹，因此注册时校验记录完整性，运行期不可变。

use crate::headers::{
    chrome_header_order, firefox_header_order, safari_header_order, HeaderTemplate,
};
use crate::http2_config::{
    chrome_header_priority, chrome_http2_settings, chrome_pseudo_header_order,
    firefox_header_priority, firefox_http2_settings, firefox_initial_priorities,
    firefox_pseudo_header_order, safari_http2_settings, safari_pseudo_header_order,
    HTTP2Priority, HTTP2PriorityParam, HTTP2Settings, HpackIndexingPolicy, PriorityTreeMode,
    CHROME_CONNECTION_FLOW, FIREFOX_CONNECTION_FLOW, SAFARI_CONNECTION_FLOW,
};
use crate::tls_config::{ClientHelloSpec, HelloParams};
use crate::tls_extensions::QuicTransportParametersExtension;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::time::Duration;

/// 浏览器家族
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BrowserFamily {
    Chrome,
    Firefox,
    Safari,
}

/// HTTP/1.1 keep-alive 纪律
#[derive(Debug, Clone)]
pub struct KeepAlivePolicy {
    /// 单连接最大请求数；0 表示请求完即关
    pub max_requests: usize,
    pub idle_timeout: Duration,
    /// 是否显式发送 `Connection: keep-alive`（HTTP/1.1 下 Chrome 依赖默认值）
    pub explicit_header: bool,
    /// 首个响应到达后是否预热第二条同源连接
    pub prewarm: bool,
}

impl KeepAlivePolicy {
    pub fn chrome() -> Self {
        Self {
            max_requests: 100,
            idle_timeout: Duration::from_secs(300),
            explicit_header: false,
            prewarm: true,
        }
    }

    pub fn firefox() -> Self {
        Self {
            max_requests: 100,
            idle_timeout: Duration::from_secs(115),
            explicit_header: true,
            prewarm: false,
        }
    }

    pub fn off() -> Self {
        Self {
            max_requests: 0,
            idle_timeout: Duration::ZERO,
            explicit_header: false,
            prewarm: false,
        }
    }
}

/// 把 u64 编为 QUIC varint 值字节
fn varint_value(v: u64) -> Vec<u8> {
    let mut data = Vec::new();
    QuicTransportParametersExtension::put_varint(&mut data, v);
    data
}

/// Chrome 的 QUIC 传输参数（线上顺序）
pub fn chrome_quic_params() -> Vec<(u64, Vec<u8>)> {
    vec![
        (0x01, varint_value(30000)),    // max_idle_timeout
        (0x03, varint_value(1472)),     // max_udp_payload_size
        (0x04, varint_value(15728640)), // initial_max_data
        (0x05, varint_value(6291456)),  // initial_max_stream_data_bidi_local
        (0x06, varint_value(6291456)),  // initial_max_stream_data_bidi_remote
        (0x07, varint_value(6291456)),  // initial_max_stream_data_uni
        (0x08, varint_value(100)),      // initial_max_streams_bidi
        (0x09, varint_value(103)),      // initial_max_streams_uni
        (0x20, varint_value(65536)),    // max_datagram_frame_size
    ]
}

/// Firefox 的 QUIC 传输参数（线上顺序）
pub fn firefox_quic_params() -> Vec<(u64, Vec<u8>)> {
    vec![
        (0x01, varint_value(30000)),
        (0x04, varint_value(25165824)),
        (0x05, varint_value(12582912)),
        (0x06, varint_value(1048576)),
        (0x07, varint_value(1048576)),
        (0x08, varint_value(16)),
        (0x09, varint_value(16)),
        (0x0e, varint_value(8)), // active_connection_id_limit
    ]
}

/// Safari 的 QUIC 传输参数（线上顺序）
pub fn safari_quic_params() -> Vec<(u64, Vec<u8>)> {
    vec![
        (0x01, varint_value(30000)),
        (0x04, varint_value(2097152)),
        (0x05, varint_value(2097152)),
        (0x08, varint_value(100)),
        (0x09, varint_value(100)),
    ]
}

/// 一条完整的浏览器指纹记录
#[derive(Debug, Clone)]
pub struct BrowserProfile {
    pub name: &'static str,
    pub browser: BrowserFamily,
    /// TLS ClientHello 工厂（逐次握手调用，密钥份额与 GREASE 每次新生成）
    pub spec_factory: fn(&HelloParams) -> ClientHelloSpec,
    /// HTTP/2 Settings 值表与发送顺序（未列出的键不得发送）
    pub http2_settings: HTTP2Settings,
    pub http2_settings_order: Vec<u16>,
    /// 连接级 WINDOW_UPDATE 增量
    pub connection_flow: u32,
    pub pseudo_header_order: Vec<String>,
    /// 默认请求头顺序（小写名）
    pub header_order: Vec<String>,
    pub hpack_policy: HpackIndexingPolicy,
    /// HEADERS 帧携带的优先级
    pub header_priority: HTTP2PriorityParam,
    pub priority_tree_mode: PriorityTreeMode,
    /// 建连时发送的 PRIORITY 帧（Chrome、Safari 为空）
    pub initial_priorities: Vec<HTTP2Priority>,
    /// QUIC 传输参数（线上顺序）
    pub quic_params: Vec<(u64, Vec<u8>)>,
    pub header_template: HeaderTemplate,
    pub keep_alive: KeepAlivePolicy,
    /// 无 ECH 配置时是否发送 GREASE ECH
    pub grease_ech: bool,
    /// 是否允许 0-RTT
    pub zero_rtt: bool,
}

impl BrowserProfile {
    /// 校验记录是否覆盖全部指纹维度；不完整的 profile 拒绝注册
    fn validate(&self) -> Result<(), String> {
        if self.http2_settings_order.is_empty() {
            return Err(format!("{}: HTTP/2 settings 顺序为空", self.name));
        }
        for id in &self.http2_settings_order {
            if !self.http2_settings.contains_key(id) {
                return Err(format!(
                    "{}: settings 顺序引用了未声明的键 {}",
                    self.name, id
                ));
            }
        }
        if self.http2_settings.len() != self.http2_settings_order.len() {
            return Err(format!("{}: settings 值表与顺序长度不一致", self.name));
        }
        if self.pseudo_header_order.len() != 4 {
            return Err(format!("{}: 伪头顺序必须是 4 项", self.name));
        }
        if self.header_order.is_empty() {
            return Err(format!("{}: 默认头顺序为空", self.name));
        }
        if self.connection_flow == 0 {
            return Err(format!("{}: 连接流控增量缺失", self.name));
        }
        if self.quic_params.is_empty() {
            return Err(format!("{}: QUIC 传输参数缺失", self.name));
        }
        if self.header_template.user_agent.is_empty() {
            return Err(format!("{}: User-Agent 缺失", self.name));
        }
        Ok(())
    }

    pub fn user_agent(&self) -> &str {
        &self.header_template.user_agent
    }
}

fn chrome_143() -> BrowserProfile {
    let (settings, order) = chrome_http2_settings();
    BrowserProfile {
        name: "chrome-143",
        browser: BrowserFamily::Chrome,
        spec_factory: ClientHelloSpec::chrome_143,
        http2_settings: settings,
        http2_settings_order: order,
        connection_flow: CHROME_CONNECTION_FLOW,
        pseudo_header_order: chrome_pseudo_header_order(),
        header_order: chrome_header_order(),
        hpack_policy: HpackIndexingPolicy::ChromeLike,
        header_priority: chrome_header_priority(),
        priority_tree_mode: PriorityTreeMode::Chrome,
        initial_priorities: Vec::new(),
        quic_params: chrome_quic_params(),
        header_template: HeaderTemplate::chrome_143(),
        keep_alive: KeepAlivePolicy::chrome(),
        grease_ech: true,
        zero_rtt: true,
    }
}

fn chrome_131() -> BrowserProfile {
    let mut profile = chrome_143();
    profile.name = "chrome-131";
    profile.header_template = HeaderTemplate::chrome_131();
    profile
}

fn firefox_135() -> BrowserProfile {
    let (settings, order) = firefox_http2_settings();
    BrowserProfile {
        name: "firefox-135",
        browser: BrowserFamily::Firefox,
        spec_factory: ClientHelloSpec::firefox_135,
        http2_settings: settings,
        http2_settings_order: order,
        connection_flow: FIREFOX_CONNECTION_FLOW,
        pseudo_header_order: firefox_pseudo_header_order(),
        header_order: firefox_header_order(),
        hpack_policy: HpackIndexingPolicy::Always,
        header_priority: firefox_header_priority(),
        priority_tree_mode: PriorityTreeMode::Firefox,
        initial_priorities: firefox_initial_priorities(),
        quic_params: firefox_quic_params(),
        header_template: HeaderTemplate::firefox_135(),
        keep_alive: KeepAlivePolicy::firefox(),
        grease_ech: true,
        zero_rtt: false,
    }
}

fn safari_18() -> BrowserProfile {
    let (settings, order) = safari_http2_settings();
    BrowserProfile {
        name: "safari-18",
        browser: BrowserFamily::Safari,
        spec_factory: ClientHelloSpec::safari_18,
        http2_settings: settings,
        http2_settings_order: order,
        connection_flow: SAFARI_CONNECTION_FLOW,
        pseudo_header_order: safari_pseudo_header_order(),
        header_order: safari_header_order(),
        hpack_policy: HpackIndexingPolicy::Never,
        header_priority: HTTP2PriorityParam::new(254, 0, false),
        priority_tree_mode: PriorityTreeMode::Off,
        initial_priorities: Vec::new(),
        quic_params: safari_quic_params(),
        header_template: HeaderTemplate::safari_18(),
        keep_alive: KeepAlivePolicy::chrome(),
        grease_ech: false,
        zero_rtt: false,
    }
}

/// 全部内建 profile，进程启动时构建一次
static PROFILES: Lazy<HashMap<&'static str, BrowserProfile>> = Lazy::new(|| {
    let mut map = HashMap::new();
    for profile in [chrome_143(), chrome_131(), firefox_135(), safari_18()] {
        if let Err(e) = profile.validate() {
            // 内建表出错属于构建缺陷，启动即暴露
            panic!("profile 校验失败: {}", e);
        }
        map.insert(profile.name, profile);
    }
    map
});

/// 列出全部 profile 名称（按字典序）
pub fn list() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = PROFILES.keys().copied().collect();
    names.sort_unstable();
    names
}

/// 按名称取 profile
pub fn get(name: &str) -> Option<&'static BrowserProfile> {
    PROFILES.get(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_contains_builtin_profiles() {
        let names = list();
        assert!(names.contains(&"chrome-143"));
        assert!(names.contains(&"chrome-131"));
        assert!(names.contains(&"firefox-135"));
        assert!(names.contains(&"safari-18"));
    }

    #[test]
    fn test_get_unknown_profile() {
        assert!(get("netscape-4").is_none());
    }

    #[test]
    fn test_all_profiles_complete() {
        for name in list() {
            let profile = get(name).unwrap();
            assert!(profile.validate().is_ok(), "{} 不完整", name);
        }
    }

    #[test]
    fn test_chrome_143_reference_values() {
        let profile = get("chrome-143").unwrap();
        assert_eq!(profile.http2_settings_order, vec![1, 2, 4, 6]);
        assert_eq!(profile.connection_flow, 15663105);
        assert_eq!(
            profile.pseudo_header_order,
            vec![":method", ":authority", ":scheme", ":path"]
        );
        assert_eq!(profile.header_priority.weight, 255);
        assert!(profile.header_priority.exclusive);
        assert!(profile.initial_priorities.is_empty());
    }

    #[test]
    fn test_incomplete_profile_rejected() {
        let mut profile = chrome_143();
        profile.http2_settings_order.push(3); // 引用未声明的键
        assert!(profile.validate().is_err());

        let mut profile = chrome_143();
        profile.quic_params.clear();
        assert!(profile.validate().is_err());
    }
}
