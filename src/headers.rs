//! HTTP 请求头模板模块
//!
//! 提供各 profile 的默认请求头（值与顺序），以及子资源请求按类型
//! 确定的 Accept / Sec-Fetch-* / Priority 值表。

/// 常见 Accept-Language 值（按使用频率排序）
pub static LANGUAGES: &[&str] = &[
    "en-US,en;q=0.9",
    "zh-CN,zh;q=0.9,en;q=0.8",
    "es-ES,es;q=0.9,en;q=0.8",
    "fr-FR,fr;q=0.9,en;q=0.8",
    "de-DE,de;q=0.9,en;q=0.8",
    "ja-JP,ja;q=0.9,en;q=0.8",
    "pt-BR,pt;q=0.9,en;q=0.8",
    "ru-RU,ru;q=0.9,en;q=0.8",
    "ko-KR,ko;q=0.9,en;q=0.8",
    "it-IT,it;q=0.9,en;q=0.8",
];

/// 随机选择一个 Accept-Language
pub fn random_language() -> &'static str {
    use rand::Rng;
    LANGUAGES[rand::thread_rng().gen_range(0..LANGUAGES.len())]
}

/// 默认请求头模板
///
/// 字段值与 `header_order`（存于 profile）共同决定导航请求的线上形态。
#[derive(Debug, Clone)]
pub struct HeaderTemplate {
    pub user_agent: String,
    pub accept: String,
    pub accept_language: String,
    pub accept_encoding: String,
    /// Sec-CH-UA 族（Chromium 系特有；其他浏览器为空）
    pub sec_ch_ua: String,
    pub sec_ch_ua_mobile: String,
    pub sec_ch_ua_platform: String,
    pub upgrade_insecure_requests: String,
    /// Sec-Fetch 族默认值（导航请求）
    pub sec_fetch_site: String,
    pub sec_fetch_mode: String,
    pub sec_fetch_user: String,
    pub sec_fetch_dest: String,
    /// Priority 头（Chrome 124+ 发送）
    pub priority: String,
}

impl HeaderTemplate {
    /// Chrome 143 (Windows) 模板
    pub fn chrome_143() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/143.0.0.0 Safari/537.36"
                .to_string(),
            accept: "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,\
                     image/webp,image/apng,*/*;q=0.8,application/signed-exchange;v=b3;q=0.7"
                .to_string(),
            accept_language: "en-US,en;q=0.9".to_string(),
            accept_encoding: "gzip, deflate, br, zstd".to_string(),
            sec_ch_ua: "\"Google Chrome\";v=\"143\", \"Chromium\";v=\"143\", \
                        \"Not_A-Brand\";v=\"24\""
                .to_string(),
            sec_ch_ua_mobile: "?0".to_string(),
            sec_ch_ua_platform: "\"Windows\"".to_string(),
            upgrade_insecure_requests: "1".to_string(),
            sec_fetch_site: "none".to_string(),
            sec_fetch_mode: "navigate".to_string(),
            sec_fetch_user: "?1".to_string(),
            sec_fetch_dest: "document".to_string(),
            priority: "u=0, i".to_string(),
        }
    }

    /// Chrome 131 (Windows) 模板
    pub fn chrome_131() -> Self {
        let mut template = Self::chrome_143();
        template.user_agent = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                               (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36"
            .to_string();
        template.sec_ch_ua = "\"Google Chrome\";v=\"131\", \"Chromium\";v=\"131\", \
                              \"Not_A Brand\";v=\"24\""
            .to_string();
        template
    }

    /// Firefox 135 (Windows) 模板
    pub fn firefox_135() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:135.0) \
                         Gecko/20100101 Firefox/135.0"
                .to_string(),
            accept: "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,\
                     image/webp,image/png,image/svg+xml,*/*;q=0.8"
                .to_string(),
            accept_language: "en-US,en;q=0.5".to_string(),
            accept_encoding: "gzip, deflate, br, zstd".to_string(),
            sec_ch_ua: String::new(),
            sec_ch_ua_mobile: String::new(),
            sec_ch_ua_platform: String::new(),
            upgrade_insecure_requests: "1".to_string(),
            sec_fetch_site: "none".to_string(),
            sec_fetch_mode: "navigate".to_string(),
            sec_fetch_user: "?1".to_string(),
            sec_fetch_dest: "document".to_string(),
            priority: "u=0, i".to_string(),
        }
    }

    /// Safari 18 (macOS) 模板
    pub fn safari_18() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
                         AppleWebKit/605.1.15 (KHTML, like Gecko) Version/18.0 Safari/605.1.15"
                .to_string(),
            accept: "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8".to_string(),
            accept_language: "en-US,en;q=0.9".to_string(),
            accept_encoding: "gzip, deflate, br".to_string(),
            sec_ch_ua: String::new(),
            sec_ch_ua_mobile: String::new(),
            sec_ch_ua_platform: String::new(),
            upgrade_insecure_requests: String::new(),
            sec_fetch_site: "none".to_string(),
            sec_fetch_mode: "navigate".to_string(),
            sec_fetch_user: String::new(),
            sec_fetch_dest: "document".to_string(),
            priority: String::new(),
        }
    }

    /// 按头名取模板值（名字为小写）；空值表示该浏览器不发送此头
    pub fn value_for(&self, name: &str) -> Option<&str> {
        let value = match name {
            "user-agent" => &self.user_agent,
            "accept" => &self.accept,
            "accept-language" => &self.accept_language,
            "accept-encoding" => &self.accept_encoding,
            "sec-ch-ua" => &self.sec_ch_ua,
            "sec-ch-ua-mobile" => &self.sec_ch_ua_mobile,
            "sec-ch-ua-platform" => &self.sec_ch_ua_platform,
            "upgrade-insecure-requests" => &self.upgrade_insecure_requests,
            "sec-fetch-site" => &self.sec_fetch_site,
            "sec-fetch-mode" => &self.sec_fetch_mode,
            "sec-fetch-user" => &self.sec_fetch_user,
            "sec-fetch-dest" => &self.sec_fetch_dest,
            "priority" => &self.priority,
            _ => return None,
        };
        if value.is_empty() {
            None
        } else {
            Some(value)
        }
    }
}

/// Chrome 导航请求的默认头顺序
pub fn chrome_header_order() -> Vec<String> {
    [
        "sec-ch-ua",
        "sec-ch-ua-mobile",
        "sec-ch-ua-platform",
        "upgrade-insecure-requests",
        "user-agent",
        "accept",
        "sec-fetch-site",
        "sec-fetch-mode",
        "sec-fetch-user",
        "sec-fetch-dest",
        "accept-encoding",
        "accept-language",
        "cookie",
        "priority",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Firefox 导航请求的默认头顺序
pub fn firefox_header_order() -> Vec<String> {
    [
        "user-agent",
        "accept",
        "accept-language",
        "accept-encoding",
        "upgrade-insecure-requests",
        "sec-fetch-dest",
        "sec-fetch-mode",
        "sec-fetch-site",
        "sec-fetch-user",
        "cookie",
        "priority",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Safari 导航请求的默认头顺序
pub fn safari_header_order() -> Vec<String> {
    [
        "accept",
        "sec-fetch-site",
        "accept-encoding",
        "sec-fetch-mode",
        "user-agent",
        "accept-language",
        "sec-fetch-dest",
        "cookie",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// 子资源类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubresourceType {
    Css,
    Script,
    Image,
    Font,
}

impl SubresourceType {
    /// 子资源请求的 Accept 值
    pub fn accept(&self) -> &'static str {
        match self {
            Self::Css => "text/css,*/*;q=0.1",
            Self::Script => "*/*",
            Self::Image => "image/avif,image/webp,image/apng,image/svg+xml,image/*,*/*;q=0.8",
            Self::Font => "*/*",
        }
    }

    /// Sec-Fetch-Dest 值
    pub fn fetch_dest(&self) -> &'static str {
        match self {
            Self::Css => "style",
            Self::Script => "script",
            Self::Image => "image",
            Self::Font => "font",
        }
    }

    /// Sec-Fetch-Mode 值（字体请求走 CORS）
    pub fn fetch_mode(&self) -> &'static str {
        match self {
            Self::Font => "cors",
            _ => "no-cors",
        }
    }

    /// Priority 头值
    pub fn priority(&self) -> &'static str {
        match self {
            Self::Css => "u=0, i",
            Self::Script => "u=1",
            Self::Image => "u=2",
            Self::Font => "u=3",
        }
    }
}
