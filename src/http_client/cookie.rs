//! Cookie 管理
//!
//! RFC 6265 §5.3-§5.4 的域/路径匹配语义：host-only 与前导点域 cookie、
//! Secure 通道约束、路径边界匹配、(路径长度降序, 创建时间升序) 排序。

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use url::Url;

/// SameSite 属性
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    pub fn as_str(&self) -> &'static str {
        match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        }
    }
}

/// Cookie
#[derive(Debug, Clone)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    /// 规范化域；域作用域 cookie 带前导点
    pub domain: String,
    pub path: String,
    pub host_only: bool,
    pub expires: Option<DateTime<Utc>>,
    pub max_age: Option<i64>,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: Option<SameSite>,
    pub created_at: DateTime<Utc>,
}

impl Cookie {
    /// 会话 cookie（无过期时间）
    pub fn new(name: &str, value: &str, domain: &str) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
            domain: domain.to_lowercase(),
            path: "/".to_string(),
            host_only: true,
            expires: None,
            max_age: None,
            secure: false,
            http_only: false,
            same_site: None,
            created_at: Utc::now(),
        }
    }

    /// 实际过期时刻：Max-Age 优先于 Expires
    pub fn expiry(&self) -> Option<DateTime<Utc>> {
        if let Some(max_age) = self.max_age {
            return Some(self.created_at + ChronoDuration::seconds(max_age));
        }
        self.expires
    }

    pub fn is_expired(&self) -> bool {
        self.expiry().map(|t| Utc::now() > t).unwrap_or(false)
    }

    /// 域匹配（RFC 6265 §5.1.3）
    ///
    /// host-only cookie 仅精确主机；域 cookie 覆盖域本身与全部子域。
    pub fn domain_matches(&self, host: &str) -> bool {
        let host = host.to_lowercase();
        if self.host_only {
            return host == self.domain;
        }
        let bare = self.domain.trim_start_matches('.');
        host == bare || host.ends_with(&format!(".{}", bare))
    }

    /// 路径匹配（RFC 6265 §5.1.4）
    pub fn path_matches(&self, request_path: &str) -> bool {
        if request_path == self.path {
            return true;
        }
        if request_path.starts_with(&self.path) {
            if self.path.ends_with('/') {
                return true;
            }
            if request_path.as_bytes().get(self.path.len()) == Some(&b'/') {
                return true;
            }
        }
        false
    }

    pub fn to_header_value(&self) -> String {
        format!("{}={}", self.name, self.value)
    }

    /// 从 Set-Cookie 头解析并落域
    ///
    /// 返回 None 表示按规则拒绝：名值对非法、Domain 不覆盖请求主机、
    /// Secure cookie 来自非 HTTPS 请求。
    pub fn parse_set_cookie(header: &str, request_host: &str, is_https: bool) -> Option<Self> {
        let mut parts = header.split(';');

        // 1. name=value
        let name_value = parts.next()?;
        let eq = name_value.find('=')?;
        let name = name_value[..eq].trim();
        let value = name_value[eq + 1..].trim().trim_matches('"');
        if name.is_empty() {
            return None;
        }

        let request_host = normalize_host(request_host);
        let mut cookie = Cookie::new(name, value, &request_host);

        // 2. 属性
        for part in parts {
            let part = part.trim();
            let (attr, attr_value) = match part.find('=') {
                Some(pos) => (&part[..pos], part[pos + 1..].trim()),
                None => (part, ""),
            };
            match attr.to_ascii_lowercase().as_str() {
                "domain" => {
                    let domain = attr_value.trim_start_matches('.').to_lowercase();
                    if domain.is_empty() {
                        continue;
                    }
                    // 请求主机必须等于 Domain 或是其子域
                    if request_host != domain
                        && !request_host.ends_with(&format!(".{}", domain))
                    {
                        return None;
                    }
                    cookie.domain = format!(".{}", domain);
                    cookie.host_only = false;
                }
                "path" => {
                    cookie.path = if attr_value.starts_with('/') {
                        attr_value.to_string()
                    } else {
                        "/".to_string()
                    };
                }
                "expires" => {
                    cookie.expires = parse_cookie_date(attr_value);
                }
                "max-age" => {
                    if let Ok(seconds) = attr_value.parse::<i64>() {
                        cookie.max_age = Some(seconds);
                    }
                }
                "secure" => cookie.secure = true,
                "httponly" => cookie.http_only = true,
                "samesite" => {
                    cookie.same_site = match attr_value.to_ascii_lowercase().as_str() {
                        "strict" => Some(SameSite::Strict),
                        "lax" => Some(SameSite::Lax),
                        "none" => Some(SameSite::None),
                        _ => None,
                    };
                }
                _ => {}
            }
        }

        // 3. Secure cookie 只接受来自 HTTPS 的设置
        if cookie.secure && !is_https {
            return None;
        }

        Some(cookie)
    }
}

/// 主机规范化：小写、去端口、保留 IPv6 方括号
fn normalize_host(host: &str) -> String {
    let host = host.to_lowercase();
    if host.starts_with('[') {
        // IPv6：[::1]:8443 → [::1]
        match host.find(']') {
            Some(end) => host[..=end].to_string(),
            None => host,
        }
    } else {
        match host.rfind(':') {
            Some(pos) if host[pos + 1..].chars().all(|c| c.is_ascii_digit()) => {
                host[..pos].to_string()
            }
            _ => host,
        }
    }
}

/// Cookie 日期：先按 RFC 2822，再退回常见变体
fn parse_cookie_date(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc2822(s) {
        return Some(t.with_timezone(&Utc));
    }
    for format in ["%a, %d %b %Y %H:%M:%S GMT", "%a, %d-%b-%Y %H:%M:%S GMT"] {
        if let Ok(t) = chrono::NaiveDateTime::parse_from_str(s, format) {
            return Some(DateTime::from_naive_utc_and_offset(t, Utc));
        }
    }
    None
}

/// Cookie 存储
///
/// 按去点域名分桶；桶内以 (path, name) 去重。
#[derive(Debug, Default)]
pub struct CookieJar {
    cookies: Mutex<HashMap<String, Vec<Cookie>>>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    fn bucket_key(domain: &str) -> String {
        domain.trim_start_matches('.').to_string()
    }

    /// 写入一条已构造的 cookie（同 (domain,path,name) 覆盖，保留原创建时间）
    pub fn insert(&self, cookie: Cookie) {
        if let Ok(mut cookies) = self.cookies.lock() {
            let bucket = cookies.entry(Self::bucket_key(&cookie.domain)).or_default();
            if let Some(pos) = bucket
                .iter()
                .position(|c| c.name == cookie.name && c.path == cookie.path)
            {
                let mut replacement = cookie;
                replacement.created_at = bucket[pos].created_at;
                bucket[pos] = replacement;
            } else {
                bucket.push(cookie);
            }
        }
    }

    /// 处理一条 Set-Cookie；返回是否接受
    pub fn set_cookie(&self, header: &str, request_url: &Url) -> bool {
        let host = match request_url.host_str() {
            Some(h) => h,
            None => return false,
        };
        let is_https = request_url.scheme() == "https";
        match Cookie::parse_set_cookie(header, host, is_https) {
            Some(cookie) => {
                self.insert(cookie);
                true
            }
            None => false,
        }
    }

    /// 匹配一个请求应携带的 cookie（RFC 6265 §5.4 排序）
    pub fn cookies_for(&self, request_url: &Url) -> Vec<Cookie> {
        let host = match request_url.host_str() {
            Some(h) => normalize_host(h),
            None => return Vec::new(),
        };
        let path = request_url.path();
        let is_https = request_url.scheme() == "https";

        let mut matched = Vec::new();
        if let Ok(mut cookies) = self.cookies.lock() {
            for bucket in cookies.values_mut() {
                // 过期条目读时惰性清除
                bucket.retain(|c| !c.is_expired());
                for cookie in bucket.iter() {
                    if cookie.domain_matches(&host)
                        && cookie.path_matches(path)
                        && (!cookie.secure || is_https)
                    {
                        matched.push(cookie.clone());
                    }
                }
            }
        }

        matched.sort_by(|a, b| {
            b.path
                .len()
                .cmp(&a.path.len())
                .then(a.created_at.cmp(&b.created_at))
        });
        matched
    }

    /// 生成 Cookie 头值；无匹配返回 None
    pub fn cookie_header(&self, request_url: &Url) -> Option<String> {
        let matched = self.cookies_for(request_url);
        if matched.is_empty() {
            return None;
        }
        Some(
            matched
                .iter()
                .map(Cookie::to_header_value)
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    /// 全量导出（快照序列化；含过期外的全部 cookie）
    pub fn export(&self) -> HashMap<String, Vec<Cookie>> {
        self.cookies
            .lock()
            .map(|cookies| {
                cookies
                    .iter()
                    .map(|(k, v)| {
                        (
                            k.clone(),
                            v.iter().filter(|c| !c.is_expired()).cloned().collect(),
                        )
                    })
                    .filter(|(_, v): &(String, Vec<Cookie>)| !v.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn count(&self) -> usize {
        self.cookies
            .lock()
            .map(|cookies| cookies.values().map(|v| v.len()).sum())
            .unwrap_or(0)
    }

    /// 主动清除过期 cookie
    pub fn sweep_expired(&self) {
        if let Ok(mut cookies) = self.cookies.lock() {
            for bucket in cookies.values_mut() {
                bucket.retain(|c| !c.is_expired());
            }
            cookies.retain(|_, v| !v.is_empty());
        }
    }

    pub fn clear_domain(&self, domain: &str) {
        if let Ok(mut cookies) = self.cookies.lock() {
            cookies.remove(&Self::bucket_key(domain));
        }
    }

    pub fn clear(&self) {
        if let Ok(mut cookies) = self.cookies.lock() {
            cookies.clear();
        }
    }
}
