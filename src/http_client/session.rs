//! 会话与请求引擎
//!
//! `Session` 聚合一个 profile 的全部跨请求状态：Cookie、TLS 票据、
//! ECH 配置、协议能力、连接池。`execute` 是唯一请求入口：合并默认头、
//! 附加 Cookie、推导 Sec-Fetch、走池取连接、处理重定向与重试、回写
//! Set-Cookie，返回响应与最终请求回显。
//!
//! 会话快照为带版本的 JSON（v5：按域分桶的 cookie；v4 平铺列表在
//! 加载时迁移，host_only 由前导点推断）。

use super::cookie::{Cookie, CookieJar, SameSite};
use super::http2::H2RequestParts;
use super::pool::{ConnectionPool, PooledConnection, ReleaseOutcome};
use super::request::{FetchMode, HttpMethod, HttpRequest};
use super::response::HttpResponse;
use super::session_cache::{TicketEntry, TlsSessionCache};
use super::tls::TlsAdapter;
use super::{Origin, Protocol};
use crate::dns::{EchFetcher, Resolver};
use crate::error::{CloakError, HandshakeError, PolicyError, Result};
use crate::profiles::{self, BrowserProfile};
use base64::Engine as _;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

/// 会话配置
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub verify_tls: bool,
    pub follow_redirects: bool,
    pub max_redirects: usize,
    pub request_timeout: Duration,
    /// 连接级错误的重试上限（仅幂等或显式可重试请求）
    pub retry_cap: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            verify_tls: true,
            follow_redirects: true,
            max_redirects: 10,
            request_timeout: Duration::from_secs(30),
            retry_cap: 1,
        }
    }
}

/// 会话
pub struct Session {
    profile: &'static BrowserProfile,
    config: SessionConfig,
    jar: Arc<CookieJar>,
    session_cache: Arc<TlsSessionCache>,
    resolver: Arc<Resolver>,
    ech: Arc<EchFetcher>,
    pool: Arc<ConnectionPool>,
    created_at: DateTime<Utc>,
    updated_at: Mutex<DateTime<Utc>>,
}

impl Session {
    /// 按 profile 名创建会话；未知名字报配置错误
    pub fn new(profile_name: &str, config: SessionConfig) -> Result<Self> {
        let profile = profiles::get(profile_name)
            .ok_or_else(|| CloakError::config(format!("未知 profile: {}", profile_name)))?;
        let resolver = Arc::new(Resolver::new());
        let ech = Arc::new(EchFetcher::new(resolver.clone()));
        let session_cache = Arc::new(TlsSessionCache::default());
        // 适配器持有同一份票据表：签发事件经桥接写入，供给与 0-RTT 读取
        let adapter = Arc::new(TlsAdapter::new(config.verify_tls, session_cache.clone()));
        let pool = Arc::new(ConnectionPool::new(
            profile,
            adapter,
            resolver.clone(),
            ech.clone(),
            session_cache.clone(),
        ));
        Ok(Self {
            profile,
            config,
            jar: Arc::new(CookieJar::new()),
            session_cache,
            resolver,
            ech,
            pool,
            created_at: Utc::now(),
            updated_at: Mutex::new(Utc::now()),
        })
    }

    pub fn profile(&self) -> &'static BrowserProfile {
        self.profile
    }

    pub fn cookie_jar(&self) -> &CookieJar {
        &self.jar
    }

    pub fn session_cache(&self) -> &TlsSessionCache {
        &self.session_cache
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    /// 执行一个请求；返回响应与解析后的请求回显
    pub async fn execute(&self, request: HttpRequest) -> Result<(HttpResponse, HttpRequest)> {
        if let Ok(mut updated_at) = self.updated_at.lock() {
            *updated_at = Utc::now();
        }

        let mut current = request;
        current.extract_override_keys();
        let mut url = Url::parse(&current.url)
            .map_err(|e| CloakError::config(format!("非法 URL {}: {}", current.url, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(CloakError::config(format!("不支持的协议: {}", url.scheme())));
        }

        let mut initiator: Option<Url> = None;
        let mut visited: HashSet<String> = HashSet::new();
        let mut hops = 0usize;
        // 调用方显式给过 Sec-Fetch 时引擎全程不再触碰
        let caller_sec_fetch =
            current.contains_header("sec-fetch-mode") || current.contains_header("sec-fetch-site");

        loop {
            // 1. 组装本跳的完整头集
            self.prepare_headers(&mut current, &url, initiator.as_ref(), caller_sec_fetch);

            // 2. 发送（带超时与连接级重试）
            let timeout = current.timeout.unwrap_or(self.config.request_timeout);
            let mut response = tokio::time::timeout(timeout, self.execute_once(&current, &url))
                .await
                .map_err(|_| CloakError::Timeout)??;
            response.final_url = url.to_string();

            // 3. Set-Cookie 先于响应返回落袋
            for set_cookie in response.header_all("set-cookie") {
                self.jar.set_cookie(set_cookie, &url);
            }

            // 4. 重定向
            if !(self.config.follow_redirects && response.is_redirect()) {
                return Ok((response, current));
            }
            hops += 1;
            if hops > self.config.max_redirects {
                return Err(CloakError::Policy(PolicyError::TooManyRedirects(
                    self.config.max_redirects,
                )));
            }
            let location = match response.header("location") {
                Some(l) => l.to_string(),
                None => return Ok((response, current)),
            };
            let next_url = url
                .join(&location)
                .map_err(|e| CloakError::config(format!("非法 Location {}: {}", location, e)))?;
            if !visited.insert(format!("{} {}", current.method.as_str(), next_url)) {
                return Err(CloakError::Policy(PolicyError::RedirectLoop));
            }

            // 301/302/303：非 GET/HEAD 改写为 GET 并丢弃请求体；307/308 保持
            if matches!(response.status_code, 301 | 302 | 303)
                && !matches!(current.method, HttpMethod::Get | HttpMethod::Head)
            {
                current.method = HttpMethod::Get;
                current.body = None;
                current.remove_header("content-type");
                current.remove_header("content-length");
            }

            // 源敏感头在新源下重新推导
            current.remove_header("authorization");
            current.remove_header("cookie");
            current.remove_header("host");

            initiator = Some(url);
            url = next_url;
            current.url = url.to_string();
        }
    }

    /// 单跳发送：取连接、按协议下发、能力回写、连接级重试
    async fn execute_once(&self, request: &HttpRequest, url: &Url) -> Result<HttpResponse> {
        let origin = Origin::from_url(url)
            .ok_or_else(|| CloakError::config(format!("URL 缺少主机: {}", url)))?;

        let mut attempts = 0usize;
        loop {
            let mut conn = self.pool.acquire(&origin, request.force_protocol).await?;
            let result = self.send_on(&mut conn, request, url, &origin).await;

            match result {
                Ok(response) => {
                    // Chrome 纪律：首个 H1 响应后预热第二条同源连接
                    if conn.protocol() == Protocol::H1 && self.pool.should_prewarm() {
                        let pool = self.pool.clone();
                        let prewarm_origin = origin.clone();
                        tokio::spawn(async move {
                            let _ = pool.prewarm_h1(&prewarm_origin).await;
                        });
                    }
                    self.pool.release(&origin, conn, ReleaseOutcome::Clean);
                    return Ok(response);
                }
                Err(e) => {
                    let outcome = match &e {
                        CloakError::Stream(_) => ReleaseOutcome::StreamError,
                        _ => ReleaseOutcome::ConnectionError,
                    };
                    self.pool.release(&origin, conn, outcome);

                    // 票据被拒：废弃票据后以完整握手透明重试一次
                    if matches!(&e, CloakError::Handshake(HandshakeError::TicketInvalid))
                        && attempts == 0
                    {
                        for proto in ["h1", "h2", "h3"] {
                            self.session_cache.remove(&TlsSessionCache::cache_key(
                                proto,
                                &origin.host,
                                origin.port,
                            ));
                        }
                        attempts += 1;
                        continue;
                    }

                    let may_retry = (request.method.is_idempotent() || request.retryable)
                        && e.retryable_on_new_connection()
                        && attempts < self.config.retry_cap;
                    if may_retry {
                        attempts += 1;
                        continue;
                    }
                    return Err(e);
                }
            }
        }
    }

    /// 按连接协议下发请求
    async fn send_on(
        &self,
        conn: &mut PooledConnection,
        request: &HttpRequest,
        url: &Url,
        origin: &Origin,
    ) -> Result<HttpResponse> {
        let path = request_path(url);
        let order = request
            .header_order
            .as_deref()
            .unwrap_or(&self.profile.header_order);
        // host 不在顺序表里时放到最前（HTTP/1.1 纪律）
        let ordered = {
            let mut effective: Vec<String> = Vec::with_capacity(order.len() + 1);
            if !order.iter().any(|h| h == "host") {
                effective.push("host".to_string());
            }
            effective.extend(order.iter().cloned());
            request.ordered_headers(Some(&effective))
        };

        match conn {
            PooledConnection::H1(h1) => {
                h1.send(request, &path, &ordered, &self.profile.keep_alive)
                    .await
            }
            PooledConnection::H2(h2) => {
                let pseudo_order = request
                    .pseudo_header_order
                    .clone()
                    .unwrap_or_else(|| self.profile.pseudo_header_order.clone());
                let headers = ordered
                    .iter()
                    .filter(|(k, _)| !k.eq_ignore_ascii_case("host"))
                    .map(|(k, v)| (k.to_lowercase(), v.clone()))
                    .collect();
                let parts = H2RequestParts {
                    method: request.method,
                    scheme: url.scheme().to_string(),
                    authority: authority(url, origin),
                    path,
                    pseudo_order,
                    headers,
                    body: request.body.clone(),
                    priority: self.profile.header_priority,
                };
                h2.send_request(parts).await
            }
            PooledConnection::H3(h3) => {
                let headers: Vec<(String, String)> = ordered
                    .iter()
                    .filter(|(k, _)| !k.eq_ignore_ascii_case("host"))
                    .map(|(k, v)| (k.to_lowercase(), v.clone()))
                    .collect();
                h3.send_request(request.method, url.as_str(), &headers, request.body.as_deref())
                    .await
            }
        }
    }

    /// 合并 profile 默认头、保证 Host、附加 Cookie、推导 Sec-Fetch
    ///
    /// 冲突时调用方给的值获胜；线上顺序与大小写以最终头集为准。
    fn prepare_headers(
        &self,
        request: &mut HttpRequest,
        url: &Url,
        initiator: Option<&Url>,
        caller_sec_fetch: bool,
    ) {
        let template = &self.profile.header_template;

        // 1. Host（请求回显中也要出现）
        if !request.contains_header("host") {
            let origin = Origin::from_url(url);
            let host_value = match &origin {
                Some(o) => authority(url, o),
                None => url.host_str().unwrap_or_default().to_string(),
            };
            request.headers.insert(0, ("Host".to_string(), host_value));
        }

        // 2. profile 默认头（缺失才补）
        for name in &self.profile.header_order {
            if name == "cookie" || name == "host" {
                continue;
            }
            if request.contains_header(name) {
                continue;
            }
            if let Some(value) = template.value_for(name) {
                request.headers.push((wire_case(name), value.to_string()));
            }
        }

        // 3. Sec-Fetch 按请求上下文推导（每跳重算 site；调用方显式给过则不碰）
        if !caller_sec_fetch && template.value_for("sec-fetch-mode").is_some() {
            let mode = request.fetch_mode.unwrap_or(FetchMode::Navigate);
            let (fetch_mode, fetch_dest, fetch_user) = match mode {
                FetchMode::Navigate => ("navigate", "document", Some("?1")),
                FetchMode::Fetch => ("cors", "empty", None),
                FetchMode::Xhr => ("cors", "empty", None),
                FetchMode::Subresource => ("no-cors", "empty", None),
            };
            let site = derive_sec_fetch_site(initiator, url);
            request.set_header("Sec-Fetch-Mode", fetch_mode);
            request.set_header("Sec-Fetch-Dest", fetch_dest);
            request.set_header("Sec-Fetch-Site", site);
            match fetch_user {
                Some(value) => request.set_header("Sec-Fetch-User", value),
                None => request.remove_header("sec-fetch-user"),
            }
        }

        // 4. Cookie
        if !request.contains_header("cookie") {
            if let Some(cookie_value) = self.jar.cookie_header(url) {
                request
                    .headers
                    .push(("Cookie".to_string(), cookie_value));
            }
        }
    }

    /// 页面预热：导航 + 按批取回子资源
    pub async fn warmup(&self, url: &str) -> Result<super::warmup::WarmupReport> {
        super::warmup::WarmupPlanner::new().run(self, url).await
    }

    /// 手动读取匹配某 URL 的 cookie
    pub fn cookies_get(&self, url: &str) -> Result<Vec<Cookie>> {
        let url = Url::parse(url).map_err(|e| CloakError::config(format!("非法 URL: {}", e)))?;
        Ok(self.jar.cookies_for(&url))
    }

    /// 手动写入 cookie
    pub fn cookies_set(&self, cookie: Cookie) {
        self.jar.insert(cookie);
    }

    pub fn cookies_clear(&self) {
        self.jar.clear();
    }

    /// 导出会话快照（v5 JSON）
    pub fn export(&self) -> Result<String> {
        let b64 = base64::engine::general_purpose::STANDARD;
        let cookies = self
            .jar
            .export()
            .into_iter()
            .map(|(domain, list)| {
                (
                    domain,
                    list.iter().map(CookieRecord::from_cookie).collect(),
                )
            })
            .collect();
        let tls_sessions = self
            .session_cache
            .export_entries()
            .into_iter()
            .map(|(key, entry)| {
                (
                    key,
                    TicketRecord {
                        ticket: b64.encode(&entry.ticket),
                        state: b64.encode(&entry.state),
                        created_at: entry.created_at.timestamp(),
                    },
                )
            })
            .collect();
        let ech_configs = self
            .ech
            .export_all()
            .into_iter()
            .map(|(host, raw)| (host, b64.encode(raw)))
            .collect();

        let snapshot = SnapshotV5 {
            version: 5,
            created_at: self.created_at.timestamp(),
            updated_at: self
                .updated_at
                .lock()
                .map(|t| t.timestamp())
                .unwrap_or_else(|_| Utc::now().timestamp()),
            config: SnapshotConfig {
                profile: self.profile.name.to_string(),
            },
            cookies,
            tls_sessions,
            ech_configs,
        };
        serde_json::to_string_pretty(&snapshot)
            .map_err(|e| CloakError::config(format!("快照序列化失败: {}", e)))
    }

    /// 导入会话快照（v5；v4 平铺 cookie 列表自动迁移）
    ///
    /// 超过 24 小时的 TLS 会话条目在加载时丢弃；ECH 配置仅作种子，
    /// 首次使用时以 DNS 重新获取的结果为准。重复导入同一快照是幂等的。
    pub fn import(&self, data: &str) -> Result<()> {
        let value: serde_json::Value = serde_json::from_str(data)
            .map_err(|e| CloakError::config(format!("快照解析失败: {}", e)))?;
        let version = value.get("version").and_then(|v| v.as_u64()).unwrap_or(0);

        match version {
            5 => {
                let snapshot: SnapshotV5 = serde_json::from_value(value)
                    .map_err(|e| CloakError::config(format!("v5 快照非法: {}", e)))?;
                self.import_v5(snapshot)
            }
            4 => {
                let snapshot: SnapshotV4 = serde_json::from_value(value)
                    .map_err(|e| CloakError::config(format!("v4 快照非法: {}", e)))?;
                self.import_v5(snapshot.migrate())
            }
            other => Err(CloakError::config(format!("不支持的快照版本: {}", other))),
        }
    }

    fn import_v5(&self, snapshot: SnapshotV5) -> Result<()> {
        let b64 = base64::engine::general_purpose::STANDARD;

        for (_, records) in snapshot.cookies {
            for record in records {
                self.jar.insert(record.into_cookie());
            }
        }

        for (key, record) in snapshot.tls_sessions {
            let ticket = b64
                .decode(&record.ticket)
                .map_err(|e| CloakError::config(format!("票据 base64 非法: {}", e)))?;
            let state = b64
                .decode(&record.state)
                .map_err(|e| CloakError::config(format!("会话状态 base64 非法: {}", e)))?;
            let created_at = Utc
                .timestamp_opt(record.created_at, 0)
                .single()
                .unwrap_or_else(Utc::now);
            // 过期条目由 insert_entry 拒绝
            self.session_cache.insert_entry(
                &key,
                TicketEntry {
                    ticket,
                    state,
                    created_at,
                },
            );
        }

        for (host, raw_b64) in snapshot.ech_configs {
            if let Ok(raw) = b64.decode(&raw_b64) {
                self.ech.seed(&host, &raw);
            }
        }

        Ok(())
    }
}

/// URL 的请求路径（path + query）
fn request_path(url: &Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    }
}

/// :authority / Host 值：非默认端口带端口
fn authority(url: &Url, origin: &Origin) -> String {
    let default_port = match url.scheme() {
        "https" => 443,
        _ => 80,
    };
    if origin.port == default_port {
        origin.host.clone()
    } else {
        format!("{}:{}", origin.host, origin.port)
    }
}

/// 头名的线上大小写
///
/// Client Hints（sec-ch-*）在线上保持小写，其余按首字母大写的连字符形式。
fn wire_case(name: &str) -> String {
    if name.starts_with("sec-ch-") {
        return name.to_string();
    }
    name.split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

/// 简化的可注册域（eTLD+1）
///
/// 常见多段公共后缀之外按最后两个标签截取。
pub(crate) fn registrable_domain(host: &str) -> String {
    const MULTI_PART_SUFFIXES: &[&str] = &[
        "co.uk", "org.uk", "ac.uk", "gov.uk", "com.au", "net.au", "org.au", "co.jp", "ne.jp",
        "or.jp", "com.cn", "net.cn", "org.cn", "com.br", "com.tw", "co.kr", "co.in", "com.mx",
        "com.hk",
    ];
    let host = host.to_lowercase();
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() <= 2 {
        return host;
    }
    let last_two = labels[labels.len() - 2..].join(".");
    if MULTI_PART_SUFFIXES.contains(&last_two.as_str()) && labels.len() >= 3 {
        labels[labels.len() - 3..].join(".")
    } else {
        last_two
    }
}

/// Sec-Fetch-Site 推导
///
/// 无发起方 → none；完整源相等 → same-origin；可注册域相同 → same-site；
/// 其余 → cross-site。
pub(crate) fn derive_sec_fetch_site(initiator: Option<&Url>, target: &Url) -> &'static str {
    let initiator = match initiator {
        Some(u) => u,
        None => return "none",
    };
    let same_origin = initiator.scheme() == target.scheme()
        && initiator.host_str() == target.host_str()
        && initiator.port_or_known_default() == target.port_or_known_default();
    if same_origin {
        return "same-origin";
    }
    match (initiator.host_str(), target.host_str()) {
        (Some(a), Some(b)) if registrable_domain(a) == registrable_domain(b) => "same-site",
        _ => "cross-site",
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotConfig {
    profile: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotV5 {
    version: u32,
    created_at: i64,
    updated_at: i64,
    config: SnapshotConfig,
    cookies: HashMap<String, Vec<CookieRecord>>,
    tls_sessions: HashMap<String, TicketRecord>,
    ech_configs: HashMap<String, String>,
}

/// v4 快照：cookie 为平铺列表
#[derive(Debug, Deserialize)]
struct SnapshotV4 {
    #[allow(dead_code)]
    version: u32,
    created_at: i64,
    updated_at: i64,
    config: SnapshotConfig,
    cookies: Vec<CookieRecord>,
    #[serde(default)]
    tls_sessions: HashMap<String, TicketRecord>,
    #[serde(default)]
    ech_configs: HashMap<String, String>,
}

impl SnapshotV4 {
    /// v4 → v5：平铺 cookie 按去点域分桶；host_only 由前导点推断
    fn migrate(self) -> SnapshotV5 {
        let mut cookies: HashMap<String, Vec<CookieRecord>> = HashMap::new();
        for record in self.cookies {
            let bucket = record.domain.trim_start_matches('.').to_string();
            cookies.entry(bucket).or_default().push(record);
        }
        SnapshotV5 {
            version: 5,
            created_at: self.created_at,
            updated_at: self.updated_at,
            config: self.config,
            cookies,
            tls_sessions: self.tls_sessions,
            ech_configs: self.ech_configs,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct TicketRecord {
    ticket: String,
    state: String,
    created_at: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct CookieRecord {
    name: String,
    value: String,
    domain: String,
    path: String,
    expires: Option<i64>,
    max_age: Option<i64>,
    secure: bool,
    http_only: bool,
    same_site: Option<String>,
    created_at: i64,
}

impl CookieRecord {
    fn from_cookie(cookie: &Cookie) -> Self {
        Self {
            name: cookie.name.clone(),
            value: cookie.value.clone(),
            domain: cookie.domain.clone(),
            path: cookie.path.clone(),
            expires: cookie.expires.map(|t| t.timestamp()),
            max_age: cookie.max_age,
            secure: cookie.secure,
            http_only: cookie.http_only,
            same_site: cookie.same_site.map(|s| s.as_str().to_string()),
            created_at: cookie.created_at.timestamp(),
        }
    }

    fn into_cookie(self) -> Cookie {
        let host_only = !self.domain.starts_with('.');
        Cookie {
            name: self.name,
            value: self.value,
            domain: self.domain,
            path: self.path,
            host_only,
            expires: self
                .expires
                .and_then(|t| Utc.timestamp_opt(t, 0).single()),
            max_age: self.max_age,
            secure: self.secure,
            http_only: self.http_only,
            same_site: self.same_site.as_deref().and_then(|s| match s {
                "Strict" => Some(SameSite::Strict),
                "Lax" => Some(SameSite::Lax),
                "None" => Some(SameSite::None),
                _ => None,
            }),
            created_at: Utc
                .timestamp_opt(self.created_at, 0)
                .single()
                .unwrap_or_else(Utc::now),
        }
    }
}
