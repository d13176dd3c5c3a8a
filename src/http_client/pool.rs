//! 连接池
//!
//! 以源 (scheme, host, port) 为键管理三类连接与协议能力记忆：
//! - 能力记录三态（未知/支持/不支持），按 TTL 过期回到未知；
//! - 未知时 H3/H2 并发竞速拨号，H3 先行约 50ms，先完成可用握手者胜；
//! - 只有"协议不支持"类的失败才降级能力状态，网络错误不触碰；
//! - H1 连接独占借出，H2/H3 连接由池独占持有、流按 Arc 借用。

use super::http1::H1Connection;
use super::http2::H2Connection;
use super::http3::H3Connection;
use super::session_cache::TlsSessionCache;
use super::tls::TlsAdapter;
use super::{Origin, Protocol};
use crate::dns::{EchFetcher, Resolver};
use crate::error::{CloakError, Result};
use crate::profiles::BrowserProfile;
use crate::tls_config::TransportMode;
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// 竞速拨号时 H3 的先行时间
const H3_HEAD_START: Duration = Duration::from_millis(50);

/// 能力记录的默认 TTL（Alt-Svc 语义）
const CAPABILITY_TTL: Duration = Duration::from_secs(3600);

/// 每源空闲 H1 连接上限
const MAX_IDLE_H1_PER_ORIGIN: usize = 2;

/// 拨号默认超时
const DIAL_TIMEOUT: Duration = Duration::from_secs(15);

/// 协议支持三态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolSupport {
    Unknown,
    Supported,
    Unsupported,
}

/// 每源协议能力记录
#[derive(Debug, Clone)]
pub struct Capability {
    pub h3: ProtocolSupport,
    pub h2: ProtocolSupport,
    pub last_probe_at: Option<Instant>,
    /// 过期后整条记录回到未知
    pub expires_at: Option<Instant>,
}

impl Capability {
    pub fn unknown() -> Self {
        Self {
            h3: ProtocolSupport::Unknown,
            h2: ProtocolSupport::Unknown,
            last_probe_at: None,
            expires_at: None,
        }
    }

    /// 读取时应用过期语义
    pub fn effective(&self) -> (ProtocolSupport, ProtocolSupport) {
        if let Some(expires_at) = self.expires_at {
            if Instant::now() >= expires_at {
                return (ProtocolSupport::Unknown, ProtocolSupport::Unknown);
            }
        }
        (self.h3, self.h2)
    }
}

/// 拨号计划
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialPlan {
    H3Only,
    H2Only,
    /// H3 先行的并发竞速
    Race,
    H1Only,
}

/// 自动模式下由能力记录推导拨号计划
pub fn plan_dial(h3: ProtocolSupport, h2: ProtocolSupport) -> DialPlan {
    use ProtocolSupport::*;
    match (h3, h2) {
        (Supported, _) => DialPlan::H3Only,
        (_, Supported) => DialPlan::H2Only,
        (Unsupported, Unsupported) => DialPlan::H1Only,
        (Unsupported, Unknown) => DialPlan::H2Only,
        (Unknown, _) => DialPlan::Race,
    }
}

/// 从池中借出的连接
pub enum PooledConnection {
    H1(H1Connection),
    H2(Arc<H2Connection>),
    H3(Arc<H3Connection>),
}

impl PooledConnection {
    pub fn protocol(&self) -> Protocol {
        match self {
            PooledConnection::H1(_) => Protocol::H1,
            PooledConnection::H2(_) => Protocol::H2,
            PooledConnection::H3(_) => Protocol::H3,
        }
    }
}

/// 请求结束后的归还结论
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Clean,
    StreamError,
    ConnectionError,
}

/// 连接池
pub struct ConnectionPool {
    profile: &'static BrowserProfile,
    adapter: Arc<TlsAdapter>,
    resolver: Arc<Resolver>,
    ech: Arc<EchFetcher>,
    session_cache: Arc<TlsSessionCache>,
    capabilities: Mutex<HashMap<Origin, Capability>>,
    idle_h1: Mutex<HashMap<Origin, VecDeque<H1Connection>>>,
    h2_conns: Mutex<HashMap<Origin, Arc<H2Connection>>>,
    h3_conns: Mutex<HashMap<Origin, Arc<H3Connection>>>,
}

impl ConnectionPool {
    pub fn new(
        profile: &'static BrowserProfile,
        adapter: Arc<TlsAdapter>,
        resolver: Arc<Resolver>,
        ech: Arc<EchFetcher>,
        session_cache: Arc<TlsSessionCache>,
    ) -> Self {
        Self {
            profile,
            adapter,
            resolver,
            ech,
            session_cache,
            capabilities: Mutex::new(HashMap::new()),
            idle_h1: Mutex::new(HashMap::new()),
            h2_conns: Mutex::new(HashMap::new()),
            h3_conns: Mutex::new(HashMap::new()),
        }
    }

    /// 当前能力记录（读取时应用过期）
    pub fn capability(&self, origin: &Origin) -> (ProtocolSupport, ProtocolSupport) {
        self.capabilities
            .lock()
            .ok()
            .and_then(|caps| caps.get(origin).map(|c| c.effective()))
            .unwrap_or((ProtocolSupport::Unknown, ProtocolSupport::Unknown))
    }

    /// 握手成功：该协议提升为支持
    pub fn promote(&self, origin: &Origin, protocol: Protocol) {
        if let Ok(mut caps) = self.capabilities.lock() {
            let entry = caps.entry(origin.clone()).or_insert_with(Capability::unknown);
            match protocol {
                Protocol::H3 => entry.h3 = ProtocolSupport::Supported,
                Protocol::H2 => entry.h2 = ProtocolSupport::Supported,
                Protocol::H1 => {}
            }
            entry.last_probe_at = Some(Instant::now());
            entry.expires_at = Some(Instant::now() + CAPABILITY_TTL);
        }
    }

    /// 类型化失败：该协议降级为不支持；网络错误不得调用本方法
    pub fn demote(&self, origin: &Origin, protocol: Protocol) {
        if let Ok(mut caps) = self.capabilities.lock() {
            let entry = caps.entry(origin.clone()).or_insert_with(Capability::unknown);
            match protocol {
                Protocol::H3 => entry.h3 = ProtocolSupport::Unsupported,
                Protocol::H2 => entry.h2 = ProtocolSupport::Unsupported,
                Protocol::H1 => {}
            }
            entry.last_probe_at = Some(Instant::now());
            entry.expires_at = Some(Instant::now() + CAPABILITY_TTL);
        }
    }

    /// 按失败类型更新能力缓存
    fn record_failure(&self, origin: &Origin, protocol: Protocol, error: &CloakError) {
        if let CloakError::Handshake(e) = error {
            if e.is_protocol_unsupported() {
                self.demote(origin, protocol);
            }
        }
    }

    /// 借出一条到目标源的连接
    pub async fn acquire(
        &self,
        origin: &Origin,
        force: Option<Protocol>,
    ) -> Result<PooledConnection> {
        // 明文源只有 H1
        if !origin.is_https() {
            return self.acquire_h1_plain(origin).await;
        }

        // 1. 先看池里的活连接
        if force.is_none() || force == Some(Protocol::H3) {
            if let Some(conn) = self.pooled_h3(origin) {
                return Ok(PooledConnection::H3(conn));
            }
        }
        if force.is_none() || force == Some(Protocol::H2) {
            if let Some(conn) = self.pooled_h2(origin) {
                return Ok(PooledConnection::H2(conn));
            }
        }
        if force == Some(Protocol::H1) || force.is_none() {
            if let Some(conn) = self.pooled_h1(origin) {
                if force == Some(Protocol::H1) {
                    return Ok(PooledConnection::H1(conn));
                }
                // 自动模式下空闲 H1 只在能力记录说 H1 是唯一选项时用
                let (h3, h2) = self.capability(origin);
                if h3 == ProtocolSupport::Unsupported && h2 == ProtocolSupport::Unsupported {
                    return Ok(PooledConnection::H1(conn));
                }
                self.return_h1(origin, conn);
            }
        }

        // 2. 决定拨号计划
        let plan = match force {
            Some(Protocol::H3) => DialPlan::H3Only,
            Some(Protocol::H2) => DialPlan::H2Only,
            Some(Protocol::H1) => DialPlan::H1Only,
            None => {
                let (h3, h2) = self.capability(origin);
                plan_dial(h3, h2)
            }
        };

        let remote = self.resolve_remote(origin).await?;

        match plan {
            DialPlan::H3Only => {
                let conn = self.dial_h3(origin, remote).await?;
                Ok(PooledConnection::H3(conn))
            }
            DialPlan::H2Only => self.dial_h2_or_h1(origin, remote).await,
            DialPlan::H1Only => {
                let conn = self.dial_h1_tls(origin, remote).await?;
                Ok(PooledConnection::H1(conn))
            }
            DialPlan::Race => self.race_dial(origin, remote).await,
        }
    }

    /// 归还连接
    pub fn release(&self, origin: &Origin, conn: PooledConnection, outcome: ReleaseOutcome) {
        match conn {
            PooledConnection::H1(h1) => {
                if outcome == ReleaseOutcome::Clean && h1.is_reusable(&self.profile.keep_alive) {
                    self.return_h1(origin, h1);
                }
            }
            PooledConnection::H2(h2) => {
                if outcome == ReleaseOutcome::ConnectionError || !h2.is_reusable() {
                    if let Ok(mut conns) = self.h2_conns.lock() {
                        conns.remove(origin);
                    }
                }
            }
            PooledConnection::H3(h3) => {
                if outcome == ReleaseOutcome::ConnectionError || !h3.is_reusable() {
                    if let Ok(mut conns) = self.h3_conns.lock() {
                        conns.remove(origin);
                    }
                }
            }
        }
    }

    fn pooled_h2(&self, origin: &Origin) -> Option<Arc<H2Connection>> {
        let mut conns = self.h2_conns.lock().ok()?;
        match conns.get(origin) {
            Some(conn) if conn.is_reusable() => Some(conn.clone()),
            Some(_) => {
                conns.remove(origin);
                None
            }
            None => None,
        }
    }

    fn pooled_h3(&self, origin: &Origin) -> Option<Arc<H3Connection>> {
        let mut conns = self.h3_conns.lock().ok()?;
        match conns.get(origin) {
            Some(conn) if conn.is_reusable() => Some(conn.clone()),
            Some(_) => {
                conns.remove(origin);
                None
            }
            None => None,
        }
    }

    fn pooled_h1(&self, origin: &Origin) -> Option<H1Connection> {
        let mut idle = self.idle_h1.lock().ok()?;
        let bucket = idle.get_mut(origin)?;
        while let Some(conn) = bucket.pop_front() {
            if conn.is_reusable(&self.profile.keep_alive) {
                return Some(conn);
            }
        }
        None
    }

    fn return_h1(&self, origin: &Origin, conn: H1Connection) {
        if let Ok(mut idle) = self.idle_h1.lock() {
            let bucket = idle.entry(origin.clone()).or_default();
            bucket.push_front(conn);
            while bucket.len() > MAX_IDLE_H1_PER_ORIGIN {
                bucket.pop_back();
            }
        }
    }

    async fn resolve_remote(&self, origin: &Origin) -> Result<SocketAddr> {
        let addrs = self.resolver.resolve(&origin.host).await?;
        let ip = addrs
            .first()
            .copied()
            .ok_or_else(|| CloakError::dns(format!("{}: 无可用地址", origin.host)))?;
        Ok(SocketAddr::new(ip, origin.port))
    }

    /// 明文 HTTP：裸 TCP
    async fn acquire_h1_plain(&self, origin: &Origin) -> Result<PooledConnection> {
        if let Some(conn) = self.pooled_h1(origin) {
            return Ok(PooledConnection::H1(conn));
        }
        let remote = self.resolve_remote(origin).await?;
        let tcp = tokio::time::timeout(DIAL_TIMEOUT, tokio::net::TcpStream::connect(remote))
            .await
            .map_err(|_| CloakError::Timeout)?
            .map_err(CloakError::Io)?;
        tcp.set_nodelay(true).ok();
        Ok(PooledConnection::H1(H1Connection::new(Box::new(tcp))))
    }

    /// 产出（并在启用 fork 时暂存）本次握手的定制 ClientHello
    fn stage_hello(&self, origin: &Origin, mode: TransportMode, ech: Option<&crate::dns::EchConfigList>) {
        let key = TlsSessionCache::cache_key(
            match mode {
                TransportMode::Tcp => "h2",
                TransportMode::Quic => "h3",
            },
            &origin.host,
            origin.port,
        );
        let params = self
            .adapter
            .hello_params(self.profile, &origin.host, mode, ech, &key);
        let _hello = self.adapter.build_client_hello(self.profile, &params);
        #[cfg(feature = "rustls-client-hello-customizer")]
        super::tls::customizer::stage_custom_hello(&origin.host, _hello);
    }

    /// 拨 H2（ALPN 只给 h2；对端降回 http/1.1 按协议不支持处理）
    async fn dial_h2_or_h1(&self, origin: &Origin, remote: SocketAddr) -> Result<PooledConnection> {
        match self.dial_h2(origin, remote).await {
            Ok(conn) => Ok(PooledConnection::H2(conn)),
            Err(e) => {
                self.record_failure(origin, Protocol::H2, &e);
                if matches!(
                    &e,
                    CloakError::Handshake(he) if he.is_protocol_unsupported()
                ) {
                    let conn = self.dial_h1_tls(origin, remote).await?;
                    Ok(PooledConnection::H1(conn))
                } else {
                    Err(e)
                }
            }
        }
    }

    async fn dial_h2(&self, origin: &Origin, remote: SocketAddr) -> Result<Arc<H2Connection>> {
        let ech = self.ech.fetch_ech_config(&origin.host).await;
        self.stage_hello(origin, TransportMode::Tcp, ech.as_ref());

        // 票据登记由 TlsAdapter 的签发桥接完成，这里只负责拨号
        let key = TlsSessionCache::cache_key("h2", &origin.host, origin.port);
        let (stream, _alpn) = tokio::time::timeout(
            DIAL_TIMEOUT,
            self.adapter
                .connect_tcp(remote, &origin.host, &[b"h2"], Some(b"h2"), &key),
        )
        .await
        .map_err(|_| CloakError::Timeout)??;

        let conn = Arc::new(H2Connection::connect(stream, self.profile).await?);
        self.promote(origin, Protocol::H2);
        if let Ok(mut conns) = self.h2_conns.lock() {
            conns.insert(origin.clone(), conn.clone());
        }
        Ok(conn)
    }

    async fn dial_h1_tls(&self, origin: &Origin, remote: SocketAddr) -> Result<H1Connection> {
        let key = TlsSessionCache::cache_key("h1", &origin.host, origin.port);
        let (stream, _alpn) = tokio::time::timeout(
            DIAL_TIMEOUT,
            self.adapter
                .connect_tcp(remote, &origin.host, &[b"http/1.1"], None, &key),
        )
        .await
        .map_err(|_| CloakError::Timeout)??;
        Ok(H1Connection::new(stream))
    }

    /// 0-RTT 门限：profile 允许且该源确实签发过票据
    fn zero_rtt_allowed(&self, origin: &Origin) -> bool {
        self.profile.zero_rtt
            && self
                .session_cache
                .get(&TlsSessionCache::cache_key("h3", &origin.host, origin.port))
                .is_some()
    }

    async fn dial_h3(&self, origin: &Origin, remote: SocketAddr) -> Result<Arc<H3Connection>> {
        let ech = self.ech.fetch_ech_config(&origin.host).await;
        self.stage_hello(origin, TransportMode::Quic, ech.as_ref());

        let key = TlsSessionCache::cache_key("h3", &origin.host, origin.port);
        let try_zero_rtt = self.zero_rtt_allowed(origin);
        let tls_config = self
            .adapter
            .client_config(&[b"h3"], self.profile.zero_rtt, &key);

        let conn = tokio::time::timeout(
            DIAL_TIMEOUT,
            H3Connection::connect(remote, &origin.host, tls_config, self.profile, try_zero_rtt),
        )
        .await
        .map_err(|_| CloakError::Timeout)?;

        match conn {
            Ok(conn) => {
                let conn = Arc::new(conn);
                self.promote(origin, Protocol::H3);
                if let Ok(mut conns) = self.h3_conns.lock() {
                    conns.insert(origin.clone(), conn.clone());
                }
                Ok(conn)
            }
            Err(e) => {
                self.record_failure(origin, Protocol::H3, &e);
                Err(e)
            }
        }
    }

    /// H3/H2 竞速：H3 先行 ≈50ms，先完成可用握手者胜
    async fn race_dial(&self, origin: &Origin, remote: SocketAddr) -> Result<PooledConnection> {
        let h3_dial = self.dial_h3(origin, remote);
        let h2_dial = async {
            tokio::time::sleep(H3_HEAD_START).await;
            self.dial_h2_or_h1(origin, remote).await
        };
        tokio::pin!(h3_dial);
        tokio::pin!(h2_dial);

        let mut h3_result: Option<CloakError> = None;
        let mut h2_result: Option<CloakError> = None;

        loop {
            tokio::select! {
                result = &mut h3_dial, if h3_result.is_none() => {
                    match result {
                        Ok(conn) => return Ok(PooledConnection::H3(conn)),
                        Err(e) => {
                            h3_result = Some(e);
                            if h2_result.is_some() {
                                break;
                            }
                        }
                    }
                }
                result = &mut h2_dial, if h2_result.is_none() => {
                    match result {
                        Ok(conn) => return Ok(conn),
                        Err(e) => {
                            h2_result = Some(e);
                            if h3_result.is_some() {
                                break;
                            }
                        }
                    }
                }
            }
        }

        // 两路皆败：都是协议不支持才降到 H1，否则报网络侧错误
        let proto_unsupported = |e: &CloakError| {
            matches!(e, CloakError::Handshake(he) if he.is_protocol_unsupported())
        };
        let both_unsupported = match (&h3_result, &h2_result) {
            (Some(h3_err), Some(h2_err)) => proto_unsupported(h3_err) && proto_unsupported(h2_err),
            _ => false,
        };
        if both_unsupported {
            let conn = self.dial_h1_tls(origin, remote).await?;
            return Ok(PooledConnection::H1(conn));
        }
        Err(h2_result.or(h3_result).unwrap_or(CloakError::Timeout))
    }

    /// keep-alive 预热提示：首个响应后引擎可再开一条同源连接
    pub fn should_prewarm(&self) -> bool {
        self.profile.keep_alive.prewarm
    }

    /// 预热一条同源 H1 连接放入空闲池；已有空闲则跳过
    pub async fn prewarm_h1(&self, origin: &Origin) -> Result<()> {
        if let Ok(idle) = self.idle_h1.lock() {
            if idle.get(origin).map(|b| !b.is_empty()).unwrap_or(false) {
                return Ok(());
            }
        }
        let remote = self.resolve_remote(origin).await?;
        let conn = if origin.is_https() {
            self.dial_h1_tls(origin, remote).await?
        } else {
            let tcp = tokio::net::TcpStream::connect(remote)
                .await
                .map_err(CloakError::Io)?;
            H1Connection::new(Box::new(tcp))
        };
        self.return_h1(origin, conn);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandshakeError;
    use ProtocolSupport::*;

    #[test]
    fn test_plan_dial_matrix() {
        // 已知 H3 好 → 只拨 H3
        assert_eq!(plan_dial(Supported, Unknown), DialPlan::H3Only);
        assert_eq!(plan_dial(Supported, Supported), DialPlan::H3Only);
        // H3 未知 → 竞速
        assert_eq!(plan_dial(Unknown, Unknown), DialPlan::Race);
        // H3 不支持、H2 好 → 只拨 H2（无 UDP 流量）
        assert_eq!(plan_dial(Unsupported, Supported), DialPlan::H2Only);
        assert_eq!(plan_dial(Unsupported, Unknown), DialPlan::H2Only);
        // 全不支持 → H1
        assert_eq!(plan_dial(Unsupported, Unsupported), DialPlan::H1Only);
    }

    #[test]
    fn test_capability_expiry_reverts_to_unknown() {
        let capability = Capability {
            h3: Supported,
            h2: Unsupported,
            last_probe_at: Some(Instant::now()),
            expires_at: Some(Instant::now() - Duration::from_secs(1)),
        };
        assert_eq!(capability.effective(), (Unknown, Unknown));

        let fresh = Capability {
            expires_at: Some(Instant::now() + Duration::from_secs(60)),
            ..capability
        };
        assert_eq!(fresh.effective(), (Supported, Unsupported));
    }

    fn test_pool() -> ConnectionPool {
        test_pool_with_profile("chrome-143")
    }

    fn test_pool_with_profile(name: &str) -> ConnectionPool {
        let profile = crate::profiles::get(name).unwrap();
        let resolver = Arc::new(Resolver::new());
        let session_cache = Arc::new(TlsSessionCache::default());
        ConnectionPool::new(
            profile,
            Arc::new(TlsAdapter::new(true, session_cache.clone())),
            resolver.clone(),
            Arc::new(EchFetcher::new(resolver)),
            session_cache,
        )
    }

    #[tokio::test]
    async fn test_promote_demote_and_network_error_rules() {
        let pool = test_pool();
        let origin = Origin::new("https", "example.test", 443);

        assert_eq!(pool.capability(&origin), (Unknown, Unknown));

        pool.promote(&origin, Protocol::H2);
        assert_eq!(pool.capability(&origin), (Unknown, Supported));

        // 类型化失败（ALPN 不匹配）降级
        pool.record_failure(
            &origin,
            Protocol::H3,
            &CloakError::Handshake(HandshakeError::NoProtocolNegotiated),
        );
        assert_eq!(pool.capability(&origin), (Unsupported, Supported));

        // 网络错误不改状态
        pool.record_failure(&origin, Protocol::H2, &CloakError::Timeout);
        pool.record_failure(
            &origin,
            Protocol::H2,
            &CloakError::Io(std::io::Error::other("连接被拒")),
        );
        assert_eq!(pool.capability(&origin), (Unsupported, Supported));
    }

    #[tokio::test]
    async fn test_zero_rtt_requires_issued_ticket() {
        let pool = test_pool();
        let origin = Origin::new("https", "example.test", 443);

        // 无票据登记：即便 profile 允许 0-RTT 也不得尝试
        assert!(pool.profile.zero_rtt);
        assert!(!pool.zero_rtt_allowed(&origin));

        // 签发事件登记后（桥接的真实写入路径）才放行
        pool.session_cache.insert(
            &TlsSessionCache::cache_key("h3", "example.test", 443),
            crate::http_client::session_cache::TICKET_MARKER.to_vec(),
            Vec::new(),
        );
        assert!(pool.zero_rtt_allowed(&origin));

        // 其他协议的票据不解锁 H3 的 0-RTT
        let other = Origin::new("https", "other.test", 443);
        pool.session_cache.insert(
            &TlsSessionCache::cache_key("h2", "other.test", 443),
            crate::http_client::session_cache::TICKET_MARKER.to_vec(),
            Vec::new(),
        );
        assert!(!pool.zero_rtt_allowed(&other));
    }

    #[tokio::test]
    async fn test_zero_rtt_blocked_by_profile() {
        // firefox profile 不允许 0-RTT：有票据也不放行
        let pool = test_pool_with_profile("firefox-135");
        let origin = Origin::new("https", "example.test", 443);
        pool.session_cache.insert(
            &TlsSessionCache::cache_key("h3", "example.test", 443),
            crate::http_client::session_cache::TICKET_MARKER.to_vec(),
            Vec::new(),
        );
        assert!(!pool.zero_rtt_allowed(&origin));
    }

    #[tokio::test]
    async fn test_cert_failure_does_not_demote() {
        let pool = test_pool();
        let origin = Origin::new("https", "example.test", 443);
        pool.record_failure(
            &origin,
            Protocol::H2,
            &CloakError::Handshake(HandshakeError::CertVerificationFailed("过期".into())),
        );
        assert_eq!(pool.capability(&origin), (Unknown, Unknown));
    }
}
