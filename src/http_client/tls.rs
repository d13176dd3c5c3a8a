//! TLS 适配层
//!
//! 两个职责：
//! 1. 产出与 profile 逐字节一致的 ClientHello（`build_client_hello`），
//!    供指纹校验与定制 TLS 引擎消费；
//! 2. 构建 rustls 客户端配置并完成真实握手（ALPN、会话缓存、证书校验）。
//!
//! 票据登记走 `TicketBridge`：rustls 只在服务器真正签发
//! NewSessionTicket（或可恢复的 TLS 1.2 会话）时回调 `ClientSessionStore`，
//! 桥接器借此把"该源签发过票据"写进 `TlsSessionCache`。PSK 供给与
//! 0-RTT 判定都以这个事件为准，握手成功本身不产生票据条目。
//!
//! 把 ClientHelloSpec 应用到真实握手需要配套的 rustls fork
//! （`rustls-client-hello-customizer` 特性）；默认构建下真实握手走
//! 标准 rustls，Spec 字节用于黄金样本与外部引擎。

use super::http1::AsyncStream;
use super::session_cache::{TlsSessionCache, TICKET_MARKER};
use crate::dns::EchConfigList;
use crate::error::{CloakError, HandshakeError, Result};
use crate::profiles::BrowserProfile;
use crate::tls_config::{EchOffer, HelloParams, PskOffer, TransportMode};
use rustls::client::{
    ClientSessionMemoryCache, ClientSessionStore, Tls12ClientSessionValue, Tls13ClientSessionValue,
};
use rustls::{NamedGroup, ServerName};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

/// TLS 适配器（会话级）
pub struct TlsAdapter {
    /// rustls 层的票据缓存（驱动真实会话恢复）
    resumption: Arc<ClientSessionMemoryCache>,
    /// 票据登记表（签发事件经 `TicketBridge` 写入）
    tickets: Arc<TlsSessionCache>,
    verify_tls: bool,
}

impl TlsAdapter {
    pub fn new(verify_tls: bool, tickets: Arc<TlsSessionCache>) -> Self {
        Self {
            resumption: Arc::new(ClientSessionMemoryCache::new(64)),
            tickets,
            verify_tls,
        }
    }

    /// 组装一次握手的 ClientHello 参数
    ///
    /// ECH：有 DNS 配置则真实 outer，否则按 profile 决定是否 GREASE；
    /// PSK：该源登记过票据时才带 pre_shared_key。
    pub fn hello_params(
        &self,
        profile: &BrowserProfile,
        host: &str,
        mode: TransportMode,
        ech: Option<&EchConfigList>,
        cache_key: &str,
    ) -> HelloParams {
        let mut params = match mode {
            TransportMode::Tcp => HelloParams::tcp(host),
            TransportMode::Quic => HelloParams::quic(host, profile.quic_params.clone()),
        };

        params.ech = match ech {
            Some(list) => {
                let config = list.preferred();
                let (kdf_id, aead_id) = config.cipher_suites.first().copied().unwrap_or((1, 1));
                Some(EchOffer::Real {
                    config_id: config.config_id,
                    kdf_id,
                    aead_id,
                    enc: config.public_key.clone(),
                    // 密文长度 = inner hello 估算 + AEAD 开销档位
                    payload_len: 16 + 32 * 7,
                })
            }
            None if profile.grease_ech => Some(EchOffer::Grease),
            None => None,
        };

        if let Some(entry) = self.tickets.get(cache_key) {
            params.psk = Some(PskOffer {
                identity: entry.ticket.clone(),
                obfuscated_ticket_age: entry.age_millis() as u32,
            });
        }

        params
    }

    /// 产出完整 ClientHello 字节（握手消息）
    pub fn build_client_hello(&self, profile: &BrowserProfile, params: &HelloParams) -> Vec<u8> {
        let spec = (profile.spec_factory)(params);
        spec.marshal(params.mode)
    }

    /// 构建 rustls 客户端配置
    ///
    /// `cache_key` 标识本次拨号的 `协议:主机:端口`；该连接上签发的票据
    /// 会以此键登记。
    pub fn client_config(
        &self,
        alpn: &[&[u8]],
        enable_early_data: bool,
        cache_key: &str,
    ) -> Arc<rustls::ClientConfig> {
        let mut config = if self.verify_tls {
            let mut root_store = rustls::RootCertStore::empty();
            root_store.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|ta| {
                rustls::OwnedTrustAnchor::from_subject_spki_name_constraints(
                    ta.subject,
                    ta.spki,
                    ta.name_constraints,
                )
            }));
            rustls::ClientConfig::builder()
                .with_safe_defaults()
                .with_root_certificates(root_store)
                .with_no_client_auth()
        } else {
            #[cfg(feature = "dangerous_configuration")]
            {
                rustls::ClientConfig::builder()
                    .with_safe_defaults()
                    .with_custom_certificate_verifier(Arc::new(NoVerifier))
                    .with_no_client_auth()
            }
            #[cfg(not(feature = "dangerous_configuration"))]
            {
                let mut root_store = rustls::RootCertStore::empty();
                root_store.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|ta| {
                    rustls::OwnedTrustAnchor::from_subject_spki_name_constraints(
                        ta.subject,
                        ta.spki,
                        ta.name_constraints,
                    )
                }));
                rustls::ClientConfig::builder()
                    .with_safe_defaults()
                    .with_root_certificates(root_store)
                    .with_no_client_auth()
            }
        };

        config.alpn_protocols = alpn.iter().map(|p| p.to_vec()).collect();
        config.resumption = rustls::client::Resumption::store(Arc::new(TicketBridge {
            inner: self.resumption.clone(),
            tickets: self.tickets.clone(),
            cache_key: cache_key.to_string(),
        }));
        config.enable_early_data = enable_early_data;
        Arc::new(config)
    }

    /// TCP + TLS 拨号；返回流与协商出的 ALPN
    ///
    /// `require_alpn`：非空时，协商结果不在列表内按 `NoProtocolNegotiated`
    /// 处理（典型：指定 h2 拨号被降到 http/1.1 的对端）。
    pub async fn connect_tcp(
        &self,
        remote: SocketAddr,
        host: &str,
        alpn: &[&[u8]],
        require_alpn: Option<&[u8]>,
        cache_key: &str,
    ) -> Result<(Box<dyn AsyncStream>, Option<Vec<u8>>)> {
        let tcp = TcpStream::connect(remote)
            .await
            .map_err(CloakError::Io)?;
        tcp.set_nodelay(true).ok();

        let server_name = ServerName::try_from(host)
            .map_err(|_| CloakError::config(format!("非法服务器名: {}", host)))?;
        let connector = TlsConnector::from(self.client_config(alpn, false, cache_key));
        let stream = connector
            .connect(server_name, tcp)
            .await
            .map_err(map_tls_error)?;

        let negotiated = stream.get_ref().1.alpn_protocol().map(|p| p.to_vec());
        if let Some(required) = require_alpn {
            if negotiated.as_deref() != Some(required) {
                return Err(CloakError::Handshake(HandshakeError::NoProtocolNegotiated));
            }
        }
        Ok((Box::new(stream), negotiated))
    }
}

/// rustls 票据事件到 `TlsSessionCache` 的桥接器
///
/// 每次拨号一个实例，绑定该连接的缓存键；存取委托给共享的
/// `ClientSessionMemoryCache`，真实恢复数据始终留在 rustls 侧。
/// 登记只发生在签发事件上：`insert_tls13_ticket`（服务器发来
/// NewSessionTicket）与 `set_tls12_session`（可恢复的 TLS 1.2 会话）。
/// rustls 取空票据时同步清除登记，避免供给已不存在的 PSK。
struct TicketBridge {
    inner: Arc<ClientSessionMemoryCache>,
    tickets: Arc<TlsSessionCache>,
    cache_key: String,
}

impl std::fmt::Debug for TicketBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TicketBridge")
            .field("cache_key", &self.cache_key)
            .finish()
    }
}

impl ClientSessionStore for TicketBridge {
    fn set_kx_hint(&self, server_name: &ServerName, group: NamedGroup) {
        self.inner.set_kx_hint(server_name, group);
    }

    fn kx_hint(&self, server_name: &ServerName) -> Option<NamedGroup> {
        self.inner.kx_hint(server_name)
    }

    fn set_tls12_session(&self, server_name: &ServerName, value: Tls12ClientSessionValue) {
        // TLS 1.2 会话可恢复，等价于票据签发
        self.tickets
            .insert(&self.cache_key, TICKET_MARKER.to_vec(), Vec::new());
        self.inner.set_tls12_session(server_name, value);
    }

    fn tls12_session(&self, server_name: &ServerName) -> Option<Tls12ClientSessionValue> {
        self.inner.tls12_session(server_name)
    }

    fn remove_tls12_session(&self, server_name: &ServerName) {
        self.tickets.remove(&self.cache_key);
        self.inner.remove_tls12_session(server_name);
    }

    fn insert_tls13_ticket(&self, server_name: &ServerName, value: Tls13ClientSessionValue) {
        // 服务器真正签发了 NewSessionTicket 才登记
        self.tickets
            .insert(&self.cache_key, TICKET_MARKER.to_vec(), Vec::new());
        self.inner.insert_tls13_ticket(server_name, value);
    }

    fn take_tls13_ticket(&self, server_name: &ServerName) -> Option<Tls13ClientSessionValue> {
        let ticket = self.inner.take_tls13_ticket(server_name);
        if ticket.is_none() {
            // rustls 侧已无票据，登记同步失效
            self.tickets.remove(&self.cache_key);
        }
        ticket
    }
}

/// rustls IO 错误分类：证书 / 普通握手失败
fn map_tls_error(e: std::io::Error) -> CloakError {
    let text = e.to_string();
    if text.contains("certificate") || text.contains("Certificate") {
        CloakError::Handshake(HandshakeError::CertVerificationFailed(text))
    } else {
        CloakError::Handshake(HandshakeError::HandshakeFailed(text))
    }
}

/// 不做校验的证书验证器（仅调试）
#[cfg(feature = "dangerous_configuration")]
struct NoVerifier;

#[cfg(feature = "dangerous_configuration")]
impl rustls::client::ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::Certificate,
        _intermediates: &[rustls::Certificate],
        _server_name: &ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: std::time::SystemTime,
    ) -> std::result::Result<rustls::client::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::ServerCertVerified::assertion())
    }
}

/// 定制 ClientHello 的交接点
///
/// 配套的 rustls fork 在发出 ClientHello 前按 SNI 取走这里暂存的字节。
#[cfg(feature = "rustls-client-hello-customizer")]
pub mod customizer {
    use once_cell::sync::Lazy;
    use std::collections::HashMap;
    use std::sync::Mutex;

    static PENDING: Lazy<Mutex<HashMap<String, Vec<u8>>>> =
        Lazy::new(|| Mutex::new(HashMap::new()));

    /// 暂存某个 SNI 的定制 ClientHello
    pub fn stage_custom_hello(sni: &str, hello: Vec<u8>) {
        if let Ok(mut pending) = PENDING.lock() {
            pending.insert(sni.to_string(), hello);
        }
    }

    /// fork 侧取走（取后即删）
    pub fn take_custom_hello(sni: &str) -> Option<Vec<u8>> {
        PENDING.lock().ok()?.remove(sni)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profiles;

    fn adapter_with_cache() -> (TlsAdapter, Arc<TlsSessionCache>) {
        let cache = Arc::new(TlsSessionCache::new(32));
        (TlsAdapter::new(true, cache.clone()), cache)
    }

    #[test]
    fn test_hello_params_grease_ech_when_no_config() {
        let (adapter, _cache) = adapter_with_cache();
        let profile = profiles::get("chrome-143").unwrap();
        let params = adapter.hello_params(
            profile,
            "example.test",
            TransportMode::Tcp,
            None,
            "h2:example.test:443",
        );
        assert!(matches!(params.ech, Some(EchOffer::Grease)));
        assert!(params.psk.is_none());
    }

    #[test]
    fn test_hello_params_real_ech_with_config() {
        let (adapter, _cache) = adapter_with_cache();
        let profile = profiles::get("chrome-143").unwrap();

        let list = EchConfigList {
            raw: vec![],
            configs: vec![crate::dns::EchConfig {
                config_id: 9,
                kem_id: 0x20,
                public_key: vec![0xaa; 32],
                cipher_suites: vec![(1, 1)],
                public_name: "cdn.example".to_string(),
            }],
        };
        let params = adapter.hello_params(
            profile,
            "example.test",
            TransportMode::Tcp,
            Some(&list),
            "h2:example.test:443",
        );
        match params.ech {
            Some(EchOffer::Real { config_id, ref enc, .. }) => {
                assert_eq!(config_id, 9);
                assert_eq!(enc.len(), 32);
            }
            other => panic!("期望真实 ECH，得到 {:?}", other),
        }
    }

    #[test]
    fn test_hello_params_psk_only_after_ticket_registered() {
        let (adapter, cache) = adapter_with_cache();
        let profile = profiles::get("chrome-143").unwrap();

        // 未登记票据：不得供给 PSK
        let params = adapter.hello_params(
            profile,
            "example.test",
            TransportMode::Tcp,
            None,
            "h2:example.test:443",
        );
        assert!(params.psk.is_none());

        // 登记（真实路径由 TicketBridge 在签发事件上写入）
        cache.insert("h2:example.test:443", vec![0x11; 48], vec![]);
        let params = adapter.hello_params(
            profile,
            "example.test",
            TransportMode::Tcp,
            None,
            "h2:example.test:443",
        );
        let psk = params.psk.expect("应带 PSK");
        assert_eq!(psk.identity, vec![0x11; 48]);
    }

    #[test]
    fn test_build_client_hello_marshal() {
        let (adapter, _cache) = adapter_with_cache();
        let profile = profiles::get("chrome-143").unwrap();
        let params = adapter.hello_params(
            profile,
            "example.test",
            TransportMode::Tcp,
            None,
            "h2:example.test:443",
        );
        let hello = adapter.build_client_hello(profile, &params);
        assert_eq!(hello[0], 0x01);
        let parsed = crate::tls_config::ParsedClientHello::parse(&hello).unwrap();
        assert_eq!(parsed.server_name.as_deref(), Some("example.test"));
    }
}
