//! HTTP/3 传输
//!
//! 使用 quinn + h3 建立 QUIC 会话。TLS 形态由 QUIC 模式的 ClientHello
//! 决定（TLS 1.2 遗留扩展被剔除，quic_transport_parameters 按 profile
//! 顺序编码）；quinn 的传输配置从同一份参数表映射，保证宣告值与行为
//! 一致。Initial 包由 quinn 填充到 ≥1200 字节。

use super::request::HttpMethod;
use super::response::HttpResponse;
use super::Protocol;
use crate::error::{CloakError, ConnectionError, HandshakeError, Result, StreamError};
use crate::profiles::BrowserProfile;
use bytes::Buf;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// QUIC varint 解码（profile 参数表里的值字节）
fn decode_varint(data: &[u8]) -> Option<u64> {
    let first = *data.first()?;
    let len = 1usize << (first >> 6);
    if data.len() < len {
        return None;
    }
    let mut value = (first & 0x3f) as u64;
    for byte in &data[1..len] {
        value = (value << 8) | *byte as u64;
    }
    Some(value)
}

/// 从 profile 的参数表取某个传输参数的数值
fn param(profile: &BrowserProfile, id: u64) -> Option<u64> {
    profile
        .quic_params
        .iter()
        .find(|(pid, _)| *pid == id)
        .and_then(|(_, value)| decode_varint(value))
}

/// 把 profile 的 QUIC 传输参数映射到 quinn 的传输配置
///
/// quinn 把这些值编进 ClientHello 的 quic_transport_parameters 扩展；
/// 映射保证线上宣告与实际行为一致。
pub fn build_transport_config(profile: &BrowserProfile) -> Result<quinn::TransportConfig> {
    let mut transport = quinn::TransportConfig::default();

    if let Some(idle) = param(profile, 0x01) {
        transport.max_idle_timeout(Some(
            Duration::from_millis(idle)
                .try_into()
                .map_err(|_| CloakError::config("max_idle_timeout 超界"))?,
        ));
    }
    if let Some(max_data) = param(profile, 0x04) {
        transport.receive_window(
            u32::try_from(max_data.min(u32::MAX as u64))
                .unwrap_or(u32::MAX)
                .into(),
        );
    }
    if let Some(stream_data) = param(profile, 0x05) {
        transport.stream_receive_window(
            u32::try_from(stream_data.min(u32::MAX as u64))
                .unwrap_or(u32::MAX)
                .into(),
        );
    }
    if let Some(bidi) = param(profile, 0x08) {
        transport.max_concurrent_bidi_streams(u32::try_from(bidi.min(u32::MAX as u64)).unwrap_or(100).into());
    }
    if let Some(uni) = param(profile, 0x09) {
        transport.max_concurrent_uni_streams(u32::try_from(uni.min(u32::MAX as u64)).unwrap_or(100).into());
    }
    transport.keep_alive_interval(Some(Duration::from_secs(10)));

    Ok(transport)
}

/// 把 quinn 连接错误映射到握手错误分类
fn map_connect_error(e: &quinn::ConnectionError) -> CloakError {
    match e {
        quinn::ConnectionError::VersionMismatch => {
            CloakError::Handshake(HandshakeError::VersionNegotiation(Vec::new()))
        }
        quinn::ConnectionError::TimedOut => CloakError::Timeout,
        quinn::ConnectionError::TransportError(te) => {
            CloakError::Handshake(HandshakeError::HandshakeFailed(te.to_string()))
        }
        other => CloakError::Connection(ConnectionError::Closed(other.to_string())),
    }
}

/// 一条 HTTP/3 连接
pub struct H3Connection {
    send_request: std::sync::Mutex<h3::client::SendRequest<h3_quinn::OpenStreams, bytes::Bytes>>,
    quic: quinn::Connection,
    /// 端点与连接同生命周期
    _endpoint: quinn::Endpoint,
    /// 本次握手是否走了 0-RTT
    pub zero_rtt: bool,
    pub established_at: Instant,
    pub last_used: std::sync::Mutex<Instant>,
}

impl H3Connection {
    /// 建立 QUIC 会话并完成 H3 初始化
    ///
    /// `tls_config` 由 TLS 适配层构建（ALPN=h3、会话缓存、可选 ECH）。
    /// `try_zero_rtt` 仅在 profile 允许且存在有效票据时为 true。
    pub async fn connect(
        remote: SocketAddr,
        server_name: &str,
        tls_config: Arc<rustls::ClientConfig>,
        profile: &BrowserProfile,
        try_zero_rtt: bool,
    ) -> Result<Self> {
        // 1. 按远端地址族绑定本地端点
        let bind_addr = match remote.ip() {
            IpAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            IpAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
        };
        let mut endpoint = quinn::Endpoint::client(bind_addr)
            .map_err(|e| CloakError::Connection(ConnectionError::Closed(format!("创建 endpoint 失败: {}", e))))?;

        let mut client_config = quinn::ClientConfig::new(tls_config);
        client_config.transport_config(Arc::new(build_transport_config(profile)?));
        endpoint.set_default_client_config(client_config);

        // 2. 连接（允许时尝试 0-RTT）
        let connecting = endpoint
            .connect(remote, server_name)
            .map_err(|e| CloakError::Connection(ConnectionError::Closed(format!("QUIC 连接失败: {}", e))))?;

        let (quic, zero_rtt) = if try_zero_rtt {
            match connecting.into_0rtt() {
                Ok((connection, accepted)) => {
                    // 0-RTT 数据是否被接受要等握手确认；这里只记录尝试成功
                    tokio::spawn(async move {
                        let _ = accepted.await;
                    });
                    (connection, true)
                }
                Err(connecting) => (
                    connecting.await.map_err(|e| map_connect_error(&e))?,
                    false,
                ),
            }
        } else {
            (connecting.await.map_err(|e| map_connect_error(&e))?, false)
        };

        // 3. H3 初始化（控制流 SETTINGS 由 h3 层发出）
        let (driver, send_request) = h3::client::new(h3_quinn::Connection::new(quic.clone()))
            .await
            .map_err(|e| {
                CloakError::Handshake(HandshakeError::HandshakeFailed(format!(
                    "HTTP/3 初始化失败: {}",
                    e
                )))
            })?;

        // 驱动连接直到关闭
        tokio::spawn(async move {
            let mut driver = driver;
            let _ = std::future::poll_fn(|cx| driver.poll_close(cx)).await;
        });

        Ok(Self {
            send_request: std::sync::Mutex::new(send_request),
            quic,
            _endpoint: endpoint,
            zero_rtt,
            established_at: Instant::now(),
            last_used: std::sync::Mutex::new(Instant::now()),
        })
    }

    /// 发送一个请求并读完整响应
    ///
    /// `headers` 名字已小写、顺序已定。伪头顺序由 h3 层内部固定，
    /// QUIC 指纹的主体在传输参数与 TLS 形态上。
    pub async fn send_request(
        &self,
        method: HttpMethod,
        url: &str,
        headers: &[(String, String)],
        body: Option<&[u8]>,
    ) -> Result<HttpResponse> {
        let mut builder = http::Request::builder().method(method.as_str()).uri(url);
        for (key, value) in headers {
            // :authority 从 URI 推导，host 头不得重复出现
            if key.eq_ignore_ascii_case("host") {
                continue;
            }
            builder = builder.header(key.as_str(), value.as_str());
        }
        let request = builder
            .body(())
            .map_err(|e| CloakError::config(format!("构建请求失败: {}", e)))?;

        let mut send_request = self.send_request.lock().unwrap().clone();
        let mut stream = send_request
            .send_request(request)
            .await
            .map_err(|e| map_h3_error(&e))?;

        if let Some(body) = body {
            stream
                .send_data(bytes::Bytes::copy_from_slice(body))
                .await
                .map_err(|e| map_h3_error(&e))?;
        }
        stream.finish().await.map_err(|e| map_h3_error(&e))?;

        let head = stream.recv_response().await.map_err(|e| map_h3_error(&e))?;

        let mut response = HttpResponse::new(head.status().as_u16(), Protocol::H3);
        response.status_text = head
            .status()
            .canonical_reason()
            .unwrap_or("")
            .to_string();
        for (key, value) in head.headers() {
            if let Ok(value) = value.to_str() {
                response.headers.push((key.as_str().to_string(), value.to_string()));
            }
        }

        let mut body_data = Vec::new();
        while let Some(mut chunk) = stream.recv_data().await.map_err(|e| map_h3_error(&e))? {
            let len = chunk.remaining();
            let mut data = vec![0u8; len];
            chunk.copy_to_slice(&mut data);
            body_data.extend_from_slice(&data);
        }

        if let Some(encoding) = response.header("content-encoding").map(|s| s.to_string()) {
            body_data = super::response::decode_body(&encoding, &body_data)?;
        }
        response.body = body_data;

        if let Ok(mut last_used) = self.last_used.lock() {
            *last_used = Instant::now();
        }
        Ok(response)
    }

    /// 回池判定：QUIC 会话未关闭
    pub fn is_reusable(&self) -> bool {
        self.quic.close_reason().is_none()
    }
}

/// h3 错误分类：流级 / 连接级
fn map_h3_error(e: &h3::Error) -> CloakError {
    let text = e.to_string();
    if text.contains("reset") || text.contains("Reset") {
        // 对端重置了单个请求流；连接本身可能仍然可用
        return CloakError::Stream(StreamError::H3Reset(0));
    }
    CloakError::Connection(ConnectionError::Closed(text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profiles;

    #[test]
    fn test_decode_varint() {
        assert_eq!(decode_varint(&[37]), Some(37));
        assert_eq!(decode_varint(&[0x44, 0xb0]), Some(1200));
        assert_eq!(decode_varint(&[0x80, 0x60, 0x00, 0x00]), Some(6291456));
        assert_eq!(decode_varint(&[]), None);
        assert_eq!(decode_varint(&[0x44]), None); // 截断
    }

    #[test]
    fn test_profile_param_lookup() {
        let profile = profiles::get("chrome-143").unwrap();
        assert_eq!(param(profile, 0x01), Some(30000));
        assert_eq!(param(profile, 0x05), Some(6291456));
        assert_eq!(param(profile, 0x99), None);
    }

    #[test]
    fn test_transport_config_builds_for_all_profiles() {
        for name in profiles::list() {
            let profile = profiles::get(name).unwrap();
            assert!(build_transport_config(profile).is_ok(), "{} 映射失败", name);
        }
    }
}
