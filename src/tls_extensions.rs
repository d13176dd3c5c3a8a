//! TLS 扩展模块
//!
//! 实现 ClientHello 中各扩展的编码。每个扩展实现 `TLSExtension`：
//! `extension_id()` 返回扩展类型，`marshal()` 返回扩展数据（不含类型与长度前缀，
//! 前缀由 ClientHello 序列化器统一写入）。

use crate::dicttls::extension_types::*;
use std::any::Any;

/// TLS 扩展 trait
pub trait TLSExtension: std::fmt::Debug + Send + Sync {
    fn extension_id(&self) -> u16;
    fn marshal(&self) -> Vec<u8>;
    fn as_any(&self) -> &dyn Any;
}

/// 写入 u16 大端
fn put_u16(data: &mut Vec<u8>, v: u16) {
    data.push((v >> 8) as u8);
    data.push((v & 0xff) as u8);
}

/// GREASE 扩展
///
/// `value` 是扩展类型本身（GREASE 表中的值），`data` 是扩展数据。
/// Chrome 在扩展列表头部放一个空数据的 GREASE，尾部放一个单零字节的 GREASE。
#[derive(Debug, Clone)]
pub struct GREASEExtension {
    pub value: u16,
    pub data: Vec<u8>,
}

impl GREASEExtension {
    pub fn new(value: u16) -> Self {
        Self {
            value,
            data: Vec::new(),
        }
    }

    pub fn with_data(value: u16, data: Vec<u8>) -> Self {
        Self { value, data }
    }
}

impl TLSExtension for GREASEExtension {
    fn extension_id(&self) -> u16 {
        self.value
    }

    fn marshal(&self) -> Vec<u8> {
        self.data.clone()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// SNI (Server Name Indication) 扩展
#[derive(Debug, Clone)]
pub struct SNIExtension {
    pub server_name: String,
}

impl SNIExtension {
    pub fn new(server_name: String) -> Self {
        Self { server_name }
    }
}

impl TLSExtension for SNIExtension {
    fn extension_id(&self) -> u16 {
        EXT_TYPE_SERVER_NAME
    }

    fn marshal(&self) -> Vec<u8> {
        let name_bytes = self.server_name.as_bytes();
        let mut data = Vec::with_capacity(5 + name_bytes.len());
        // server_name_list 长度
        put_u16(&mut data, (name_bytes.len() + 3) as u16);
        data.push(0); // NameType: host_name
        put_u16(&mut data, name_bytes.len() as u16);
        data.extend_from_slice(name_bytes);
        data
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// ALPN (Application-Layer Protocol Negotiation) 扩展
#[derive(Debug, Clone)]
pub struct ALPNExtension {
    pub protocols: Vec<String>,
}

impl ALPNExtension {
    pub fn new(protocols: Vec<String>) -> Self {
        Self { protocols }
    }
}

impl TLSExtension for ALPNExtension {
    fn extension_id(&self) -> u16 {
        EXT_TYPE_APPLICATION_LAYER_PROTOCOL_NEGOTIATION
    }

    fn marshal(&self) -> Vec<u8> {
        let total: usize = self.protocols.iter().map(|p| p.len() + 1).sum();
        let mut data = Vec::with_capacity(2 + total);
        put_u16(&mut data, total as u16);
        for protocol in &self.protocols {
            data.push(protocol.len() as u8);
            data.extend_from_slice(protocol.as_bytes());
        }
        data
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Signature Algorithms 扩展
#[derive(Debug, Clone)]
pub struct SignatureAlgorithmsExtension {
    pub algorithms: Vec<u16>,
}

impl SignatureAlgorithmsExtension {
    pub fn new(algorithms: Vec<u16>) -> Self {
        Self { algorithms }
    }
}

impl TLSExtension for SignatureAlgorithmsExtension {
    fn extension_id(&self) -> u16 {
        EXT_TYPE_SIGNATURE_ALGORITHMS
    }

    fn marshal(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(2 + self.algorithms.len() * 2);
        put_u16(&mut data, (self.algorithms.len() * 2) as u16);
        for alg in &self.algorithms {
            put_u16(&mut data, *alg);
        }
        data
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Supported Versions 扩展
#[derive(Debug, Clone)]
pub struct SupportedVersionsExtension {
    pub versions: Vec<u16>,
}

impl SupportedVersionsExtension {
    pub fn new(versions: Vec<u16>) -> Self {
        Self { versions }
    }
}

impl TLSExtension for SupportedVersionsExtension {
    fn extension_id(&self) -> u16 {
        EXT_TYPE_SUPPORTED_VERSIONS
    }

    fn marshal(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(1 + self.versions.len() * 2);
        data.push((self.versions.len() * 2) as u8);
        for version in &self.versions {
            put_u16(&mut data, *version);
        }
        data
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Supported Groups（椭圆曲线）扩展
#[derive(Debug, Clone)]
pub struct SupportedCurvesExtension {
    pub curves: Vec<u16>,
}

impl SupportedCurvesExtension {
    pub fn new(curves: Vec<u16>) -> Self {
        Self { curves }
    }
}

impl TLSExtension for SupportedCurvesExtension {
    fn extension_id(&self) -> u16 {
        EXT_TYPE_SUPPORTED_GROUPS
    }

    fn marshal(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(2 + self.curves.len() * 2);
        put_u16(&mut data, (self.curves.len() * 2) as u16);
        for curve in &self.curves {
            put_u16(&mut data, *curve);
        }
        data
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// EC Point Formats 扩展（仅 TCP TLS；QUIC 下禁止）
#[derive(Debug, Clone)]
pub struct SupportedPointsExtension {
    pub point_formats: Vec<u8>,
}

impl SupportedPointsExtension {
    pub fn new(point_formats: Vec<u8>) -> Self {
        Self { point_formats }
    }
}

impl TLSExtension for SupportedPointsExtension {
    fn extension_id(&self) -> u16 {
        EXT_TYPE_EC_POINT_FORMATS
    }

    fn marshal(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(1 + self.point_formats.len());
        data.push(self.point_formats.len() as u8);
        data.extend_from_slice(&self.point_formats);
        data
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Key Share 条目
#[derive(Debug, Clone)]
pub struct KeyShare {
    pub group: u16,
    pub data: Vec<u8>,
}

/// Key Share 扩展
#[derive(Debug, Clone)]
pub struct KeyShareExtension {
    pub key_shares: Vec<KeyShare>,
}

impl KeyShareExtension {
    pub fn new(key_shares: Vec<KeyShare>) -> Self {
        Self { key_shares }
    }
}

impl TLSExtension for KeyShareExtension {
    fn extension_id(&self) -> u16 {
        EXT_TYPE_KEY_SHARE
    }

    fn marshal(&self) -> Vec<u8> {
        let total: usize = self.key_shares.iter().map(|s| 4 + s.data.len()).sum();
        let mut data = Vec::with_capacity(2 + total);
        put_u16(&mut data, total as u16);
        for share in &self.key_shares {
            put_u16(&mut data, share.group);
            put_u16(&mut data, share.data.len() as u16);
            data.extend_from_slice(&share.data);
        }
        data
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// PSK Key Exchange Modes 扩展
#[derive(Debug, Clone)]
pub struct PSKKeyExchangeModesExtension {
    pub modes: Vec<u8>,
}

impl PSKKeyExchangeModesExtension {
    pub fn new(modes: Vec<u8>) -> Self {
        Self { modes }
    }
}

impl TLSExtension for PSKKeyExchangeModesExtension {
    fn extension_id(&self) -> u16 {
        EXT_TYPE_PSK_KEY_EXCHANGE_MODES
    }

    fn marshal(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(1 + self.modes.len());
        data.push(self.modes.len() as u8);
        data.extend_from_slice(&self.modes);
        data
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Pre-Shared Key 扩展（会话恢复 / 0-RTT）
///
/// 必须是扩展列表的最后一个（RFC 8446 §4.2.11）。binder 在真实握手中由
/// TLS 引擎基于握手摘要填充；此处按长度占位。
#[derive(Debug, Clone)]
pub struct PreSharedKeyExtension {
    pub identity: Vec<u8>,
    pub obfuscated_ticket_age: u32,
    pub binder_len: usize,
}

impl PreSharedKeyExtension {
    pub fn new(identity: Vec<u8>, obfuscated_ticket_age: u32) -> Self {
        Self {
            identity,
            obfuscated_ticket_age,
            binder_len: 32, // SHA-256 binder
        }
    }
}

impl TLSExtension for PreSharedKeyExtension {
    fn extension_id(&self) -> u16 {
        EXT_TYPE_PRE_SHARED_KEY
    }

    fn marshal(&self) -> Vec<u8> {
        let mut data = Vec::new();
        // identities
        put_u16(&mut data, (2 + self.identity.len() + 4) as u16);
        put_u16(&mut data, self.identity.len() as u16);
        data.extend_from_slice(&self.identity);
        data.extend_from_slice(&self.obfuscated_ticket_age.to_be_bytes());
        // binders
        put_u16(&mut data, (1 + self.binder_len) as u16);
        data.push(self.binder_len as u8);
        data.extend(std::iter::repeat(0u8).take(self.binder_len));
        data
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Session Ticket 扩展（TLS 1.2 遗留，数据为空）
#[derive(Debug, Clone)]
pub struct SessionTicketExtension;

impl TLSExtension for SessionTicketExtension {
    fn extension_id(&self) -> u16 {
        EXT_TYPE_SESSION_TICKET
    }

    fn marshal(&self) -> Vec<u8> {
        Vec::new()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Extended Master Secret 扩展（仅 TCP TLS；QUIC 下禁止）
#[derive(Debug, Clone)]
pub struct ExtendedMasterSecretExtension;

impl TLSExtension for ExtendedMasterSecretExtension {
    fn extension_id(&self) -> u16 {
        EXT_TYPE_EXTENDED_MASTER_SECRET
    }

    fn marshal(&self) -> Vec<u8> {
        Vec::new()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Renegotiation Info 扩展（仅 TCP TLS；QUIC 下禁止）
#[derive(Debug, Clone)]
pub struct RenegotiationInfoExtension;

impl TLSExtension for RenegotiationInfoExtension {
    fn extension_id(&self) -> u16 {
        EXT_TYPE_RENEGOTIATION_INFO
    }

    fn marshal(&self) -> Vec<u8> {
        // 初始握手：renegotiated_connection 为空
        vec![0]
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// SCT (Signed Certificate Timestamp) 扩展（仅 TCP TLS；QUIC 下禁止）
#[derive(Debug, Clone)]
pub struct SCTExtension;

impl TLSExtension for SCTExtension {
    fn extension_id(&self) -> u16 {
        EXT_TYPE_SIGNED_CERTIFICATE_TIMESTAMP
    }

    fn marshal(&self) -> Vec<u8> {
        Vec::new()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Status Request (OCSP) 扩展（仅 TCP TLS；QUIC 下禁止）
#[derive(Debug, Clone)]
pub struct StatusRequestExtension;

impl TLSExtension for StatusRequestExtension {
    fn extension_id(&self) -> u16 {
        EXT_TYPE_STATUS_REQUEST
    }

    fn marshal(&self) -> Vec<u8> {
        // CertificateStatusType: OCSP + 空的 responder_id_list 与 request_extensions
        vec![0x01, 0, 0, 0, 0]
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Application Settings (ALPS) 扩展
#[derive(Debug, Clone)]
pub struct ApplicationSettingsExtension {
    pub codepoint: u16,
    pub protocols: Vec<String>,
}

impl ApplicationSettingsExtension {
    /// 新 codepoint (17613)，Chrome 136+ 使用
    pub fn new(protocols: Vec<String>) -> Self {
        Self {
            codepoint: EXT_TYPE_APPLICATION_SETTINGS_NEW,
            protocols,
        }
    }

    /// 旧 codepoint (17513)
    pub fn legacy(protocols: Vec<String>) -> Self {
        Self {
            codepoint: EXT_TYPE_APPLICATION_SETTINGS,
            protocols,
        }
    }
}

impl TLSExtension for ApplicationSettingsExtension {
    fn extension_id(&self) -> u16 {
        self.codepoint
    }

    fn marshal(&self) -> Vec<u8> {
        let total: usize = self.protocols.iter().map(|p| p.len() + 1).sum();
        let mut data = Vec::with_capacity(2 + total);
        put_u16(&mut data, total as u16);
        for protocol in &self.protocols {
            data.push(protocol.len() as u8);
            data.extend_from_slice(protocol.as_bytes());
        }
        data
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Compress Certificate 扩展
#[derive(Debug, Clone)]
pub struct CompressCertExtension {
    pub algorithms: Vec<u16>,
}

impl CompressCertExtension {
    pub fn new(algorithms: Vec<u16>) -> Self {
        Self { algorithms }
    }
}

impl TLSExtension for CompressCertExtension {
    fn extension_id(&self) -> u16 {
        EXT_TYPE_COMPRESS_CERTIFICATE
    }

    fn marshal(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(1 + self.algorithms.len() * 2);
        data.push((self.algorithms.len() * 2) as u8);
        for alg in &self.algorithms {
            put_u16(&mut data, *alg);
        }
        data
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Padding 扩展
///
/// 数据长度由 ClientHello 序列化器按 BoringSSL 规则回填；构造时为 0。
#[derive(Debug, Clone, Default)]
pub struct PaddingExtension {
    pub pad_len: usize,
}

impl PaddingExtension {
    pub fn new() -> Self {
        Self { pad_len: 0 }
    }
}

impl TLSExtension for PaddingExtension {
    fn extension_id(&self) -> u16 {
        EXT_TYPE_PADDING
    }

    fn marshal(&self) -> Vec<u8> {
        vec![0u8; self.pad_len]
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// ECH (Encrypted Client Hello) 扩展
///
/// 两种形态共用同一线上布局：
/// - GREASE 形态：config_id、enc、payload 全部为随机字节；
/// - 真实形态：config_id/enc 来自 DNS 下发的 ECHConfig，payload 长度与
///   加密后的 inner ClientHello 一致（密文由 TLS 引擎在真实握手中产生）。
#[derive(Debug, Clone)]
pub struct EncryptedClientHelloExtension {
    /// HPKE KDF ID（0x0001 = HKDF-SHA256）
    pub kdf_id: u16,
    /// HPKE AEAD ID（0x0001 = AES-128-GCM）
    pub aead_id: u16,
    pub config_id: u8,
    pub enc: Vec<u8>,
    pub payload: Vec<u8>,
    /// 是否 GREASE 形态（不影响线上字节布局）
    pub is_grease: bool,
}

impl EncryptedClientHelloExtension {
    /// 构造 GREASE ECH，payload 长度取 Chrome 使用的档位
    pub fn grease() -> Self {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        // payload 档位：(128..=224 步进 32) + 16 字节 AEAD 开销
        let payload_len = 16 + 32 * rng.gen_range(4..=7);
        let mut enc = vec![0u8; 32];
        rng.fill(&mut enc[..]);
        let mut payload = vec![0u8; payload_len];
        rng.fill(&mut payload[..]);
        Self {
            kdf_id: 0x0001,
            aead_id: 0x0001,
            config_id: rng.gen(),
            enc,
            payload,
            is_grease: true,
        }
    }

    /// 基于真实 ECHConfig 构造 outer 扩展
    pub fn real(config_id: u8, kdf_id: u16, aead_id: u16, enc: Vec<u8>, payload: Vec<u8>) -> Self {
        Self {
            kdf_id,
            aead_id,
            config_id,
            enc,
            payload,
            is_grease: false,
        }
    }
}

impl TLSExtension for EncryptedClientHelloExtension {
    fn extension_id(&self) -> u16 {
        EXT_TYPE_ECH
    }

    fn marshal(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(8 + self.enc.len() + self.payload.len());
        data.push(0x00); // ECHClientHelloType: outer
        put_u16(&mut data, self.kdf_id);
        put_u16(&mut data, self.aead_id);
        data.push(self.config_id);
        put_u16(&mut data, self.enc.len() as u16);
        data.extend_from_slice(&self.enc);
        put_u16(&mut data, self.payload.len() as u16);
        data.extend_from_slice(&self.payload);
        data
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// QUIC Transport Parameters 扩展（仅 QUIC 模式）
///
/// 参数按 profile 声明的顺序编码为 varint(id) + varint(len) + value。
#[derive(Debug, Clone)]
pub struct QuicTransportParametersExtension {
    pub params: Vec<(u64, Vec<u8>)>,
}

impl QuicTransportParametersExtension {
    pub fn new(params: Vec<(u64, Vec<u8>)>) -> Self {
        Self { params }
    }

    /// QUIC varint 编码（RFC 9000 §16）
    pub fn put_varint(data: &mut Vec<u8>, v: u64) {
        if v < 1 << 6 {
            data.push(v as u8);
        } else if v < 1 << 14 {
            data.extend_from_slice(&((v as u16) | 0x4000).to_be_bytes());
        } else if v < 1 << 30 {
            data.extend_from_slice(&((v as u32) | 0x8000_0000).to_be_bytes());
        } else {
            data.extend_from_slice(&(v | 0xc000_0000_0000_0000).to_be_bytes());
        }
    }
}

impl TLSExtension for QuicTransportParametersExtension {
    fn extension_id(&self) -> u16 {
        EXT_TYPE_QUIC_TRANSPORT_PARAMETERS
    }

    fn marshal(&self) -> Vec<u8> {
        let mut data = Vec::new();
        for (id, value) in &self.params {
            Self::put_varint(&mut data, *id);
            Self::put_varint(&mut data, value.len() as u64);
            data.extend_from_slice(value);
        }
        data
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// QUIC 模式下必须剔除的 TLS 1.2 遗留扩展
pub const QUIC_FORBIDDEN_EXTENSIONS: &[u16] = &[
    EXT_TYPE_EXTENDED_MASTER_SECRET,
    EXT_TYPE_STATUS_REQUEST,
    EXT_TYPE_SIGNED_CERTIFICATE_TIMESTAMP,
    EXT_TYPE_EC_POINT_FORMATS,
    EXT_TYPE_RENEGOTIATION_INFO,
    EXT_TYPE_SESSION_TICKET,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sni_marshal() {
        let ext = SNIExtension::new("example.test".to_string());
        let data = ext.marshal();
        // list_len(2) + type(1) + name_len(2) + name
        assert_eq!(data.len(), 5 + 12);
        assert_eq!(&data[..2], &[0, 15]);
        assert_eq!(data[2], 0);
        assert_eq!(&data[5..], b"example.test");
    }

    #[test]
    fn test_alpn_marshal() {
        let ext = ALPNExtension::new(vec!["h2".to_string(), "http/1.1".to_string()]);
        let data = ext.marshal();
        assert_eq!(&data[..2], &[0, 12]);
        assert_eq!(data[2], 2);
        assert_eq!(&data[3..5], b"h2");
        assert_eq!(data[5], 8);
    }

    #[test]
    fn test_key_share_marshal() {
        let ext = KeyShareExtension::new(vec![KeyShare {
            group: 0x001d,
            data: vec![0xaa; 32],
        }]);
        let data = ext.marshal();
        assert_eq!(&data[..2], &[0, 36]);
        assert_eq!(&data[2..4], &[0x00, 0x1d]);
        assert_eq!(&data[4..6], &[0, 32]);
    }

    #[test]
    fn test_grease_ech_shape() {
        let ext = EncryptedClientHelloExtension::grease();
        let data = ext.marshal();
        assert_eq!(data[0], 0x00);
        assert_eq!(&data[1..3], &[0x00, 0x01]);
        assert_eq!(ext.enc.len(), 32);
        assert!(ext.payload.len() >= 16 + 128);
    }

    #[test]
    fn test_quic_varint() {
        let mut data = Vec::new();
        QuicTransportParametersExtension::put_varint(&mut data, 37);
        assert_eq!(data, vec![37]);
        data.clear();
        QuicTransportParametersExtension::put_varint(&mut data, 15663105);
        assert_eq!(data.len(), 4);
        assert_eq!(data[0] >> 6, 0b10);
    }

    #[test]
    fn test_psk_is_sized_for_binder() {
        let ext = PreSharedKeyExtension::new(vec![1, 2, 3], 1000);
        let data = ext.marshal();
        // identities(2+2+3+4) + binders(2+1+32)
        assert_eq!(data.len(), 11 + 35);
    }
}
