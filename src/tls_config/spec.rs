//! ClientHelloSpec：完整的 TLS Client Hello 配置
//!
//! 每个浏览器工厂产出一份带顺序的密码套件与扩展列表。密钥份额逐次握手
//! 新生成；GREASE 取值来自 `GreasePolicy`；QUIC 模式下剔除 TLS 1.2 遗留
//! 扩展并携带 quic_transport_parameters。

use crate::dicttls::{
    cert_compression::CERT_COMPRESSION_BROTLI,
    cipher_suites as cs,
    point_formats::POINT_FORMAT_UNCOMPRESSED,
    psk_modes::PSK_MODE_DHE,
    signature_schemes as ss,
    supported_groups::{FFDHE2048, FFDHE3072, SECP521R1},
    CURVE_P256, CURVE_P384, X25519, X25519_MLKEM768,
};
use crate::tls_config::grease::GreasePolicy;
use crate::tls_extensions::*;
use ring::rand::{SecureRandom, SystemRandom};

/// TLS 版本常量
pub const VERSION_TLS12: u16 = 0x0303;
pub const VERSION_TLS13: u16 = 0x0304;

/// 压缩方法常量
const COMPRESSION_NONE: u8 = 0x00;

/// X25519MLKEM768 客户端份额长度（ML-KEM-768 封装公钥 1184 + X25519 32）
const MLKEM768_SHARE_LEN: usize = 1216;

/// 底层传输形态，决定扩展集合
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    Tcp,
    Quic,
}

/// ECH 供给形态
#[derive(Debug, Clone)]
pub enum EchOffer {
    /// 无配置时的 GREASE ECH
    Grease,
    /// DNS 下发配置后的真实 outer ECH
    Real {
        config_id: u8,
        kdf_id: u16,
        aead_id: u16,
        enc: Vec<u8>,
        payload_len: usize,
    },
}

/// 会话恢复供给（pre_shared_key 扩展）
#[derive(Debug, Clone)]
pub struct PskOffer {
    pub identity: Vec<u8>,
    pub obfuscated_ticket_age: u32,
}

/// 单次握手的构造参数
#[derive(Debug, Clone)]
pub struct HelloParams {
    pub server_name: String,
    pub mode: TransportMode,
    pub alpn: Vec<String>,
    pub ech: Option<EchOffer>,
    pub psk: Option<PskOffer>,
    /// QUIC 传输参数（仅 Quic 模式使用，顺序即线上顺序）
    pub quic_params: Vec<(u64, Vec<u8>)>,
    pub grease: GreasePolicy,
}

impl HelloParams {
    /// TCP TLS 握手参数（ALPN: h2 + http/1.1）
    pub fn tcp(server_name: &str) -> Self {
        Self {
            server_name: server_name.to_string(),
            mode: TransportMode::Tcp,
            alpn: vec!["h2".to_string(), "http/1.1".to_string()],
            ech: None,
            psk: None,
            quic_params: Vec::new(),
            grease: GreasePolicy::random(),
        }
    }

    /// QUIC 握手参数（ALPN: h3）
    pub fn quic(server_name: &str, quic_params: Vec<(u64, Vec<u8>)>) -> Self {
        Self {
            server_name: server_name.to_string(),
            mode: TransportMode::Quic,
            alpn: vec!["h3".to_string()],
            ech: None,
            psk: None,
            quic_params,
            grease: GreasePolicy::random(),
        }
    }

    pub fn with_ech(mut self, ech: EchOffer) -> Self {
        self.ech = Some(ech);
        self
    }

    pub fn with_psk(mut self, psk: PskOffer) -> Self {
        self.psk = Some(psk);
        self
    }

    pub fn with_grease(mut self, grease: GreasePolicy) -> Self {
        self.grease = grease;
        self
    }
}

/// TLS Client Hello 配置
pub struct ClientHelloSpec {
    /// 密码套件列表（线上顺序）
    pub cipher_suites: Vec<u16>,
    /// 压缩方法
    pub compression_methods: Vec<u8>,
    /// 扩展列表（线上顺序）
    pub extensions: Vec<Box<dyn TLSExtension>>,
    /// TLS 版本范围
    pub tls_vers_min: u16,
    pub tls_vers_max: u16,
}

impl std::fmt::Debug for ClientHelloSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientHelloSpec")
            .field("cipher_suites", &self.cipher_suites)
            .field("extensions", &self.extension_ids())
            .field("tls_vers_min", &self.tls_vers_min)
            .field("tls_vers_max", &self.tls_vers_max)
            .finish()
    }
}

/// 生成 n 字节随机数据
fn random_bytes(n: usize) -> Vec<u8> {
    let rng = SystemRandom::new();
    let mut buf = vec![0u8; n];
    // SystemRandom 失败意味着系统熵源不可用，此时握手无法进行
    rng.fill(&mut buf).unwrap_or(());
    buf
}

/// 生成新的 X25519 公钥份额
fn x25519_share() -> Vec<u8> {
    use ring::agreement;
    let rng = SystemRandom::new();
    match agreement::EphemeralPrivateKey::generate(&agreement::X25519, &rng) {
        Ok(private_key) => match private_key.compute_public_key() {
            Ok(public_key) => public_key.as_ref().to_vec(),
            Err(_) => random_bytes(32),
        },
        Err(_) => random_bytes(32),
    }
}

impl ClientHelloSpec {
    pub fn new() -> Self {
        Self {
            cipher_suites: Vec::new(),
            compression_methods: Vec::new(),
            extensions: Vec::new(),
            tls_vers_min: 0,
            tls_vers_max: 0,
        }
    }

    /// 扩展类型列表（线上顺序）
    pub fn extension_ids(&self) -> Vec<u16> {
        self.extensions.iter().map(|e| e.extension_id()).collect()
    }

    /// Chrome 143 指纹
    pub fn chrome_143(params: &HelloParams) -> Self {
        let g = params.grease;
        let mut spec = Self::new();
        spec.tls_vers_min = VERSION_TLS12;
        spec.tls_vers_max = VERSION_TLS13;

        spec.cipher_suites = vec![
            g.cipher,
            cs::TLS_AES_128_GCM_SHA256,
            cs::TLS_AES_256_GCM_SHA384,
            cs::TLS_CHACHA20_POLY1305_SHA256,
            cs::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
            cs::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
            cs::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
            cs::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
            cs::TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256,
            cs::TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256,
            cs::TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA,
            cs::TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA,
            cs::TLS_RSA_WITH_AES_128_GCM_SHA256,
            cs::TLS_RSA_WITH_AES_256_GCM_SHA384,
            cs::TLS_RSA_WITH_AES_128_CBC_SHA,
            cs::TLS_RSA_WITH_AES_256_CBC_SHA,
        ];
        spec.compression_methods = vec![COMPRESSION_NONE];

        let chrome_sig_algs = vec![
            ss::ECDSA_WITH_P256_AND_SHA256,
            ss::RSA_PSS_RSAE_SHA256,
            ss::RSA_PKCS1_SHA256,
            ss::ECDSA_WITH_P384_AND_SHA384,
            ss::RSA_PSS_RSAE_SHA384,
            ss::RSA_PKCS1_SHA384,
            ss::RSA_PSS_RSAE_SHA512,
            ss::RSA_PKCS1_SHA512,
        ];

        let mut exts: Vec<Box<dyn TLSExtension>> = Vec::new();
        exts.push(Box::new(GREASEExtension::new(g.ext1)));
        exts.push(Box::new(SNIExtension::new(params.server_name.clone())));
        if params.mode == TransportMode::Tcp {
            exts.push(Box::new(ExtendedMasterSecretExtension));
            exts.push(Box::new(RenegotiationInfoExtension));
        }
        exts.push(Box::new(SupportedCurvesExtension::new(vec![
            g.group,
            X25519_MLKEM768,
            X25519,
            CURVE_P256,
            CURVE_P384,
        ])));
        if params.mode == TransportMode::Tcp {
            exts.push(Box::new(SupportedPointsExtension::new(vec![
                POINT_FORMAT_UNCOMPRESSED,
            ])));
            exts.push(Box::new(SessionTicketExtension));
        }
        exts.push(Box::new(ALPNExtension::new(params.alpn.clone())));
        if params.mode == TransportMode::Tcp {
            exts.push(Box::new(StatusRequestExtension));
        }
        exts.push(Box::new(SignatureAlgorithmsExtension::new(chrome_sig_algs)));
        if params.mode == TransportMode::Tcp {
            exts.push(Box::new(SCTExtension));
        }
        exts.push(Box::new(KeyShareExtension::new(vec![
            KeyShare {
                group: g.group,
                data: vec![0],
            },
            KeyShare {
                group: X25519_MLKEM768,
                data: random_bytes(MLKEM768_SHARE_LEN),
            },
            KeyShare {
                group: X25519,
                data: x25519_share(),
            },
        ])));
        exts.push(Box::new(PSKKeyExchangeModesExtension::new(vec![
            PSK_MODE_DHE,
        ])));
        let versions = match params.mode {
            TransportMode::Tcp => vec![g.version, VERSION_TLS13, VERSION_TLS12],
            // QUIC 仅 TLS 1.3
            TransportMode::Quic => vec![g.version, VERSION_TLS13],
        };
        exts.push(Box::new(SupportedVersionsExtension::new(versions)));
        exts.push(Box::new(CompressCertExtension::new(vec![
            CERT_COMPRESSION_BROTLI,
        ])));
        exts.push(Box::new(ApplicationSettingsExtension::new(vec![
            "h2".to_string()
        ])));
        if params.mode == TransportMode::Quic {
            exts.push(Box::new(QuicTransportParametersExtension::new(
                params.quic_params.clone(),
            )));
        }
        push_ech(&mut exts, params);
        exts.push(Box::new(GREASEExtension::with_data(g.ext2, vec![0])));
        if params.mode == TransportMode::Tcp {
            exts.push(Box::new(PaddingExtension::new()));
        }
        push_psk(&mut exts, params);

        spec.extensions = exts;
        spec
    }

    /// Firefox 135 指纹（无 GREASE，无 ALPS，带 FFDHE 组）
    pub fn firefox_135(params: &HelloParams) -> Self {
        let mut spec = Self::new();
        spec.tls_vers_min = VERSION_TLS12;
        spec.tls_vers_max = VERSION_TLS13;

        spec.cipher_suites = vec![
            cs::TLS_AES_128_GCM_SHA256,
            cs::TLS_CHACHA20_POLY1305_SHA256,
            cs::TLS_AES_256_GCM_SHA384,
            cs::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
            cs::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
            cs::TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256,
            cs::TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256,
            cs::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
            cs::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
            cs::TLS_ECDHE_ECDSA_WITH_AES_256_CBC_SHA,
            cs::TLS_ECDHE_ECDSA_WITH_AES_128_CBC_SHA,
            cs::TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA,
            cs::TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA,
            cs::TLS_RSA_WITH_AES_128_GCM_SHA256,
            cs::TLS_RSA_WITH_AES_256_GCM_SHA384,
            cs::TLS_RSA_WITH_AES_128_CBC_SHA,
            cs::TLS_RSA_WITH_AES_256_CBC_SHA,
        ];
        spec.compression_methods = vec![COMPRESSION_NONE];

        let mut exts: Vec<Box<dyn TLSExtension>> = Vec::new();
        exts.push(Box::new(SNIExtension::new(params.server_name.clone())));
        if params.mode == TransportMode::Tcp {
            exts.push(Box::new(ExtendedMasterSecretExtension));
            exts.push(Box::new(RenegotiationInfoExtension));
        }
        exts.push(Box::new(SupportedCurvesExtension::new(vec![
            X25519_MLKEM768,
            X25519,
            CURVE_P256,
            CURVE_P384,
            SECP521R1,
            FFDHE2048,
            FFDHE3072,
        ])));
        if params.mode == TransportMode::Tcp {
            exts.push(Box::new(SupportedPointsExtension::new(vec![
                POINT_FORMAT_UNCOMPRESSED,
            ])));
            exts.push(Box::new(SessionTicketExtension));
        }
        exts.push(Box::new(ALPNExtension::new(params.alpn.clone())));
        if params.mode == TransportMode::Tcp {
            exts.push(Box::new(StatusRequestExtension));
        }
        exts.push(Box::new(KeyShareExtension::new(vec![
            KeyShare {
                group: X25519_MLKEM768,
                data: random_bytes(MLKEM768_SHARE_LEN),
            },
            KeyShare {
                group: X25519,
                data: x25519_share(),
            },
            KeyShare {
                group: CURVE_P256,
                data: random_bytes(65),
            },
        ])));
        let versions = match params.mode {
            TransportMode::Tcp => vec![VERSION_TLS13, VERSION_TLS12],
            TransportMode::Quic => vec![VERSION_TLS13],
        };
        exts.push(Box::new(SupportedVersionsExtension::new(versions)));
        exts.push(Box::new(SignatureAlgorithmsExtension::new(vec![
            ss::ECDSA_WITH_P256_AND_SHA256,
            ss::ECDSA_WITH_P384_AND_SHA384,
            ss::ECDSA_WITH_P521_AND_SHA512,
            ss::RSA_PSS_RSAE_SHA256,
            ss::RSA_PSS_RSAE_SHA384,
            ss::RSA_PSS_RSAE_SHA512,
            ss::RSA_PKCS1_SHA256,
            ss::RSA_PKCS1_SHA384,
            ss::RSA_PKCS1_SHA512,
            ss::ECDSA_SHA1,
            ss::RSA_PKCS1_SHA1,
        ])));
        exts.push(Box::new(PSKKeyExchangeModesExtension::new(vec![
            PSK_MODE_DHE,
        ])));
        if params.mode == TransportMode::Quic {
            exts.push(Box::new(QuicTransportParametersExtension::new(
                params.quic_params.clone(),
            )));
        }
        push_ech(&mut exts, params);
        if params.mode == TransportMode::Tcp {
            exts.push(Box::new(PaddingExtension::new()));
        }
        push_psk(&mut exts, params);

        spec.extensions = exts;
        spec
    }

    /// Safari 18 指纹（GREASE，无 ALPS，zlib 证书压缩）
    pub fn safari_18(params: &HelloParams) -> Self {
        use crate::dicttls::cert_compression::CERT_COMPRESSION_ZLIB;
        let g = params.grease;
        let mut spec = Self::new();
        spec.tls_vers_min = VERSION_TLS12;
        spec.tls_vers_max = VERSION_TLS13;

        spec.cipher_suites = vec![
            g.cipher,
            cs::TLS_AES_128_GCM_SHA256,
            cs::TLS_AES_256_GCM_SHA384,
            cs::TLS_CHACHA20_POLY1305_SHA256,
            cs::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
            cs::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
            cs::TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256,
            cs::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
            cs::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
            cs::TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256,
            cs::TLS_ECDHE_ECDSA_WITH_AES_256_CBC_SHA,
            cs::TLS_ECDHE_ECDSA_WITH_AES_128_CBC_SHA,
            cs::TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA,
            cs::TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA,
        ];
        spec.compression_methods = vec![COMPRESSION_NONE];

        let mut exts: Vec<Box<dyn TLSExtension>> = Vec::new();
        exts.push(Box::new(GREASEExtension::new(g.ext1)));
        exts.push(Box::new(SNIExtension::new(params.server_name.clone())));
        if params.mode == TransportMode::Tcp {
            exts.push(Box::new(ExtendedMasterSecretExtension));
            exts.push(Box::new(RenegotiationInfoExtension));
        }
        exts.push(Box::new(SupportedCurvesExtension::new(vec![
            g.group,
            X25519,
            CURVE_P256,
            CURVE_P384,
            SECP521R1,
        ])));
        if params.mode == TransportMode::Tcp {
            exts.push(Box::new(SupportedPointsExtension::new(vec![
                POINT_FORMAT_UNCOMPRESSED,
            ])));
        }
        exts.push(Box::new(ALPNExtension::new(params.alpn.clone())));
        if params.mode == TransportMode::Tcp {
            exts.push(Box::new(StatusRequestExtension));
        }
        exts.push(Box::new(SignatureAlgorithmsExtension::new(vec![
            ss::ECDSA_WITH_P256_AND_SHA256,
            ss::RSA_PSS_RSAE_SHA256,
            ss::RSA_PKCS1_SHA256,
            ss::ECDSA_WITH_P384_AND_SHA384,
            ss::ECDSA_SHA1,
            ss::RSA_PSS_RSAE_SHA384,
            ss::RSA_PKCS1_SHA384,
            ss::RSA_PSS_RSAE_SHA512,
            ss::RSA_PKCS1_SHA512,
            ss::RSA_PKCS1_SHA1,
        ])));
        if params.mode == TransportMode::Tcp {
            exts.push(Box::new(SCTExtension));
        }
        exts.push(Box::new(KeyShareExtension::new(vec![
            KeyShare {
                group: g.group,
                data: vec![0],
            },
            KeyShare {
                group: X25519,
                data: x25519_share(),
            },
        ])));
        exts.push(Box::new(PSKKeyExchangeModesExtension::new(vec![
            PSK_MODE_DHE,
        ])));
        let versions = match params.mode {
            TransportMode::Tcp => vec![g.version, VERSION_TLS13, VERSION_TLS12],
            TransportMode::Quic => vec![g.version, VERSION_TLS13],
        };
        exts.push(Box::new(SupportedVersionsExtension::new(versions)));
        exts.push(Box::new(CompressCertExtension::new(vec![
            CERT_COMPRESSION_ZLIB,
        ])));
        if params.mode == TransportMode::Quic {
            exts.push(Box::new(QuicTransportParametersExtension::new(
                params.quic_params.clone(),
            )));
        }
        exts.push(Box::new(GREASEExtension::with_data(g.ext2, vec![0])));
        if params.mode == TransportMode::Tcp {
            exts.push(Box::new(PaddingExtension::new()));
        }
        push_psk(&mut exts, params);

        spec.extensions = exts;
        spec
    }

    /// 序列化为完整的 ClientHello 握手消息（含 4 字节握手头）
    ///
    /// padding 扩展按 BoringSSL 规则回填：未填充长度落在 (256, 512) 区间时
    /// 补齐到 512 字节。
    pub fn marshal(&self, mode: TransportMode) -> Vec<u8> {
        // 1. 预序列化除 padding 外的全部扩展
        let mut marshaled: Vec<(u16, Vec<u8>)> = Vec::with_capacity(self.extensions.len());
        let mut padding_index = None;
        for (i, ext) in self.extensions.iter().enumerate() {
            if ext
                .as_any()
                .downcast_ref::<crate::tls_extensions::PaddingExtension>()
                .is_some()
            {
                padding_index = Some(i);
                marshaled.push((ext.extension_id(), Vec::new()));
            } else {
                marshaled.push((ext.extension_id(), ext.marshal()));
            }
        }

        let session_id = match mode {
            TransportMode::Tcp => random_bytes(32),
            // QUIC 下 legacy_session_id 为空
            TransportMode::Quic => Vec::new(),
        };

        // 2. 计算未填充消息长度
        let ext_bytes = |m: &[(u16, Vec<u8>)]| -> usize { m.iter().map(|(_, d)| 4 + d.len()).sum() };
        let body_len = |ext_total: usize| {
            2 + 32 // legacy_version + random
                + 1 + session_id.len()
                + 2 + self.cipher_suites.len() * 2
                + 1 + self.compression_methods.len()
                + 2 + ext_total
        };
        let unpadded_msg_len = 4 + body_len(ext_bytes(&marshaled));

        // 3. 回填 padding
        if let Some(i) = padding_index {
            if unpadded_msg_len > 256 && unpadded_msg_len < 512 {
                marshaled[i].1 = vec![0u8; 512 - unpadded_msg_len];
            }
        }

        // 4. 组装消息
        let ext_total = ext_bytes(&marshaled);
        let body = body_len(ext_total);
        let mut out = Vec::with_capacity(4 + body);
        out.push(0x01); // HandshakeType: client_hello
        out.push(((body >> 16) & 0xff) as u8);
        out.push(((body >> 8) & 0xff) as u8);
        out.push((body & 0xff) as u8);
        out.extend_from_slice(&VERSION_TLS12.to_be_bytes()); // legacy_version
        out.extend_from_slice(&random_bytes(32));
        out.push(session_id.len() as u8);
        out.extend_from_slice(&session_id);
        out.extend_from_slice(&((self.cipher_suites.len() * 2) as u16).to_be_bytes());
        for suite in &self.cipher_suites {
            out.extend_from_slice(&suite.to_be_bytes());
        }
        out.push(self.compression_methods.len() as u8);
        out.extend_from_slice(&self.compression_methods);
        out.extend_from_slice(&(ext_total as u16).to_be_bytes());
        for (id, data) in &marshaled {
            out.extend_from_slice(&id.to_be_bytes());
            out.extend_from_slice(&(data.len() as u16).to_be_bytes());
            out.extend_from_slice(data);
        }
        out
    }
}

impl Default for ClientHelloSpec {
    fn default() -> Self {
        Self::chrome_143(&HelloParams::tcp(""))
    }
}

/// 按供给形态追加 ECH 扩展
fn push_ech(exts: &mut Vec<Box<dyn TLSExtension>>, params: &HelloParams) {
    match &params.ech {
        Some(EchOffer::Grease) => {
            exts.push(Box::new(EncryptedClientHelloExtension::grease()));
        }
        Some(EchOffer::Real {
            config_id,
            kdf_id,
            aead_id,
            enc,
            payload_len,
        }) => {
            exts.push(Box::new(EncryptedClientHelloExtension::real(
                *config_id,
                *kdf_id,
                *aead_id,
                enc.clone(),
                random_bytes(*payload_len),
            )));
        }
        None => {}
    }
}

/// PSK 扩展必须位于扩展列表末尾
fn push_psk(exts: &mut Vec<Box<dyn TLSExtension>>, params: &HelloParams) {
    if let Some(psk) = &params.psk {
        exts.push(Box::new(PreSharedKeyExtension::new(
            psk.identity.clone(),
            psk.obfuscated_ticket_age,
        )));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dicttls::extension_types::*;

    #[test]
    fn test_chrome_143_tcp_shape() {
        let params = HelloParams::tcp("example.test").with_ech(EchOffer::Grease);
        let spec = ClientHelloSpec::chrome_143(&params);
        let ids = spec.extension_ids();

        // 首尾 GREASE（尾部在 padding 之前）
        assert!(crate::tls_config::is_grease_value(ids[0]));
        assert_eq!(*ids.last().unwrap(), EXT_TYPE_PADDING);
        assert!(ids.contains(&EXT_TYPE_EXTENDED_MASTER_SECRET));
        assert!(ids.contains(&EXT_TYPE_SESSION_TICKET));
        assert!(ids.contains(&EXT_TYPE_ECH));
        assert!(!ids.contains(&EXT_TYPE_QUIC_TRANSPORT_PARAMETERS));
        // GREASE 密码套件在首位
        assert!(crate::tls_config::is_grease_value(spec.cipher_suites[0]));
    }

    #[test]
    fn test_chrome_143_quic_excludes_legacy_extensions() {
        let params = HelloParams::quic("example.test", vec![(0x04, vec![0x80, 0x60, 0x00, 0x00])]);
        let spec = ClientHelloSpec::chrome_143(&params);
        let ids = spec.extension_ids();

        for forbidden in crate::tls_extensions::QUIC_FORBIDDEN_EXTENSIONS {
            assert!(!ids.contains(forbidden), "QUIC 模式不应包含 {:#06x}", forbidden);
        }
        assert!(ids.contains(&EXT_TYPE_QUIC_TRANSPORT_PARAMETERS));
        assert!(!ids.contains(&EXT_TYPE_PADDING));
    }

    #[test]
    fn test_psk_is_last_extension() {
        let params = HelloParams::tcp("example.test").with_psk(PskOffer {
            identity: vec![7; 64],
            obfuscated_ticket_age: 12345,
        });
        let spec = ClientHelloSpec::chrome_143(&params);
        let ids = spec.extension_ids();
        assert_eq!(*ids.last().unwrap(), EXT_TYPE_PRE_SHARED_KEY);
    }

    #[test]
    fn test_marshal_padding_to_512() {
        let params = HelloParams::tcp("example.test");
        let spec = ClientHelloSpec::chrome_143(&params);
        let msg = spec.marshal(TransportMode::Tcp);
        // chrome hello 带 MLKEM 份额后超过 512，不触发填充；但消息必须自洽
        let body_len = ((msg[1] as usize) << 16) | ((msg[2] as usize) << 8) | msg[3] as usize;
        assert_eq!(msg.len(), 4 + body_len);
        assert_eq!(msg[0], 0x01);
    }

    #[test]
    fn test_firefox_135_no_grease() {
        let params = HelloParams::tcp("example.test");
        let spec = ClientHelloSpec::firefox_135(&params);
        for id in spec.extension_ids() {
            assert!(!crate::tls_config::is_grease_value(id));
        }
        for suite in &spec.cipher_suites {
            assert!(!crate::tls_config::is_grease_value(*suite));
        }
    }
}
