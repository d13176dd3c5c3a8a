//! ClientHello 黄金样本校验
//!
//! 对每个 profile：序列化 ClientHello，再解析回来，核对密码套件顺序、
//! 扩展顺序、支持的组、签名算法、ALPN 与 GREASE 位置。

use cloakhttp::dicttls::extension_types::*;
use cloakhttp::{
    is_grease_value, ClientHelloSpec, GreasePolicy, HelloParams, Ja4Fingerprint,
    ParsedClientHello, TransportMode, QUIC_FORBIDDEN_EXTENSIONS,
};

/// chrome-143 TCP 形态的黄金样本
#[test]
fn test_chrome_143_tcp_golden() {
    let params = HelloParams::tcp("example.test")
        .with_grease(GreasePolicy::placeholder())
        .with_ech(cloakhttp::EchOffer::Grease);
    let spec = ClientHelloSpec::chrome_143(&params);
    let parsed = ParsedClientHello::parse(&spec.marshal(TransportMode::Tcp)).unwrap();

    // 密码套件：GREASE 开头，TLS 1.3 套件紧随
    assert!(is_grease_value(parsed.cipher_suites[0]));
    assert_eq!(
        &parsed.cipher_suites[1..4],
        &[0x1301, 0x1302, 0x1303],
        "TLS 1.3 套件顺序错误"
    );
    assert_eq!(parsed.cipher_suites.len(), 16);

    // 扩展顺序（GREASE 归一化后比较）
    let normalized: Vec<u16> = parsed
        .extension_ids()
        .iter()
        .map(|id| if is_grease_value(*id) { 0x0a0a } else { *id })
        .collect();
    assert_eq!(
        normalized,
        vec![
            0x0a0a,
            EXT_TYPE_SERVER_NAME,
            EXT_TYPE_EXTENDED_MASTER_SECRET,
            EXT_TYPE_RENEGOTIATION_INFO,
            EXT_TYPE_SUPPORTED_GROUPS,
            EXT_TYPE_EC_POINT_FORMATS,
            EXT_TYPE_SESSION_TICKET,
            EXT_TYPE_APPLICATION_LAYER_PROTOCOL_NEGOTIATION,
            EXT_TYPE_STATUS_REQUEST,
            EXT_TYPE_SIGNATURE_ALGORITHMS,
            EXT_TYPE_SIGNED_CERTIFICATE_TIMESTAMP,
            EXT_TYPE_KEY_SHARE,
            EXT_TYPE_PSK_KEY_EXCHANGE_MODES,
            EXT_TYPE_SUPPORTED_VERSIONS,
            EXT_TYPE_COMPRESS_CERTIFICATE,
            EXT_TYPE_APPLICATION_SETTINGS_NEW,
            EXT_TYPE_ECH,
            0x0a0a,
            EXT_TYPE_PADDING,
        ]
    );

    // 组：GREASE + 后量子混合组开头
    assert!(is_grease_value(parsed.supported_groups[0]));
    assert_eq!(parsed.supported_groups[1], 0x11ec); // X25519MLKEM768
    assert_eq!(parsed.supported_groups[2], 0x001d); // X25519

    // 签名算法
    assert_eq!(
        parsed.signature_algorithms,
        vec![0x0403, 0x0804, 0x0401, 0x0503, 0x0805, 0x0501, 0x0806, 0x0601]
    );

    // ALPN 与版本
    assert_eq!(parsed.alpn, vec!["h2", "http/1.1"]);
    assert!(is_grease_value(parsed.supported_versions[0]));
    assert_eq!(&parsed.supported_versions[1..], &[0x0304, 0x0303]);

    // key_share：GREASE + MLKEM + X25519
    assert!(is_grease_value(parsed.key_share_groups[0]));
    assert_eq!(&parsed.key_share_groups[1..], &[0x11ec, 0x001d]);
}

/// QUIC 模式下 TLS 1.2 遗留扩展必须全部缺席（所有 profile）
#[test]
fn test_quic_mode_excludes_legacy_extensions_all_profiles() {
    let factories: &[(&str, fn(&HelloParams) -> ClientHelloSpec)] = &[
        ("chrome-143", ClientHelloSpec::chrome_143),
        ("firefox-135", ClientHelloSpec::firefox_135),
        ("safari-18", ClientHelloSpec::safari_18),
    ];
    for (name, factory) in factories {
        let params = HelloParams::quic("example.test", vec![(0x01, vec![0x40, 0x64])]);
        let spec = factory(&params);
        let parsed = ParsedClientHello::parse(&spec.marshal(TransportMode::Quic)).unwrap();
        let ids = parsed.extension_ids();
        for forbidden in QUIC_FORBIDDEN_EXTENSIONS {
            assert!(
                !ids.contains(forbidden),
                "{} 在 QUIC 模式下包含了遗留扩展 {:#06x}",
                name,
                forbidden
            );
        }
        assert!(
            ids.contains(&EXT_TYPE_QUIC_TRANSPORT_PARAMETERS),
            "{} 缺少 quic_transport_parameters",
            name
        );
        // QUIC 只允许 TLS 1.3
        assert!(!parsed.supported_versions.contains(&0x0303), "{}", name);
    }
}

/// 同一 profile 在 TCP 形态下反复构造，JA4 与扩展顺序保持稳定
#[test]
fn test_fingerprint_stable_across_handshakes() {
    let reference = {
        let params = HelloParams::tcp("example.test");
        let parsed = ParsedClientHello::parse(
            &ClientHelloSpec::chrome_143(&params).marshal(TransportMode::Tcp),
        )
        .unwrap();
        Ja4Fingerprint::from_parsed(&parsed, 't').to_fingerprint_string()
    };
    for _ in 0..8 {
        let params = HelloParams::tcp("example.test");
        let parsed = ParsedClientHello::parse(
            &ClientHelloSpec::chrome_143(&params).marshal(TransportMode::Tcp),
        )
        .unwrap();
        assert_eq!(
            Ja4Fingerprint::from_parsed(&parsed, 't').to_fingerprint_string(),
            reference
        );
    }
}

/// 密钥份额每次握手新生成
#[test]
fn test_key_shares_fresh_per_handshake() {
    let extract_x25519 = || {
        let params = HelloParams::tcp("example.test").with_grease(GreasePolicy::placeholder());
        let spec = ClientHelloSpec::chrome_143(&params);
        let msg = spec.marshal(TransportMode::Tcp);
        let parsed = ParsedClientHello::parse(&msg).unwrap();
        parsed
            .extensions
            .iter()
            .find(|(id, _)| *id == EXT_TYPE_KEY_SHARE)
            .map(|(_, data)| data.clone())
            .unwrap()
    };
    assert_ne!(extract_x25519(), extract_x25519());
}

/// firefox 与 safari 的 TCP 黄金样本要点
#[test]
fn test_firefox_and_safari_shape() {
    let params = HelloParams::tcp("example.test");

    let firefox = ParsedClientHello::parse(
        &ClientHelloSpec::firefox_135(&params).marshal(TransportMode::Tcp),
    )
    .unwrap();
    // Firefox 无 GREASE、无 ALPS、带 FFDHE 组
    assert!(firefox.cipher_suites.iter().all(|c| !is_grease_value(*c)));
    assert!(!firefox
        .extension_ids()
        .contains(&EXT_TYPE_APPLICATION_SETTINGS_NEW));
    assert!(firefox.supported_groups.contains(&0x0100));

    let safari = ParsedClientHello::parse(
        &ClientHelloSpec::safari_18(&params).marshal(TransportMode::Tcp),
    )
    .unwrap();
    // Safari 带 GREASE，无 MLKEM 组
    assert!(is_grease_value(safari.cipher_suites[0]));
    assert!(!safari.supported_groups.contains(&0x11ec));
}
