//! JA4 TLS 客户端指纹
//!
//! JA4 = 前缀(传输/版本/SNI/计数/ALPN) + 排序密码套件哈希 + 排序扩展与
//! 签名算法哈希。GREASE 值不参与计数与哈希。

use crate::dicttls::extension_types::{
    EXT_TYPE_APPLICATION_LAYER_PROTOCOL_NEGOTIATION, EXT_TYPE_SERVER_NAME,
};
use crate::tls_config::grease::is_grease_value;
use crate::tls_config::parser::ParsedClientHello;
use crate::tls_config::spec::VERSION_TLS13;
use sha2::{Digest, Sha256};

/// JA4 指纹
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ja4Fingerprint {
    pub prefix: String,
    pub cipher_hash: String,
    pub extension_hash: String,
}

fn sha256_12(input: &str) -> String {
    if input.is_empty() {
        return "000000000000".to_string();
    }
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(&digest[..6])
}

impl Ja4Fingerprint {
    /// 由解析后的 ClientHello 计算 JA4
    ///
    /// `transport`：'t' = TCP，'q' = QUIC
    pub fn from_parsed(hello: &ParsedClientHello, transport: char) -> Self {
        let version = if hello
            .supported_versions
            .iter()
            .any(|v| !is_grease_value(*v) && *v >= VERSION_TLS13)
        {
            "13"
        } else {
            "12"
        };
        let sni = if hello.server_name.is_some() { 'd' } else { 'i' };

        let mut ciphers: Vec<u16> = hello
            .cipher_suites
            .iter()
            .copied()
            .filter(|c| !is_grease_value(*c))
            .collect();
        let ext_ids: Vec<u16> = hello
            .extension_ids()
            .into_iter()
            .filter(|e| !is_grease_value(*e))
            .collect();

        let alpn = hello.alpn.first().cloned().unwrap_or_default();
        let (a_first, a_last) = if alpn.is_empty() {
            ('0', '0')
        } else {
            (
                alpn.chars().next().unwrap_or('0'),
                alpn.chars().last().unwrap_or('0'),
            )
        };

        let prefix = format!(
            "{}{}{}{:02}{:02}{}{}",
            transport,
            version,
            sni,
            ciphers.len().min(99),
            ext_ids.len().min(99),
            a_first,
            a_last
        );

        ciphers.sort_unstable();
        let cipher_str = ciphers
            .iter()
            .map(|c| format!("{:04x}", c))
            .collect::<Vec<_>>()
            .join(",");

        // 扩展哈希：排序后的扩展（剔除 SNI 与 ALPN）+ 未排序的签名算法
        let mut hashed_exts: Vec<u16> = ext_ids
            .into_iter()
            .filter(|e| {
                *e != EXT_TYPE_SERVER_NAME && *e != EXT_TYPE_APPLICATION_LAYER_PROTOCOL_NEGOTIATION
            })
            .collect();
        hashed_exts.sort_unstable();
        let mut ext_str = hashed_exts
            .iter()
            .map(|e| format!("{:04x}", e))
            .collect::<Vec<_>>()
            .join(",");
        if !hello.signature_algorithms.is_empty() {
            let sig_str = hello
                .signature_algorithms
                .iter()
                .filter(|s| !is_grease_value(**s))
                .map(|s| format!("{:04x}", s))
                .collect::<Vec<_>>()
                .join(",");
            ext_str = format!("{}_{}", ext_str, sig_str);
        }

        Self {
            prefix,
            cipher_hash: sha256_12(&cipher_str),
            extension_hash: sha256_12(&ext_str),
        }
    }

    /// 指纹字符串形式：`prefix_cipherhash_exthash`
    pub fn to_fingerprint_string(&self) -> String {
        format!("{}_{}_{}", self.prefix, self.cipher_hash, self.extension_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tls_config::{ClientHelloSpec, GreasePolicy, HelloParams, TransportMode};

    #[test]
    fn test_ja4_stable_across_grease_draws() {
        // GREASE 取值不同不应影响 JA4
        let p1 = HelloParams::tcp("example.test").with_grease(GreasePolicy::placeholder());
        let p2 = HelloParams::tcp("example.test").with_grease(GreasePolicy::random());
        let h1 = ParsedClientHello::parse(
            &ClientHelloSpec::chrome_143(&p1).marshal(TransportMode::Tcp),
        )
        .unwrap();
        let h2 = ParsedClientHello::parse(
            &ClientHelloSpec::chrome_143(&p2).marshal(TransportMode::Tcp),
        )
        .unwrap();

        let f1 = Ja4Fingerprint::from_parsed(&h1, 't');
        let f2 = Ja4Fingerprint::from_parsed(&h2, 't');
        assert_eq!(f1, f2);
    }

    #[test]
    fn test_ja4_prefix_shape() {
        let params = HelloParams::tcp("example.test");
        let hello = ParsedClientHello::parse(
            &ClientHelloSpec::chrome_143(&params).marshal(TransportMode::Tcp),
        )
        .unwrap();
        let ja4 = Ja4Fingerprint::from_parsed(&hello, 't');
        assert!(ja4.prefix.starts_with("t13d"));
        assert!(ja4.prefix.ends_with("h2"));
        assert_eq!(ja4.cipher_hash.len(), 12);
    }

    #[test]
    fn test_ja4_differs_between_browsers() {
        let params = HelloParams::tcp("example.test");
        let chrome = ParsedClientHello::parse(
            &ClientHelloSpec::chrome_143(&params).marshal(TransportMode::Tcp),
        )
        .unwrap();
        let firefox = ParsedClientHello::parse(
            &ClientHelloSpec::firefox_135(&params).marshal(TransportMode::Tcp),
        )
        .unwrap();
        assert_ne!(
            Ja4Fingerprint::from_parsed(&chrome, 't').to_fingerprint_string(),
            Ja4Fingerprint::from_parsed(&firefox, 't').to_fingerprint_string()
        );
    }
}
