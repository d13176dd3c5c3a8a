//! ClientHello 解析器
//!
//! 把序列化后的 ClientHello 握手消息还原为结构化记录，用于黄金样本校验
//! 与指纹自检。

use crate::dicttls::extension_types::*;
use crate::error::{CloakError, Result};

/// 解析后的 ClientHello
#[derive(Debug, Clone, Default)]
pub struct ParsedClientHello {
    pub legacy_version: u16,
    pub session_id_len: usize,
    /// 密码套件（线上顺序，含 GREASE）
    pub cipher_suites: Vec<u16>,
    pub compression_methods: Vec<u8>,
    /// 扩展 (类型, 数据)（线上顺序）
    pub extensions: Vec<(u16, Vec<u8>)>,
    pub server_name: Option<String>,
    pub alpn: Vec<String>,
    pub supported_groups: Vec<u16>,
    pub signature_algorithms: Vec<u16>,
    pub supported_versions: Vec<u16>,
    pub key_share_groups: Vec<u16>,
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.data.len() {
            return Err(CloakError::config("ClientHello 数据截断"));
        }
        let s = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let s = self.take(2)?;
        Ok(u16::from_be_bytes([s[0], s[1]]))
    }

    fn u24(&mut self) -> Result<usize> {
        let s = self.take(3)?;
        Ok(((s[0] as usize) << 16) | ((s[1] as usize) << 8) | s[2] as usize)
    }
}

impl ParsedClientHello {
    /// 解析完整的握手消息（含 4 字节握手头）
    pub fn parse(msg: &[u8]) -> Result<Self> {
        let mut c = Cursor::new(msg);

        // 1. 握手头
        let msg_type = c.u8()?;
        if msg_type != 0x01 {
            return Err(CloakError::config("不是 ClientHello 消息"));
        }
        let body_len = c.u24()?;
        if body_len + 4 != msg.len() {
            return Err(CloakError::config("ClientHello 长度字段与数据不符"));
        }

        let mut hello = ParsedClientHello {
            legacy_version: c.u16()?,
            ..Default::default()
        };

        // 2. random + session_id
        c.take(32)?;
        let sid_len = c.u8()? as usize;
        c.take(sid_len)?;
        hello.session_id_len = sid_len;

        // 3. 密码套件与压缩方法
        let cs_len = c.u16()? as usize;
        for chunk in c.take(cs_len)?.chunks_exact(2) {
            hello.cipher_suites.push(u16::from_be_bytes([chunk[0], chunk[1]]));
        }
        let comp_len = c.u8()? as usize;
        hello.compression_methods = c.take(comp_len)?.to_vec();

        // 4. 扩展
        let ext_total = c.u16()? as usize;
        let ext_data = c.take(ext_total)?;
        let mut ec = Cursor::new(ext_data);
        while ec.pos < ext_data.len() {
            let ext_id = ec.u16()?;
            let ext_len = ec.u16()? as usize;
            let data = ec.take(ext_len)?.to_vec();
            hello.decode_extension(ext_id, &data)?;
            hello.extensions.push((ext_id, data));
        }

        Ok(hello)
    }

    /// 扩展类型列表（线上顺序）
    pub fn extension_ids(&self) -> Vec<u16> {
        self.extensions.iter().map(|(id, _)| *id).collect()
    }

    fn decode_extension(&mut self, ext_id: u16, data: &[u8]) -> Result<()> {
        match ext_id {
            EXT_TYPE_SERVER_NAME => {
                if data.len() >= 5 {
                    let name_len = u16::from_be_bytes([data[3], data[4]]) as usize;
                    if data.len() >= 5 + name_len {
                        self.server_name =
                            Some(String::from_utf8_lossy(&data[5..5 + name_len]).to_string());
                    }
                }
            }
            EXT_TYPE_APPLICATION_LAYER_PROTOCOL_NEGOTIATION => {
                if data.len() >= 2 {
                    let mut pos = 2;
                    while pos < data.len() {
                        let plen = data[pos] as usize;
                        pos += 1;
                        if pos + plen > data.len() {
                            break;
                        }
                        self.alpn
                            .push(String::from_utf8_lossy(&data[pos..pos + plen]).to_string());
                        pos += plen;
                    }
                }
            }
            EXT_TYPE_SUPPORTED_GROUPS => {
                if data.len() >= 2 {
                    for chunk in data[2..].chunks_exact(2) {
                        self.supported_groups
                            .push(u16::from_be_bytes([chunk[0], chunk[1]]));
                    }
                }
            }
            EXT_TYPE_SIGNATURE_ALGORITHMS => {
                if data.len() >= 2 {
                    for chunk in data[2..].chunks_exact(2) {
                        self.signature_algorithms
                            .push(u16::from_be_bytes([chunk[0], chunk[1]]));
                    }
                }
            }
            EXT_TYPE_SUPPORTED_VERSIONS => {
                if !data.is_empty() {
                    for chunk in data[1..].chunks_exact(2) {
                        self.supported_versions
                            .push(u16::from_be_bytes([chunk[0], chunk[1]]));
                    }
                }
            }
            EXT_TYPE_KEY_SHARE => {
                if data.len() >= 2 {
                    let mut pos = 2;
                    while pos + 4 <= data.len() {
                        let group = u16::from_be_bytes([data[pos], data[pos + 1]]);
                        let share_len =
                            u16::from_be_bytes([data[pos + 2], data[pos + 3]]) as usize;
                        self.key_share_groups.push(group);
                        pos += 4 + share_len;
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tls_config::{ClientHelloSpec, HelloParams, TransportMode};

    #[test]
    fn test_roundtrip_chrome_tcp() {
        let params = HelloParams::tcp("example.test");
        let spec = ClientHelloSpec::chrome_143(&params);
        let msg = spec.marshal(TransportMode::Tcp);
        let parsed = ParsedClientHello::parse(&msg).unwrap();

        assert_eq!(parsed.cipher_suites, spec.cipher_suites);
        assert_eq!(parsed.extension_ids(), spec.extension_ids());
        assert_eq!(parsed.server_name.as_deref(), Some("example.test"));
        assert_eq!(parsed.alpn, vec!["h2", "http/1.1"]);
        assert_eq!(parsed.session_id_len, 32);
    }

    #[test]
    fn test_roundtrip_quic_empty_session_id() {
        let params = HelloParams::quic("example.test", vec![(0x01, vec![0x44, 0xb0])]);
        let spec = ClientHelloSpec::chrome_143(&params);
        let msg = spec.marshal(TransportMode::Quic);
        let parsed = ParsedClientHello::parse(&msg).unwrap();
        assert_eq!(parsed.session_id_len, 0);
        assert_eq!(parsed.alpn, vec!["h3"]);
    }

    #[test]
    fn test_truncated_rejected() {
        let params = HelloParams::tcp("example.test");
        let spec = ClientHelloSpec::chrome_143(&params);
        let msg = spec.marshal(TransportMode::Tcp);
        assert!(ParsedClientHello::parse(&msg[..msg.len() - 3]).is_err());
    }
}
