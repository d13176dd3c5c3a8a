//! HPACK (RFC 7541) 编解码
//!
//! 连接级的编码器与解码器各持有一张单调前进的动态表，整个连接生命周期
//! 不得重建：中途换新表会与对端失去同步，而"每帧新表"本身就是可检测
//! 的异常。编码侧按 profile 的索引策略选择表示形式；字符串一律以原始
//! 字面量发送（H 位为 0）。

use crate::error::{BodyError, CloakError, Result};
use crate::http2_config::{HpackIndexing, HpackIndexingPolicy};
use std::collections::VecDeque;

/// RFC 7541 附录 A 的静态表
pub static STATIC_TABLE: &[(&str, &str)] = &[
    (":authority", ""),
    (":method", "GET"),
    (":method", "POST"),
    (":path", "/"),
    (":path", "/index.html"),
    (":scheme", "http"),
    (":scheme", "https"),
    (":status", "200"),
    (":status", "204"),
    (":status", "206"),
    (":status", "304"),
    (":status", "400"),
    (":status", "404"),
    (":status", "500"),
    ("accept-charset", ""),
    ("accept-encoding", "gzip, deflate"),
    ("accept-language", ""),
    ("accept-ranges", ""),
    ("accept", ""),
    ("access-control-allow-origin", ""),
    ("age", ""),
    ("allow", ""),
    ("authorization", ""),
    ("cache-control", ""),
    ("content-disposition", ""),
    ("content-encoding", ""),
    ("content-language", ""),
    ("content-length", ""),
    ("content-location", ""),
    ("content-range", ""),
    ("content-type", ""),
    ("cookie", ""),
    ("date", ""),
    ("etag", ""),
    ("expect", ""),
    ("expires", ""),
    ("from", ""),
    ("host", ""),
    ("if-match", ""),
    ("if-modified-since", ""),
    ("if-none-match", ""),
    ("if-range", ""),
    ("if-unmodified-since", ""),
    ("last-modified", ""),
    ("link", ""),
    ("location", ""),
    ("max-forwards", ""),
    ("proxy-authenticate", ""),
    ("proxy-authorization", ""),
    ("range", ""),
    ("referer", ""),
    ("refresh", ""),
    ("retry-after", ""),
    ("server", ""),
    ("set-cookie", ""),
    ("strict-transport-security", ""),
    ("transfer-encoding", ""),
    ("user-agent", ""),
    ("vary", ""),
    ("via", ""),
    ("www-authenticate", ""),
];

/// 动态表（编码器与解码器各持一张）
#[derive(Debug)]
struct DynamicTable {
    entries: VecDeque<(String, String)>,
    size: usize,
    max_size: usize,
}

/// RFC 7541 §4.1：条目开销 32 字节
fn entry_size(name: &str, value: &str) -> usize {
    name.len() + value.len() + 32
}

impl DynamicTable {
    fn new(max_size: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            size: 0,
            max_size,
        }
    }

    fn insert(&mut self, name: String, value: String) {
        let needed = entry_size(&name, &value);
        while self.size + needed > self.max_size {
            match self.entries.pop_back() {
                Some((n, v)) => self.size -= entry_size(&n, &v),
                None => break,
            }
        }
        if needed <= self.max_size {
            self.size += needed;
            self.entries.push_front((name, value));
        }
    }

    fn set_max_size(&mut self, max_size: usize) {
        self.max_size = max_size;
        while self.size > self.max_size {
            if let Some((n, v)) = self.entries.pop_back() {
                self.size -= entry_size(&n, &v);
            }
        }
    }

    /// 动态表索引从 62 起
    fn get(&self, index: usize) -> Option<&(String, String)> {
        self.entries.get(index)
    }

    /// 查找完整匹配 → Some(动态索引)；仅名字匹配 → None 由调用方再查
    fn find(&self, name: &str, value: &str) -> (Option<usize>, Option<usize>) {
        let mut name_only = None;
        for (i, (n, v)) in self.entries.iter().enumerate() {
            if n == name {
                if v == value {
                    return (Some(STATIC_TABLE.len() + 1 + i), name_only);
                }
                if name_only.is_none() {
                    name_only = Some(STATIC_TABLE.len() + 1 + i);
                }
            }
        }
        (None, name_only)
    }
}

/// 静态表查找：完整匹配索引 / 仅名字匹配索引
fn static_find(name: &str, value: &str) -> (Option<usize>, Option<usize>) {
    let mut name_only = None;
    for (i, (n, v)) in STATIC_TABLE.iter().enumerate() {
        if *n == name {
            if *v == value {
                return (Some(i + 1), name_only);
            }
            if name_only.is_none() {
                name_only = Some(i + 1);
            }
        }
    }
    (None, name_only)
}

/// 整数编码（RFC 7541 §5.1）
fn encode_int(out: &mut Vec<u8>, value: usize, prefix_bits: u8, flags: u8) {
    let max_prefix = (1usize << prefix_bits) - 1;
    if value < max_prefix {
        out.push(flags | value as u8);
        return;
    }
    out.push(flags | max_prefix as u8);
    let mut rest = value - max_prefix;
    while rest >= 128 {
        out.push((rest % 128 + 128) as u8);
        rest /= 128;
    }
    out.push(rest as u8);
}

/// 整数解码；返回 (值, 新位置)
fn decode_int(buf: &[u8], pos: usize, prefix_bits: u8) -> Result<(usize, usize)> {
    let err = || CloakError::Body(BodyError::Decode("HPACK 整数截断".to_string()));
    if pos >= buf.len() {
        return Err(err());
    }
    let max_prefix = (1usize << prefix_bits) - 1;
    let mut value = (buf[pos] as usize) & max_prefix;
    let mut pos = pos + 1;
    if value < max_prefix {
        return Ok((value, pos));
    }
    let mut shift = 0u32;
    loop {
        if pos >= buf.len() || shift > 28 {
            return Err(err());
        }
        let byte = buf[pos];
        pos += 1;
        value += ((byte & 0x7f) as usize) << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            break;
        }
    }
    Ok((value, pos))
}

/// 字符串编码：原始字面量（H 位为 0）
fn encode_string(out: &mut Vec<u8>, s: &str) {
    encode_int(out, s.len(), 7, 0x00);
    out.extend_from_slice(s.as_bytes());
}

/// 字符串解码；不支持 Huffman 编码的输入
fn decode_string(buf: &[u8], pos: usize) -> Result<(String, usize)> {
    if pos >= buf.len() {
        return Err(CloakError::Body(BodyError::Decode(
            "HPACK 字符串截断".to_string(),
        )));
    }
    let huffman = buf[pos] & 0x80 != 0;
    let (len, pos) = decode_int(buf, pos, 7)?;
    if pos + len > buf.len() {
        return Err(CloakError::Body(BodyError::Decode(
            "HPACK 字符串截断".to_string(),
        )));
    }
    if huffman {
        return Err(CloakError::Body(BodyError::Decode(
            "不支持 Huffman 编码的头字段".to_string(),
        )));
    }
    let s = String::from_utf8_lossy(&buf[pos..pos + len]).to_string();
    Ok((s, pos + len))
}

/// HPACK 编码器
///
/// 连接级对象：动态表跨流共享且单调前进。
pub struct Encoder {
    table: DynamicTable,
}

impl Encoder {
    pub fn new(max_table_size: usize) -> Self {
        Self {
            table: DynamicTable::new(max_table_size),
        }
    }

    /// 编码一组头（名字须已小写）为 HEADERS 块
    pub fn encode(
        &mut self,
        headers: &[(String, String)],
        policy: &HpackIndexingPolicy,
    ) -> Vec<u8> {
        let mut out = Vec::new();
        for (name, value) in headers {
            self.encode_field(&mut out, name, value, policy.indexing_for(name));
        }
        out
    }

    fn encode_field(&mut self, out: &mut Vec<u8>, name: &str, value: &str, mode: HpackIndexing) {
        let (static_full, static_name) = static_find(name, value);
        let (dyn_full, dyn_name) = self.table.find(name, value);

        match mode {
            HpackIndexing::Incremental => {
                // 完整匹配直接用索引表示
                if let Some(index) = static_full.or(dyn_full) {
                    encode_int(out, index, 7, 0x80);
                    return;
                }
                // 字面量 + 增量索引（01 前缀），写入动态表
                match static_name.or(dyn_name) {
                    Some(index) => encode_int(out, index, 6, 0x40),
                    None => {
                        out.push(0x40);
                        encode_string(out, name);
                    }
                }
                encode_string(out, value);
                self.table.insert(name.to_string(), value.to_string());
            }
            HpackIndexing::WithoutIndexing => {
                // 字面量不索引（0000 前缀）；名字可引用表
                match static_name.or(dyn_name) {
                    Some(index) => encode_int(out, index, 4, 0x00),
                    None => {
                        out.push(0x00);
                        encode_string(out, name);
                    }
                }
                encode_string(out, value);
            }
            HpackIndexing::NeverIndexed => {
                // 字面量永不索引（0001 前缀）
                match static_name.or(dyn_name) {
                    Some(index) => encode_int(out, index, 4, 0x10),
                    None => {
                        out.push(0x10);
                        encode_string(out, name);
                    }
                }
                encode_string(out, value);
            }
        }
    }
}

/// HPACK 解码器
///
/// 连接级对象：动态表跨 HEADERS 块共享。
pub struct Decoder {
    table: DynamicTable,
}

impl Decoder {
    pub fn new(max_table_size: usize) -> Self {
        Self {
            table: DynamicTable::new(max_table_size),
        }
    }

    /// 解码一个 HEADERS 块
    pub fn decode(&mut self, block: &[u8]) -> Result<Vec<(String, String)>> {
        let mut headers = Vec::new();
        let mut pos = 0;
        while pos < block.len() {
            let byte = block[pos];
            if byte & 0x80 != 0 {
                // 索引表示
                let (index, next) = decode_int(block, pos, 7)?;
                pos = next;
                let (name, value) = self.lookup(index)?;
                headers.push((name, value));
            } else if byte & 0xc0 == 0x40 {
                // 字面量 + 增量索引
                let (name, value, next) = self.decode_literal(block, pos, 6)?;
                pos = next;
                self.table.insert(name.clone(), value.clone());
                headers.push((name, value));
            } else if byte & 0xe0 == 0x20 {
                // 动态表大小更新
                let (size, next) = decode_int(block, pos, 5)?;
                pos = next;
                self.table.set_max_size(size);
            } else {
                // 字面量不索引 / 永不索引（0000 / 0001 前缀）
                let (name, value, next) = self.decode_literal(block, pos, 4)?;
                pos = next;
                headers.push((name, value));
            }
        }
        Ok(headers)
    }

    fn decode_literal(
        &self,
        block: &[u8],
        pos: usize,
        prefix_bits: u8,
    ) -> Result<(String, String, usize)> {
        let (name_index, mut pos) = decode_int(block, pos, prefix_bits)?;
        let name = if name_index == 0 {
            let (name, next) = decode_string(block, pos)?;
            pos = next;
            name
        } else {
            self.lookup(name_index)?.0
        };
        let (value, pos) = decode_string(block, pos)?;
        Ok((name, value, pos))
    }

    fn lookup(&self, index: usize) -> Result<(String, String)> {
        if index == 0 {
            return Err(CloakError::Body(BodyError::Decode(
                "HPACK 索引 0 非法".to_string(),
            )));
        }
        if index <= STATIC_TABLE.len() {
            let (n, v) = STATIC_TABLE[index - 1];
            return Ok((n.to_string(), v.to_string()));
        }
        self.table
            .get(index - STATIC_TABLE.len() - 1)
            .cloned()
            .ok_or_else(|| {
                CloakError::Body(BodyError::Decode(format!("HPACK 索引 {} 越界", index)))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_static_indexed_representation() {
        let mut encoder = Encoder::new(65536);
        let block = encoder.encode(&headers(&[(":method", "GET")]), &HpackIndexingPolicy::Always);
        // :method GET = 静态表索引 2 → 0x82
        assert_eq!(block, vec![0x82]);
    }

    #[test]
    fn test_roundtrip_all_policies() {
        for policy in [
            HpackIndexingPolicy::ChromeLike,
            HpackIndexingPolicy::Never,
            HpackIndexingPolicy::Always,
        ] {
            let mut encoder = Encoder::new(65536);
            let mut decoder = Decoder::new(65536);
            let input = headers(&[
                (":method", "GET"),
                (":authority", "example.test"),
                (":scheme", "https"),
                (":path", "/page"),
                ("user-agent", "Mozilla/5.0"),
                ("cookie", "sid=secret"),
                ("x-custom", "value"),
            ]);
            let block = encoder.encode(&input, &policy);
            let output = decoder.decode(&block).unwrap();
            assert_eq!(output, input, "策略 {:?} 往返失败", policy);
        }
    }

    #[test]
    fn test_never_indexed_cookie_prefix() {
        let mut encoder = Encoder::new(65536);
        let block = encoder.encode(
            &headers(&[("cookie", "sid=secret")]),
            &HpackIndexingPolicy::ChromeLike,
        );
        // cookie 在静态表（索引 32），0001 前缀 + 4 位整数（15 + 续字节 17）
        assert_eq!(block[0], 0x1f);
        assert_eq!(block[1], 17);
    }

    #[test]
    fn test_dynamic_table_continuity() {
        // 同一解码器跨块成功；新解码器从依赖动态表的块开始失败
        let mut encoder = Encoder::new(65536);
        let policy = HpackIndexingPolicy::Always;
        let request = headers(&[("user-agent", "Mozilla/5.0"), ("x-token", "abc")]);

        let block1 = encoder.encode(&request, &policy);
        let block2 = encoder.encode(&request, &policy);
        // 第二块应该更短：全部命中动态表
        assert!(block2.len() < block1.len());

        let mut decoder = Decoder::new(65536);
        assert_eq!(decoder.decode(&block1).unwrap(), request);
        assert_eq!(decoder.decode(&block2).unwrap(), request);

        // 新解码器没有动态表状态，解码第二块必须失败
        let mut fresh = Decoder::new(65536);
        assert!(fresh.decode(&block2).is_err());
    }

    #[test]
    fn test_never_policy_adds_nothing_to_table() {
        let mut encoder = Encoder::new(65536);
        let policy = HpackIndexingPolicy::Never;
        let request = headers(&[("x-token", "abc")]);
        let block1 = encoder.encode(&request, &policy);
        let block2 = encoder.encode(&request, &policy);
        // 不索引 → 两块完全一致
        assert_eq!(block1, block2);

        // 每块都能被新解码器解码
        assert_eq!(Decoder::new(65536).decode(&block2).unwrap(), request);
    }

    #[test]
    fn test_integer_boundary() {
        let mut out = Vec::new();
        encode_int(&mut out, 1337, 5, 0x20);
        assert_eq!(out, vec![0x3f, 0x9a, 0x0a]);
        let (value, pos) = decode_int(&out, 0, 5).unwrap();
        assert_eq!(value, 1337);
        assert_eq!(pos, 3);
    }

    #[test]
    fn test_table_eviction() {
        // 很小的表：插入会不断驱逐旧条目
        let mut encoder = Encoder::new(64);
        let policy = HpackIndexingPolicy::Always;
        for i in 0..10 {
            let request = headers(&[("x-header", &format!("value-{}", i))]);
            let _ = encoder.encode(&request, &policy);
        }
        assert!(encoder.table.size <= 64);
    }

    #[test]
    fn test_decode_rejects_huffman() {
        // H 位置位的字符串
        let block = vec![0x00, 0x81, 0xff];
        assert!(Decoder::new(4096).decode(&block).is_err());
    }
}
