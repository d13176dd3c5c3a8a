//! HTTP 响应表示与 HTTP/1.1 响应解析
//!
//! 响应头是保持大小写与到达顺序的多值映射。HTTP/1.1 解析覆盖状态行、
//! 头、Content-Length 与 chunked 两种分帧；响应体按 Content-Encoding
//! 解压（gzip/deflate/br/zstd）。

use super::Protocol;
use crate::error::{BodyError, CloakError, Result};

/// HTTP 响应
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status_code: u16,
    pub status_text: String,
    /// 大小写与到达顺序原样保留
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    /// 重定向后实际到达的 URL
    pub final_url: String,
    /// 协商出的协议
    pub protocol: Protocol,
}

impl HttpResponse {
    pub fn new(status_code: u16, protocol: Protocol) -> Self {
        Self {
            status_code,
            status_text: String::new(),
            headers: Vec::new(),
            body: Vec::new(),
            final_url: String::new(),
            protocol,
        }
    }

    /// 不区分大小写查找第一个匹配头
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// 全部匹配头的值（如多条 Set-Cookie）
    pub fn header_all(&self, name: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status_code) && self.header("location").is_some()
    }

    pub fn body_as_string(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }

    /// 响应体是否为 HTML
    pub fn is_html(&self) -> bool {
        self.header("content-type")
            .map(|ct| ct.to_ascii_lowercase().contains("text/html"))
            .unwrap_or(false)
    }
}

/// 解析 HTTP/1.1 响应头部（状态行 + 头；不含响应体）
///
/// 返回 (response, 头部字节长度)。
pub fn parse_head(raw: &[u8]) -> Result<(HttpResponse, usize)> {
    let head_end = find_head_end(raw)
        .ok_or_else(|| CloakError::Body(BodyError::Truncated { received: raw.len() }))?;
    let head = std::str::from_utf8(&raw[..head_end])
        .map_err(|_| CloakError::Body(BodyError::Decode("头部不是合法 UTF-8".to_string())))?;

    let mut lines = head.split("\r\n");

    // 状态行: HTTP/1.1 200 OK
    let status_line = lines
        .next()
        .ok_or_else(|| CloakError::Body(BodyError::Decode("缺少状态行".to_string())))?;
    let mut parts = status_line.splitn(3, ' ');
    let _version = parts
        .next()
        .filter(|v| v.starts_with("HTTP/"))
        .ok_or_else(|| CloakError::Body(BodyError::Decode("非法状态行".to_string())))?;
    let status_code = parts
        .next()
        .and_then(|s| s.parse::<u16>().ok())
        .ok_or_else(|| CloakError::Body(BodyError::Decode("非法状态码".to_string())))?;
    let status_text = parts.next().unwrap_or("").to_string();

    let mut response = HttpResponse::new(status_code, Protocol::H1);
    response.status_text = status_text;

    for line in lines {
        if line.is_empty() {
            continue;
        }
        if let Some(pos) = line.find(':') {
            let key = line[..pos].trim().to_string();
            let value = line[pos + 1..].trim().to_string();
            response.headers.push((key, value));
        }
    }

    Ok((response, head_end + 4))
}

/// 查找 `\r\n\r\n` 的位置
pub fn find_head_end(raw: &[u8]) -> Option<usize> {
    raw.windows(4).position(|w| w == b"\r\n\r\n")
}

/// 解析 chunked 响应体；返回 (解码字节, 是否完整)
pub fn decode_chunked(raw: &[u8]) -> Result<(Vec<u8>, bool)> {
    let mut out = Vec::new();
    let mut pos = 0;
    loop {
        // chunk-size 行
        let line_end = match raw[pos..].windows(2).position(|w| w == b"\r\n") {
            Some(i) => pos + i,
            None => return Ok((out, false)),
        };
        let size_str = std::str::from_utf8(&raw[pos..line_end])
            .map_err(|_| CloakError::Body(BodyError::Decode("chunk 长度非法".to_string())))?;
        let size = usize::from_str_radix(size_str.trim().split(';').next().unwrap_or(""), 16)
            .map_err(|_| CloakError::Body(BodyError::Decode("chunk 长度非法".to_string())))?;
        pos = line_end + 2;
        if size == 0 {
            // 末尾 trailer 直接忽略
            return Ok((out, true));
        }
        if pos + size + 2 > raw.len() {
            return Ok((out, false));
        }
        out.extend_from_slice(&raw[pos..pos + size]);
        pos += size + 2; // 跳过 chunk 尾部 CRLF
    }
}

/// 按 Content-Encoding 解压响应体
#[cfg(feature = "compression")]
pub fn decode_body(encoding: &str, body: &[u8]) -> Result<Vec<u8>> {
    use std::io::Read;
    match encoding.trim().to_ascii_lowercase().as_str() {
        "" | "identity" => Ok(body.to_vec()),
        "gzip" => {
            let mut decoder = flate2::read::GzDecoder::new(body);
            let mut out = Vec::new();
            decoder
                .read_to_end(&mut out)
                .map_err(|e| CloakError::Body(BodyError::Decode(format!("gzip: {}", e))))?;
            Ok(out)
        }
        "deflate" => {
            let mut decoder = flate2::read::ZlibDecoder::new(body);
            let mut out = Vec::new();
            decoder
                .read_to_end(&mut out)
                .map_err(|e| CloakError::Body(BodyError::Decode(format!("deflate: {}", e))))?;
            Ok(out)
        }
        "br" => {
            let mut decoder = brotli_decompressor::Decompressor::new(body, 4096);
            let mut out = Vec::new();
            decoder
                .read_to_end(&mut out)
                .map_err(|e| CloakError::Body(BodyError::Decode(format!("brotli: {}", e))))?;
            Ok(out)
        }
        "zstd" => zstd::stream::decode_all(body)
            .map_err(|e| CloakError::Body(BodyError::Decode(format!("zstd: {}", e)))),
        other => Err(CloakError::Body(BodyError::Decode(format!(
            "未知编码: {}",
            other
        )))),
    }
}

#[cfg(not(feature = "compression"))]
pub fn decode_body(_encoding: &str, body: &[u8]) -> Result<Vec<u8>> {
    Ok(body.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_head() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nSet-Cookie: a=1\r\nSet-Cookie: b=2\r\n\r\nbody";
        let (response, head_len) = parse_head(raw).unwrap();
        assert_eq!(response.status_code, 200);
        assert_eq!(response.status_text, "OK");
        assert_eq!(response.header("content-type"), Some("text/html"));
        assert_eq!(response.header_all("set-cookie"), vec!["a=1", "b=2"]);
        assert_eq!(&raw[head_len..], b"body");
    }

    #[test]
    fn test_parse_head_preserves_case_and_order() {
        let raw = b"HTTP/1.1 404 Not Found\r\nX-B: 2\r\nX-A: 1\r\n\r\n";
        let (response, _) = parse_head(raw).unwrap();
        assert_eq!(response.headers[0].0, "X-B");
        assert_eq!(response.headers[1].0, "X-A");
        assert!(!response.is_success());
    }

    #[test]
    fn test_decode_chunked() {
        let raw = b"5\r\nHello\r\n6\r\n World\r\n0\r\n\r\n";
        let (body, complete) = decode_chunked(raw).unwrap();
        assert!(complete);
        assert_eq!(body, b"Hello World");
    }

    #[test]
    fn test_decode_chunked_incomplete() {
        let raw = b"5\r\nHel";
        let (body, complete) = decode_chunked(raw).unwrap();
        assert!(!complete);
        assert!(body.is_empty());
    }

    #[cfg(feature = "compression")]
    #[test]
    fn test_decode_gzip_roundtrip() {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        use std::io::Write;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"hello compressed world").unwrap();
        let compressed = encoder.finish().unwrap();

        let decoded = decode_body("gzip", &compressed).unwrap();
        assert_eq!(decoded, b"hello compressed world");
    }

    #[cfg(feature = "compression")]
    #[test]
    fn test_decode_unknown_encoding_is_error() {
        assert!(decode_body("lzma", b"xx").is_err());
    }
}
