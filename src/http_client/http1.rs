//! HTTP/1.1 传输
//!
//! 请求行与请求头按调用方给定的顺序与大小写逐字节写出，没有任何规范化。
//! keep-alive 纪律由 profile 选择：单连接请求数上限、空闲超时、是否显式
//! 发送 Connection 头。

use super::request::HttpRequest;
use super::response::{self, HttpResponse};
use crate::error::{BodyError, CloakError, Result};
use crate::profiles::KeepAlivePolicy;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// 响应体大小上限
pub const DEFAULT_MAX_RESPONSE_BYTES: usize = 64 * 1024 * 1024;

/// 统一的异步字节流（明文 TCP 或 TLS）
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

/// 一条可复用的 HTTP/1.1 连接
pub struct H1Connection {
    stream: Box<dyn AsyncStream>,
    pub requests_served: usize,
    pub last_used: Instant,
    /// 对端或本端宣布关闭后置 false
    reusable: bool,
}

impl H1Connection {
    pub fn new(stream: Box<dyn AsyncStream>) -> Self {
        Self {
            stream,
            requests_served: 0,
            last_used: Instant::now(),
            reusable: true,
        }
    }

    /// 按 keep-alive 纪律判断连接是否还能再承载一个请求
    pub fn is_reusable(&self, policy: &KeepAlivePolicy) -> bool {
        self.reusable
            && policy.max_requests > 0
            && self.requests_served < policy.max_requests
            && self.last_used.elapsed() < policy.idle_timeout
    }

    /// 发送一个请求并读完整响应
    ///
    /// `headers` 是已经过顺序键重排、包含 Host/Cookie 的最终头列表。
    pub async fn send(
        &mut self,
        request: &HttpRequest,
        path: &str,
        headers: &[(String, String)],
        policy: &KeepAlivePolicy,
    ) -> Result<HttpResponse> {
        // 1. 写请求
        let head = build_request_head(request, path, headers, policy);
        self.stream.write_all(&head).await?;
        if let Some(body) = &request.body {
            self.stream.write_all(body).await?;
        }
        self.stream.flush().await?;

        // 2. 读响应
        let response = self.read_response(request).await?;

        // 3. 更新复用状态
        self.requests_served += 1;
        self.last_used = Instant::now();
        if policy.max_requests == 0 {
            self.reusable = false;
        }
        if let Some(connection) = response.header("connection") {
            if connection.eq_ignore_ascii_case("close") {
                self.reusable = false;
            }
        }

        Ok(response)
    }

    async fn read_response(&mut self, request: &HttpRequest) -> Result<HttpResponse> {
        let mut buf: Vec<u8> = Vec::with_capacity(8192);
        let mut chunk = [0u8; 8192];

        // 1. 读到头部终止符
        let head_len = loop {
            if let Some(end) = response::find_head_end(&buf) {
                break end + 4;
            }
            if buf.len() > 1024 * 1024 {
                return Err(CloakError::Body(BodyError::Decode(
                    "响应头超过 1MB".to_string(),
                )));
            }
            let n = self.stream.read(&mut chunk).await?;
            if n == 0 {
                return Err(CloakError::Body(BodyError::Truncated { received: buf.len() }));
            }
            buf.extend_from_slice(&chunk[..n]);
        };

        let (mut response, _) = response::parse_head(&buf[..head_len])?;
        let mut body = buf[head_len..].to_vec();

        // 2. HEAD 与无体状态码直接返回
        let has_body = request.method != super::request::HttpMethod::Head
            && response.status_code != 204
            && response.status_code != 304
            && !(100..200).contains(&response.status_code);
        if !has_body {
            return Ok(response);
        }

        // 3. 按分帧方式读响应体
        let chunked = response
            .header("transfer-encoding")
            .map(|te| te.to_ascii_lowercase().contains("chunked"))
            .unwrap_or(false);

        if chunked {
            loop {
                let (decoded, complete) = response::decode_chunked(&body)?;
                if complete {
                    body = decoded;
                    break;
                }
                if body.len() > DEFAULT_MAX_RESPONSE_BYTES {
                    return Err(CloakError::Body(BodyError::Decode(
                        "响应体超过上限".to_string(),
                    )));
                }
                let n = self.stream.read(&mut chunk).await?;
                if n == 0 {
                    // 对端在 chunk 中途断开；带上已解出的部分
                    let (partial, _) = response::decode_chunked(&body)?;
                    response.body = partial;
                    self.reusable = false;
                    return Err(CloakError::Body(BodyError::Truncated {
                        received: response.body.len(),
                    }));
                }
                body.extend_from_slice(&chunk[..n]);
            }
        } else if let Some(length) = response
            .header("content-length")
            .and_then(|v| v.parse::<usize>().ok())
        {
            if length > DEFAULT_MAX_RESPONSE_BYTES {
                return Err(CloakError::Body(BodyError::Decode(
                    "响应体超过上限".to_string(),
                )));
            }
            while body.len() < length {
                let n = self.stream.read(&mut chunk).await?;
                if n == 0 {
                    self.reusable = false;
                    return Err(CloakError::Body(BodyError::Truncated {
                        received: body.len(),
                    }));
                }
                body.extend_from_slice(&chunk[..n]);
            }
            body.truncate(length);
        } else {
            // 无分帧信息：读到对端关闭，连接不可复用
            loop {
                let n = self.stream.read(&mut chunk).await?;
                if n == 0 {
                    break;
                }
                if body.len() + n > DEFAULT_MAX_RESPONSE_BYTES {
                    return Err(CloakError::Body(BodyError::Decode(
                        "响应体超过上限".to_string(),
                    )));
                }
                body.extend_from_slice(&chunk[..n]);
            }
            self.reusable = false;
        }

        // 4. 解压
        if let Some(encoding) = response.header("content-encoding").map(|s| s.to_string()) {
            body = response::decode_body(&encoding, &body)?;
        }

        response.body = body;
        Ok(response)
    }
}

/// 组装请求行与请求头
///
/// 头名大小写与顺序原样写出；Content-Length 仅在有请求体且调用方未给出
/// 时补发；Connection 头按 keep-alive 纪律决定。
pub fn build_request_head(
    request: &HttpRequest,
    path: &str,
    headers: &[(String, String)],
    policy: &KeepAlivePolicy,
) -> Vec<u8> {
    let mut head = format!("{} {} HTTP/1.1\r\n", request.method.as_str(), path);

    for (key, value) in headers {
        head.push_str(key);
        head.push_str(": ");
        head.push_str(value);
        head.push_str("\r\n");
    }

    let has = |name: &str| headers.iter().any(|(k, _)| k.eq_ignore_ascii_case(name));

    if let Some(body) = &request.body {
        if !has("content-length") {
            head.push_str(&format!("Content-Length: {}\r\n", body.len()));
        }
    }

    if !has("connection") {
        if policy.max_requests == 0 {
            head.push_str("Connection: close\r\n");
        } else if policy.explicit_header {
            head.push_str("Connection: keep-alive\r\n");
        }
        // Chrome 纪律：依赖 HTTP/1.1 默认 keep-alive，不显式发送
    }

    head.push_str("\r\n");
    head.into_bytes()
}
