//! HTTP 请求构建器
//!
//! 请求头是保持插入顺序的多值映射：查找不区分大小写，发送时按插入顺序
//! 与调用方提供的大小写原样上线。`Header-Order` / `PHeader-Order` 是保留
//! 的请求级覆盖键，发送前从头集中剥离。

use super::Protocol;
use std::time::Duration;

/// HTTP 方法
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Head,
    Options,
    Patch,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Patch => "PATCH",
        }
    }

    /// GET/HEAD 可在新连接上安全重试
    pub fn is_idempotent(&self) -> bool {
        matches!(self, HttpMethod::Get | HttpMethod::Head)
    }
}

/// 请求上下文形态，决定 Sec-Fetch-Mode/Dest 推导
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// 顶层导航
    Navigate,
    /// fetch() 调用
    Fetch,
    /// XMLHttpRequest
    Xhr,
    /// 子资源加载
    Subresource,
}

/// 请求级覆盖键：普通头顺序
pub const HEADER_ORDER_KEY: &str = "header-order";
/// 请求级覆盖键：伪头顺序
pub const PSEUDO_HEADER_ORDER_KEY: &str = "pheader-order";

/// HTTP 请求
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    /// 有序多值头；大小写原样保留
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    /// 强制协议（绕过自动协商）
    pub force_protocol: Option<Protocol>,
    pub timeout: Option<Duration>,
    pub fetch_mode: Option<FetchMode>,
    /// 请求级普通头顺序（覆盖 profile 默认）
    pub header_order: Option<Vec<String>>,
    /// 请求级伪头顺序（覆盖 profile 默认）
    pub pseudo_header_order: Option<Vec<String>>,
    /// 非幂等方法也允许连接级重试
    pub retryable: bool,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: &str) -> Self {
        Self {
            method,
            url: url.to_string(),
            headers: Vec::new(),
            body: None,
            force_protocol: None,
            timeout: None,
            fetch_mode: None,
            header_order: None,
            pseudo_header_order: None,
            retryable: false,
        }
    }

    pub fn get(url: &str) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    pub fn post(url: &str, body: Vec<u8>) -> Self {
        Self::new(HttpMethod::Post, url).with_body(body)
    }

    /// 追加一个头（保持插入顺序）
    pub fn with_header(mut self, key: &str, value: &str) -> Self {
        self.headers.push((key.to_string(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_json_body(mut self, json: &str) -> Self {
        self.headers
            .push(("Content-Type".to_string(), "application/json".to_string()));
        self.body = Some(json.as_bytes().to_vec());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_fetch_mode(mut self, mode: FetchMode) -> Self {
        self.fetch_mode = Some(mode);
        self
    }

    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.force_protocol = Some(protocol);
        self
    }

    /// 不区分大小写查找第一个匹配头
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains_header(&self, name: &str) -> bool {
        self.header(name).is_some()
    }

    /// 替换（或追加）一个头；保留原位置与原大小写由首个匹配决定
    pub fn set_header(&mut self, name: &str, value: &str) {
        if let Some(entry) = self
            .headers
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
        {
            entry.1 = value.to_string();
        } else {
            self.headers.push((name.to_string(), value.to_string()));
        }
    }

    /// 移除全部匹配头
    pub fn remove_header(&mut self, name: &str) {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
    }

    /// 剥离保留的覆盖键并填充对应字段
    ///
    /// `Header-Order: accept, user-agent, cookie` 形式的值按逗号切分；
    /// 兼容带方括号的写法。
    pub fn extract_override_keys(&mut self) {
        let parse_list = |value: &str| -> Vec<String> {
            value
                .trim()
                .trim_start_matches('[')
                .trim_end_matches(']')
                .split(',')
                .map(|s| s.trim().trim_matches('"').to_lowercase())
                .filter(|s| !s.is_empty())
                .collect()
        };

        if let Some(value) = self.header(HEADER_ORDER_KEY) {
            let order = parse_list(value);
            if !order.is_empty() {
                self.header_order = Some(order);
            }
        }
        if let Some(value) = self.header(PSEUDO_HEADER_ORDER_KEY) {
            let order = parse_list(value);
            if !order.is_empty() {
                self.pseudo_header_order = Some(order);
            }
        }
        self.remove_header(HEADER_ORDER_KEY);
        self.remove_header(PSEUDO_HEADER_ORDER_KEY);
    }

    /// 按顺序键重排头：列出的头按给定顺序在前，未列出的保持插入顺序在后
    pub fn ordered_headers(&self, order: Option<&[String]>) -> Vec<(String, String)> {
        let order = match order {
            Some(o) => o,
            None => return self.headers.clone(),
        };
        let mut sorted: Vec<(String, String)> = Vec::with_capacity(self.headers.len());
        let mut used = vec![false; self.headers.len()];
        for name in order {
            for (i, (k, v)) in self.headers.iter().enumerate() {
                if !used[i] && k.eq_ignore_ascii_case(name) {
                    sorted.push((k.clone(), v.clone()));
                    used[i] = true;
                }
            }
        }
        for (i, (k, v)) in self.headers.iter().enumerate() {
            if !used[i] {
                sorted.push((k.clone(), v.clone()));
            }
        }
        sorted
    }
}
