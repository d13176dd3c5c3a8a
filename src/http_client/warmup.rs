//! 页面预热
//!
//! 对页面做一次导航 GET，若响应是 HTML 则发现子资源并按 Chrome 的
//! 批次节奏取回，积累真实的 Cookie、TLS 票据与协议能力状态：
//!
//! - 批次 1（CSS + 字体）：立即发出；
//! - 批次 2（脚本）：50-150ms 随机抖动后；
//! - 批次 3（图片）：再过 100-300ms 随机抖动后；
//! - 任意时刻在途子资源不超过 6 个（H1 时代的每主机上限，在 H2/H3 下
//!   保留，这个节奏本身就是指纹）。
//!
//! 子资源失败静默吞掉，响应体丢弃，从不重试；导航失败向上抛。
//! 丢弃返回的 future 即取消尚未发出的批次。

use super::request::{FetchMode, HttpRequest};
use super::session::Session;
use crate::error::Result;
use crate::headers::SubresourceType;
use rand::Rng;
use scraper::{Html, Selector};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// 子资源数量上限
pub const MAX_SUBRESOURCES: usize = 50;

/// 单批并发上限
pub const BATCH_CONCURRENCY: usize = 6;

/// 发现的子资源
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredResource {
    pub url: Url,
    pub kind: SubresourceType,
}

impl DiscoveredResource {
    /// 批次号：0 = CSS/字体，1 = 脚本，2 = 图片
    pub fn batch(&self) -> usize {
        match self.kind {
            SubresourceType::Css | SubresourceType::Font => 0,
            SubresourceType::Script => 1,
            SubresourceType::Image => 2,
        }
    }
}

/// 预热结果
#[derive(Debug, Clone)]
pub struct WarmupReport {
    pub final_url: String,
    pub discovered: usize,
    pub fetched: usize,
}

/// 从 HTML 提取子资源并按最终 URL 求解相对地址
///
/// 发现顺序、分类与批次对固定输入是确定的。
pub fn discover_subresources(html: &str, base: &Url) -> Vec<DiscoveredResource> {
    let document = Html::parse_document(html);
    let mut seen: HashSet<String> = HashSet::new();
    let mut resources = Vec::new();

    let mut push = |href: &str, kind: SubresourceType, resources: &mut Vec<DiscoveredResource>| {
        if resources.len() >= MAX_SUBRESOURCES {
            return;
        }
        if let Ok(resolved) = base.join(href) {
            if !matches!(resolved.scheme(), "http" | "https") {
                return;
            }
            if seen.insert(resolved.to_string()) {
                resources.push(DiscoveredResource {
                    url: resolved,
                    kind,
                });
            }
        }
    };

    // 选择器解析失败属于常量书写错误，返回空集而不是 panic
    let selectors: &[(&str, Option<SubresourceType>)] = &[
        ("link[rel=\"stylesheet\"][href]", Some(SubresourceType::Css)),
        ("link[rel=\"icon\"][href]", Some(SubresourceType::Image)),
        ("link[rel=\"shortcut icon\"][href]", Some(SubresourceType::Image)),
        ("link[rel=\"preload\"][href]", None), // 类型看 as 属性
        ("script[src]", Some(SubresourceType::Script)),
        ("img[src]", Some(SubresourceType::Image)),
    ];

    for (selector_str, kind) in selectors {
        let selector = match Selector::parse(selector_str) {
            Ok(s) => s,
            Err(_) => continue,
        };
        for element in document.select(&selector) {
            let attr = if selector_str.starts_with("link") {
                "href"
            } else {
                "src"
            };
            let href = match element.value().attr(attr) {
                Some(h) => h,
                None => continue,
            };
            let kind = match kind {
                Some(k) => *k,
                None => match element.value().attr("as") {
                    Some("style") => SubresourceType::Css,
                    Some("script") => SubresourceType::Script,
                    Some("image") => SubresourceType::Image,
                    Some("font") => SubresourceType::Font,
                    _ => continue,
                },
            };
            push(href, kind, &mut resources);
        }
    }

    resources
}

/// 构造一个子资源请求（类型决定 Accept / Sec-Fetch / Priority）
fn subresource_request(resource: &DiscoveredResource, page_url: &Url) -> HttpRequest {
    let site = super::session::derive_sec_fetch_site(Some(page_url), &resource.url);
    HttpRequest::get(resource.url.as_str())
        .with_fetch_mode(FetchMode::Subresource)
        .with_header("Accept", resource.kind.accept())
        .with_header("Sec-Fetch-Dest", resource.kind.fetch_dest())
        .with_header("Sec-Fetch-Mode", resource.kind.fetch_mode())
        .with_header("Sec-Fetch-Site", site)
        .with_header("Referer", page_url.as_str())
        .with_header("Priority", resource.kind.priority())
}

/// 预热计划执行器
pub struct WarmupPlanner {
    concurrency: usize,
}

impl WarmupPlanner {
    pub fn new() -> Self {
        Self {
            concurrency: BATCH_CONCURRENCY,
        }
    }

    /// 执行预热：导航 → 发现 → 三批取回
    pub async fn run(&self, session: &Session, url: &str) -> Result<WarmupReport> {
        // 1. 导航请求（错误向上抛）
        let (response, _echo) = session
            .execute(HttpRequest::get(url).with_fetch_mode(FetchMode::Navigate))
            .await?;
        let final_url = Url::parse(&response.final_url)
            .map_err(|e| crate::error::CloakError::config(format!("最终 URL 非法: {}", e)))?;

        if !response.is_html() {
            return Ok(WarmupReport {
                final_url: response.final_url,
                discovered: 0,
                fetched: 0,
            });
        }

        // 2. 发现与分批
        let resources = discover_subresources(&response.body_as_string(), &final_url);
        let discovered = resources.len();
        let batches: [Vec<&DiscoveredResource>; 3] = {
            let mut batches = [Vec::new(), Vec::new(), Vec::new()];
            for resource in &resources {
                batches[resource.batch()].push(resource);
            }
            batches
        };

        // 3. 逐批发出；批内并发由信号量限到 6
        let semaphore = Arc::new(tokio::sync::Semaphore::new(self.concurrency));
        let mut fetched = 0usize;
        let jitter =
            |low: u64, high: u64| Duration::from_millis(rand::thread_rng().gen_range(low..=high));

        for (index, batch) in batches.iter().enumerate() {
            if batch.is_empty() {
                continue;
            }
            match index {
                1 => tokio::time::sleep(jitter(50, 150)).await,
                2 => tokio::time::sleep(jitter(100, 300)).await,
                _ => {}
            }

            let mut tasks = Vec::with_capacity(batch.len());
            for resource in batch {
                let request = subresource_request(resource, &final_url);
                let semaphore = semaphore.clone();
                tasks.push(async move {
                    let _permit = semaphore.acquire().await.ok()?;
                    // 子资源失败静默；响应体随作用域丢弃
                    session.execute(request).await.ok()
                });
            }
            for result in futures::future::join_all(tasks).await {
                if result.is_some() {
                    fetched += 1;
                }
            }
        }

        Ok(WarmupReport {
            final_url: final_url.to_string(),
            discovered,
            fetched,
        })
    }
}

impl Default for WarmupPlanner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<!doctype html>
<html><head>
  <link rel="stylesheet" href="/css/main.css">
  <link rel="stylesheet" href="https://cdn.example.test/theme.css">
  <link rel="icon" href="/favicon.ico">
  <link rel="preload" href="/fonts/inter.woff2" as="font">
  <link rel="preload" href="/js/critical.js" as="script">
  <script src="/js/app.js"></script>
  <script src="/js/app.js"></script>
</head><body>
  <img src="/img/hero.png">
  <img src="banner.jpg">
  <img src="data:image/png;base64,xyz">
</body></html>"#;

    #[test]
    fn test_discovery_classification_and_dedup() {
        let base = Url::parse("https://example.test/page/index.html").unwrap();
        let resources = discover_subresources(PAGE, &base);

        let count = |kind: SubresourceType| resources.iter().filter(|r| r.kind == kind).count();
        assert_eq!(count(SubresourceType::Css), 2);
        assert_eq!(count(SubresourceType::Font), 1);
        // critical.js (preload) + app.js（重复的去重）
        assert_eq!(count(SubresourceType::Script), 2);
        // favicon + hero + banner；data: URL 被跳过
        assert_eq!(count(SubresourceType::Image), 3);

        // 相对地址按页面 URL 求解
        assert!(resources
            .iter()
            .any(|r| r.url.as_str() == "https://example.test/page/banner.jpg"));
    }

    #[test]
    fn test_discovery_deterministic() {
        let base = Url::parse("https://example.test/").unwrap();
        let first = discover_subresources(PAGE, &base);
        let second = discover_subresources(PAGE, &base);
        assert_eq!(first, second);
        let batches: Vec<usize> = first.iter().map(|r| r.batch()).collect();
        let again: Vec<usize> = second.iter().map(|r| r.batch()).collect();
        assert_eq!(batches, again);
    }

    #[test]
    fn test_batch_assignment() {
        let base = Url::parse("https://example.test/").unwrap();
        for resource in discover_subresources(PAGE, &base) {
            let expected = match resource.kind {
                SubresourceType::Css | SubresourceType::Font => 0,
                SubresourceType::Script => 1,
                SubresourceType::Image => 2,
            };
            assert_eq!(resource.batch(), expected);
        }
    }

    #[test]
    fn test_cap_at_50() {
        let mut html = String::from("<html><body>");
        for i in 0..80 {
            html.push_str(&format!("<img src=\"/img/{}.png\">", i));
        }
        html.push_str("</body></html>");
        let base = Url::parse("https://example.test/").unwrap();
        assert_eq!(discover_subresources(&html, &base).len(), MAX_SUBRESOURCES);
    }

    #[test]
    fn test_subresource_request_headers() {
        let page = Url::parse("https://example.test/page").unwrap();
        let resource = DiscoveredResource {
            url: Url::parse("https://cdn.example.test/a.css").unwrap(),
            kind: SubresourceType::Css,
        };
        let request = subresource_request(&resource, &page);
        assert_eq!(request.header("accept"), Some("text/css,*/*;q=0.1"));
        assert_eq!(request.header("sec-fetch-dest"), Some("style"));
        assert_eq!(request.header("sec-fetch-mode"), Some("no-cors"));
        assert_eq!(request.header("sec-fetch-site"), Some("same-site"));
        assert_eq!(request.header("referer"), Some("https://example.test/page"));
        assert_eq!(request.header("priority"), Some("u=0, i"));
    }
}
