//! 预热计划的确定性与批次划分

use cloakhttp::http_client::warmup::{discover_subresources, MAX_SUBRESOURCES};
use cloakhttp::SubresourceType;
use url::Url;

const PAGE: &str = r#"<!doctype html><html><head>
<link rel="stylesheet" href="/a.css">
<link rel="stylesheet" href="/b.css">
<link rel="stylesheet" href="/c.css">
<link rel="preload" href="/f.woff2" as="font">
<script src="/1.js"></script>
<script src="/2.js"></script>
</head><body>
<img src="/i1.png"><img src="/i2.png"><img src="/i3.png"><img src="/i4.png">
</body></html>"#;

/// 固定输入下发现集合、分类与批次都是确定的
#[test]
fn test_deterministic_discovery_and_batches() {
    let base = Url::parse("https://example.test/").unwrap();
    let first = discover_subresources(PAGE, &base);
    for _ in 0..5 {
        assert_eq!(discover_subresources(PAGE, &base), first);
    }

    let in_batch = |n: usize| first.iter().filter(|r| r.batch() == n).count();
    // 批次 1：3 CSS + 1 字体；批次 2：2 脚本；批次 3：4 图片
    assert_eq!(in_batch(0), 4);
    assert_eq!(in_batch(1), 2);
    assert_eq!(in_batch(2), 4);
}

/// 分类完整覆盖四种类型
#[test]
fn test_classification() {
    let base = Url::parse("https://example.test/").unwrap();
    let resources = discover_subresources(PAGE, &base);
    let kind_of = |path: &str| {
        resources
            .iter()
            .find(|r| r.url.path() == path)
            .map(|r| r.kind)
    };
    assert_eq!(kind_of("/a.css"), Some(SubresourceType::Css));
    assert_eq!(kind_of("/f.woff2"), Some(SubresourceType::Font));
    assert_eq!(kind_of("/1.js"), Some(SubresourceType::Script));
    assert_eq!(kind_of("/i4.png"), Some(SubresourceType::Image));
}

/// 跨源子资源保留绝对地址；上限 50 截断
#[test]
fn test_cross_origin_and_cap() {
    let mut html = String::from(r#"<link rel="stylesheet" href="https://cdn.other.test/x.css">"#);
    for i in 0..60 {
        html.push_str(&format!(r#"<img src="/img-{}.png">"#, i));
    }
    let base = Url::parse("https://example.test/").unwrap();
    let resources = discover_subresources(&html, &base);
    assert_eq!(resources.len(), MAX_SUBRESOURCES);
    assert_eq!(
        resources[0].url.as_str(),
        "https://cdn.other.test/x.css"
    );
}
