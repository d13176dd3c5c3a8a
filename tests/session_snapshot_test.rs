//! 会话快照的导出/导入与版本迁移

use chrono::Utc;
use cloakhttp::{Session, SessionConfig};
use url::Url;

fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
}

/// 导出→导入得到等价逻辑状态；重复导入是幂等的
#[tokio::test]
async fn test_export_import_equivalence() {
    let session = Session::new("chrome-143", SessionConfig::default()).unwrap();
    session.cookie_jar().set_cookie(
        "sid=abc; Domain=example.test; Path=/; Max-Age=86400",
        &url("https://api.example.test/"),
    );
    session
        .cookie_jar()
        .set_cookie("local=1", &url("https://host.test/"));
    session
        .session_cache()
        .insert("h3:example.test:443", vec![0xaa; 48], vec![0xbb; 16]);

    let snapshot = session.export().unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&snapshot).unwrap();
    assert_eq!(parsed["version"], 5);
    assert!(parsed["cookies"]["example.test"].is_array());
    assert!(parsed["tls_sessions"]["h3:example.test:443"]["ticket"].is_string());

    let restored = Session::new("chrome-143", SessionConfig::default()).unwrap();
    restored.import(&snapshot).unwrap();

    // cookie 行为等价
    assert_eq!(
        restored
            .cookie_jar()
            .cookie_header(&url("https://www.example.test/")),
        Some("sid=abc".to_string())
    );
    assert_eq!(
        restored.cookie_jar().cookie_header(&url("https://host.test/")),
        Some("local=1".to_string())
    );
    assert_eq!(
        restored
            .cookie_jar()
            .cookie_header(&url("https://sub.host.test/")),
        None
    );
    // 票据等价
    assert_eq!(
        restored
            .session_cache()
            .get("h3:example.test:443")
            .unwrap()
            .ticket,
        vec![0xaa; 48]
    );

    // 幂等
    restored.import(&snapshot).unwrap();
    assert_eq!(restored.cookie_jar().count(), 2);
    assert_eq!(restored.session_cache().len(), 1);
}

/// v4 平铺 cookie 列表与等价 v5 产生相同的可观测行为
#[tokio::test]
async fn test_v4_and_v5_equivalent_behavior() {
    let cookie_record = |domain: &str| {
        serde_json::json!({
            "name": "sid", "value": "abc", "domain": domain, "path": "/",
            "expires": null, "max_age": null, "secure": false,
            "http_only": false, "same_site": null,
            "created_at": Utc::now().timestamp()
        })
    };

    let v4 = serde_json::json!({
        "version": 4,
        "created_at": 1700000000, "updated_at": 1700000000,
        "config": {"profile": "chrome-143"},
        "cookies": [cookie_record(".example.test"), cookie_record("host.test")]
    });
    let v5 = serde_json::json!({
        "version": 5,
        "created_at": 1700000000, "updated_at": 1700000000,
        "config": {"profile": "chrome-143"},
        "cookies": {
            "example.test": [cookie_record(".example.test")],
            "host.test": [cookie_record("host.test")]
        },
        "tls_sessions": {}, "ech_configs": {}
    });

    let from_v4 = Session::new("chrome-143", SessionConfig::default()).unwrap();
    from_v4.import(&v4.to_string()).unwrap();
    let from_v5 = Session::new("chrome-143", SessionConfig::default()).unwrap();
    from_v5.import(&v5.to_string()).unwrap();

    for probe in [
        "https://example.test/",
        "https://deep.example.test/",
        "https://host.test/",
        "https://sub.host.test/",
        "https://other.test/",
    ] {
        assert_eq!(
            from_v4.cookie_jar().cookie_header(&url(probe)),
            from_v5.cookie_jar().cookie_header(&url(probe)),
            "v4/v5 行为分歧于 {}",
            probe
        );
    }
}

/// 超过 24 小时的 TLS 会话在加载时被丢弃
#[tokio::test]
async fn test_stale_tls_sessions_dropped() {
    let v5 = serde_json::json!({
        "version": 5,
        "created_at": 1700000000, "updated_at": 1700000000,
        "config": {"profile": "chrome-143"},
        "cookies": {},
        "tls_sessions": {
            "h2:stale.test:443": {
                "ticket": "AQID", "state": "",
                "created_at": Utc::now().timestamp() - 25 * 3600
            },
            "h2:fresh.test:443": {
                "ticket": "AQID", "state": "",
                "created_at": Utc::now().timestamp() - 3600
            }
        },
        "ech_configs": {}
    });
    let session = Session::new("chrome-143", SessionConfig::default()).unwrap();
    session.import(&v5.to_string()).unwrap();
    assert!(session.session_cache().get("h2:stale.test:443").is_none());
    assert!(session.session_cache().get("h2:fresh.test:443").is_some());
}

/// 未知版本与坏数据被拒
#[tokio::test]
async fn test_bad_snapshots_rejected() {
    let session = Session::new("chrome-143", SessionConfig::default()).unwrap();
    assert!(session.import("{\"version\": 2}").is_err());
    assert!(session.import("{}").is_err());
    assert!(session.import(").(").is_err());
}
