//! 协议能力缓存的状态转移

use cloakhttp::error::{CloakError, HandshakeError};
use cloakhttp::http_client::pool::{plan_dial, DialPlan};
use cloakhttp::{Origin, Protocol, ProtocolSupport, Session, SessionConfig};

/// 成功协商提升；ALPN 不匹配降级；网络超时不动
#[tokio::test]
async fn test_capability_transitions() {
    let session = Session::new("chrome-143", SessionConfig::default()).unwrap();
    let pool = session.pool();
    let origin = Origin::new("https", "example.test", 443);

    assert_eq!(
        pool.capability(&origin),
        (ProtocolSupport::Unknown, ProtocolSupport::Unknown)
    );

    pool.promote(&origin, Protocol::H2);
    assert_eq!(
        pool.capability(&origin),
        (ProtocolSupport::Unknown, ProtocolSupport::Supported)
    );

    pool.demote(&origin, Protocol::H3);
    assert_eq!(
        pool.capability(&origin),
        (ProtocolSupport::Unsupported, ProtocolSupport::Supported)
    );
}

/// H3 不支持 + H2 支持 → 计划只拨 H2（不会产生 UDP 流量）
#[test]
fn test_dial_plan_avoids_udp_when_h3_unsupported() {
    assert_eq!(
        plan_dial(ProtocolSupport::Unsupported, ProtocolSupport::Supported),
        DialPlan::H2Only
    );
    assert_eq!(
        plan_dial(ProtocolSupport::Unknown, ProtocolSupport::Unknown),
        DialPlan::Race
    );
    assert_eq!(
        plan_dial(ProtocolSupport::Unsupported, ProtocolSupport::Unsupported),
        DialPlan::H1Only
    );
}

/// 失败分类：只有协议不支持才会驱动降级
#[test]
fn test_failure_classification() {
    let unsupported = [
        HandshakeError::NoProtocolNegotiated,
        HandshakeError::VersionNegotiation(vec![0x00000001]),
    ];
    for e in unsupported {
        assert!(e.is_protocol_unsupported());
    }

    let surfaced = [
        HandshakeError::CertVerificationFailed("自签名".into()),
        HandshakeError::HandshakeFailed("对端掐断".into()),
        HandshakeError::AmplificationLimited,
    ];
    for e in surfaced {
        assert!(!e.is_protocol_unsupported());
    }

    // 连接 ID 长度不匹配是致命的，不触发回退
    assert!(!HandshakeError::ConnectionIdLengthMismatch.is_protocol_unsupported());

    // GOAWAY(REFUSED_STREAM) 可在新连接重试
    let goaway = CloakError::Connection(cloakhttp::ConnectionError::GoAway {
        last_stream_id: 1,
        error_code: 7,
    });
    assert!(goaway.retryable_on_new_connection());
}

/// 真实拨号（需要网络）
#[tokio::test]
#[ignore] // 需要网络
async fn test_live_negotiation_updates_capability() {
    let session = Session::new("chrome-143", SessionConfig::default()).unwrap();
    let (response, _) = session
        .execute(cloakhttp::HttpRequest::get("https://cloudflare.com/"))
        .await
        .unwrap();
    assert!(response.status_code > 0);
    let origin = Origin::new("https", "cloudflare.com", 443);
    let (h3, h2) = session.pool().capability(&origin);
    println!("cloudflare.com 能力: h3={:?} h2={:?}", h3, h2);
    assert!(h3 == ProtocolSupport::Supported || h2 == ProtocolSupport::Supported);
}
