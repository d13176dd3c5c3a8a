//! HTTP/2 线上形态校验
//!
//! 核对建连预写序列的帧顺序与字节、SETTINGS 的保序与缺席键、
//! HPACK 状态跨请求的连续性。

use cloakhttp::http_client::hpack::{Decoder, Encoder};
use cloakhttp::http_client::http2::{
    client_preamble, FrameHeader, FRAME_PRIORITY, FRAME_SETTINGS, FRAME_WINDOW_UPDATE,
    HTTP2_PREFACE,
};
use cloakhttp::{akamai_fingerprint, profiles, HpackIndexingPolicy};

fn frames(preamble: &[u8]) -> Vec<(u8, u32, Vec<u8>)> {
    assert!(preamble.starts_with(HTTP2_PREFACE), "缺少连接前言");
    let mut rest = &preamble[HTTP2_PREFACE.len()..];
    let mut out = Vec::new();
    while !rest.is_empty() {
        let header = FrameHeader::parse(rest).unwrap();
        let total = 9 + header.length as usize;
        out.push((header.frame_type, header.stream_id, rest[9..total].to_vec()));
        rest = &rest[total..];
    }
    out
}

/// 场景：chrome-143 建连的前三个动作与字节
#[test]
fn test_chrome_143_preamble_bytes() {
    let profile = profiles::get("chrome-143").unwrap();
    let frames = frames(&client_preamble(profile));

    // 帧顺序：[前言] SETTINGS → WINDOW_UPDATE
    assert_eq!(frames[0].0, FRAME_SETTINGS);
    assert_eq!(frames[0].1, 0);
    assert_eq!(frames[1].0, FRAME_WINDOW_UPDATE);
    assert_eq!(frames[1].1, 0);

    // SETTINGS 负载逐字节：{1:65536, 2:0, 4:6291456, 6:262144}
    let expected: Vec<u8> = vec![
        0x00, 0x01, 0x00, 0x01, 0x00, 0x00, // HEADER_TABLE_SIZE = 65536
        0x00, 0x02, 0x00, 0x00, 0x00, 0x00, // ENABLE_PUSH = 0
        0x00, 0x04, 0x00, 0x60, 0x00, 0x00, // INITIAL_WINDOW_SIZE = 6291456
        0x00, 0x06, 0x00, 0x04, 0x00, 0x00, // MAX_HEADER_LIST_SIZE = 262144
    ];
    assert_eq!(frames[0].2, expected);

    // MAX_CONCURRENT_STREAMS (3) 与 MAX_FRAME_SIZE (5) 必须缺席
    for chunk in frames[0].2.chunks_exact(6) {
        let id = u16::from_be_bytes([chunk[0], chunk[1]]);
        assert!(id != 3 && id != 5, "不该发送 SETTINGS 键 {}", id);
    }

    // WINDOW_UPDATE 增量 = 15663105
    assert_eq!(frames[1].2, vec![0x00, 0xef, 0x00, 0x01]);
}

/// 每个声明 H2 的 profile：SETTINGS 按声明顺序且只含声明键
#[test]
fn test_settings_order_matches_declaration_all_profiles() {
    for name in profiles::list() {
        let profile = profiles::get(name).unwrap();
        let frames = frames(&client_preamble(profile));
        let payload = &frames[0].2;

        let sent: Vec<(u16, u32)> = payload
            .chunks_exact(6)
            .map(|c| {
                (
                    u16::from_be_bytes([c[0], c[1]]),
                    u32::from_be_bytes([c[2], c[3], c[4], c[5]]),
                )
            })
            .collect();

        let declared: Vec<(u16, u32)> = profile
            .http2_settings_order
            .iter()
            .map(|id| (*id, profile.http2_settings[id]))
            .collect();

        assert_eq!(sent, declared, "{} 的 SETTINGS 不符", name);
    }
}

/// firefox 的优先级树按声明顺序出现在预写序列中
#[test]
fn test_firefox_priority_frames() {
    let profile = profiles::get("firefox-135").unwrap();
    let frames = frames(&client_preamble(profile));
    let priority_streams: Vec<u32> = frames
        .iter()
        .filter(|f| f.0 == FRAME_PRIORITY)
        .map(|f| f.1)
        .collect();
    assert_eq!(priority_streams, vec![3, 5, 7, 9, 11, 13]);

    // safari 不发 PRIORITY
    let safari = profiles::get("safari-18").unwrap();
    assert!(frames_without_priority(&client_preamble(safari)));
}

fn frames_without_priority(preamble: &[u8]) -> bool {
    frames(preamble).iter().all(|f| f.0 != FRAME_PRIORITY)
}

/// HPACK 连续性：N 个请求共用一个解码器成功；新解码器从第一个依赖
/// 动态表的块开始失败
#[test]
fn test_hpack_state_continuity_over_requests() {
    let profile = profiles::get("chrome-143").unwrap();
    let mut encoder = Encoder::new(65536);

    let request_headers: Vec<(String, String)> = vec![
        (":method".into(), "GET".into()),
        (":authority".into(), "example.test".into()),
        (":scheme".into(), "https".into()),
        (":path".into(), "/".into()),
        ("user-agent".into(), profile.user_agent().to_string()),
        ("accept".into(), "text/html".into()),
    ];

    let blocks: Vec<Vec<u8>> = (0..5)
        .map(|_| encoder.encode(&request_headers, &profile.hpack_policy))
        .collect();

    // 同一解码器全部成功
    let mut decoder = Decoder::new(65536);
    for block in &blocks {
        let decoded = decoder.decode(block).unwrap();
        assert_eq!(decoded, request_headers);
    }

    // 第二个块开始依赖动态表：新解码器必败
    for block in &blocks[1..] {
        assert!(Decoder::new(65536).decode(block).is_err());
    }
}

/// ChromeLike 策略下敏感头与允许表的表示形式
#[test]
fn test_chromelike_indexing_split() {
    let mut encoder = Encoder::new(65536);
    let headers: Vec<(String, String)> = vec![
        ("cookie".into(), "sid=secret".into()),
        ("user-agent".into(), "Mozilla/5.0".into()),
    ];
    let block1 = encoder.encode(&headers, &HpackIndexingPolicy::ChromeLike);
    let block2 = encoder.encode(&headers, &HpackIndexingPolicy::ChromeLike);

    // cookie 永不索引：两次编码等长；user-agent 进了动态表：第二次更短
    assert!(block2.len() < block1.len());
    // 首字节 0001 前缀（永不索引，名字引用静态表 cookie）
    assert_eq!(block1[0] & 0xf0, 0x10);
}

/// Akamai 风格指纹串
#[test]
fn test_akamai_fingerprint_strings() {
    let chrome = profiles::get("chrome-143").unwrap();
    assert_eq!(
        akamai_fingerprint(
            &chrome.http2_settings,
            &chrome.http2_settings_order,
            chrome.connection_flow,
            &chrome.initial_priorities,
            &chrome.pseudo_header_order,
        ),
        "1:65536;2:0;4:6291456;6:262144|15663105|0|m,a,s,p"
    );

    let firefox = profiles::get("firefox-135").unwrap();
    let fp = akamai_fingerprint(
        &firefox.http2_settings,
        &firefox.http2_settings_order,
        firefox.connection_flow,
        &firefox.initial_priorities,
        &firefox.pseudo_header_order,
    );
    assert!(fp.starts_with("1:65536;4:131072;5:16384|12517377|"));
    assert!(fp.ends_with("|m,p,a,s"));
}
