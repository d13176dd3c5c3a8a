//! HTTP/2 传输
//!
//! 手工编帧的 HTTP/2 客户端连接。ALPN 协商出 h2 后：
//!
//! 1. 发送连接前言 `PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n`；
//! 2. 发送 SETTINGS 帧：只含 profile 声明的键，按声明顺序（未声明的键
//!    一个都不发）；
//! 3. 在流 0 上发送 profile 的连接级 WINDOW_UPDATE；
//! 4. 发送 profile 声明的初始 PRIORITY 帧；
//! 5. 处理对端 SETTINGS 并 ACK。
//!
//! 连接由一个后台驱动任务独占：HPACK 编码器与帧写出天然串行，动态表
//! 跨流单调前进，流之间真正多路复用。

use super::hpack::{Decoder, Encoder};
use super::http1::AsyncStream;
use super::request::HttpMethod;
use super::response::HttpResponse;
use super::Protocol;
use crate::error::{CloakError, ConnectionError, Result, StreamError};
use crate::http2_config::{HTTP2PriorityParam, HpackIndexingPolicy};
use crate::profiles::BrowserProfile;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};

/// HTTP/2 连接前言
pub const HTTP2_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// 帧类型
pub const FRAME_DATA: u8 = 0x0;
pub const FRAME_HEADERS: u8 = 0x1;
pub const FRAME_PRIORITY: u8 = 0x2;
pub const FRAME_RST_STREAM: u8 = 0x3;
pub const FRAME_SETTINGS: u8 = 0x4;
pub const FRAME_PING: u8 = 0x6;
pub const FRAME_GOAWAY: u8 = 0x7;
pub const FRAME_WINDOW_UPDATE: u8 = 0x8;
pub const FRAME_CONTINUATION: u8 = 0x9;

const FLAG_END_STREAM: u8 = 0x1;
const FLAG_END_HEADERS: u8 = 0x4;
const FLAG_PADDED: u8 = 0x8;
const FLAG_PRIORITY: u8 = 0x20;
const FLAG_ACK: u8 = 0x1;

/// 对端默认值（RFC 7540 §6.5.2）
const DEFAULT_PEER_WINDOW: i64 = 65535;
const DEFAULT_PEER_MAX_FRAME: usize = 16384;

/// 收到多少字节后补发 WINDOW_UPDATE
const RECV_WINDOW_REFILL: usize = 4 * 1024 * 1024;

/// 帧头（9 字节）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub length: u32,
    pub frame_type: u8,
    pub flags: u8,
    pub stream_id: u32,
}

impl FrameHeader {
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < 9 {
            return None;
        }
        Some(Self {
            length: u32::from_be_bytes([0, data[0], data[1], data[2]]),
            frame_type: data[3],
            flags: data[4],
            stream_id: u32::from_be_bytes([data[5], data[6], data[7], data[8]]) & 0x7fff_ffff,
        })
    }

    pub fn encode(&self) -> [u8; 9] {
        let mut out = [0u8; 9];
        out[0] = ((self.length >> 16) & 0xff) as u8;
        out[1] = ((self.length >> 8) & 0xff) as u8;
        out[2] = (self.length & 0xff) as u8;
        out[3] = self.frame_type;
        out[4] = self.flags;
        out[5..9].copy_from_slice(&(self.stream_id & 0x7fff_ffff).to_be_bytes());
        out
    }
}

/// 组一个完整帧
fn frame(frame_type: u8, flags: u8, stream_id: u32, payload: &[u8]) -> Vec<u8> {
    let header = FrameHeader {
        length: payload.len() as u32,
        frame_type,
        flags,
        stream_id,
    };
    let mut out = Vec::with_capacity(9 + payload.len());
    out.extend_from_slice(&header.encode());
    out.extend_from_slice(payload);
    out
}

/// PRIORITY 帧负载
fn priority_payload(exclusive: bool, depends_on: u32, weight: u8) -> [u8; 5] {
    let mut out = [0u8; 5];
    let dep = if exclusive {
        depends_on | 0x8000_0000
    } else {
        depends_on
    };
    out[..4].copy_from_slice(&dep.to_be_bytes());
    out[4] = weight;
    out
}

/// 建连预写序列：前言 + SETTINGS + WINDOW_UPDATE + 初始 PRIORITY 帧
///
/// SETTINGS 负载严格按 profile 的声明顺序编码。
pub fn client_preamble(profile: &BrowserProfile) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(HTTP2_PREFACE);

    let mut settings_payload = Vec::with_capacity(profile.http2_settings_order.len() * 6);
    for id in &profile.http2_settings_order {
        if let Some(value) = profile.http2_settings.get(id) {
            settings_payload.extend_from_slice(&id.to_be_bytes());
            settings_payload.extend_from_slice(&value.to_be_bytes());
        }
    }
    out.extend_from_slice(&frame(FRAME_SETTINGS, 0, 0, &settings_payload));

    out.extend_from_slice(&frame(
        FRAME_WINDOW_UPDATE,
        0,
        0,
        &profile.connection_flow.to_be_bytes(),
    ));

    for p in &profile.initial_priorities {
        out.extend_from_slice(&frame(
            FRAME_PRIORITY,
            0,
            p.stream_id,
            &priority_payload(p.exclusive, p.depends_on, p.weight),
        ));
    }

    out
}

/// 一次 H2 请求的全部线上成分
pub struct H2RequestParts {
    pub method: HttpMethod,
    pub scheme: String,
    pub authority: String,
    pub path: String,
    /// 伪头顺序（profile 默认或请求级覆盖）
    pub pseudo_order: Vec<String>,
    /// 普通头（名字已小写、顺序已定）
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    pub priority: HTTP2PriorityParam,
}

impl H2RequestParts {
    /// 伪头 + 普通头合并为 HPACK 输入
    fn header_list(&self) -> Vec<(String, String)> {
        let mut list = Vec::with_capacity(4 + self.headers.len());
        for name in &self.pseudo_order {
            let value = match name.as_str() {
                ":method" => self.method.as_str().to_string(),
                ":authority" => self.authority.clone(),
                ":scheme" => self.scheme.clone(),
                ":path" => self.path.clone(),
                _ => continue,
            };
            list.push((name.clone(), value));
        }
        list.extend(self.headers.iter().cloned());
        list
    }
}

enum Cmd {
    Request {
        parts: Box<H2RequestParts>,
        response_tx: oneshot::Sender<Result<HttpResponse>>,
    },
}

/// 跨任务共享的连接状态
struct Shared {
    healthy: AtomicBool,
    goaway: AtomicBool,
    stream_errors: AtomicUsize,
    active_streams: AtomicUsize,
}

/// 一条 HTTP/2 连接（驱动任务在后台拥有流）
pub struct H2Connection {
    cmd_tx: mpsc::UnboundedSender<Cmd>,
    shared: Arc<Shared>,
    pub established_at: Instant,
    pub last_used: std::sync::Mutex<Instant>,
}

impl H2Connection {
    /// 建立连接：写预写序列，启动驱动任务
    pub async fn connect(mut stream: Box<dyn AsyncStream>, profile: &BrowserProfile) -> Result<Self> {
        stream.write_all(&client_preamble(profile)).await?;
        stream.flush().await?;

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            healthy: AtomicBool::new(true),
            goaway: AtomicBool::new(false),
            stream_errors: AtomicUsize::new(0),
            active_streams: AtomicUsize::new(0),
        });

        let header_table_size = profile
            .http2_settings
            .get(&1)
            .copied()
            .unwrap_or(4096) as usize;
        let driver = Driver {
            streams: HashMap::new(),
            encoder: Encoder::new(header_table_size),
            decoder: Decoder::new(4096),
            next_stream_id: 1,
            policy: profile.hpack_policy.clone(),
            peer_max_frame: DEFAULT_PEER_MAX_FRAME,
            conn_send_window: DEFAULT_PEER_WINDOW,
            peer_initial_window: DEFAULT_PEER_WINDOW,
            recv_since_update: 0,
            shared: shared.clone(),
        };
        tokio::spawn(driver.run(stream, cmd_rx));

        Ok(Self {
            cmd_tx,
            shared,
            established_at: Instant::now(),
            last_used: std::sync::Mutex::new(Instant::now()),
        })
    }

    /// 发送一个请求并等待完整响应
    pub async fn send_request(&self, parts: H2RequestParts) -> Result<HttpResponse> {
        if !self.is_reusable() {
            return Err(CloakError::Connection(ConnectionError::Closed(
                "连接已不可用".to_string(),
            )));
        }
        let (response_tx, response_rx) = oneshot::channel();
        self.cmd_tx
            .send(Cmd::Request {
                parts: Box::new(parts),
                response_tx,
            })
            .map_err(|_| {
                CloakError::Connection(ConnectionError::Closed("驱动任务已退出".to_string()))
            })?;
        if let Ok(mut last_used) = self.last_used.lock() {
            *last_used = Instant::now();
        }
        response_rx.await.map_err(|_| {
            CloakError::Connection(ConnectionError::Closed("响应通道中断".to_string()))
        })?
    }

    /// 回池判定：无流错误、无 GOAWAY、驱动仍在
    pub fn is_reusable(&self) -> bool {
        self.shared.healthy.load(Ordering::Relaxed)
            && !self.shared.goaway.load(Ordering::Relaxed)
            && self.shared.stream_errors.load(Ordering::Relaxed) == 0
    }

    pub fn active_streams(&self) -> usize {
        self.shared.active_streams.load(Ordering::Relaxed)
    }
}

/// 单个响应流的累积状态
struct StreamState {
    response_tx: Option<oneshot::Sender<Result<HttpResponse>>>,
    header_block: Vec<u8>,
    headers_done: bool,
    response: Option<HttpResponse>,
    body: Vec<u8>,
    /// 尚未写出的请求体（等待流控窗口）
    pending_body: Vec<u8>,
    send_window: i64,
}

/// 连接驱动：独占流与 HPACK 状态
struct Driver {
    streams: HashMap<u32, StreamState>,
    encoder: Encoder,
    decoder: Decoder,
    next_stream_id: u32,
    policy: HpackIndexingPolicy,
    peer_max_frame: usize,
    conn_send_window: i64,
    peer_initial_window: i64,
    recv_since_update: usize,
    shared: Arc<Shared>,
}

impl Driver {
    async fn run(mut self, stream: Box<dyn AsyncStream>, mut cmd_rx: mpsc::UnboundedReceiver<Cmd>) {
        let (mut read_half, mut write_half) = tokio::io::split(stream);
        let mut recv_buf: Vec<u8> = Vec::with_capacity(16384);
        let mut chunk = [0u8; 16384];

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(Cmd::Request { parts, response_tx }) => {
                            if let Err(e) = self.start_stream(&mut write_half, *parts, response_tx).await {
                                eprintln!("警告: HTTP/2 写请求失败: {}", e);
                                break;
                            }
                        }
                        None => break, // 连接句柄全部丢弃
                    }
                }
                read = read_half.read(&mut chunk) => {
                    match read {
                        Ok(0) => {
                            self.fail_all(|| CloakError::Connection(ConnectionError::Closed(
                                "对端关闭连接".to_string(),
                            )));
                            break;
                        }
                        Ok(n) => {
                            recv_buf.extend_from_slice(&chunk[..n]);
                            if self.process_frames(&mut recv_buf, &mut write_half).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            self.fail_all(|| CloakError::Connection(ConnectionError::Closed(
                                format!("读连接失败: {}", e),
                            )));
                            break;
                        }
                    }
                }
            }
        }
        self.shared.healthy.store(false, Ordering::Relaxed);
    }

    /// 分配流 ID、编码 HEADERS、写出请求
    async fn start_stream<W: tokio::io::AsyncWrite + Unpin>(
        &mut self,
        w: &mut W,
        parts: H2RequestParts,
        response_tx: oneshot::Sender<Result<HttpResponse>>,
    ) -> Result<()> {
        // 客户端流 ID：奇数、单调
        let stream_id = self.next_stream_id;
        self.next_stream_id += 2;

        let block = self.encoder.encode(&parts.header_list(), &self.policy);

        let has_body = parts.body.as_ref().map(|b| !b.is_empty()).unwrap_or(false);
        let mut flags = FLAG_END_HEADERS | FLAG_PRIORITY;
        if !has_body {
            flags |= FLAG_END_STREAM;
        }

        // HEADERS 帧携带 profile 的优先级字段
        let mut payload = Vec::with_capacity(5 + block.len());
        payload.extend_from_slice(&priority_payload(
            parts.priority.exclusive,
            parts.priority.stream_dependency,
            parts.priority.weight,
        ));
        payload.extend_from_slice(&block);
        w.write_all(&frame(FRAME_HEADERS, flags, stream_id, &payload))
            .await?;

        let mut state = StreamState {
            response_tx: Some(response_tx),
            header_block: Vec::new(),
            headers_done: false,
            response: None,
            body: Vec::new(),
            pending_body: parts.body.unwrap_or_default(),
            send_window: self.peer_initial_window,
        };

        if has_body {
            self.flush_body(w, stream_id, &mut state).await?;
        }
        w.flush().await?;

        self.shared.active_streams.fetch_add(1, Ordering::Relaxed);
        self.streams.insert(stream_id, state);
        Ok(())
    }

    /// 在流控窗口允许的范围内写请求体
    async fn flush_body<W: tokio::io::AsyncWrite + Unpin>(
        &mut self,
        w: &mut W,
        stream_id: u32,
        state: &mut StreamState,
    ) -> Result<()> {
        while !state.pending_body.is_empty() {
            let window = state.send_window.min(self.conn_send_window);
            if window <= 0 {
                return Ok(()); // 等 WINDOW_UPDATE
            }
            let n = state
                .pending_body
                .len()
                .min(window as usize)
                .min(self.peer_max_frame);
            let rest = state.pending_body.split_off(n);
            let data = std::mem::replace(&mut state.pending_body, rest);
            let end = state.pending_body.is_empty();
            let flags = if end { FLAG_END_STREAM } else { 0 };
            w.write_all(&frame(FRAME_DATA, flags, stream_id, &data)).await?;
            state.send_window -= data.len() as i64;
            self.conn_send_window -= data.len() as i64;
        }
        Ok(())
    }

    /// 从接收缓冲中剥出完整帧并分发
    async fn process_frames<W: tokio::io::AsyncWrite + Unpin>(
        &mut self,
        buf: &mut Vec<u8>,
        w: &mut W,
    ) -> Result<()> {
        loop {
            let header = match FrameHeader::parse(buf) {
                Some(h) => h,
                None => return Ok(()),
            };
            let total = 9 + header.length as usize;
            if buf.len() < total {
                return Ok(());
            }
            let payload: Vec<u8> = buf[9..total].to_vec();
            buf.drain(..total);
            self.dispatch(header, payload, w).await?;
        }
    }

    async fn dispatch<W: tokio::io::AsyncWrite + Unpin>(
        &mut self,
        header: FrameHeader,
        payload: Vec<u8>,
        w: &mut W,
    ) -> Result<()> {
        match header.frame_type {
            FRAME_SETTINGS => {
                if header.flags & FLAG_ACK == 0 {
                    for chunk in payload.chunks_exact(6) {
                        let id = u16::from_be_bytes([chunk[0], chunk[1]]);
                        let value = u32::from_be_bytes([chunk[2], chunk[3], chunk[4], chunk[5]]);
                        match id {
                            4 => self.peer_initial_window = value as i64,
                            5 => self.peer_max_frame = value as usize,
                            _ => {}
                        }
                    }
                    w.write_all(&frame(FRAME_SETTINGS, FLAG_ACK, 0, &[])).await?;
                    w.flush().await?;
                }
            }
            FRAME_PING => {
                if header.flags & FLAG_ACK == 0 {
                    w.write_all(&frame(FRAME_PING, FLAG_ACK, 0, &payload)).await?;
                    w.flush().await?;
                }
            }
            FRAME_WINDOW_UPDATE => {
                if payload.len() == 4 {
                    let increment =
                        u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]) as i64;
                    if header.stream_id == 0 {
                        self.conn_send_window += increment;
                    } else if let Some(state) = self.streams.get_mut(&header.stream_id) {
                        state.send_window += increment;
                    }
                    // 窗口恢复后继续写挂起的请求体
                    let ids: Vec<u32> = self
                        .streams
                        .iter()
                        .filter(|(_, s)| !s.pending_body.is_empty())
                        .map(|(id, _)| *id)
                        .collect();
                    for id in ids {
                        if let Some(mut state) = self.streams.remove(&id) {
                            self.flush_body(w, id, &mut state).await?;
                            w.flush().await?;
                            self.streams.insert(id, state);
                        }
                    }
                }
            }
            FRAME_HEADERS => {
                let block = strip_headers_payload(header.flags, &payload);
                if let Some(state) = self.streams.get_mut(&header.stream_id) {
                    state.header_block.extend_from_slice(&block);
                }
                if header.flags & FLAG_END_HEADERS != 0 {
                    self.finish_header_block(header.stream_id)?;
                }
                if header.flags & FLAG_END_STREAM != 0 {
                    self.complete_stream(header.stream_id);
                }
            }
            FRAME_CONTINUATION => {
                if let Some(state) = self.streams.get_mut(&header.stream_id) {
                    state.header_block.extend_from_slice(&payload);
                }
                if header.flags & FLAG_END_HEADERS != 0 {
                    self.finish_header_block(header.stream_id)?;
                }
            }
            FRAME_DATA => {
                let data = strip_data_padding(header.flags, &payload);
                self.recv_since_update += data.len();
                if let Some(state) = self.streams.get_mut(&header.stream_id) {
                    state.body.extend_from_slice(&data);
                }
                // 接收窗口补水
                if self.recv_since_update >= RECV_WINDOW_REFILL {
                    let refill = (self.recv_since_update as u32).to_be_bytes();
                    w.write_all(&frame(FRAME_WINDOW_UPDATE, 0, 0, &refill)).await?;
                    w.write_all(&frame(FRAME_WINDOW_UPDATE, 0, header.stream_id, &refill))
                        .await?;
                    w.flush().await?;
                    self.recv_since_update = 0;
                }
                if header.flags & FLAG_END_STREAM != 0 {
                    self.complete_stream(header.stream_id);
                }
            }
            FRAME_RST_STREAM => {
                let error_code = if payload.len() == 4 {
                    u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]])
                } else {
                    0
                };
                self.shared.stream_errors.fetch_add(1, Ordering::Relaxed);
                if let Some(mut state) = self.streams.remove(&header.stream_id) {
                    self.shared.active_streams.fetch_sub(1, Ordering::Relaxed);
                    if let Some(tx) = state.response_tx.take() {
                        let _ = tx.send(Err(CloakError::Stream(StreamError::Reset {
                            stream_id: header.stream_id,
                            error_code,
                        })));
                    }
                }
            }
            FRAME_GOAWAY => {
                let (last_stream_id, error_code) = if payload.len() >= 8 {
                    (
                        u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]])
                            & 0x7fff_ffff,
                        u32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]),
                    )
                } else {
                    (0, 0)
                };
                self.shared.goaway.store(true, Ordering::Relaxed);
                // last_stream_id 之后的流可在新连接上重试
                let ids: Vec<u32> = self.streams.keys().copied().collect();
                for id in ids {
                    if let Some(mut state) = self.streams.remove(&id) {
                        self.shared.active_streams.fetch_sub(1, Ordering::Relaxed);
                        if let Some(tx) = state.response_tx.take() {
                            let err = if id > last_stream_id {
                                CloakError::Connection(ConnectionError::GoAway {
                                    last_stream_id,
                                    error_code,
                                })
                            } else {
                                CloakError::Connection(ConnectionError::Closed(format!(
                                    "GOAWAY 截断流 {}",
                                    id
                                )))
                            };
                            let _ = tx.send(Err(err));
                        }
                    }
                }
            }
            _ => {} // PUSH_PROMISE 已被 SETTINGS 禁用，其余忽略
        }
        Ok(())
    }

    /// END_HEADERS 后解码头块（解码器状态跨流共享）
    fn finish_header_block(&mut self, stream_id: u32) -> Result<()> {
        let block = match self.streams.get_mut(&stream_id) {
            Some(state) => std::mem::take(&mut state.header_block),
            None => return Ok(()),
        };
        let decoded = self.decoder.decode(&block);
        if let Some(state) = self.streams.get_mut(&stream_id) {
            match decoded {
                Ok(headers) => {
                    if state.headers_done {
                        // trailer：保持解码器状态即可，内容忽略
                        return Ok(());
                    }
                    state.headers_done = true;
                    let mut response = HttpResponse::new(0, Protocol::H2);
                    for (name, value) in headers {
                        if name == ":status" {
                            response.status_code = value.parse().unwrap_or(0);
                        } else if !name.starts_with(':') {
                            response.headers.push((name, value));
                        }
                    }
                    state.response = Some(response);
                }
                Err(e) => {
                    if let Some(tx) = state.response_tx.take() {
                        let _ = tx.send(Err(e));
                    }
                }
            }
        }
        Ok(())
    }

    /// END_STREAM：组装响应并交付
    fn complete_stream(&mut self, stream_id: u32) {
        if let Some(mut state) = self.streams.remove(&stream_id) {
            self.shared.active_streams.fetch_sub(1, Ordering::Relaxed);
            if let (Some(tx), Some(mut response)) = (state.response_tx.take(), state.response.take())
            {
                response.body = std::mem::take(&mut state.body);
                // 解压放到引擎层之前完成
                if let Some(encoding) = response.header("content-encoding").map(|s| s.to_string()) {
                    match super::response::decode_body(&encoding, &response.body) {
                        Ok(decoded) => response.body = decoded,
                        Err(e) => {
                            let _ = tx.send(Err(e));
                            return;
                        }
                    }
                }
                let _ = tx.send(Ok(response));
            }
        }
    }

    fn fail_all(&mut self, make_err: impl Fn() -> CloakError) {
        for (_, mut state) in self.streams.drain() {
            self.shared.active_streams.fetch_sub(1, Ordering::Relaxed);
            if let Some(tx) = state.response_tx.take() {
                let _ = tx.send(Err(make_err()));
            }
        }
    }
}

/// 去掉 HEADERS 帧负载中的 padding 与 priority 字段
fn strip_headers_payload(flags: u8, payload: &[u8]) -> Vec<u8> {
    let mut start = 0;
    let mut end = payload.len();
    if flags & FLAG_PADDED != 0 && !payload.is_empty() {
        let pad = payload[0] as usize;
        start = 1;
        end = end.saturating_sub(pad);
    }
    if flags & FLAG_PRIORITY != 0 {
        start += 5;
    }
    payload.get(start..end).unwrap_or(&[]).to_vec()
}

/// 去掉 DATA 帧负载中的 padding
fn strip_data_padding(flags: u8, payload: &[u8]) -> Vec<u8> {
    if flags & FLAG_PADDED != 0 && !payload.is_empty() {
        let pad = payload[0] as usize;
        let end = payload.len().saturating_sub(pad);
        payload.get(1..end).unwrap_or(&[]).to_vec()
    } else {
        payload.to_vec()
    }
}
