//! TLS 会话票据缓存
//!
//! 按 `协议:主机:端口` 键存放票据，LRU 上限 32 条。条目只在 TLS 引擎
//! 的签发回调（`TicketBridge`）里写入：服务器没发过票据的源不会出现
//! 在表里。真实票据字节需要定制引擎；标准 rustls 下写入的是存在性
//! 标记，用于驱动 PSK 供给与 0-RTT 判定。加载快照时丢弃超过 24 小时
//! 的条目。

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::VecDeque;
use std::sync::Mutex;

/// 票据最长寿命：24 小时
pub const MAX_TICKET_AGE_HOURS: i64 = 24;

/// 缓存默认容量
pub const DEFAULT_CAPACITY: usize = 32;

/// 存在性标记：标准 rustls 不暴露票据字节，签发事件以此占位登记
pub const TICKET_MARKER: &[u8] = &[0u8; 32];

/// 一条票据
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketEntry {
    pub ticket: Vec<u8>,
    /// 恢复所需的会话状态（TLS 引擎不透明字节）
    pub state: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

impl TicketEntry {
    /// 票据年龄（毫秒），供 obfuscated_ticket_age 使用
    pub fn age_millis(&self) -> i64 {
        (Utc::now() - self.created_at).num_milliseconds().max(0)
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() - self.created_at > ChronoDuration::hours(MAX_TICKET_AGE_HOURS)
    }
}

/// LRU 票据缓存
pub struct TlsSessionCache {
    /// 头部最新；get 触发重排
    entries: Mutex<VecDeque<(String, TicketEntry)>>,
    capacity: usize,
}

impl TlsSessionCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    /// 键格式：`h2:example.test:443`
    pub fn cache_key(protocol: &str, host: &str, port: u16) -> String {
        format!("{}:{}:{}", protocol, host, port)
    }

    /// 写入票据（同键覆盖；超容从尾部驱逐）
    pub fn insert(&self, key: &str, ticket: Vec<u8>, state: Vec<u8>) {
        self.insert_entry(
            key,
            TicketEntry {
                ticket,
                state,
                created_at: Utc::now(),
            },
        );
    }

    /// 写入完整条目（快照导入路径带原始时间戳）
    pub fn insert_entry(&self, key: &str, entry: TicketEntry) {
        if entry.is_expired() {
            return;
        }
        if let Ok(mut entries) = self.entries.lock() {
            entries.retain(|(k, _)| k != key);
            entries.push_front((key.to_string(), entry));
            while entries.len() > self.capacity {
                entries.pop_back();
            }
        }
    }

    /// 取票据（命中即提升到队首；过期条目顺手清除）
    pub fn get(&self, key: &str) -> Option<TicketEntry> {
        let mut entries = self.entries.lock().ok()?;
        let pos = entries.iter().position(|(k, _)| k == key)?;
        if entries[pos].1.is_expired() {
            entries.remove(pos);
            return None;
        }
        let item = entries.remove(pos)?;
        let entry = item.1.clone();
        entries.push_front(item);
        Some(entry)
    }

    /// 会话恢复失败（TicketInvalid）时废弃票据
    pub fn remove(&self, key: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.retain(|(k, _)| k != key);
        }
    }

    /// 清除过期条目
    pub fn prune_expired(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.retain(|(_, entry)| !entry.is_expired());
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }

    /// 导出全部条目（快照序列化用）
    pub fn export_entries(&self) -> Vec<(String, TicketEntry)> {
        self.entries
            .lock()
            .map(|entries| entries.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for TlsSessionCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
