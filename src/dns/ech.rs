//! ECH 配置获取
//!
//! 查询 HTTPS (type 65) 记录并提取 `ech` SvcParam。查询尽力而为且有时限：
//! 任何失败都返回 None，不影响整体请求。成功结果按记录 TTL 缓存。

use crate::dns::Resolver;
use hickory_resolver::proto::rr::{rdata::svcb::SvcParamValue, RData, RecordType};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// 单条 ECHConfig（解析自 ECHConfigList）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EchConfig {
    pub config_id: u8,
    pub kem_id: u16,
    pub public_key: Vec<u8>,
    /// (kdf_id, aead_id) 对
    pub cipher_suites: Vec<(u16, u16)>,
    pub public_name: String,
}

/// ECHConfigList：原始字节 + 解析出的配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EchConfigList {
    pub raw: Vec<u8>,
    pub configs: Vec<EchConfig>,
}

impl EchConfigList {
    /// 解析 ECHConfigList 线上格式（draft-ietf-tls-esni）
    ///
    /// 无法解析的版本被跳过；列表为空则返回 None。
    pub fn parse(raw: &[u8]) -> Option<Self> {
        if raw.len() < 2 {
            return None;
        }
        let total = u16::from_be_bytes([raw[0], raw[1]]) as usize;
        if raw.len() < 2 + total {
            return None;
        }
        let mut configs = Vec::new();
        let mut pos = 2;
        while pos + 4 <= 2 + total {
            let version = u16::from_be_bytes([raw[pos], raw[pos + 1]]);
            let length = u16::from_be_bytes([raw[pos + 2], raw[pos + 3]]) as usize;
            let body_start = pos + 4;
            if body_start + length > raw.len() {
                return None;
            }
            if version == 0xfe0d {
                if let Some(config) = Self::parse_contents(&raw[body_start..body_start + length]) {
                    configs.push(config);
                }
            }
            pos = body_start + length;
        }
        if configs.is_empty() {
            return None;
        }
        Some(Self {
            raw: raw.to_vec(),
            configs,
        })
    }

    fn parse_contents(data: &[u8]) -> Option<EchConfig> {
        // config_id(1) kem_id(2) pubkey(2+n) cipher_suites(2+4k) max_name_len(1) public_name(1+n)
        if data.len() < 5 {
            return None;
        }
        let config_id = data[0];
        let kem_id = u16::from_be_bytes([data[1], data[2]]);
        let pk_len = u16::from_be_bytes([data[3], data[4]]) as usize;
        let mut pos = 5;
        if pos + pk_len + 2 > data.len() {
            return None;
        }
        let public_key = data[pos..pos + pk_len].to_vec();
        pos += pk_len;
        let cs_len = u16::from_be_bytes([data[pos], data[pos + 1]]) as usize;
        pos += 2;
        if pos + cs_len + 1 > data.len() || cs_len % 4 != 0 {
            return None;
        }
        let mut cipher_suites = Vec::new();
        for chunk in data[pos..pos + cs_len].chunks_exact(4) {
            cipher_suites.push((
                u16::from_be_bytes([chunk[0], chunk[1]]),
                u16::from_be_bytes([chunk[2], chunk[3]]),
            ));
        }
        pos += cs_len;
        pos += 1; // maximum_name_length
        if pos >= data.len() {
            return None;
        }
        let name_len = data[pos] as usize;
        pos += 1;
        if pos + name_len > data.len() {
            return None;
        }
        let public_name = String::from_utf8_lossy(&data[pos..pos + name_len]).to_string();
        Some(EchConfig {
            config_id,
            kem_id,
            public_key,
            cipher_suites,
            public_name,
        })
    }

    /// 首选配置（列表第一条）
    pub fn preferred(&self) -> &EchConfig {
        &self.configs[0]
    }
}

struct CachedEch {
    list: EchConfigList,
    valid_until: Instant,
}

/// ECH 配置获取器（按主机缓存正向结果）
pub struct EchFetcher {
    resolver: Arc<Resolver>,
    cache: Mutex<HashMap<String, CachedEch>>,
    timeout: Duration,
}

impl EchFetcher {
    pub fn new(resolver: Arc<Resolver>) -> Self {
        Self {
            resolver,
            cache: Mutex::new(HashMap::new()),
            timeout: Duration::from_secs(2),
        }
    }

    /// 查询主机的 ECH 配置；失败与缺失一律返回 None
    pub async fn fetch_ech_config(&self, host: &str) -> Option<EchConfigList> {
        // 1. 查缓存
        if let Ok(cache) = self.cache.lock() {
            if let Some(entry) = cache.get(host) {
                if entry.valid_until > Instant::now() {
                    return Some(entry.list.clone());
                }
            }
        }

        // 2. HTTPS 记录查询（时限内尽力而为）
        let lookup = tokio::time::timeout(
            self.timeout,
            self.resolver.hickory().lookup(host, RecordType::HTTPS),
        )
        .await
        .ok()?
        .ok()?;

        let mut found: Option<(EchConfigList, u32)> = None;
        for record in lookup.record_iter() {
            if let Some(RData::HTTPS(https)) = record.data() {
                for (_, value) in https.svc_params() {
                    if let SvcParamValue::EchConfig(ech) = value {
                        if let Some(list) = EchConfigList::parse(&ech.0) {
                            found = Some((list, record.ttl()));
                        }
                    }
                }
            }
        }

        let (list, ttl) = found?;

        // 3. 按记录 TTL 缓存正向结果
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(
                host.to_string(),
                CachedEch {
                    list: list.clone(),
                    valid_until: Instant::now() + Duration::from_secs(ttl as u64),
                },
            );
        }

        Some(list)
    }

    /// 导出缓存中未过期的配置原始字节（会话快照序列化用）
    pub fn export_all(&self) -> Vec<(String, Vec<u8>)> {
        self.cache
            .lock()
            .map(|cache| {
                let now = Instant::now();
                cache
                    .iter()
                    .filter(|(_, entry)| entry.valid_until > now)
                    .map(|(host, entry)| (host.clone(), entry.list.raw.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// 把外部来源（如会话快照）的配置写入缓存；短 TTL，首次使用后会被刷新
    pub fn seed(&self, host: &str, raw: &[u8]) {
        if let Some(list) = EchConfigList::parse(raw) {
            if let Ok(mut cache) = self.cache.lock() {
                cache.insert(
                    host.to_string(),
                    CachedEch {
                        list,
                        valid_until: Instant::now() + Duration::from_secs(60),
                    },
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 构造一条最小的 ECHConfigList
    fn sample_config_list() -> Vec<u8> {
        let mut contents = Vec::new();
        contents.push(7); // config_id
        contents.extend_from_slice(&0x0020u16.to_be_bytes()); // kem: DHKEM(X25519)
        contents.extend_from_slice(&32u16.to_be_bytes());
        contents.extend_from_slice(&[0xab; 32]);
        contents.extend_from_slice(&4u16.to_be_bytes());
        contents.extend_from_slice(&0x0001u16.to_be_bytes()); // kdf
        contents.extend_from_slice(&0x0001u16.to_be_bytes()); // aead
        contents.push(64); // max name len
        contents.push(12);
        contents.extend_from_slice(b"example.test");
        contents.extend_from_slice(&0u16.to_be_bytes()); // extensions

        let mut config = Vec::new();
        config.extend_from_slice(&0xfe0du16.to_be_bytes());
        config.extend_from_slice(&(contents.len() as u16).to_be_bytes());
        config.extend_from_slice(&contents);

        let mut list = Vec::new();
        list.extend_from_slice(&(config.len() as u16).to_be_bytes());
        list.extend_from_slice(&config);
        list
    }

    #[test]
    fn test_parse_ech_config_list() {
        let raw = sample_config_list();
        let list = EchConfigList::parse(&raw).unwrap();
        assert_eq!(list.configs.len(), 1);
        let config = list.preferred();
        assert_eq!(config.config_id, 7);
        assert_eq!(config.kem_id, 0x0020);
        assert_eq!(config.public_key.len(), 32);
        assert_eq!(config.cipher_suites, vec![(0x0001, 0x0001)]);
        assert_eq!(config.public_name, "example.test");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(EchConfigList::parse(&[]).is_none());
        assert!(EchConfigList::parse(&[0x00]).is_none());
        assert!(EchConfigList::parse(&[0xff, 0xff, 0x01]).is_none());
        // 未知版本被跳过，列表为空
        let mut raw = vec![0x00, 0x08];
        raw.extend_from_slice(&0xfe0au16.to_be_bytes());
        raw.extend_from_slice(&4u16.to_be_bytes());
        raw.extend_from_slice(&[0, 0, 0, 0]);
        assert!(EchConfigList::parse(&raw).is_none());
    }

    #[test]
    fn test_seed_populates_cache() {
        let fetcher = EchFetcher::new(Arc::new(Resolver::new()));
        fetcher.seed("example.test", &sample_config_list());
        let cache = fetcher.cache.lock().unwrap();
        assert!(cache.contains_key("example.test"));
    }
}
