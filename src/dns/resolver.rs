//! DNS 地址解析器
//!
//! A/AAAA 查询带进程内 TTL 缓存；结果按 IPv4 优先排序，避免 IPv4 端点
//! 连接 IPv6 远端导致的 invalid remote address。

use crate::error::{CloakError, Result};
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// 缓存条目
struct CachedAddrs {
    addrs: Vec<IpAddr>,
    valid_until: Instant,
}

/// DNS 解析器
pub struct Resolver {
    inner: TokioAsyncResolver,
    cache: Mutex<HashMap<String, CachedAddrs>>,
    /// 单次查询超时
    timeout: Duration,
}

impl Resolver {
    /// 使用系统默认配置创建解析器
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(5))
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let resolver = TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default());
        Self {
            inner: resolver,
            cache: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    /// 解析主机名为 IP 地址列表（IPv4 优先）
    pub async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>> {
        // 字面 IP 直接返回
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(vec![ip]);
        }

        // 1. 查缓存
        if let Ok(cache) = self.cache.lock() {
            if let Some(entry) = cache.get(host) {
                if entry.valid_until > Instant::now() {
                    return Ok(entry.addrs.clone());
                }
            }
        }

        // 2. 发起查询
        let lookup = tokio::time::timeout(self.timeout, self.inner.lookup_ip(host))
            .await
            .map_err(|_| CloakError::dns(format!("{}: 查询超时", host)))?
            .map_err(|e| CloakError::dns(format!("{}: {}", host, e)))?;

        let valid_until = lookup.as_lookup().valid_until();
        let mut addrs: Vec<IpAddr> = lookup.iter().collect();
        if addrs.is_empty() {
            return Err(CloakError::dns(format!("{}: 无 A/AAAA 记录", host)));
        }
        addrs.sort_by_key(|a| matches!(a, IpAddr::V6(_))); // IPv4 优先

        // 3. 写缓存
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(
                host.to_string(),
                CachedAddrs {
                    addrs: addrs.clone(),
                    valid_until,
                },
            );
        }

        Ok(addrs)
    }

    pub fn clear_cache(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.clear();
        }
    }

    pub(crate) fn hickory(&self) -> &TokioAsyncResolver {
        &self.inner
    }
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_literal_ip_bypasses_lookup() {
        let resolver = Resolver::new();
        let addrs = resolver.resolve("127.0.0.1").await.unwrap();
        assert_eq!(addrs, vec!["127.0.0.1".parse::<IpAddr>().unwrap()]);

        let addrs = resolver.resolve("::1").await.unwrap();
        assert_eq!(addrs.len(), 1);
    }

    #[tokio::test]
    #[ignore] // 需要网络
    async fn test_resolve_real_domain() {
        let resolver = Resolver::new();
        let addrs = resolver.resolve("one.one.one.one").await.unwrap();
        assert!(!addrs.is_empty());
        // 第二次命中缓存
        let cached = resolver.resolve("one.one.one.one").await.unwrap();
        assert_eq!(addrs, cached);
    }
}
