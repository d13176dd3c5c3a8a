//! DNS 解析模块
//!
//! 基于 hickory-resolver 提供两类查询：
//! - A/AAAA 地址解析，带进程内 TTL 缓存；
//! - HTTPS (type 65) 记录查询，提取 `ech` SvcParam 供 Encrypted ClientHello 使用。

mod ech;
mod resolver;

pub use ech::{EchConfig, EchConfigList, EchFetcher};
pub use resolver::Resolver;
