//! GREASE 值处理
//!
//! GREASE (RFC 8701) 值分布在密码套件、扩展、组与版本字段中。
//! 位置由 profile 固定，取值在每次握手内随机。

use rand::Rng;

/// 全部 16 个 GREASE 值
pub const TLS_GREASE_VALUES: &[u16] = &[
    0x0a0a, 0x1a1a, 0x2a2a, 0x3a3a, 0x4a4a, 0x5a5a, 0x6a6a, 0x7a7a, 0x8a8a, 0x9a9a, 0xaaaa,
    0xbaba, 0xcaca, 0xdada, 0xeaea, 0xfafa,
];

/// 占位值（构造期使用，序列化前被替换）
pub const GREASE_PLACEHOLDER: u16 = 0x0a0a;

/// 判断是否为 GREASE 值
pub fn is_grease_value(v: u16) -> bool {
    (v & 0x0f0f) == 0x0a0a && (v >> 12) == ((v >> 4) & 0x0f)
}

/// 过滤掉列表中的 GREASE 值
pub fn filter_grease_values(values: &[u16]) -> Vec<u16> {
    values.iter().copied().filter(|v| !is_grease_value(*v)).collect()
}

/// 单次握手使用的 GREASE 取值
///
/// 密码套件 / 组 / 版本共用一个值，两个 GREASE 扩展使用互不相同的另外两个值，
/// 与 BoringSSL 的分配方式一致。
#[derive(Debug, Clone, Copy)]
pub struct GreasePolicy {
    pub cipher: u16,
    pub group: u16,
    pub version: u16,
    pub ext1: u16,
    pub ext2: u16,
}

impl GreasePolicy {
    /// 每次握手随机抽取
    pub fn random() -> Self {
        let mut rng = rand::thread_rng();
        let shared = TLS_GREASE_VALUES[rng.gen_range(0..TLS_GREASE_VALUES.len())];
        let ext1 = TLS_GREASE_VALUES[rng.gen_range(0..TLS_GREASE_VALUES.len())];
        // 两个扩展的 GREASE 值必须不同，否则会出现重复扩展类型
        let mut ext2 = TLS_GREASE_VALUES[rng.gen_range(0..TLS_GREASE_VALUES.len())];
        while ext2 == ext1 {
            ext2 = TLS_GREASE_VALUES[rng.gen_range(0..TLS_GREASE_VALUES.len())];
        }
        Self {
            cipher: shared,
            group: shared,
            version: shared,
            ext1,
            ext2,
        }
    }

    /// 固定占位值（测试与指纹字符串计算使用）
    pub fn placeholder() -> Self {
        Self {
            cipher: GREASE_PLACEHOLDER,
            group: GREASE_PLACEHOLDER,
            version: GREASE_PLACEHOLDER,
            ext1: 0x0a0a,
            ext2: 0x1a1a,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_grease_value() {
        assert!(is_grease_value(0x0a0a));
        assert!(is_grease_value(0xfafa));
        assert!(!is_grease_value(0x1301));
        assert!(!is_grease_value(0x0a1a));
    }

    #[test]
    fn test_filter_grease() {
        let filtered = filter_grease_values(&[0x0a0a, 0x1301, 0x2a2a, 0x1302]);
        assert_eq!(filtered, vec![0x1301, 0x1302]);
    }

    #[test]
    fn test_random_policy_distinct_ext_values() {
        for _ in 0..64 {
            let policy = GreasePolicy::random();
            assert_ne!(policy.ext1, policy.ext2);
            assert!(is_grease_value(policy.cipher));
            assert!(is_grease_value(policy.ext1));
        }
    }
}
