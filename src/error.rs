//! 错误类型定义
//!
//! 按关注点分层的错误枚举：配置、DNS、握手、流、连接、响应体、策略。
//! 握手错误额外携带"协议不支持"判定，供能力缓存与协议回退使用。

use thiserror::Error;

/// 库级错误
#[derive(Debug, Error)]
pub enum CloakError {
    /// 配置错误：未知 profile、非法 URL、非法覆盖项，不重试
    #[error("配置错误: {0}")]
    Config(String),

    /// DNS 解析失败
    #[error("DNS 解析失败: {0}")]
    Dns(String),

    /// TLS / QUIC 握手失败
    #[error("握手失败: {0}")]
    Handshake(#[from] HandshakeError),

    /// 流级错误（对端 RST_STREAM 等），连接可能仍然可用
    #[error("流错误: {0}")]
    Stream(#[from] StreamError),

    /// 连接级错误，连接被丢弃
    #[error("连接错误: {0}")]
    Connection(#[from] ConnectionError),

    /// 响应体错误（截断、解压失败）
    #[error("响应体错误: {0}")]
    Body(#[from] BodyError),

    /// 策略错误（重定向环、重试上限），致命
    #[error("策略错误: {0}")]
    Policy(#[from] PolicyError),

    /// IO 错误
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    /// 操作超时
    #[error("操作超时")]
    Timeout,
}

/// 握手错误
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("TLS 握手失败: {0}")]
    HandshakeFailed(String),

    #[error("证书校验失败: {0}")]
    CertVerificationFailed(String),

    /// ALPN 未协商出结果（对端不支持请求的协议）
    #[error("未协商出应用协议")]
    NoProtocolNegotiated,

    /// 恢复票据被拒：透明降级为完整握手后重试一次
    #[error("会话票据无效")]
    TicketInvalid,

    /// QUIC 版本协商（对端通告的版本列表）
    #[error("QUIC 版本协商，对端支持 {0:?}")]
    VersionNegotiation(Vec<u32>),

    /// 连接 ID 长度不匹配，致命
    #[error("QUIC 连接 ID 长度不匹配")]
    ConnectionIdLengthMismatch,

    /// 放大限制：等待地址验证，本层不重试
    #[error("QUIC 放大限制")]
    AmplificationLimited,
}

impl HandshakeError {
    /// 是否表示"对端不支持该协议"
    ///
    /// 仅此类失败会降级能力缓存；网络类失败不得改动缓存状态。
    pub fn is_protocol_unsupported(&self) -> bool {
        matches!(
            self,
            HandshakeError::NoProtocolNegotiated | HandshakeError::VersionNegotiation(_)
        )
    }
}

/// 流级错误
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("对端重置流 {stream_id}，错误码 {error_code}")]
    Reset { stream_id: u32, error_code: u32 },

    #[error("HTTP/3 流被重置，错误码 {0}")]
    H3Reset(u64),
}

/// 连接级错误
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// 对端 GOAWAY；last_stream_id 之后的流可在新连接上安全重试
    #[error("对端 GOAWAY，last_stream_id={last_stream_id}，错误码 {error_code}")]
    GoAway { last_stream_id: u32, error_code: u32 },

    #[error("连接中断: {0}")]
    Closed(String),

    #[error("连接空闲超时")]
    IdleTimeout,
}

/// 响应体错误
#[derive(Debug, Error)]
pub enum BodyError {
    /// 响应中断；携带已收到的字节数
    #[error("响应体截断，已接收 {received} 字节")]
    Truncated { received: usize },

    #[error("响应体解码失败: {0}")]
    Decode(String),
}

/// 策略错误
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("重定向循环")]
    RedirectLoop,

    #[error("超过重定向上限 {0}")]
    TooManyRedirects(usize),

    #[error("超过重试上限")]
    TooManyRetries,
}

impl CloakError {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    pub fn dns<S: Into<String>>(msg: S) -> Self {
        Self::Dns(msg.into())
    }

    /// 此错误是否允许在新连接上重试（仅限幂等或显式标记可重试的请求）
    pub fn retryable_on_new_connection(&self) -> bool {
        match self {
            CloakError::Connection(ConnectionError::GoAway { error_code, .. }) => {
                // REFUSED_STREAM(7) 或 NO_ERROR(0)
                *error_code == 0 || *error_code == 7
            }
            CloakError::Connection(_) => true,
            _ => false,
        }
    }
}

/// 库级 Result 别名
pub type Result<T> = std::result::Result<T, CloakError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_unsupported_classification() {
        assert!(HandshakeError::NoProtocolNegotiated.is_protocol_unsupported());
        assert!(HandshakeError::VersionNegotiation(vec![1]).is_protocol_unsupported());
        assert!(!HandshakeError::HandshakeFailed("奇怪的断开".into()).is_protocol_unsupported());
        assert!(!HandshakeError::CertVerificationFailed("过期".into()).is_protocol_unsupported());
    }

    #[test]
    fn test_goaway_retryable() {
        let err = CloakError::Connection(ConnectionError::GoAway {
            last_stream_id: 3,
            error_code: 7,
        });
        assert!(err.retryable_on_new_connection());

        let err = CloakError::Connection(ConnectionError::GoAway {
            last_stream_id: 3,
            error_code: 2,
        });
        assert!(!err.retryable_on_new_connection());

        assert!(!CloakError::Timeout.retryable_on_new_connection());
    }

    #[test]
    fn test_display_contains_context() {
        let err = CloakError::Policy(PolicyError::TooManyRedirects(10));
        assert!(err.to_string().contains("10"));
    }
}
