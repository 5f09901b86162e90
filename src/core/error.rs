//! 错误处理体系 (Error Handling System)
//!
//! 定义领域相关的错误类型、阻断原因以及全局 Result 别名。

use reqwest::StatusCode;
use thiserror::Error;

/// 系统阻断原因枚举 (Block Reasons)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockReason {
    /// 触发 403 静态拦截
    IpBlocked,
    /// 触发 429 速率限制
    RateLimit,
    /// 授权凭据失效
    TokenExpired,
    /// 站点相关的自定义阻断
    Custom(String),
}

impl std::fmt::Display for BlockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockReason::IpBlocked => write!(f, "IpBlocked(403)"),
            BlockReason::RateLimit => write!(f, "RateLimit(429)"),
            BlockReason::TokenExpired => write!(f, "TokenExpired"),
            BlockReason::Custom(s) => write!(f, "Custom({})", s),
        }
    }
}

impl From<StatusCode> for BlockReason {
    fn from(code: StatusCode) -> Self {
        match code {
            StatusCode::FORBIDDEN => Self::IpBlocked,
            StatusCode::TOO_MANY_REQUESTS => Self::RateLimit,
            _ => Self::Custom(format!("HTTP {}", code)),
        }
    }
}

/// 全局错误定义 (Tracking Domain Errors)
#[derive(Error, Debug)]
pub enum CrawlError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Middleware error: {0}")]
    Middleware(#[from] reqwest_middleware::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// 响应页面结构与预期不符
    #[error("Response format error: {0}")]
    ResponseFormat(String),

    /// 表格定位时表头缺失或轴向不符
    #[error("Header mismatch: {0}")]
    HeaderMismatch(String),

    /// 查询编号无效 (站点明确回报查无数据)
    #[error("Invalid search number: {0}")]
    InvalidSearchNo(String),

    /// 检测到软阻断，需触发故障恢复逻辑
    #[error("Soft block detected: {0}")]
    SoftBlock(BlockReason),

    /// 重启次数超出引擎预算
    #[error("Max retry exceeded after {0} attempts")]
    MaxRetryExceeded(u32),

    /// 响应缺失路由规则标记，或标记未注册
    #[error("No routing rule for tag: {0}")]
    UnknownRule(String),

    #[error("Unsupported search type: {0}")]
    UnsupportedSearchType(String),

    #[error("Other error: {0}")]
    Custom(String),
}

/// 全局 Result 别名
pub type Result<T> = std::result::Result<T, CrawlError>;

impl CrawlError {
    /// 探测并提取错误中的阻断原因
    ///
    /// 支持中间件嵌套错误的分层解包 (Downcasting)。
    pub fn is_blocking(&self) -> Option<BlockReason> {
        match self {
            CrawlError::SoftBlock(reason) => Some(reason.clone()),
            CrawlError::Middleware(reqwest_middleware::Error::Middleware(anyhow_err)) => anyhow_err
                .downcast_ref::<CrawlError>()
                .and_then(|e| e.is_blocking()),
            CrawlError::Network(e) => e.status().and_then(|code| match code {
                StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS => {
                    Some(BlockReason::from(code))
                }
                _ => None,
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn soft_block_is_blocking() {
        let err = CrawlError::SoftBlock(BlockReason::RateLimit);
        assert_eq!(err.is_blocking(), Some(BlockReason::RateLimit));
    }

    #[test]
    fn middleware_wrapped_block_unwraps() {
        let inner = CrawlError::SoftBlock(BlockReason::IpBlocked);
        let err = CrawlError::Middleware(reqwest_middleware::Error::Middleware(
            anyhow::Error::new(inner),
        ));
        assert_eq!(err.is_blocking(), Some(BlockReason::IpBlocked));
    }

    #[test]
    fn format_error_is_not_blocking() {
        let err = CrawlError::ResponseFormat("missing table".into());
        assert!(err.is_blocking().is_none());
    }
}
