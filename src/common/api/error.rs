use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("网络请求失败: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("响应解析失败: {0}")]
    InvalidResponse(String),

    #[error("远端任务不存在: {0}")]
    NotFound(String),

    #[error("需要登录认证")]
    AuthRequired,

    #[error("服务暂时不可用，请稍后重试")]
    RetryLater,

    #[error("服务端返回错误 {0}: {1}")]
    Status(u16, String),

    #[error("IO操作失败: {0}")]
    Io(#[from] std::io::Error),

    #[error("无效的服务地址: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        Self::InvalidResponse(e.to_string())
    }
}
