use std::fmt;

/// 工作记忆引擎的统一错误类型
#[derive(Debug)]
pub enum MemoError {
    /// 配置错误
    Config(ConfigError),
    /// 远程压缩接口错误
    Remote(RemoteError),
    /// 持久化错误
    Persistence(PersistenceError),
    /// IO 错误
    Io(std::io::Error),
    /// 其他错误
    Other(String),
}

/// 配置错误：某项操作所需的配置缺失或无效
#[derive(Debug)]
pub enum ConfigError {
    /// API key 为空，无法发起远程压缩请求
    MissingApiKey,
    /// 未配置远程接口地址
    MissingEndpoint,
    /// 设置文件解析失败
    ParseFailed(String),
    /// 配置值无效
    InvalidValue { field: String, message: String },
}

/// 远程压缩接口错误
#[derive(Debug)]
pub enum RemoteError {
    /// 网络请求失败（含超时）
    Network(String),
    /// API 返回非 2xx 状态码
    Api { status: u16, body: String },
    /// 响应格式无效
    InvalidResponse(String),
    /// 响应中没有文本内容
    EmptyResponse,
}

/// 持久化错误
#[derive(Debug)]
pub enum PersistenceError {
    /// 后端读写失败
    Io(String),
    /// 状态序列化/反序列化失败
    Serialization(String),
}

// 实现 Display trait
impl fmt::Display for MemoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoError::Config(e) => write!(f, "Config Error: {}", e),
            MemoError::Remote(e) => write!(f, "Remote Error: {}", e),
            MemoError::Persistence(e) => write!(f, "Persistence Error: {}", e),
            MemoError::Io(e) => write!(f, "IO Error: {}", e),
            MemoError::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingApiKey => write!(f, "Missing API key"),
            ConfigError::MissingEndpoint => write!(f, "Missing API endpoint"),
            ConfigError::ParseFailed(msg) => write!(f, "Failed to parse settings: {}", msg),
            ConfigError::InvalidValue { field, message } => {
                write!(f, "Invalid config value for '{}': {}", field, message)
            }
        }
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteError::Network(msg) => write!(f, "Network error: {}", msg),
            RemoteError::Api { status, body } => {
                write!(f, "API error (status {}): {}", status, body)
            }
            RemoteError::InvalidResponse(msg) => write!(f, "Invalid response: {}", msg),
            RemoteError::EmptyResponse => write!(f, "Empty response from compression endpoint"),
        }
    }
}

impl fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersistenceError::Io(msg) => write!(f, "Store IO error: {}", msg),
            PersistenceError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
        }
    }
}

// 实现 std::error::Error trait
impl std::error::Error for MemoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MemoError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl std::error::Error for ConfigError {}
impl std::error::Error for RemoteError {}
impl std::error::Error for PersistenceError {}

// From 转换实现
impl From<std::io::Error> for MemoError {
    fn from(err: std::io::Error) -> Self {
        MemoError::Io(err)
    }
}

impl From<reqwest::Error> for MemoError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            MemoError::Remote(RemoteError::Network("Request timeout".to_string()))
        } else if err.is_connect() {
            MemoError::Remote(RemoteError::Network(format!("Connection failed: {}", err)))
        } else {
            MemoError::Remote(RemoteError::Network(err.to_string()))
        }
    }
}

impl From<serde_json::Error> for MemoError {
    fn from(err: serde_json::Error) -> Self {
        MemoError::Persistence(PersistenceError::Serialization(err.to_string()))
    }
}

impl From<serde_yaml::Error> for MemoError {
    fn from(err: serde_yaml::Error) -> Self {
        MemoError::Config(ConfigError::ParseFailed(err.to_string()))
    }
}

impl From<ConfigError> for MemoError {
    fn from(err: ConfigError) -> Self {
        MemoError::Config(err)
    }
}

impl From<RemoteError> for MemoError {
    fn from(err: RemoteError) -> Self {
        MemoError::Remote(err)
    }
}

impl From<PersistenceError> for MemoError {
    fn from(err: PersistenceError) -> Self {
        MemoError::Persistence(err)
    }
}

// 便捷的 Result 类型别名
pub type Result<T> = std::result::Result<T, MemoError>;
