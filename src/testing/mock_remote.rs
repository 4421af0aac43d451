//! Mock 远程压缩器，用于在不发起真实 HTTP 请求的情况下测试使用了
//! [`RemoteCompressor`] 的组件。
//!
//! 典型用途：
//! - 测试 [`WorkingMemoryEngine`](crate::memory::WorkingMemoryEngine) 的
//!   checkpoint 远程路径和回退路径
//! - 任何注入了 `Arc<dyn RemoteCompressor>` 依赖的组件
//!
//! # 示例
//!
//! ```rust
//! use memo_stack::testing::MockRemoteCompressor;
//! use memo_stack::compression::{Message, RemoteCompressor};
//! use memo_stack::memory::Settings;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let mock = MockRemoteCompressor::new()
//!     .with_bullets(vec!["first bullet", "second bullet"]);
//!
//! let bullets = mock
//!     .compress(&[Message::user("hi")], &Settings::default())
//!     .await
//!     .unwrap();
//! assert_eq!(bullets.len(), 2);
//! assert_eq!(mock.call_count(), 1);
//! # }
//! ```

use crate::compression::{Message, RemoteCompressor};
use crate::error::{MemoError, RemoteError, Result};
use crate::memory::state::Settings;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// 预设响应的枚举（bullet 列表或错误）
enum MockRemoteResponse {
    Bullets(Vec<String>),
    Err(MemoError),
}

/// 可脚本化的 Mock 远程压缩器。
///
/// 按顺序返回预设的响应；队列耗尽后返回 `EmptyResponse` 错误。
/// 所有调用都被记录，可通过 [`call_count`](MockRemoteCompressor::call_count) /
/// [`last_messages`](MockRemoteCompressor::last_messages) 检查。
pub struct MockRemoteCompressor {
    responses: Arc<Mutex<VecDeque<MockRemoteResponse>>>,
    /// 每次调用时收到的 messages 列表，按顺序记录
    calls: Arc<Mutex<Vec<Vec<Message>>>>,
}

impl Default for MockRemoteCompressor {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRemoteCompressor {
    /// 创建空 Mock，尚未设置任何响应
    pub fn new() -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// 追加一条成功响应（bullet 列表）
    pub fn with_bullets(self, bullets: Vec<impl Into<String>>) -> Self {
        self.responses
            .lock()
            .unwrap()
            .push_back(MockRemoteResponse::Bullets(
                bullets.into_iter().map(Into::into).collect(),
            ));
        self
    }

    /// 追加一条错误响应（用于测试回退路径）
    pub fn with_error(self, err: MemoError) -> Self {
        self.responses
            .lock()
            .unwrap()
            .push_back(MockRemoteResponse::Err(err));
        self
    }

    /// 追加一条 API 状态码错误（常用的便捷方法）
    pub fn with_api_error(self, status: u16) -> Self {
        self.with_error(MemoError::Remote(RemoteError::Api {
            status,
            body: "mock error".to_string(),
        }))
    }

    /// 追加一条网络错误
    pub fn with_network_error(self, msg: impl Into<String>) -> Self {
        self.with_error(MemoError::Remote(RemoteError::Network(msg.into())))
    }

    /// 已发生的调用总次数
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// 最后一次调用时传入的 messages（若从未调用则返回 `None`）
    pub fn last_messages(&self) -> Option<Vec<Message>> {
        self.calls.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl RemoteCompressor for MockRemoteCompressor {
    async fn compress(&self, messages: &[Message], _settings: &Settings) -> Result<Vec<String>> {
        // 记录本次调用
        self.calls.lock().unwrap().push(messages.to_vec());

        // 返回下一个预设响应
        match self.responses.lock().unwrap().pop_front() {
            Some(MockRemoteResponse::Bullets(bullets)) => Ok(bullets),
            Some(MockRemoteResponse::Err(e)) => Err(e),
            None => Err(MemoError::Remote(RemoteError::EmptyResponse)),
        }
    }
}
