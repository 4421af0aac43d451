//! 测试基础设施
//!
//! 提供在不依赖真实压缩接口 / 宿主页面的情况下测试各组件的工具集。
//!
//! | 类型 | 用途 |
//! |------|------|
//! | [`MockRemoteCompressor`] | 替代真实远程压缩接口，测试 checkpoint 的远程路径与回退路径 |
//! | [`MockMessageSource`] | 替代宿主消息采集器，提供固定对话记录 |
//! | [`MockStateStore`] | 替代真实存储后端，按脚本注入写入失败，测试落盘重试 |
//!
//! # 设计原则
//!
//! - **零网络请求**：所有 Mock 都完全在内存中运行
//! - **可脚本化**：通过 `with_bullets()` / `with_error()` 精确控制返回值
//! - **可观测**：通过 `call_count()` / `calls()` 等方法检查调用情况
//! - **线程安全**：内部使用 `Arc<Mutex<_>>`，可安全地在多任务测试中共享
//!
//! # 使用示例
//!
//! ```rust
//! use memo_stack::compression::Message;
//! use memo_stack::memory::{InMemoryStateStore, WorkingMemoryEngine};
//! use memo_stack::testing::{MockMessageSource, MockRemoteCompressor};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() {
//! // 远程压缩失败 → checkpoint 静默回退到本地压缩
//! let remote = MockRemoteCompressor::new().with_api_error(500);
//! let engine = WorkingMemoryEngine::new(
//!     Arc::new(InMemoryStateStore::new()),
//!     Arc::new(remote),
//! )
//! .await;
//!
//! let source = MockMessageSource::new(vec![Message::user("remember this")]);
//! engine.checkpoint(&source).await;
//! assert_eq!(engine.snapshot().await.now_stack.len(), 1);
//! # }
//! ```

mod mock_remote;
mod mock_source;
mod mock_store;

pub use mock_remote::MockRemoteCompressor;
pub use mock_source::MockMessageSource;
pub use mock_store::MockStateStore;
