//! Mock 状态存储，用于测试持久化失败时的引擎行为。
//!
//! 典型用途：
//! - 测试 [`WorkingMemoryEngine`](crate::memory::WorkingMemoryEngine) 的
//!   落盘重试与内存副本一致性
//! - 任何注入了 `Arc<dyn StateStore>` 依赖的组件
//!
//! # 示例
//!
//! ```rust
//! use memo_stack::testing::MockStateStore;
//! use memo_stack::memory::{StateStore, StateUpdate};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let store = MockStateStore::new().with_io_error("disk full");
//!
//! // 第一次写入失败，第二次正常
//! assert!(store.update(&StateUpdate::default()).await.is_err());
//! assert!(store.update(&StateUpdate::default()).await.is_ok());
//! assert_eq!(store.update_call_count(), 2);
//! # }
//! ```

use crate::error::{MemoError, PersistenceError, Result};
use crate::memory::state::{PersistedState, StateUpdate};
use crate::memory::store::StateStore;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// 可脚本化的 Mock 状态存储。
///
/// 内部持有一份 [`PersistedState`]，写操作按顺序消费预设的错误队列：
/// 队列有错误时本次写入失败且状态不变，队列耗尽后写入正常。
/// 写入次数可通过 [`update_call_count`](MockStateStore::update_call_count) 检查。
pub struct MockStateStore {
    data: Mutex<PersistedState>,
    /// 待消费的写入错误，每次 save/update 消耗一条
    errors: Mutex<VecDeque<MemoError>>,
    update_calls: Arc<Mutex<usize>>,
}

impl Default for MockStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MockStateStore {
    /// 创建空 Mock，尚未设置任何错误（所有写入都成功）
    pub fn new() -> Self {
        Self {
            data: Mutex::new(PersistedState::default()),
            errors: Mutex::new(VecDeque::new()),
            update_calls: Arc::new(Mutex::new(0)),
        }
    }

    /// 追加一条写入错误（用于测试重试路径）
    pub fn with_error(self, err: MemoError) -> Self {
        self.errors.lock().unwrap().push_back(err);
        self
    }

    /// 追加一条 IO 写入错误（常用的便捷方法）
    pub fn with_io_error(self, msg: impl Into<String>) -> Self {
        self.with_error(MemoError::Persistence(PersistenceError::Io(msg.into())))
    }

    /// `update` 被调用的总次数
    pub fn update_call_count(&self) -> usize {
        *self.update_calls.lock().unwrap()
    }
}

#[async_trait]
impl StateStore for MockStateStore {
    async fn load(&self) -> PersistedState {
        self.data.lock().unwrap().clone()
    }

    async fn save(&self, state: &PersistedState) -> Result<()> {
        if let Some(err) = self.errors.lock().unwrap().pop_front() {
            return Err(err);
        }
        *self.data.lock().unwrap() = state.clone();
        Ok(())
    }

    async fn update(&self, update: &StateUpdate) -> Result<PersistedState> {
        *self.update_calls.lock().unwrap() += 1;
        if let Some(err) = self.errors.lock().unwrap().pop_front() {
            return Err(err);
        }
        let mut data = self.data.lock().unwrap();
        update.apply(&mut data);
        Ok(data.clone())
    }
}
