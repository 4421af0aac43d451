//! 工作记忆
//!
//! 分三层，职责各不相同：
//!
//! | 层次 | 实现 | 作用域 |
//! |------|------|--------|
//! | 数据模型 | [`state`]（[`PersistedState`] / [`MemoryItem`] / [`Settings`]） | 唯一的持久化单元 |
//! | 存储后端 | [`StateStore`] / [`FileStateStore`] / [`InMemoryStateStore`] | 构造时选定，单条记录读写 |
//! | 编排器 | [`WorkingMemoryEngine`] | checkpoint / 归档 / 恢复 / 设置，写穿持久化 |
//!
//! ## 快速上手
//!
//! ```rust,no_run
//! use memo_stack::compression::HttpRemoteCompressor;
//! use memo_stack::memory::{FileStateStore, WorkingMemoryEngine};
//! use std::sync::Arc;
//!
//! # async fn example() -> memo_stack::error::Result<()> {
//! let store = Arc::new(FileStateStore::new("~/.memo-stack/state.json")?);
//! let engine = WorkingMemoryEngine::new(store, Arc::new(HttpRemoteCompressor::new())).await;
//!
//! engine.archive().await;
//! let snapshot = engine.snapshot().await;
//! println!("vault 中有 {} 条快照", snapshot.vault.len());
//! # Ok(())
//! # }
//! ```

pub mod engine;
pub mod state;
pub mod store;

pub use engine::{ItemUpdate, MessageSource, WorkingMemoryEngine};
pub use state::{
    MAX_NOW_ITEMS, MemoryItem, PersistedState, Settings, SettingsUpdate, StateUpdate, VaultEntry,
};
pub use store::{FileStateStore, InMemoryStateStore, StateStore};
