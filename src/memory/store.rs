//! 状态存储
//!
//! [`StateStore`] 把完整的 [`PersistedState`] 作为单条记录读写，
//! 后端在构造时一次性选定，不在每次调用时探测存储介质。
//!
//! ## 内置实现
//!
//! - [`InMemoryStateStore`]：进程内存，适合测试和临时会话
//! - [`FileStateStore`]：JSON 文件持久化，零额外依赖
//!
//! ## 快速上手
//!
//! ```rust,no_run
//! use memo_stack::memory::store::{FileStateStore, StateStore};
//! use memo_stack::memory::state::{SettingsUpdate, StateUpdate};
//! use std::sync::Arc;
//!
//! # async fn example() -> memo_stack::error::Result<()> {
//! let store = Arc::new(FileStateStore::new("~/.memo-stack/state.json")?);
//!
//! // 部分更新：settings 深合并，其他设置项不受影响
//! let state = store
//!     .update(&StateUpdate::with_settings(SettingsUpdate {
//!         api_key: Some("sk-...".to_string()),
//!         ..SettingsUpdate::default()
//!     }))
//!     .await?;
//! println!("{} 条工作记忆", state.now_stack.len());
//! # Ok(())
//! # }
//! ```

use crate::error::{PersistenceError, Result};
use crate::memory::state::{PersistedState, StateUpdate};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

// ── StateStore trait ──────────────────────────────────────────────────────────

/// 持久化状态的统一存储接口
#[async_trait]
pub trait StateStore: Send + Sync {
    /// 读取完整状态。介质缺失或内容损坏时返回默认状态，永不向外失败。
    async fn load(&self) -> PersistedState;

    /// 全量写入状态
    async fn save(&self, state: &PersistedState) -> Result<()>;

    /// 部分更新：now-stack / vault 整体替换，settings 逐字段深合并。
    /// 落盘后返回合并后的完整状态。
    async fn update(&self, update: &StateUpdate) -> Result<PersistedState>;
}

// ── InMemoryStateStore ────────────────────────────────────────────────────────

/// 进程内存 Store，不持久化，适合测试和短生命周期使用
pub struct InMemoryStateStore {
    data: RwLock<PersistedState>,
}

impl Default for InMemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self {
            data: RwLock::new(PersistedState::default()),
        }
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn load(&self) -> PersistedState {
        self.data.read().await.clone()
    }

    async fn save(&self, state: &PersistedState) -> Result<()> {
        *self.data.write().await = state.clone();
        Ok(())
    }

    async fn update(&self, update: &StateUpdate) -> Result<PersistedState> {
        let mut data = self.data.write().await;
        update.apply(&mut data);
        Ok(data.clone())
    }
}

// ── FileStateStore ────────────────────────────────────────────────────────────

/// 基于 JSON 文件的持久化 Store
///
/// 写时立即落盘，读时从内存缓存返回（无需反复解析文件）。
/// 文件缺失、读取失败或解析失败都视为"没有状态"，从默认状态开始。
pub struct FileStateStore {
    path: PathBuf,
    data: RwLock<PersistedState>,
}

impl FileStateStore {
    /// 打开或创建状态文件，自动建父目录
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = expand_tilde(path.as_ref());
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| PersistenceError::Io(format!("创建目录失败: {e}")))?;
        }
        let data = if path.exists() {
            match std::fs::read_to_string(&path) {
                Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                    warn!("状态文件解析失败，从默认状态开始: {e}");
                    PersistedState::default()
                }),
                Err(e) => {
                    warn!("状态文件读取失败，从默认状态开始: {e}");
                    PersistedState::default()
                }
            }
        } else {
            PersistedState::default()
        };
        info!(
            path = %path.display(),
            items = data.now_stack.len(),
            vault_entries = data.vault.len(),
            "🗄️ FileStateStore 初始化"
        );
        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    async fn flush(&self) -> Result<()> {
        let data = self.data.read().await;
        let json = serde_json::to_string_pretty(&*data)
            .map_err(|e| PersistenceError::Serialization(e.to_string()))?;
        tokio::fs::write(&self.path, json)
            .await
            .map_err(|e| PersistenceError::Io(format!("写入状态文件失败: {e}")))?;
        debug!(path = %self.path.display(), "💾 状态已持久化");
        Ok(())
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn load(&self) -> PersistedState {
        self.data.read().await.clone()
    }

    async fn save(&self, state: &PersistedState) -> Result<()> {
        {
            *self.data.write().await = state.clone();
        }
        self.flush().await
    }

    async fn update(&self, update: &StateUpdate) -> Result<PersistedState> {
        let next = {
            let mut data = self.data.write().await;
            update.apply(&mut data);
            data.clone()
        };
        self.flush().await?;
        Ok(next)
    }
}

// ── 私有工具函数 ──────────────────────────────────────────────────────────────

fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if s.starts_with("~/")
        && let Some(home) = std::env::var("HOME")
            .ok()
            .or_else(|| std::env::var("USERPROFILE").ok())
    {
        return PathBuf::from(home).join(&s[2..]);
    }
    path.to_path_buf()
}
