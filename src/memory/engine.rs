//! 工作记忆引擎
//!
//! [`WorkingMemoryEngine`] 是核心编排器：持有 [`PersistedState`] 的工作副本，
//! 在 checkpoint 时调用压缩器生成 bullet，维护 now-stack 的容量不变式，
//! 管理 vault 的归档与恢复，并把每次变更写穿到 [`StateStore`]。
//!
//! ## 并发模型
//!
//! 每个引擎实例内部用一把 `tokio::sync::Mutex` 把所有操作串行化：
//! checkpoint / archive / restore 都是对同一状态的读-改-写，交错执行会
//! 丢失更新。锁在整个操作期间持有（包括远程压缩和落盘的 await 点），
//! 操作不可中途取消，一旦发起就运行到完成或失败。
//!
//! ## 快速上手
//!
//! ```rust,no_run
//! use memo_stack::compression::HttpRemoteCompressor;
//! use memo_stack::memory::engine::WorkingMemoryEngine;
//! use memo_stack::memory::store::InMemoryStateStore;
//! use std::sync::Arc;
//!
//! # async fn example() {
//! let engine = WorkingMemoryEngine::new(
//!     Arc::new(InMemoryStateStore::new()),
//!     Arc::new(HttpRemoteCompressor::new()),
//! )
//! .await;
//!
//! engine.add_item().await;
//! println!("{}", engine.prompt_injection_text().await);
//! # }
//! ```

use crate::compression::{Message, RemoteCompressor, local_compress};
use crate::memory::state::{
    MAX_NOW_ITEMS, MemoryItem, PersistedState, SettingsUpdate, StateUpdate, VaultEntry,
    cap_now_stack, now_millis,
};
use crate::memory::store::StateStore;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

// ── MessageSource ─────────────────────────────────────────────────────────────

/// 消息采集器：由宿主实现，按时间顺序返回最多 `limit` 条最近消息。
/// 空内容的消息应在进入核心之前就被过滤掉。
#[async_trait]
pub trait MessageSource: Send + Sync {
    async fn fetch_recent(&self, limit: usize) -> Vec<Message>;
}

// ── ItemUpdate ────────────────────────────────────────────────────────────────

/// 对单条 now-stack 条目的变更：`delete` 优先，其余字段 `Some` 覆盖、`None` 保留
#[derive(Debug, Clone, Default)]
pub struct ItemUpdate {
    pub text: Option<String>,
    pub pinned: Option<bool>,
    pub protected: Option<bool>,
    pub delete: bool,
}

impl ItemUpdate {
    pub fn deleted() -> Self {
        Self {
            delete: true,
            ..Self::default()
        }
    }

    pub fn with_text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn with_pinned(pinned: bool) -> Self {
        Self {
            pinned: Some(pinned),
            ..Self::default()
        }
    }

    pub fn with_protected(protected: bool) -> Self {
        Self {
            protected: Some(protected),
            ..Self::default()
        }
    }
}

// ── WorkingMemoryEngine ───────────────────────────────────────────────────────

/// 工作记忆引擎。状态的唯一写入方；展示层只通过 [`snapshot`](Self::snapshot)
/// 拿到只读副本。
pub struct WorkingMemoryEngine {
    state: Mutex<PersistedState>,
    store: Arc<dyn StateStore>,
    remote: Arc<dyn RemoteCompressor>,
}

impl WorkingMemoryEngine {
    /// 从存储加载初始状态并构造引擎。依赖在启动时显式注入一次，
    /// 不做任何运行时的全局查找。
    pub async fn new(store: Arc<dyn StateStore>, remote: Arc<dyn RemoteCompressor>) -> Self {
        let mut state = store.load().await;
        cap_now_stack(&mut state.now_stack);
        info!(
            items = state.now_stack.len(),
            vault_entries = state.vault.len(),
            "🧠 工作记忆引擎就绪"
        );
        Self {
            state: Mutex::new(state),
            store,
            remote,
        }
    }

    /// 当前状态的只读快照
    pub async fn snapshot(&self) -> PersistedState {
        self.state.lock().await.clone()
    }

    /// checkpoint：把最近的对话压缩为新的 now-stack（全量替换，不是合并）。
    ///
    /// 开启远程压缩且配置了 API key 时优先走远程路径；远程路径的任何失败
    /// （网络、HTTP、解析）都静默回退到本地确定性压缩，不会让 checkpoint
    /// 失败。消息列表为空时不做任何事。
    pub async fn checkpoint(&self, source: &dyn MessageSource) {
        let mut state = self.state.lock().await;
        let limit = state.settings.checkpoint_message_count as usize;
        let messages = source.fetch_recent(limit).await;
        if messages.is_empty() {
            debug!("没有可压缩的消息，跳过 checkpoint");
            return;
        }

        let bullets = if state.settings.use_api_compression && !state.settings.api_key.is_empty() {
            match self.remote.compress(&messages, &state.settings).await {
                Ok(bullets) => bullets,
                Err(e) => {
                    debug!("远程压缩失败，回退本地压缩: {e}");
                    local_compress(&messages, MAX_NOW_ITEMS)
                }
            }
        } else {
            local_compress(&messages, MAX_NOW_ITEMS)
        };

        let mut items: Vec<MemoryItem> = bullets.into_iter().map(MemoryItem::new).collect();
        cap_now_stack(&mut items);
        info!(items = items.len(), "📌 checkpoint 完成，now-stack 已替换");
        self.persist(&mut state, StateUpdate::with_now_stack(items))
            .await;
    }

    /// 编辑或删除指定位置的条目。越界索引一律静默忽略。
    pub async fn update_item(&self, index: usize, changes: ItemUpdate) {
        let mut state = self.state.lock().await;
        let mut items = state.now_stack.clone();
        if changes.delete {
            if index >= items.len() {
                return;
            }
            items.remove(index);
        } else {
            let Some(item) = items.get_mut(index) else {
                return;
            };
            if let Some(text) = &changes.text {
                item.text = text.clone();
            }
            if let Some(pinned) = changes.pinned {
                item.pinned = pinned;
            }
            if let Some(protected) = changes.protected {
                item.protected = protected;
            }
        }
        cap_now_stack(&mut items);
        self.persist(&mut state, StateUpdate::with_now_stack(items))
            .await;
    }

    /// 追加一条空白可编辑条目；满 7 条时静默拒绝（不是错误）
    pub async fn add_item(&self) {
        let mut state = self.state.lock().await;
        if state.now_stack.len() >= MAX_NOW_ITEMS {
            debug!("now-stack 已满，忽略 add_item");
            return;
        }
        let mut items = state.now_stack.clone();
        items.push(MemoryItem::empty());
        self.persist(&mut state, StateUpdate::with_now_stack(items))
            .await;
    }

    /// 归档当前 now-stack 的快照到 vault 头部（vault 无上限、不淘汰）。
    /// 空栈时不做任何事。
    pub async fn archive(&self) {
        let mut state = self.state.lock().await;
        if state.now_stack.is_empty() {
            return;
        }
        let mut vault = Vec::with_capacity(state.vault.len() + 1);
        vault.push(VaultEntry {
            timestamp: now_millis(),
            items: state.now_stack.clone(),
        });
        vault.extend(state.vault.iter().cloned());
        info!(entries = vault.len(), "🗃️ 已归档 now-stack 快照");
        self.persist(&mut state, StateUpdate::with_vault(vault))
            .await;
    }

    /// 用 vault 中第 `index` 条快照替换 now-stack（vault 本身不变）。
    /// 快照越界时不做任何事。
    pub async fn restore_vault(&self, index: usize) {
        let mut state = self.state.lock().await;
        let Some(entry) = state.vault.get(index) else {
            return;
        };
        let mut items = entry.items.clone();
        cap_now_stack(&mut items);
        info!(index, "⏪ 已从 vault 恢复 now-stack");
        self.persist(&mut state, StateUpdate::with_now_stack(items))
            .await;
    }

    /// 部分更新设置。`checkpoint_message_count` 应由调用方预先钳制到
    /// [2, 50]，核心不做二次校验。
    pub async fn update_settings(&self, update: SettingsUpdate) {
        let mut state = self.state.lock().await;
        self.persist(&mut state, StateUpdate::with_settings(update))
            .await;
    }

    /// 生成注入提示词文本：固定头部 + 每条记忆一行 `- <text>` + 固定指令尾部。
    /// now-stack 为空时返回空字符串（不注入）。
    pub async fn prompt_injection_text(&self) -> String {
        let state = self.state.lock().await;
        if state.now_stack.is_empty() {
            return String::new();
        }
        let bullets = state
            .now_stack
            .iter()
            .map(|item| format!("- {}", item.text))
            .collect::<Vec<_>>()
            .join("\n");
        [
            "Working Memory:",
            &bullets,
            "Instructions:",
            "- Respond in max 5 bullets",
            "- Preserve my working memory",
            "- Ask before explaining",
        ]
        .join("\n")
    }

    /// 落盘并同步工作副本。写失败重试一次，仍失败则记录警告、仅更新内存
    /// 副本——用户可见的操作不会因为一次落盘失败而崩溃，下一次成功的全量
    /// 写入会自愈。
    async fn persist(&self, state: &mut PersistedState, update: StateUpdate) {
        match self.store.update(&update).await {
            Ok(next) => *state = next,
            Err(first) => {
                warn!("状态写入失败，重试一次: {first}");
                match self.store.update(&update).await {
                    Ok(next) => *state = next,
                    Err(second) => {
                        warn!("状态写入重试仍失败，本次变更仅保留在内存中: {second}");
                        update.apply(state);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::store::InMemoryStateStore;
    use crate::testing::{MockMessageSource, MockRemoteCompressor, MockStateStore};

    async fn engine_with_remote(remote: MockRemoteCompressor) -> WorkingMemoryEngine {
        WorkingMemoryEngine::new(Arc::new(InMemoryStateStore::new()), Arc::new(remote)).await
    }

    async fn engine() -> WorkingMemoryEngine {
        engine_with_remote(MockRemoteCompressor::new()).await
    }

    async fn enable_remote(engine: &WorkingMemoryEngine) {
        engine
            .update_settings(SettingsUpdate {
                use_api_compression: Some(true),
                api_key: Some("sk-test".to_string()),
                ..SettingsUpdate::default()
            })
            .await;
    }

    #[tokio::test]
    async fn test_checkpoint_local_path() {
        let engine = engine().await;
        let source = MockMessageSource::new(vec![
            Message::user("alpha beta"),
            Message::assistant("gamma delta"),
        ]);

        engine.checkpoint(&source).await;

        let state = engine.snapshot().await;
        assert_eq!(state.now_stack.len(), 2);
        assert_eq!(state.now_stack[0], MemoryItem::new("alpha beta"));
        assert_eq!(state.now_stack[1], MemoryItem::new("gamma delta"));
    }

    #[tokio::test]
    async fn test_checkpoint_empty_source_is_noop() {
        let engine = engine().await;
        engine.add_item().await;
        let source = MockMessageSource::new(vec![]);

        engine.checkpoint(&source).await;

        // 原有 now-stack 原封不动
        assert_eq!(engine.snapshot().await.now_stack.len(), 1);
    }

    #[tokio::test]
    async fn test_checkpoint_requests_configured_message_count() {
        let engine = engine().await;
        engine
            .update_settings(SettingsUpdate {
                checkpoint_message_count: Some(4),
                ..SettingsUpdate::default()
            })
            .await;
        let source = MockMessageSource::new(
            (0..10).map(|i| Message::user(format!("msg {i}"))).collect(),
        );

        engine.checkpoint(&source).await;

        assert_eq!(source.calls(), vec![4]);
        // 拉到的是最近 4 条
        let state = engine.snapshot().await;
        assert_eq!(state.now_stack[0].text, "msg 6");
    }

    #[tokio::test]
    async fn test_checkpoint_replaces_pinned_items() {
        let engine = engine().await;
        engine.add_item().await;
        engine.update_item(0, ItemUpdate::with_pinned(true)).await;

        let source = MockMessageSource::new(vec![Message::user("fresh content")]);
        engine.checkpoint(&source).await;

        // 全量替换：旧的 pinned 条目被有意丢弃
        let state = engine.snapshot().await;
        assert_eq!(state.now_stack, vec![MemoryItem::new("fresh content")]);
    }

    #[tokio::test]
    async fn test_checkpoint_uses_remote_bullets_on_success() {
        let remote = MockRemoteCompressor::new().with_bullets(vec!["remote bullet"]);
        let engine = engine_with_remote(remote).await;
        enable_remote(&engine).await;
        let source = MockMessageSource::new(vec![Message::user("anything")]);

        engine.checkpoint(&source).await;

        let state = engine.snapshot().await;
        assert_eq!(state.now_stack, vec![MemoryItem::new("remote bullet")]);
    }

    #[tokio::test]
    async fn test_checkpoint_remote_failure_falls_back_to_local() {
        let remote = MockRemoteCompressor::new().with_api_error(500);
        let engine = engine_with_remote(remote).await;
        enable_remote(&engine).await;
        let messages = vec![
            Message::user("plan the trip"),
            Message::assistant("sure thing"),
        ];
        let source = MockMessageSource::new(messages.clone());

        engine.checkpoint(&source).await;

        // 回退结果与直接本地压缩完全一致
        let expected: Vec<MemoryItem> = local_compress(&messages, MAX_NOW_ITEMS)
            .into_iter()
            .map(MemoryItem::new)
            .collect();
        assert_eq!(engine.snapshot().await.now_stack, expected);
    }

    #[tokio::test]
    async fn test_checkpoint_skips_remote_without_api_key() {
        let remote = MockRemoteCompressor::new().with_bullets(vec!["should not appear"]);
        let engine = engine_with_remote(remote).await;
        engine
            .update_settings(SettingsUpdate {
                use_api_compression: Some(true),
                ..SettingsUpdate::default() // api_key 仍为空
            })
            .await;
        let source = MockMessageSource::new(vec![Message::user("local only")]);

        engine.checkpoint(&source).await;

        let state = engine.snapshot().await;
        assert_eq!(state.now_stack, vec![MemoryItem::new("local only")]);
    }

    #[tokio::test]
    async fn test_checkpoint_caps_remote_overflow() {
        let bullets: Vec<String> = (0..9).map(|i| format!("bullet {i}")).collect();
        let remote = MockRemoteCompressor::new().with_bullets(bullets);
        let engine = engine_with_remote(remote).await;
        enable_remote(&engine).await;
        let source = MockMessageSource::new(vec![Message::user("anything")]);

        engine.checkpoint(&source).await;

        assert_eq!(engine.snapshot().await.now_stack.len(), MAX_NOW_ITEMS);
    }

    #[tokio::test]
    async fn test_add_item_caps_at_seven() {
        let engine = engine().await;
        for _ in 0..9 {
            engine.add_item().await;
        }
        assert_eq!(engine.snapshot().await.now_stack.len(), MAX_NOW_ITEMS);
    }

    #[tokio::test]
    async fn test_update_item_edits_fields() {
        let engine = engine().await;
        engine.add_item().await;

        engine.update_item(0, ItemUpdate::with_text("edited")).await;
        engine.update_item(0, ItemUpdate::with_pinned(true)).await;
        engine.update_item(0, ItemUpdate::with_protected(true)).await;

        let item = engine.snapshot().await.now_stack[0].clone();
        assert_eq!(item.text, "edited");
        assert!(item.pinned);
        assert!(item.protected);
    }

    #[tokio::test]
    async fn test_update_item_delete_preserves_order() {
        let engine = engine().await;
        let source = MockMessageSource::new(vec![Message::user("a\nb\nc")]);
        engine.checkpoint(&source).await;

        engine.update_item(1, ItemUpdate::deleted()).await;

        let texts: Vec<String> = engine
            .snapshot()
            .await
            .now_stack
            .into_iter()
            .map(|i| i.text)
            .collect();
        assert_eq!(texts, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_update_item_out_of_range_is_noop() {
        let engine = engine().await;
        engine.add_item().await;

        engine.update_item(5, ItemUpdate::deleted()).await;
        engine.update_item(5, ItemUpdate::with_text("ghost")).await;

        let state = engine.snapshot().await;
        assert_eq!(state.now_stack, vec![MemoryItem::empty()]);
    }

    #[tokio::test]
    async fn test_archive_empty_stack_is_noop() {
        let engine = engine().await;
        engine.archive().await;
        assert!(engine.snapshot().await.vault.is_empty());
    }

    #[tokio::test]
    async fn test_archive_prepends_deep_copy() {
        let engine = engine().await;
        let source = MockMessageSource::new(vec![Message::user("first")]);
        engine.checkpoint(&source).await;
        engine.archive().await;

        // 归档后修改 now-stack，不影响已归档的快照
        engine.update_item(0, ItemUpdate::with_text("changed")).await;

        let source = MockMessageSource::new(vec![Message::user("second")]);
        engine.checkpoint(&source).await;
        engine.archive().await;

        let state = engine.snapshot().await;
        assert_eq!(state.vault.len(), 2);
        // 最新的在最前面
        assert_eq!(state.vault[0].items[0].text, "second");
        assert_eq!(state.vault[1].items[0].text, "first");
    }

    #[tokio::test]
    async fn test_restore_vault_replaces_stack_keeps_vault() {
        let engine = engine().await;
        let source = MockMessageSource::new(vec![Message::user("archived content")]);
        engine.checkpoint(&source).await;
        engine.archive().await;

        let source = MockMessageSource::new(vec![Message::user("other content")]);
        engine.checkpoint(&source).await;

        engine.restore_vault(0).await;

        let state = engine.snapshot().await;
        assert_eq!(state.now_stack[0].text, "archived content");
        assert_eq!(state.vault.len(), 1);
    }

    #[tokio::test]
    async fn test_restore_vault_invalid_index_is_noop() {
        let engine = engine().await;
        engine.add_item().await;
        engine.restore_vault(3).await;
        assert_eq!(engine.snapshot().await.now_stack.len(), 1);
    }

    #[tokio::test]
    async fn test_update_settings_partial() {
        let engine = engine().await;
        engine
            .update_settings(SettingsUpdate {
                api_key: Some("x".to_string()),
                ..SettingsUpdate::default()
            })
            .await;

        let settings = engine.snapshot().await.settings;
        assert_eq!(settings.api_key, "x");
        assert_eq!(settings.checkpoint_message_count, 10);
        assert_eq!(settings.api_model, "gpt-4o-mini");
    }

    #[tokio::test]
    async fn test_prompt_injection_text_format() {
        let engine = engine().await;
        let source = MockMessageSource::new(vec![Message::user("one\ntwo")]);
        engine.checkpoint(&source).await;

        let text = engine.prompt_injection_text().await;
        assert_eq!(
            text,
            "Working Memory:\n- one\n- two\nInstructions:\n- Respond in max 5 bullets\n- Preserve my working memory\n- Ask before explaining"
        );
    }

    #[tokio::test]
    async fn test_prompt_injection_text_empty_stack() {
        let engine = engine().await;
        assert_eq!(engine.prompt_injection_text().await, "");
    }

    #[tokio::test]
    async fn test_checkpoint_recovers_network_error_and_forwards_messages() {
        let remote = Arc::new(MockRemoteCompressor::new().with_network_error("connection reset"));
        let engine = WorkingMemoryEngine::new(
            Arc::new(InMemoryStateStore::new()),
            remote.clone(),
        )
        .await;
        enable_remote(&engine).await;
        let messages = vec![Message::user("plan the trip")];
        let source = MockMessageSource::new(messages.clone());

        engine.checkpoint(&source).await;

        // 远程路径收到的就是拉取到的消息
        assert_eq!(remote.call_count(), 1);
        let forwarded = remote.last_messages().unwrap();
        assert_eq!(forwarded.len(), 1);
        assert_eq!(forwarded[0].content, "plan the trip");
        // 网络失败与其他远程失败同等回退
        let expected: Vec<MemoryItem> = local_compress(&messages, MAX_NOW_ITEMS)
            .into_iter()
            .map(MemoryItem::new)
            .collect();
        assert_eq!(engine.snapshot().await.now_stack, expected);
    }

    #[tokio::test]
    async fn test_persist_retry_succeeds_on_second_attempt() {
        let store = Arc::new(MockStateStore::new().with_io_error("disk full"));
        let engine = WorkingMemoryEngine::new(
            store.clone(),
            Arc::new(MockRemoteCompressor::new()),
        )
        .await;

        engine.add_item().await;

        // 首次失败后重试一次，第二次成功落盘
        assert_eq!(store.update_call_count(), 2);
        use crate::memory::store::StateStore;
        assert_eq!(store.load().await.now_stack.len(), 1);
    }

    #[tokio::test]
    async fn test_persist_double_failure_keeps_memory_copy_consistent() {
        let store = Arc::new(
            MockStateStore::new()
                .with_io_error("disk full")
                .with_io_error("disk full"),
        );
        let engine = WorkingMemoryEngine::new(
            store.clone(),
            Arc::new(MockRemoteCompressor::new()),
        )
        .await;

        engine.add_item().await;

        // 重试一次后放弃：恰好两次写入尝试
        assert_eq!(store.update_call_count(), 2);
        // 内存副本保持一致，存储未被写入
        assert_eq!(engine.snapshot().await.now_stack.len(), 1);
        use crate::memory::store::StateStore;
        assert!(store.load().await.now_stack.is_empty());

        // 下一次成功的全量写入自愈
        engine.add_item().await;
        assert_eq!(store.load().await.now_stack.len(), 2);
    }

    #[tokio::test]
    async fn test_operations_write_through_to_store() {
        let store = Arc::new(InMemoryStateStore::new());
        let engine = WorkingMemoryEngine::new(
            store.clone(),
            Arc::new(MockRemoteCompressor::new()),
        )
        .await;

        engine.add_item().await;
        engine.update_item(0, ItemUpdate::with_text("persisted")).await;
        engine.archive().await;

        use crate::memory::store::StateStore;
        let persisted = store.load().await;
        assert_eq!(persisted.now_stack[0].text, "persisted");
        assert_eq!(persisted.vault.len(), 1);
    }
}
