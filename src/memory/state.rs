//! 持久化数据模型
//!
//! [`PersistedState`] 是唯一的持久化单元，包含 now-stack、vault 和 settings
//! 三部分。序列化统一使用 camelCase 字段名（`nowStack` / `checkpointMessageCount`），
//! 与浏览器端的 `wm_state` 记录布局保持一致，无版本号、无迁移逻辑。
//!
//! [`StateUpdate`] / [`SettingsUpdate`] 是部分更新的载体：now-stack 与 vault
//! 整体替换，settings 按字段深合并（部分更新不会丢掉无关的设置项）。

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// now-stack 的硬性容量上限，所有变更操作都会重新校验
pub const MAX_NOW_ITEMS: usize = 7;

// ── MemoryItem ────────────────────────────────────────────────────────────────

/// now-stack 中的单条工作记忆，仅靠位置标识（无稳定 id）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryItem {
    pub text: String,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub protected: bool,
}

impl MemoryItem {
    /// 由 checkpoint 压缩产出的新条目，标志位全部复位
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            pinned: false,
            protected: false,
        }
    }

    /// 手动添加的空白可编辑条目
    pub fn empty() -> Self {
        Self::new("")
    }
}

// ── VaultEntry ────────────────────────────────────────────────────────────────

/// vault 中的一条快照，创建后不可变
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultEntry {
    /// 归档时间（Unix 毫秒）
    pub timestamp: u64,
    /// 归档时 now-stack 的深拷贝
    pub items: Vec<MemoryItem>,
}

// ── Settings ──────────────────────────────────────────────────────────────────

/// 引擎设置
///
/// `checkpoint_message_count` 的取值范围是 [2, 50]，由调用方（展示层 /
/// 启动引导）在调用 [`update_settings`](crate::memory::WorkingMemoryEngine::update_settings)
/// 前负责钳制，核心不做二次校验。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// 每次 checkpoint 拉取的最近消息条数
    pub checkpoint_message_count: u32,
    pub prompt_injection_enabled: bool,
    pub use_api_compression: bool,
    pub api_key: String,
    pub api_endpoint: String,
    pub api_model: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            checkpoint_message_count: 10,
            prompt_injection_enabled: false,
            use_api_compression: false,
            api_key: String::new(),
            api_endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            api_model: "gpt-4o-mini".to_string(),
        }
    }
}

// ── PersistedState ────────────────────────────────────────────────────────────

/// 完整的持久化状态。引擎持有工作副本并全量写穿（write-through），
/// 存储层是它的唯一属主。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PersistedState {
    pub now_stack: Vec<MemoryItem>,
    pub vault: Vec<VaultEntry>,
    pub settings: Settings,
}

/// 把 now-stack 截断到容量上限（严格按位置截断，不偏袒 pinned 条目）
pub(crate) fn cap_now_stack(items: &mut Vec<MemoryItem>) {
    items.truncate(MAX_NOW_ITEMS);
}

/// 当前 Unix 毫秒时间戳
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

// ── 部分更新载体 ──────────────────────────────────────────────────────────────

/// [`PersistedState`] 的顶层部分更新：`None` 字段保持原值，
/// now-stack / vault 为整体替换，settings 走字段级深合并
#[derive(Debug, Clone, Default)]
pub struct StateUpdate {
    pub now_stack: Option<Vec<MemoryItem>>,
    pub vault: Option<Vec<VaultEntry>>,
    pub settings: Option<SettingsUpdate>,
}

impl StateUpdate {
    pub fn with_now_stack(items: Vec<MemoryItem>) -> Self {
        Self {
            now_stack: Some(items),
            ..Self::default()
        }
    }

    pub fn with_vault(vault: Vec<VaultEntry>) -> Self {
        Self {
            vault: Some(vault),
            ..Self::default()
        }
    }

    pub fn with_settings(settings: SettingsUpdate) -> Self {
        Self {
            settings: Some(settings),
            ..Self::default()
        }
    }

    /// 把本次更新合并进 `state`
    pub fn apply(&self, state: &mut PersistedState) {
        if let Some(now_stack) = &self.now_stack {
            state.now_stack = now_stack.clone();
        }
        if let Some(vault) = &self.vault {
            state.vault = vault.clone();
        }
        if let Some(settings) = &self.settings {
            settings.apply(&mut state.settings);
        }
    }
}

/// [`Settings`] 的字段级部分更新，可从 YAML/JSON 反序列化
/// （用于启动时的设置引导文件）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SettingsUpdate {
    pub checkpoint_message_count: Option<u32>,
    pub prompt_injection_enabled: Option<bool>,
    pub use_api_compression: Option<bool>,
    pub api_key: Option<String>,
    pub api_endpoint: Option<String>,
    pub api_model: Option<String>,
}

impl SettingsUpdate {
    /// 逐字段合并：`Some` 覆盖，`None` 保留原值
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(count) = self.checkpoint_message_count {
            settings.checkpoint_message_count = count;
        }
        if let Some(enabled) = self.prompt_injection_enabled {
            settings.prompt_injection_enabled = enabled;
        }
        if let Some(use_api) = self.use_api_compression {
            settings.use_api_compression = use_api;
        }
        if let Some(key) = &self.api_key {
            settings.api_key = key.clone();
        }
        if let Some(endpoint) = &self.api_endpoint {
            settings.api_endpoint = endpoint.clone();
        }
        if let Some(model) = &self.api_model {
            settings.api_model = model.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_match_extension_defaults() {
        let s = Settings::default();
        assert_eq!(s.checkpoint_message_count, 10);
        assert!(!s.prompt_injection_enabled);
        assert!(!s.use_api_compression);
        assert_eq!(s.api_key, "");
        assert_eq!(s.api_endpoint, "https://api.openai.com/v1/chat/completions");
        assert_eq!(s.api_model, "gpt-4o-mini");
    }

    #[test]
    fn test_persisted_layout_uses_camel_case() {
        let state = PersistedState {
            now_stack: vec![MemoryItem::new("hello")],
            ..PersistedState::default()
        };
        let json = serde_json::to_value(&state).unwrap();
        assert!(json.get("nowStack").is_some());
        assert!(json.get("vault").is_some());
        assert_eq!(
            json["settings"]["checkpointMessageCount"],
            serde_json::json!(10)
        );
    }

    #[test]
    fn test_malformed_fields_fall_back_to_defaults() {
        // 缺字段的旧状态照常解析
        let state: PersistedState = serde_json::from_str(r#"{"nowStack": []}"#).unwrap();
        assert_eq!(state.settings, Settings::default());
        assert!(state.vault.is_empty());
    }

    #[test]
    fn test_settings_update_merges_field_wise() {
        let mut settings = Settings::default();
        SettingsUpdate {
            api_key: Some("x".to_string()),
            ..SettingsUpdate::default()
        }
        .apply(&mut settings);
        assert_eq!(settings.api_key, "x");
        // 其余字段不受影响
        assert_eq!(settings.checkpoint_message_count, 10);
        assert_eq!(settings.api_model, "gpt-4o-mini");
    }

    #[test]
    fn test_cap_now_stack_is_positional() {
        let mut items: Vec<MemoryItem> = (0..10)
            .map(|i| MemoryItem {
                text: format!("item {}", i),
                pinned: i >= 8, // pinned 条目在截断范围之外也照样被裁掉
                protected: false,
            })
            .collect();
        cap_now_stack(&mut items);
        assert_eq!(items.len(), MAX_NOW_ITEMS);
        assert_eq!(items[0].text, "item 0");
        assert!(items.iter().all(|i| !i.pinned));
    }
}
