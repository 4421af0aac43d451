//! 对话压缩
//!
//! 把一段角色标注的对话消息压缩为不超过 N 条的短 bullet 列表，供
//! [`WorkingMemoryEngine`](crate::memory::WorkingMemoryEngine) 写入 now-stack。
//!
//! 两条路径，职责各不相同：
//!
//! | 路径 | 实现 | 特点 |
//! |------|------|------|
//! | 本地压缩 | [`local_compress`] | 确定性、同步、永不失败，作为兜底 |
//! | 远程压缩 | [`RemoteCompressor`] / [`HttpRemoteCompressor`] | 调用 LLM 接口，质量更高但可能失败 |
//!
//! 远程路径的任何失败都由引擎回退到本地路径，不会影响 checkpoint 结果
//! （见 [`WorkingMemoryEngine::checkpoint`](crate::memory::WorkingMemoryEngine::checkpoint)）。
//!
//! ## 快速上手
//!
//! ```rust
//! use memo_stack::compression::{Message, local_compress};
//!
//! let messages = vec![
//!     Message::user("规划去罗马的行程"),
//!     Message::assistant("好的，我来安排博物馆和美食"),
//! ];
//! let bullets = local_compress(&messages, 7);
//! assert!(bullets.len() <= 7);
//! ```

pub mod remote;

pub use remote::HttpRemoteCompressor;

use crate::error::Result;
use crate::memory::state::Settings;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 每条 bullet 最多保留的单词数
pub const MAX_WORDS: usize = 12;

// ── 消息类型 ──────────────────────────────────────────────────────────────────

/// 消息作者角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// 单条对话消息，由宿主采集器在每次 checkpoint 时提供，不参与持久化
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

// ── 本地压缩 ──────────────────────────────────────────────────────────────────

/// 把消息文本折叠为单空格分隔、最多 `max_words` 个单词的一行
pub(crate) fn truncate_words(text: &str, max_words: usize) -> String {
    text.split_whitespace()
        .take(max_words)
        .collect::<Vec<_>>()
        .join(" ")
}

/// 从单条消息内容提取候选行：取非空的 trim 后行；一行都没有时整条内容作为唯一候选
fn extract_candidates(content: &str) -> Vec<&str> {
    let lines: Vec<&str> = content
        .split('\n')
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    if lines.is_empty() {
        vec![content.trim()]
    } else {
        lines
    }
}

/// 本地确定性压缩：把消息列表压缩为最多 `max_items` 条 bullet。
///
/// 先输出所有 user 消息、再输出所有 assistant 消息（各自保持原有相对顺序）——
/// 用户意图优先是刻意的设计选择。每条候选行折叠空白并截断到前
/// [`MAX_WORDS`] 个单词，空候选被跳过，凑满 `max_items` 条即提前结束。
///
/// 纯函数：同步、无副作用、输入相同则输出相同。
pub fn local_compress(messages: &[Message], max_items: usize) -> Vec<String> {
    let ordered = messages
        .iter()
        .filter(|m| m.role == Role::User)
        .chain(messages.iter().filter(|m| m.role == Role::Assistant));

    let mut bullets = Vec::new();
    for msg in ordered {
        for candidate in extract_candidates(&msg.content) {
            if bullets.len() >= max_items {
                return bullets;
            }
            let trimmed = truncate_words(candidate, MAX_WORDS);
            if trimmed.is_empty() {
                continue;
            }
            bullets.push(trimmed);
        }
    }
    bullets
}

// ── 远程压缩接口 ──────────────────────────────────────────────────────────────

/// 远程压缩的统一接口（async，支持 `dyn` trait object）。
///
/// 失败以 `Err` 显式返回，由调用方决定回退策略，不依赖异常式控制流。
/// 实现方可替换为任意后端；测试使用
/// [`MockRemoteCompressor`](crate::testing::MockRemoteCompressor)。
#[async_trait]
pub trait RemoteCompressor: Send + Sync {
    /// 把 `messages` 压缩为最多 7 条 bullet，使用 `settings` 中的接口配置
    async fn compress(&self, messages: &[Message], settings: &Settings) -> Result<Vec<String>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_words_collapses_whitespace() {
        assert_eq!(truncate_words("  hello   world \t ok ", 12), "hello world ok");
    }

    #[test]
    fn test_truncate_words_caps_at_max() {
        let text = "one two three four five six seven eight nine ten eleven twelve thirteen";
        let out = truncate_words(text, MAX_WORDS);
        assert_eq!(out.split(' ').count(), 12);
        assert!(out.ends_with("twelve"));
    }

    #[test]
    fn test_truncate_words_short_input_unchanged() {
        assert_eq!(truncate_words("just three words", MAX_WORDS), "just three words");
    }

    #[test]
    fn test_local_compress_example_scenario() {
        let messages = vec![
            Message::user("Plan the trip to Rome for five days in June with museums and food"),
            Message::assistant("Sure, I will draft an itinerary focusing on history and cuisine"),
        ];
        let bullets = local_compress(&messages, 7);
        assert_eq!(
            bullets,
            vec![
                "Plan the trip to Rome for five days in June with museums",
                "Sure, I will draft an itinerary focusing on history and",
            ]
        );
    }

    #[test]
    fn test_local_compress_user_before_assistant() {
        let messages = vec![
            Message::assistant("assistant first"),
            Message::user("user second"),
            Message::assistant("assistant third"),
            Message::user("user fourth"),
        ];
        let bullets = local_compress(&messages, 7);
        assert_eq!(
            bullets,
            vec!["user second", "user fourth", "assistant first", "assistant third"]
        );
    }

    #[test]
    fn test_local_compress_splits_lines() {
        let messages = vec![Message::user("first line\n\n  second line  \nthird line")];
        let bullets = local_compress(&messages, 7);
        assert_eq!(bullets, vec!["first line", "second line", "third line"]);
    }

    #[test]
    fn test_local_compress_respects_max_items() {
        let messages = vec![Message::user("a\nb\nc\nd\ne")];
        let bullets = local_compress(&messages, 3);
        assert_eq!(bullets, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_local_compress_skips_blank_messages() {
        let messages = vec![Message::user("   "), Message::assistant("real content")];
        let bullets = local_compress(&messages, 7);
        assert_eq!(bullets, vec!["real content"]);
    }

    #[test]
    fn test_local_compress_empty_input() {
        assert!(local_compress(&[], 7).is_empty());
    }

    #[test]
    fn test_local_compress_deterministic() {
        let messages = vec![
            Message::user("alpha beta"),
            Message::assistant("gamma delta"),
        ];
        assert_eq!(local_compress(&messages, 7), local_compress(&messages, 7));
    }
}
