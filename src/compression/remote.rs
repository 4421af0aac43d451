//! 远程压缩：通过 OpenAI 兼容的 Chat Completions 接口生成 bullet
//!
//! 单次请求、无流式、无工具调用。接口地址、模型名和 API key 全部来自
//! [`Settings`]，请求前做快速校验（key / endpoint 为空直接报
//! [`ConfigError`](crate::error::ConfigError)，不发起网络请求）。

use crate::compression::{MAX_WORDS, Message, RemoteCompressor, truncate_words};
use crate::error::{ConfigError, MemoError, RemoteError, Result};
use crate::memory::state::{MAX_NOW_ITEMS, Settings};
use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// 固定的压缩指令，随每次请求作为 system 消息发送
const COMPRESSION_PROMPT: &str = "Compress the conversation into <=7 bullets.
Rules:
- Bullets only, no extra text.
- Max 12 words per bullet.
- Preserve user phrasing; do not add new ideas.";

const MAX_TOKENS: u32 = 200;
const TEMPERATURE: f32 = 0.2;

/// 未显式配置时的请求超时；到期与其他网络失败同等处理
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

// ── 接口请求/响应类型 ─────────────────────────────────────────────────────────

/// `/chat/completions` 请求体（只携带压缩所需的字段）
#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<WireMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize, Default)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

// ── HttpRemoteCompressor ──────────────────────────────────────────────────────

/// 基于 reqwest 的默认 [`RemoteCompressor`] 实现
pub struct HttpRemoteCompressor {
    client: Client,
    timeout: Duration,
}

impl Default for HttpRemoteCompressor {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpRemoteCompressor {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// 覆盖默认请求超时
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

fn assemble_req_header(api_key: &str) -> Result<HeaderMap> {
    let mut header_map = HeaderMap::new();
    header_map.insert(
        "Authorization",
        format!("Bearer {}", api_key)
            .parse()
            .map_err(|e| MemoError::Other(format!("Invalid Authorization header: {}", e)))?,
    );
    header_map.insert(
        "Content-Type",
        "application/json"
            .parse()
            .map_err(|e| MemoError::Other(format!("Invalid Content-Type header: {}", e)))?,
    );
    Ok(header_map)
}

/// 去掉行首的 bullet / 编号标记（`-`、`*`、数字、`.`、空白）
fn strip_bullet_marker(line: &str) -> &str {
    line.trim_start_matches(|c: char| {
        matches!(c, '-' | '*' | '.') || c.is_ascii_digit() || c.is_whitespace()
    })
}

/// 把模型回复的文本拆成 bullet：逐行去标记、去空行，最多 7 条，
/// 每条与本地路径一样截断到 12 个单词
fn parse_bullets(content: &str) -> Vec<String> {
    content
        .split('\n')
        .map(|line| strip_bullet_marker(line).trim())
        .filter(|line| !line.is_empty())
        .take(MAX_NOW_ITEMS)
        .map(|line| truncate_words(line, MAX_WORDS))
        .collect()
}

#[async_trait]
impl RemoteCompressor for HttpRemoteCompressor {
    async fn compress(&self, messages: &[Message], settings: &Settings) -> Result<Vec<String>> {
        if settings.api_key.is_empty() {
            return Err(ConfigError::MissingApiKey.into());
        }
        if settings.api_endpoint.is_empty() {
            return Err(ConfigError::MissingEndpoint.into());
        }

        let payload = messages
            .iter()
            .map(|msg| format!("[{}] {}", msg.role, msg.content))
            .collect::<Vec<_>>()
            .join("\n");

        let request_body = ChatCompletionRequest {
            model: settings.api_model.clone(),
            messages: vec![
                WireMessage {
                    role: "system".to_string(),
                    content: COMPRESSION_PROMPT.to_string(),
                },
                WireMessage {
                    role: "user".to_string(),
                    content: payload,
                },
            ],
            max_tokens: MAX_TOKENS,
            temperature: TEMPERATURE,
        };

        let header_map = assemble_req_header(&settings.api_key)?;
        let response = self
            .client
            .post(&settings.api_endpoint)
            .headers(header_map)
            .timeout(self.timeout)
            .json(&request_body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(RemoteError::Api { status, body }.into());
        }

        let completion = response
            .json::<ChatCompletionResponse>()
            .await
            .map_err(|e| RemoteError::InvalidResponse(e.to_string()))?;

        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or(RemoteError::EmptyResponse)?;

        let bullets = parse_bullets(&content);
        debug!(bullets = bullets.len(), "远程压缩完成");
        Ok(bullets)
    }
}
