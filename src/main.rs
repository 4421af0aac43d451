//! memo-stack 演示 REPL：既充当对话记录的喂入端，又充当展示协作方。
//!
//! 用 `u: ...` / `a: ...` 追加对话消息，用 `/` 命令驱动引擎：
//! `/checkpoint` 压缩最近对话、`/archive` 归档、`/restore <i>` 恢复快照。

use clap::Parser;
use dotenv::dotenv;
use memo_stack::compression::{HttpRemoteCompressor, Message};
use memo_stack::memory::engine::MessageSource;
use memo_stack::memory::{
    FileStateStore, InMemoryStateStore, ItemUpdate, SettingsUpdate, StateStore,
    WorkingMemoryEngine,
};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "memo-stack", about = "对话工作记忆引擎演示 REPL")]
struct Args {
    /// 状态文件路径
    #[arg(long, default_value = "~/.memo-stack/state.json")]
    store: String,

    /// 只用内存存储，不落盘
    #[arg(long)]
    ephemeral: bool,

    /// 启动时应用的设置文件（YAML，字段与持久化设置同名）
    #[arg(long)]
    settings: Option<String>,
}

/// REPL 内置的对话记录，充当消息采集器
struct ReplTranscript {
    messages: Mutex<Vec<Message>>,
}

impl ReplTranscript {
    fn new() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
        }
    }

    fn push(&self, message: Message) {
        self.messages.lock().unwrap().push(message);
    }
}

#[async_trait::async_trait]
impl MessageSource for ReplTranscript {
    async fn fetch_recent(&self, limit: usize) -> Vec<Message> {
        let messages = self.messages.lock().unwrap();
        let skip = messages.len().saturating_sub(limit);
        messages[skip..].to_vec()
    }
}

/// 展示层义务：核心不校验，调用方负责钳制到 [2, 50]
fn clamp_count(value: u32) -> u32 {
    value.clamp(2, 50)
}

/// 解析并钳制 `/set count` 的输入，非整数报 [`ConfigError::InvalidValue`]
fn parse_count(value: &str) -> memo_stack::error::Result<u32> {
    let n: u32 = value.trim().parse().map_err(|_| {
        memo_stack::error::ConfigError::InvalidValue {
            field: "count".to_string(),
            message: format!("expected an integer, got '{}'", value),
        }
    })?;
    Ok(clamp_count(n))
}

fn load_settings_file(path: &str) -> memo_stack::error::Result<SettingsUpdate> {
    let raw = std::fs::read_to_string(path)?;
    let mut update: SettingsUpdate = serde_yaml::from_str(&raw)?;
    if let Some(count) = update.checkpoint_message_count {
        update.checkpoint_message_count = Some(clamp_count(count));
    }
    Ok(update)
}

/// 环境变量覆盖（`MEMO_APIKEY` / `MEMO_ENDPOINT` / `MEMO_MODEL`）
fn env_overrides() -> SettingsUpdate {
    SettingsUpdate {
        api_key: std::env::var("MEMO_APIKEY").ok(),
        api_endpoint: std::env::var("MEMO_ENDPOINT").ok(),
        api_model: std::env::var("MEMO_MODEL").ok(),
        ..SettingsUpdate::default()
    }
}

fn is_empty_update(u: &SettingsUpdate) -> bool {
    u.checkpoint_message_count.is_none()
        && u.prompt_injection_enabled.is_none()
        && u.use_api_compression.is_none()
        && u.api_key.is_none()
        && u.api_endpoint.is_none()
        && u.api_model.is_none()
}

async fn print_stack(engine: &WorkingMemoryEngine) {
    let state = engine.snapshot().await;
    if state.now_stack.is_empty() {
        println!("(now-stack 为空)");
        return;
    }
    for (i, item) in state.now_stack.iter().enumerate() {
        let pin = if item.pinned { "📌" } else { "  " };
        let shield = if item.protected { "🛡" } else { " " };
        println!("{} {}{} {}", i, pin, shield, item.text);
    }
}

async fn print_vault(engine: &WorkingMemoryEngine) {
    let state = engine.snapshot().await;
    if state.vault.is_empty() {
        println!("(vault 为空)");
        return;
    }
    for (i, entry) in state.vault.iter().enumerate() {
        println!("{}: {} 条条目 @ {}", i, entry.items.len(), entry.timestamp);
    }
}

fn print_help() {
    println!("u: <文本> / a: <文本>  追加 user / assistant 消息");
    println!("/checkpoint   压缩最近对话为 now-stack");
    println!("/stack        查看 now-stack");
    println!("/add          追加空白条目");
    println!("/edit <i> <文本>  编辑条目");
    println!("/pin <i>  /protect <i>  /del <i>");
    println!("/archive      归档快照    /vault  查看 vault");
    println!("/restore <i>  恢复快照    /prompt 查看注入文本");
    println!("/set count|inject|api|key|model|endpoint <值>");
    println!("/quit         退出");
}

async fn handle_set(engine: &WorkingMemoryEngine, key: &str, value: &str) {
    let update = match key {
        "count" => match parse_count(value) {
            Ok(n) => SettingsUpdate {
                checkpoint_message_count: Some(n),
                ..SettingsUpdate::default()
            },
            Err(e) => {
                println!("{}", e);
                return;
            }
        },
        "inject" => SettingsUpdate {
            prompt_injection_enabled: Some(value == "on"),
            ..SettingsUpdate::default()
        },
        "api" => SettingsUpdate {
            use_api_compression: Some(value == "on"),
            ..SettingsUpdate::default()
        },
        "key" => SettingsUpdate {
            api_key: Some(value.trim().to_string()),
            ..SettingsUpdate::default()
        },
        "model" => SettingsUpdate {
            api_model: Some(value.trim().to_string()),
            ..SettingsUpdate::default()
        },
        "endpoint" => SettingsUpdate {
            api_endpoint: Some(value.trim().to_string()),
            ..SettingsUpdate::default()
        },
        _ => {
            println!("未知设置项: {}", key);
            return;
        }
    };
    engine.update_settings(update).await;
    println!("✅ 已更新设置");
}

async fn handle_command(engine: &WorkingMemoryEngine, transcript: &ReplTranscript, line: &str) {
    let mut parts = line.splitn(3, ' ');
    let command = parts.next().unwrap_or_default();
    match command {
        "/checkpoint" => {
            engine.checkpoint(transcript).await;
            print_stack(engine).await;
        }
        "/stack" => print_stack(engine).await,
        "/add" => {
            engine.add_item().await;
            print_stack(engine).await;
        }
        "/edit" => {
            let (Some(index), Some(text)) = (parts.next(), parts.next()) else {
                println!("用法: /edit <i> <文本>");
                return;
            };
            match index.parse::<usize>() {
                Ok(i) => engine.update_item(i, ItemUpdate::with_text(text)).await,
                Err(_) => println!("无效的索引: {}", index),
            }
        }
        "/pin" | "/protect" | "/del" => {
            let Some(Ok(i)) = parts.next().map(str::parse::<usize>) else {
                println!("用法: {} <i>", command);
                return;
            };
            let snapshot = engine.snapshot().await;
            let changes = match command {
                "/pin" => ItemUpdate::with_pinned(
                    !snapshot.now_stack.get(i).map(|it| it.pinned).unwrap_or(false),
                ),
                "/protect" => ItemUpdate::with_protected(
                    !snapshot
                        .now_stack
                        .get(i)
                        .map(|it| it.protected)
                        .unwrap_or(false),
                ),
                _ => ItemUpdate::deleted(),
            };
            engine.update_item(i, changes).await;
            print_stack(engine).await;
        }
        "/archive" => {
            engine.archive().await;
            print_vault(engine).await;
        }
        "/vault" => print_vault(engine).await,
        "/restore" => {
            let Some(Ok(i)) = parts.next().map(str::parse::<usize>) else {
                println!("用法: /restore <i>");
                return;
            };
            engine.restore_vault(i).await;
            print_stack(engine).await;
        }
        "/prompt" => {
            let text = engine.prompt_injection_text().await;
            if text.is_empty() {
                println!("(now-stack 为空，无注入文本)");
            } else {
                println!("{}", text);
            }
        }
        "/set" => {
            let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
                println!("用法: /set <项> <值>");
                return;
            };
            handle_set(engine, key, value).await;
        }
        "/help" => print_help(),
        _ => println!("未知命令: {}（/help 查看用法）", command),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let store: Arc<dyn StateStore> = if args.ephemeral {
        Arc::new(InMemoryStateStore::new())
    } else {
        Arc::new(FileStateStore::new(&args.store)?)
    };
    let engine = WorkingMemoryEngine::new(store, Arc::new(HttpRemoteCompressor::new())).await;

    if let Some(path) = &args.settings {
        engine.update_settings(load_settings_file(path)?).await;
    }
    let overrides = env_overrides();
    if !is_empty_update(&overrides) {
        engine.update_settings(overrides).await;
    }

    println!("🧠 memo-stack 就绪（/help 查看用法）");
    let transcript = ReplTranscript::new();
    let mut editor = DefaultEditor::new()?;
    loop {
        match editor.readline("memo> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(line);
                if line == "/quit" {
                    break;
                }
                if let Some(content) = line.strip_prefix("u:") {
                    let content = content.trim();
                    if !content.is_empty() {
                        transcript.push(Message::user(content));
                    }
                } else if let Some(content) = line.strip_prefix("a:") {
                    let content = content.trim();
                    if !content.is_empty() {
                        transcript.push(Message::assistant(content));
                    }
                } else {
                    handle_command(&engine, &transcript, line).await;
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use memo_stack::error::{ConfigError, MemoError};

    #[test]
    fn test_parse_count_clamps_to_range() {
        assert_eq!(parse_count("10").unwrap(), 10);
        assert_eq!(parse_count("1").unwrap(), 2);
        assert_eq!(parse_count("99").unwrap(), 50);
    }

    #[test]
    fn test_parse_count_rejects_non_integer() {
        let err = parse_count("ten").unwrap_err();
        assert!(matches!(
            err,
            MemoError::Config(ConfigError::InvalidValue { .. })
        ));
    }
}
