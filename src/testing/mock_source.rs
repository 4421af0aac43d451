//! Mock 消息采集器，实现 [`MessageSource`]，从固定的对话记录中取消息。

use crate::compression::Message;
use crate::memory::engine::MessageSource;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

/// 固定对话记录的 [`MessageSource`] 实现。
///
/// `fetch_recent(limit)` 按采集器契约返回按时间顺序的最近 `limit` 条；
/// 每次调用收到的 `limit` 都被记录，可通过 [`calls`](MockMessageSource::calls)
/// 检查引擎是否按设置拉取。
pub struct MockMessageSource {
    transcript: Vec<Message>,
    calls: Arc<Mutex<Vec<usize>>>,
}

impl MockMessageSource {
    pub fn new(transcript: Vec<Message>) -> Self {
        Self {
            transcript,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// 所有历史调用收到的 limit（按时序排列）
    pub fn calls(&self) -> Vec<usize> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageSource for MockMessageSource {
    async fn fetch_recent(&self, limit: usize) -> Vec<Message> {
        self.calls.lock().unwrap().push(limit);
        let skip = self.transcript.len().saturating_sub(limit);
        self.transcript[skip..].to_vec()
    }
}
