use std::sync::Arc;

use domain::{Message, RoomName, SequenceId};

use crate::message_log::MessageLog;

/// 分页读取房间历史的游标。
///
/// 惰性：每次只读取一页；有限：读到日志末尾返回空页；可重启：随时用新的位置 `rewind`。
pub struct ReplayCursor {
    log: Arc<dyn MessageLog>,
    room: RoomName,
    position: SequenceId,
    page_size: usize,
}

impl ReplayCursor {
    pub fn new(log: Arc<dyn MessageLog>, room: RoomName, after: SequenceId, page_size: usize) -> Self {
        Self {
            log,
            room,
            position: after,
            page_size: page_size.max(1),
        }
    }

    pub fn room(&self) -> &RoomName {
        &self.room
    }

    /// 最后一条已读取消息的序列号
    pub fn position(&self) -> SequenceId {
        self.position
    }

    pub fn rewind(&mut self, after: SequenceId) {
        self.position = after;
    }

    pub async fn next_page(&mut self) -> Vec<Message> {
        let page = self
            .log
            .read_page(&self.room, self.position, self.page_size)
            .await;
        if let Some(last) = page.last() {
            self.position = last.sequence_id();
        }
        page
    }

    /// 读取剩余的全部消息
    pub async fn collect_remaining(&mut self) -> Vec<Message> {
        let mut messages = Vec::new();
        loop {
            let page = self.next_page().await;
            if page.is_empty() {
                return messages;
            }
            messages.extend(page);
        }
    }
}
