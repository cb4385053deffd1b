//! 按房间划分的只追加有序消息日志
//!
//! 每个房间维护从 1 开始、无间隙递增的序列号。同一房间的追加、监听器注册/移除
//! 以及追加后的通知都在同一把房间锁内完成，因此序列号顺序就是所有监听器看到的顺序。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use domain::{Message, MessageDraft, RoomName, SequenceId};
use tokio::sync::{Mutex, RwLock};

use crate::error::ApplicationError;
use crate::journal::{JournalError, MessageJournal};

/// 追加回调，在房间锁内同步调用，不能阻塞。
pub type AppendListener = Arc<dyn Fn(&Message) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// `attach` 的结果：快照、注册时房间的最新序列号以及监听器标识。
#[derive(Clone)]
pub struct Attachment {
    pub snapshot: Vec<Message>,
    pub latest: SequenceId,
    pub listener: ListenerId,
}

#[async_trait]
pub trait MessageLog: Send + Sync {
    /// 分配下一个序列号并写入消息。`MessageDraft` 已保证文本/图片二选一。
    async fn append(&self, room: &RoomName, draft: MessageDraft)
        -> Result<Message, ApplicationError>;

    /// 返回序列号大于 `after` 的全部消息，按序列号升序；`after = 0` 即完整历史。
    async fn read_from(&self, room: &RoomName, after: SequenceId) -> Vec<Message>;

    /// 与 `read_from` 相同，但最多返回 `limit` 条。
    async fn read_page(&self, room: &RoomName, after: SequenceId, limit: usize) -> Vec<Message>;

    async fn latest_sequence(&self, room: &RoomName) -> SequenceId;

    /// 注册追加监听器，之后每次追加恰好回调一次，直到移除。
    async fn on_append(&self, room: &RoomName, listener: AppendListener) -> ListenerId;

    /// 原子地读取 `after` 之后的快照并注册监听器，快照与实时推送之间无间隙、无重复。
    /// `latest` 与快照在同一把锁内读取，调用方据此校正超出日志末尾的游标。
    async fn attach(
        &self,
        room: &RoomName,
        after: SequenceId,
        listener: AppendListener,
    ) -> Attachment;

    /// 移除监听器；返回是否确实移除。重复移除是无害的。
    async fn remove_listener(&self, room: &RoomName, id: ListenerId) -> bool;
}

#[derive(Default)]
struct RoomLog {
    messages: Vec<Message>,
    listeners: Vec<(ListenerId, AppendListener)>,
}

impl RoomLog {
    fn next_sequence(&self) -> SequenceId {
        self.messages.len() as SequenceId + 1
    }

    fn slice_after(&self, after: SequenceId) -> &[Message] {
        // 序列号无间隙且从 1 开始，序列号 n 位于下标 n - 1
        let start = usize::try_from(after)
            .unwrap_or(usize::MAX)
            .min(self.messages.len());
        &self.messages[start..]
    }

    fn push(&mut self, message: Message) {
        assert_eq!(
            message.sequence_id(),
            self.next_sequence(),
            "sequence id assignment must be gapless"
        );
        self.messages.push(message);
    }
}

/// 内存实现，可选挂载持久化日志。
pub struct InMemoryMessageLog {
    rooms: RwLock<HashMap<RoomName, Arc<Mutex<RoomLog>>>>,
    journal: Option<Arc<dyn MessageJournal>>,
    next_listener_id: AtomicU64,
}

impl InMemoryMessageLog {
    pub fn new() -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            journal: None,
            next_listener_id: AtomicU64::new(1),
        }
    }

    /// 从持久化日志恢复历史，之后的每次追加先写入日志再对订阅者可见。
    pub async fn with_journal(journal: Arc<dyn MessageJournal>) -> Result<Self, JournalError> {
        let mut rooms: HashMap<RoomName, RoomLog> = HashMap::new();
        for message in journal.load().await? {
            let room = rooms.entry(message.room().clone()).or_default();
            if message.sequence_id() != room.next_sequence() {
                return Err(JournalError::corrupted(format!(
                    "room {} expected sequence {} but found {}",
                    message.room(),
                    room.next_sequence(),
                    message.sequence_id()
                )));
            }
            room.push(message);
        }

        tracing::info!(rooms = rooms.len(), "消息日志已从持久化存储恢复");

        Ok(Self {
            rooms: RwLock::new(
                rooms
                    .into_iter()
                    .map(|(name, log)| (name, Arc::new(Mutex::new(log))))
                    .collect(),
            ),
            journal: Some(journal),
            next_listener_id: AtomicU64::new(1),
        })
    }

    /// 房间在首次写入或订阅时隐式创建
    async fn room(&self, room: &RoomName) -> Arc<Mutex<RoomLog>> {
        if let Some(log) = self.rooms.read().await.get(room) {
            return log.clone();
        }
        self.rooms
            .write()
            .await
            .entry(room.clone())
            .or_default()
            .clone()
    }

    async fn existing_room(&self, room: &RoomName) -> Option<Arc<Mutex<RoomLog>>> {
        self.rooms.read().await.get(room).cloned()
    }

    fn allocate_listener_id(&self) -> ListenerId {
        ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for InMemoryMessageLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageLog for InMemoryMessageLog {
    async fn append(
        &self,
        room: &RoomName,
        draft: MessageDraft,
    ) -> Result<Message, ApplicationError> {
        let room_log = self.room(room).await;
        let mut log = room_log.lock().await;

        let message = draft.into_message(room.clone(), log.next_sequence());

        if let Some(journal) = &self.journal {
            if let Err(err) = journal.append(&message).await {
                tracing::error!(
                    room = %room,
                    sequence_id = message.sequence_id(),
                    error = %err,
                    "消息写入持久化日志失败"
                );
                return Err(err.into());
            }
        }

        log.push(message.clone());
        for (_, listener) in &log.listeners {
            listener(&message);
        }

        tracing::debug!(
            room = %room,
            sequence_id = message.sequence_id(),
            listeners = log.listeners.len(),
            "消息已追加"
        );

        Ok(message)
    }

    async fn read_from(&self, room: &RoomName, after: SequenceId) -> Vec<Message> {
        match self.existing_room(room).await {
            Some(log) => log.lock().await.slice_after(after).to_vec(),
            None => Vec::new(),
        }
    }

    async fn read_page(&self, room: &RoomName, after: SequenceId, limit: usize) -> Vec<Message> {
        match self.existing_room(room).await {
            Some(log) => log
                .lock()
                .await
                .slice_after(after)
                .iter()
                .take(limit)
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }

    async fn latest_sequence(&self, room: &RoomName) -> SequenceId {
        match self.existing_room(room).await {
            Some(log) => log.lock().await.messages.len() as SequenceId,
            None => 0,
        }
    }

    async fn on_append(&self, room: &RoomName, listener: AppendListener) -> ListenerId {
        let id = self.allocate_listener_id();
        self.room(room).await.lock().await.listeners.push((id, listener));
        id
    }

    async fn attach(
        &self,
        room: &RoomName,
        after: SequenceId,
        listener: AppendListener,
    ) -> Attachment {
        let id = self.allocate_listener_id();
        let room_log = self.room(room).await;
        let mut log = room_log.lock().await;
        let snapshot = log.slice_after(after).to_vec();
        log.listeners.push((id, listener));
        Attachment {
            snapshot,
            latest: log.messages.len() as SequenceId,
            listener: id,
        }
    }

    async fn remove_listener(&self, room: &RoomName, id: ListenerId) -> bool {
        let Some(room_log) = self.existing_room(room).await else {
            return false;
        };
        let mut log = room_log.lock().await;
        let before = log.listeners.len();
        log.listeners.retain(|(listener_id, _)| *listener_id != id);
        before != log.listeners.len()
    }
}
