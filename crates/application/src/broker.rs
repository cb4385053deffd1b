//! 订阅分发
//!
//! 每个订阅在消息日志上注册一个独立的监听器，监听器把新消息推入该订阅的无界 channel。
//! 推送发生在房间锁内，因此同一房间的所有订阅者看到相同的顺序，且取消订阅返回后不会再有投递。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use domain::{ClientId, Message, RoomName, SequenceId, SubscriptionId};
use tokio::sync::{mpsc, Mutex};

use crate::message_log::{AppendListener, ListenerId, MessageLog};

struct SubscriptionEntry {
    client: ClientId,
    room: RoomName,
    listener: ListenerId,
    active: Arc<AtomicBool>,
}

struct BrokerInner {
    log: Arc<dyn MessageLog>,
    subscriptions: Mutex<HashMap<SubscriptionId, SubscriptionEntry>>,
}

/// 订阅分发器，克隆后共享同一份订阅表。
#[derive(Clone)]
pub struct SubscriptionBroker {
    inner: Arc<BrokerInner>,
}

impl SubscriptionBroker {
    pub fn new(log: Arc<dyn MessageLog>) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                log,
                subscriptions: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// 订阅房间：返回完整历史快照，随后按序推送新消息。
    pub async fn subscribe(&self, client: ClientId, room: RoomName) -> Subscription {
        self.resubscribe(client, room, 0).await
    }

    /// 断线重连：快照只包含序列号大于 `after` 的消息。
    pub async fn resubscribe(
        &self,
        client: ClientId,
        room: RoomName,
        after: SequenceId,
    ) -> Subscription {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (snapshot, handle) = self.subscribe_into(client, room, after, sender).await;
        Subscription {
            handle,
            snapshot,
            receiver,
        }
    }

    /// 订阅并把实时消息推入调用方提供的 channel，适合一个连接合并多个房间的投递。
    pub async fn subscribe_into(
        &self,
        client: ClientId,
        room: RoomName,
        after: SequenceId,
        sink: mpsc::UnboundedSender<Message>,
    ) -> (Vec<Message>, SubscriptionHandle) {
        let id = SubscriptionId::new();
        let active = Arc::new(AtomicBool::new(true));
        let cursor = Arc::new(AtomicU64::new(0));

        let listener: AppendListener = {
            let active = active.clone();
            let cursor = cursor.clone();
            Arc::new(move |message: &Message| {
                if !active.load(Ordering::Acquire) {
                    return;
                }
                if sink.send(message.clone()).is_ok() {
                    cursor.fetch_max(message.sequence_id(), Ordering::AcqRel);
                }
            })
        };

        let attachment = self.inner.log.attach(&room, after, listener).await;
        let snapshot = attachment.snapshot;
        let listener_id = attachment.listener;
        // 超出日志末尾的游标（例如服务重启后未持久化）按最新序列号处理
        let effective_after = after.min(attachment.latest);
        if effective_after < after {
            tracing::warn!(
                client_id = %client,
                room = %room,
                after,
                latest = attachment.latest,
                "订阅游标超出日志末尾，已校正"
            );
        }
        let delivered = snapshot
            .last()
            .map_or(effective_after, |message| message.sequence_id());
        cursor.fetch_max(delivered, Ordering::AcqRel);

        self.inner.subscriptions.lock().await.insert(
            id,
            SubscriptionEntry {
                client,
                room: room.clone(),
                listener: listener_id,
                active: active.clone(),
            },
        );

        tracing::info!(
            client_id = %client,
            subscription_id = %id,
            room = %room,
            after = effective_after,
            snapshot = snapshot.len(),
            "客户端已订阅房间"
        );

        let handle = SubscriptionHandle {
            id,
            client,
            room,
            cursor,
            replayed_through: delivered,
            active,
            broker: self.clone(),
        };
        (snapshot, handle)
    }

    /// 取消订阅；未知或已取消的订阅视为无操作。返回是否确实取消。
    pub async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let entry = self.inner.subscriptions.lock().await.remove(&id);
        let Some(entry) = entry else {
            tracing::debug!(subscription_id = %id, "取消未知订阅，忽略");
            return false;
        };

        entry.active.store(false, Ordering::Release);
        self.inner.log.remove_listener(&entry.room, entry.listener).await;

        tracing::info!(
            client_id = %entry.client,
            subscription_id = %id,
            room = %entry.room,
            "客户端已取消订阅"
        );
        true
    }

    /// 客户端断开时清理其全部订阅，返回清理数量。
    pub async fn unsubscribe_client(&self, client: ClientId) -> usize {
        let ids: Vec<SubscriptionId> = self
            .inner
            .subscriptions
            .lock()
            .await
            .iter()
            .filter(|(_, entry)| entry.client == client)
            .map(|(id, _)| *id)
            .collect();

        let mut removed = 0;
        for id in ids {
            if self.unsubscribe(id).await {
                removed += 1;
            }
        }
        removed
    }

    pub async fn subscription_count(&self, room: &RoomName) -> usize {
        self.inner
            .subscriptions
            .lock()
            .await
            .values()
            .filter(|entry| &entry.room == room)
            .count()
    }

    pub async fn is_subscribed(&self, id: SubscriptionId) -> bool {
        self.inner.subscriptions.lock().await.contains_key(&id)
    }
}

/// 订阅句柄，生命周期由调用方持有；`unsubscribe` 可重复调用。
///
/// 在 tokio 运行时之外丢弃未取消的句柄时无法移除日志上的监听器，
/// 应在运行时内显式调用 `unsubscribe`。
pub struct SubscriptionHandle {
    id: SubscriptionId,
    client: ClientId,
    room: RoomName,
    cursor: Arc<AtomicU64>,
    replayed_through: SequenceId,
    active: Arc<AtomicBool>,
    broker: SubscriptionBroker,
}

impl SubscriptionHandle {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn client(&self) -> ClientId {
        self.client
    }

    pub fn room(&self) -> &RoomName {
        &self.room
    }

    /// 最后一条已投递消息的序列号
    pub fn cursor(&self) -> SequenceId {
        self.cursor.load(Ordering::Acquire)
    }

    /// 订阅建立时快照覆盖到的序列号（已校正到日志末尾之内），实时推送从其后开始。
    pub fn replayed_through(&self) -> SequenceId {
        self.replayed_through
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub async fn unsubscribe(&self) -> bool {
        self.broker.unsubscribe(self.id).await
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        // 句柄被直接丢弃（例如连接断开）时在后台移除监听器
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let broker = self.broker.clone();
                let id = self.id;
                runtime.spawn(async move {
                    broker.unsubscribe(id).await;
                });
            }
            Err(_) => {
                // 监听器已失活不再投递，但仍留在房间的监听器列表中
                tracing::warn!(
                    subscription_id = %self.id,
                    room = %self.room,
                    "没有可用的运行时，订阅句柄丢弃后监听器未能移除"
                );
            }
        }
    }
}

/// 自带接收端的订阅：先读取 `snapshot`，再通过 `recv` 获取实时消息。
pub struct Subscription {
    handle: SubscriptionHandle,
    snapshot: Vec<Message>,
    receiver: mpsc::UnboundedReceiver<Message>,
}

impl Subscription {
    pub fn handle(&self) -> &SubscriptionHandle {
        &self.handle
    }

    pub fn id(&self) -> SubscriptionId {
        self.handle.id
    }

    pub fn room(&self) -> &RoomName {
        &self.handle.room
    }

    pub fn cursor(&self) -> SequenceId {
        self.handle.cursor()
    }

    pub fn snapshot(&self) -> &[Message] {
        &self.snapshot
    }

    pub fn take_snapshot(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.snapshot)
    }

    /// 下一条实时消息；取消订阅后立即返回 `None`，即使仍有缓冲消息。
    pub async fn recv(&mut self) -> Option<Message> {
        if !self.handle.is_active() {
            return None;
        }
        let message = self.receiver.recv().await?;
        self.handle.is_active().then_some(message)
    }

    pub fn try_recv(&mut self) -> Option<Message> {
        if !self.handle.is_active() {
            return None;
        }
        self.receiver.try_recv().ok()
    }

    pub async fn unsubscribe(&self) -> bool {
        self.handle.unsubscribe().await
    }
}
