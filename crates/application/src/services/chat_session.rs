//! 连接级聊天会话
//!
//! 把会话身份网关与订阅分发绑定到一个连接：登录后挂载默认房间，登出后卸载全部订阅。
//! 所有房间的实时消息合并进同一个 channel，由传输层统一转发。

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use domain::{ClientId, DisplayName, IdentityEvent, Message, RoomName, SequenceId, SignInProvider};
use tokio::sync::mpsc;

use crate::{
    broker::SubscriptionHandle,
    error::ApplicationError,
    identity::{IdentityError, IdentityProvider},
    services::chat_service::{ChatService, SendMessageRequest},
    session_gate::{SessionGate, SessionTransition},
};

/// 新订阅的初始快照
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub room: RoomName,
    pub messages: Vec<Message>,
}

/// 处理一次身份事件的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityOutcome {
    pub transition: SessionTransition,
    /// 登录后新挂载房间的快照；已挂载时为 `None`
    pub snapshot: Option<Snapshot>,
    /// 登出时卸载的订阅数量
    pub detached: usize,
}

struct ActiveRoom {
    handle: SubscriptionHandle,
    delivered: SequenceId,
}

pub struct ChatSession {
    client: ClientId,
    service: Arc<ChatService>,
    gate: SessionGate,
    rooms: HashMap<RoomName, ActiveRoom>,
    sink: mpsc::UnboundedSender<Message>,
    deliveries: Option<mpsc::UnboundedReceiver<Message>>,
}

impl ChatSession {
    pub fn new(
        service: Arc<ChatService>,
        provider: Arc<dyn IdentityProvider>,
        providers: Vec<SignInProvider>,
    ) -> Self {
        let (sink, deliveries) = mpsc::unbounded_channel();
        Self {
            client: ClientId::new(),
            service,
            gate: SessionGate::new(provider, providers),
            rooms: HashMap::new(),
            sink,
            deliveries: Some(deliveries),
        }
    }

    pub fn client(&self) -> ClientId {
        self.client
    }

    pub fn display_name(&self) -> &DisplayName {
        self.gate.display_name()
    }

    pub fn is_signed_in(&self) -> bool {
        self.gate.is_signed_in()
    }

    pub fn default_room(&self) -> &RoomName {
        self.service.default_room()
    }

    pub fn subscribed_rooms(&self) -> Vec<RoomName> {
        let mut rooms: Vec<_> = self.rooms.keys().cloned().collect();
        rooms.sort();
        rooms
    }

    /// 开始监听身份事件；重复调用为无操作
    pub async fn start(&mut self) -> bool {
        self.gate.attach().await
    }

    /// 取出合并后的实时消息接收端，只能取一次。
    ///
    /// 接收到的每条消息都应先经过 [`ChatSession::accept_delivery`] 过滤。
    pub fn take_deliveries(&mut self) -> Option<mpsc::UnboundedReceiver<Message>> {
        self.deliveries.take()
    }

    /// 过滤已取消订阅房间的残留消息以及与快照重复的消息。
    pub fn accept_delivery(&mut self, message: &Message) -> bool {
        match self.rooms.get_mut(message.room()) {
            Some(active) if message.sequence_id() > active.delivered => {
                active.delivered = message.sequence_id();
                true
            }
            _ => false,
        }
    }

    pub async fn next_identity_event(&mut self) -> Option<IdentityEvent> {
        self.gate.next_event().await
    }

    /// 处理所有已到达的身份事件
    pub async fn process_pending_identity(&mut self) -> Vec<IdentityOutcome> {
        let mut outcomes = Vec::new();
        for event in self.gate.pending_events() {
            outcomes.push(self.handle_identity_event(event).await);
        }
        outcomes
    }

    /// 丢弃已到达的身份事件，返回丢弃数量
    pub fn discard_pending_identity(&mut self) -> usize {
        self.gate.pending_events().len()
    }

    pub async fn handle_identity_event(&mut self, event: IdentityEvent) -> IdentityOutcome {
        let transition = self.gate.on_identity_event(event).await;
        self.apply_transition(transition).await
    }

    /// 外部登录流程被取消或失败
    pub async fn sign_in_cancelled(&mut self, error: IdentityError) -> IdentityOutcome {
        let transition = self.gate.sign_in_cancelled(error);
        self.apply_transition(transition).await
    }

    async fn apply_transition(&mut self, transition: SessionTransition) -> IdentityOutcome {
        match &transition {
            SessionTransition::SignedIn(_) => {
                let room = self.service.default_room().clone();
                let snapshot = self.subscribe(room).await;
                IdentityOutcome {
                    transition,
                    snapshot,
                    detached: 0,
                }
            }
            SessionTransition::SignedOut | SessionTransition::SignInCancelled(_) => {
                let detached = self.unsubscribe_all().await;
                IdentityOutcome {
                    transition,
                    snapshot: None,
                    detached,
                }
            }
        }
    }

    /// 订阅房间；已订阅时为无操作并返回 `None`。
    pub async fn subscribe(&mut self, room: RoomName) -> Option<Snapshot> {
        if self.rooms.contains_key(&room) {
            return None;
        }
        Some(self.attach_room(room, 0).await)
    }

    /// 断线重连：替换已有订阅，只回放 `after` 之后的消息。
    pub async fn resume(&mut self, room: RoomName, after: SequenceId) -> Snapshot {
        if let Some(previous) = self.rooms.remove(&room) {
            previous.handle.unsubscribe().await;
        }
        self.attach_room(room, after).await
    }

    async fn attach_room(&mut self, room: RoomName, after: SequenceId) -> Snapshot {
        let (messages, handle) = self
            .service
            .broker()
            .subscribe_into(self.client, room.clone(), after, self.sink.clone())
            .await;
        let delivered = handle.replayed_through();
        self.rooms
            .insert(room.clone(), ActiveRoom { handle, delivered });
        Snapshot { room, messages }
    }

    pub async fn unsubscribe(&mut self, room: &RoomName) -> bool {
        match self.rooms.remove(room) {
            Some(active) => active.handle.unsubscribe().await,
            None => false,
        }
    }

    pub async fn unsubscribe_all(&mut self) -> usize {
        let mut detached = 0;
        for (_, active) in self.rooms.drain() {
            if active.handle.unsubscribe().await {
                detached += 1;
            }
        }
        detached
    }

    /// 以当前会话的显示名称发送消息（未登录时为匿名）。
    pub async fn send(
        &self,
        room: RoomName,
        text: Option<String>,
        image_url: Option<String>,
    ) -> Result<Message, ApplicationError> {
        let author = self.gate.display_name().clone();
        self.service
            .send(
                &author,
                SendMessageRequest {
                    room,
                    text,
                    image_url,
                },
            )
            .await
    }

    pub async fn send_photo(&self, room: RoomName, local_file: &Path) -> Result<Message, ApplicationError> {
        let author = self.gate.display_name().clone();
        self.service.send_photo(&author, room, local_file).await
    }

    pub async fn sign_out(&self) -> Result<(), IdentityError> {
        self.gate.sign_out().await
    }

    /// 连接结束：卸载全部订阅并释放身份监听器
    pub async fn close(&mut self) {
        let detached = self.unsubscribe_all().await;
        self.gate.detach().await;
        tracing::info!(client_id = %self.client, detached, "聊天会话已关闭");
    }
}
