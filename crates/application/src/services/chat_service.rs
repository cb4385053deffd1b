use std::path::Path;
use std::sync::Arc;

use domain::{ClientId, DisplayName, Message, MessageDraft, RoomName, SequenceId};

use crate::{
    blob_store::BlobStore,
    broker::{Subscription, SubscriptionBroker},
    error::ApplicationError,
    message_log::MessageLog,
    replay::ReplayCursor,
};

/// 聊天服务的运行参数
#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub default_room: RoomName,
    pub max_message_length: usize,
    pub replay_page_size: usize,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            default_room: RoomName::default(),
            max_message_length: domain::MAX_MESSAGE_LENGTH,
            replay_page_size: 100,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SendMessageRequest {
    pub room: RoomName,
    pub text: Option<String>,
    pub image_url: Option<String>,
}

impl SendMessageRequest {
    pub fn text(room: RoomName, text: impl Into<String>) -> Self {
        Self {
            room,
            text: Some(text.into()),
            image_url: None,
        }
    }

    pub fn photo(room: RoomName, image_url: impl Into<String>) -> Self {
        Self {
            room,
            text: None,
            image_url: Some(image_url.into()),
        }
    }
}

pub struct ChatServiceDependencies {
    pub message_log: Arc<dyn MessageLog>,
    pub blob_store: Arc<dyn BlobStore>,
    pub settings: ChatSettings,
}

/// 组合根：把会话身份接入消息日志的写入与订阅分发的读取。
pub struct ChatService {
    deps: ChatServiceDependencies,
    broker: SubscriptionBroker,
}

impl ChatService {
    pub fn new(deps: ChatServiceDependencies) -> Self {
        let broker = SubscriptionBroker::new(deps.message_log.clone());
        Self { deps, broker }
    }

    pub fn settings(&self) -> &ChatSettings {
        &self.deps.settings
    }

    pub fn default_room(&self) -> &RoomName {
        &self.deps.settings.default_room
    }

    pub fn broker(&self) -> &SubscriptionBroker {
        &self.broker
    }

    /// 发送消息：文本与图片地址去除空白后必须恰好存在一个，文本超长直接拒绝。
    pub async fn send(
        &self,
        author: &DisplayName,
        request: SendMessageRequest,
    ) -> Result<Message, ApplicationError> {
        let draft = MessageDraft::new(author.clone(), request.text, request.image_url)?;
        draft.ensure_text_within(self.deps.settings.max_message_length)?;

        let message = self.deps.message_log.append(&request.room, draft).await?;

        tracing::info!(
            room = %request.room,
            sequence_id = message.sequence_id(),
            author = %author,
            photo = message.is_photo(),
            "消息已发送"
        );
        Ok(message)
    }

    /// 上传本地图片到对象存储，再以返回的地址发送图片消息。
    pub async fn send_photo(
        &self,
        author: &DisplayName,
        room: RoomName,
        local_file: &Path,
    ) -> Result<Message, ApplicationError> {
        let image_url = self.deps.blob_store.upload(local_file).await?;
        tracing::debug!(room = %room, image_url = %image_url, "图片已上传");
        self.send(author, SendMessageRequest::photo(room, image_url))
            .await
    }

    pub async fn attach(&self, client: ClientId, room: RoomName) -> Subscription {
        self.broker.subscribe(client, room).await
    }

    /// 断线重连，只回放 `after` 之后的消息
    pub async fn resume(&self, client: ClientId, room: RoomName, after: SequenceId) -> Subscription {
        self.broker.resubscribe(client, room, after).await
    }

    pub async fn detach(&self, subscription: &Subscription) -> bool {
        self.broker.unsubscribe(subscription.id()).await
    }

    pub async fn history(&self, room: &RoomName, after: SequenceId) -> Vec<Message> {
        self.deps.message_log.read_from(room, after).await
    }

    pub fn replay(&self, room: RoomName, after: SequenceId) -> ReplayCursor {
        ReplayCursor::new(
            self.deps.message_log.clone(),
            room,
            after,
            self.deps.settings.replay_page_size,
        )
    }
}
