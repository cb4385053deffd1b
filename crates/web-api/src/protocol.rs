//! WebSocket JSON 帧格式
//!
//! 所有帧都带有 `type` 字段，例如：
//! `{"type":"send","room":"messages","text":"hello"}`、
//! `{"type":"message","room":"messages","message":{"text":"hello","author":"Alice","imageUrl":null,"sequenceId":1}}`。

use domain::{Message, RoomName, SequenceId, SignInProvider};
use serde::{Deserialize, Serialize};

use crate::error::ErrorBody;

/// 客户端发往服务端的帧
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// 提交外部登录得到的身份令牌
    SignIn { token: String },
    SignOut,
    Send {
        /// 缺省为默认房间
        #[serde(default)]
        room: Option<RoomName>,
        #[serde(default)]
        text: Option<String>,
        #[serde(default, rename = "imageUrl")]
        image_url: Option<String>,
    },
    /// 带 `after` 时为断线重连，只回放之后的消息
    Subscribe {
        room: RoomName,
        #[serde(default)]
        after: Option<SequenceId>,
    },
    Unsubscribe { room: RoomName },
}

/// 服务端推送给客户端的帧
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Snapshot {
        room: RoomName,
        messages: Vec<Message>,
    },
    Message {
        room: RoomName,
        message: Message,
    },
    SignInRequired {
        providers: Vec<SignInProvider>,
    },
    SignedIn {
        #[serde(rename = "displayName")]
        display_name: String,
    },
    SignedOut,
    Error(ErrorBody),
}

impl ServerFrame {
    pub fn message(message: Message) -> Self {
        Self::Message {
            room: message.room().clone(),
            message,
        }
    }

    pub fn error(code: &'static str, message: impl Into<String>) -> Self {
        Self::Error(ErrorBody {
            code,
            message: message.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::{DisplayName, MessageDraft};
    use serde_json::json;

    #[test]
    fn client_frames_parse() {
        let frame: ClientFrame =
            serde_json::from_value(json!({"type": "send", "text": "hello"})).unwrap();
        assert_eq!(
            frame,
            ClientFrame::Send {
                room: None,
                text: Some("hello".into()),
                image_url: None,
            }
        );

        let frame: ClientFrame =
            serde_json::from_value(json!({"type": "subscribe", "room": "side", "after": 4}))
                .unwrap();
        assert_eq!(
            frame,
            ClientFrame::Subscribe {
                room: RoomName::parse("side").unwrap(),
                after: Some(4),
            }
        );

        let frame: ClientFrame = serde_json::from_value(json!({"type": "sign_out"})).unwrap();
        assert_eq!(frame, ClientFrame::SignOut);
    }

    #[test]
    fn invalid_room_name_is_rejected_at_parse_time() {
        let result: Result<ClientFrame, _> =
            serde_json::from_value(json!({"type": "unsubscribe", "room": "bad room!"}));
        assert!(result.is_err());
    }

    #[test]
    fn message_frame_carries_room_and_wire_message() {
        let message = MessageDraft::text(DisplayName::parse("Alice").unwrap(), "hello")
            .unwrap()
            .into_message(RoomName::default(), 1);
        let value = serde_json::to_value(ServerFrame::message(message)).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "message",
                "room": "messages",
                "message": {"text": "hello", "author": "Alice", "imageUrl": null, "sequenceId": 1}
            })
        );
    }

    #[test]
    fn error_frame_is_flattened() {
        let value = serde_json::to_value(ServerFrame::error("VALIDATION_FAILED", "empty")).unwrap();
        assert_eq!(
            value,
            json!({"type": "error", "code": "VALIDATION_FAILED", "message": "empty"})
        );
    }
}
