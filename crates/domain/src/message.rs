use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::value_objects::{DisplayName, RoomName, SequenceId};

/// 待写入日志的消息草稿，尚未分配序列号。
///
/// 草稿保证文本与图片地址恰好存在一个；仅包含空白字符的值视为缺失。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageDraft {
    text: Option<String>,
    author: DisplayName,
    image_url: Option<String>,
}

impl MessageDraft {
    pub fn new(
        author: DisplayName,
        text: Option<String>,
        image_url: Option<String>,
    ) -> Result<Self, DomainError> {
        let text = text.filter(|value| !value.trim().is_empty());
        let image_url = image_url
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty());

        match (&text, &image_url) {
            (None, None) => Err(DomainError::validation_error(
                "message",
                "either text or image_url is required",
            )),
            (Some(_), Some(_)) => Err(DomainError::validation_error(
                "message",
                "text and image_url are mutually exclusive",
            )),
            _ => Ok(Self {
                text,
                author,
                image_url,
            }),
        }
    }

    pub fn text(author: DisplayName, text: impl Into<String>) -> Result<Self, DomainError> {
        Self::new(author, Some(text.into()), None)
    }

    pub fn photo(author: DisplayName, image_url: impl Into<String>) -> Result<Self, DomainError> {
        Self::new(author, None, Some(image_url.into()))
    }

    /// 按字符数检查文本长度，超出上限直接拒绝而不是截断。
    pub fn ensure_text_within(&self, max_chars: usize) -> Result<(), DomainError> {
        match &self.text {
            Some(text) if text.chars().count() > max_chars => Err(DomainError::validation_error(
                "text",
                format!("exceeds {max_chars} characters"),
            )),
            _ => Ok(()),
        }
    }

    pub fn author(&self) -> &DisplayName {
        &self.author
    }

    /// 分配序列号，生成不可变的消息记录。
    pub fn into_message(self, room: RoomName, sequence_id: SequenceId) -> Message {
        Message {
            text: self.text,
            author: self.author.as_str().to_owned(),
            image_url: self.image_url,
            sequence_id,
            room,
        }
    }
}

/// 已写入日志的不可变消息。
///
/// 序列化格式：`{"text", "author", "imageUrl", "sequenceId"}`，房间由所在的消息流隐含。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    text: Option<String>,
    author: String,
    image_url: Option<String>,
    sequence_id: SequenceId,
    #[serde(skip)]
    room: RoomName,
}

impl Message {
    /// 从持久化记录恢复消息，同样执行文本/图片二选一校验。
    pub fn restore(room: RoomName, record: MessageRecord) -> Result<Self, DomainError> {
        if record.sequence_id == 0 {
            return Err(DomainError::validation_error(
                "sequence_id",
                "must be greater than zero",
            ));
        }
        let author = DisplayName::parse(record.author)?;
        let draft = MessageDraft::new(author, record.text, record.image_url)?;
        Ok(draft.into_message(room, record.sequence_id))
    }

    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    pub fn author(&self) -> &str {
        &self.author
    }

    pub fn image_url(&self) -> Option<&str> {
        self.image_url.as_deref()
    }

    pub fn sequence_id(&self) -> SequenceId {
        self.sequence_id
    }

    pub fn room(&self) -> &RoomName {
        &self.room
    }

    pub fn is_photo(&self) -> bool {
        self.image_url.is_some()
    }

    pub fn to_record(&self) -> MessageRecord {
        MessageRecord {
            text: self.text.clone(),
            author: self.author.clone(),
            image_url: self.image_url.clone(),
            sequence_id: self.sequence_id,
        }
    }
}

/// 消息的线格式表示，用于反序列化客户端或持久化数据。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub text: Option<String>,
    pub author: String,
    pub image_url: Option<String>,
    pub sequence_id: SequenceId,
}
