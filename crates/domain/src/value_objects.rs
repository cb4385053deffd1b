use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::DomainError;

/// 默认房间名称，对应单房间部署下的全局消息流。
pub const DEFAULT_ROOM: &str = "messages";

/// 未登录时用于标记消息作者的匿名名称。
pub const ANONYMOUS: &str = "anonymous";

/// 单条文本消息允许的最大字符数。
pub const MAX_MESSAGE_LENGTH: usize = 1000;

const MAX_ROOM_NAME_LENGTH: usize = 64;

/// 房间内单调递增的消息序列号，从 1 开始，0 表示"尚无消息"。
pub type SequenceId = u64;

/// 经过验证的房间名称。
///
/// 房间名称同时用作日志文件名，因此只允许字母、数字、`-` 和 `_`。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomName(String);

impl RoomName {
    pub fn parse(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into().trim().to_owned();
        if value.is_empty() {
            return Err(DomainError::validation_error("room", "cannot be empty"));
        }
        if value.chars().count() > MAX_ROOM_NAME_LENGTH {
            return Err(DomainError::validation_error("room", "too long"));
        }
        if !value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(DomainError::validation_error(
                "room",
                "only ascii letters, digits, '-' and '_' are allowed",
            ));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RoomName {
    fn default() -> Self {
        Self(DEFAULT_ROOM.to_owned())
    }
}

impl fmt::Display for RoomName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RoomName {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<RoomName> for String {
    fn from(value: RoomName) -> Self {
        value.0
    }
}

/// 会话中用于标记消息作者的显示名称。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DisplayName(String);

impl DisplayName {
    pub fn parse(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into().trim().to_owned();
        if value.is_empty() {
            return Err(DomainError::validation_error(
                "display_name",
                "cannot be empty",
            ));
        }
        Ok(Self(value))
    }

    pub fn anonymous() -> Self {
        Self(ANONYMOUS.to_owned())
    }

    pub fn is_anonymous(&self) -> bool {
        self.0 == ANONYMOUS
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for DisplayName {
    fn default() -> Self {
        Self::anonymous()
    }
}

impl fmt::Display for DisplayName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 已连接客户端的唯一标识。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(pub Uuid);

impl ClientId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for ClientId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

/// 订阅句柄的唯一标识。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub Uuid);

impl SubscriptionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_name_is_trimmed_and_restricted() {
        assert_eq!(RoomName::parse("  general ").unwrap().as_str(), "general");
        assert!(RoomName::parse("").is_err());
        assert!(RoomName::parse("../etc").is_err());
        assert!(RoomName::parse("a".repeat(65)).is_err());
        assert_eq!(RoomName::default().as_str(), DEFAULT_ROOM);
    }

    #[test]
    fn room_name_deserializes_through_validation() {
        let room: RoomName = serde_json::from_str("\"lobby\"").unwrap();
        assert_eq!(room.as_str(), "lobby");
        assert!(serde_json::from_str::<RoomName>("\"no spaces\"").is_err());
    }

    #[test]
    fn display_name_defaults_to_anonymous() {
        let name = DisplayName::default();
        assert!(name.is_anonymous());
        assert_eq!(name.as_str(), ANONYMOUS);
        assert!(DisplayName::parse("   ").is_err());
        assert!(!DisplayName::parse("Alice").unwrap().is_anonymous());
    }
}
