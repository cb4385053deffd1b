//! 外部身份提供方相关的领域类型

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::value_objects::DisplayName;

/// 身份提供方推送的登录状态变化。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityEvent {
    pub signed_in: bool,
    pub display_name: Option<String>,
}

impl IdentityEvent {
    pub fn signed_in(display_name: impl Into<String>) -> Self {
        Self {
            signed_in: true,
            display_name: Some(display_name.into()),
        }
    }

    pub fn signed_out() -> Self {
        Self {
            signed_in: false,
            display_name: None,
        }
    }

    /// 只有"已登录且带有非空显示名称"才算有效的登录身份。
    pub fn display_name(&self) -> Option<DisplayName> {
        if !self.signed_in {
            return None;
        }
        self.display_name
            .as_deref()
            .and_then(|name| DisplayName::parse(name).ok())
    }
}

/// 发起登录流程时可供选择的身份提供方。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignInProvider {
    Google,
    Email,
}

impl SignInProvider {
    pub fn defaults() -> Vec<Self> {
        vec![Self::Google, Self::Email]
    }
}

impl FromStr for SignInProvider {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "google" => Ok(Self::Google),
            "email" => Ok(Self::Email),
            other => Err(DomainError::validation_error(
                "sign_in_provider",
                format!("unknown provider {other:?}"),
            )),
        }
    }
}

impl fmt::Display for SignInProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Google => f.write_str("google"),
            Self::Email => f.write_str("email"),
        }
    }
}
