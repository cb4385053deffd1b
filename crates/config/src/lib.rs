//! 统一配置中心
//!
//! 提供应用的全局配置管理，包括：
//! - 服务监听地址
//! - 聊天参数（默认房间、消息长度上限、持久化目录）
//! - 图片对象存储
//! - 外部身份断言
//!
//! 加载优先级：默认值 -> 可选配置文件（`FRIENDLYCHAT_CONFIG_FILE`）-> 环境变量（`FRIENDLYCHAT_*`）。

use std::path::PathBuf;

use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

pub const ENV_PREFIX: &str = "FRIENDLYCHAT_";
pub const CONFIG_FILE_ENV: &str = "FRIENDLYCHAT_CONFIG_FILE";

const DEV_JWT_SECRET: &str = "dev-secret-key-not-for-production-use-minimum-32-chars";
const KNOWN_PROVIDERS: [&str; 2] = ["google", "email"];

/// 全局应用配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AppConfig {
    #[validate(nested)]
    pub server: ServerConfig,
    #[validate(nested)]
    pub chat: ChatConfig,
    #[validate(nested)]
    pub blob: BlobConfig,
    #[validate(nested)]
    pub identity: IdentityConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ServerConfig {
    #[validate(length(min = 1))]
    pub host: String,
    #[validate(range(min = 1))]
    pub port: u16,
}

/// 聊天配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ChatConfig {
    #[validate(length(min = 1, max = 64))]
    pub default_room: String,
    #[validate(range(min = 1))]
    pub max_message_length: usize,
    #[validate(range(min = 1, max = 10000))]
    pub replay_page_size: usize,
    /// 设置后每个房间的消息追加写入 `<journal_dir>/<room>.jsonl`
    #[serde(default)]
    pub journal_dir: Option<PathBuf>,
}

/// 图片对象存储配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BlobConfig {
    pub directory: PathBuf,
    #[validate(url)]
    pub public_base_url: String,
}

/// 外部身份断言配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct IdentityConfig {
    #[validate(length(min = 32, message = "JWT secret must be at least 32 characters long"))]
    pub jwt_secret: String,
    #[validate(custom(function = "validate_providers"))]
    pub sign_in_providers: Vec<String>,
}

impl IdentityConfig {
    pub fn uses_development_secret(&self) -> bool {
        self.jwt_secret == DEV_JWT_SECRET || self.jwt_secret.contains("not-for-production")
    }
}

fn validate_providers(providers: &Vec<String>) -> Result<(), ValidationError> {
    if providers.is_empty() {
        return Err(ValidationError::new("sign_in_providers_empty"));
    }
    if providers
        .iter()
        .any(|provider| !KNOWN_PROVIDERS.contains(&provider.as_str()))
    {
        return Err(ValidationError::new("sign_in_provider_unknown"));
    }
    Ok(())
}

impl Default for AppConfig {
    /// 默认配置为开发环境版本
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            chat: ChatConfig {
                default_room: "messages".to_string(),
                max_message_length: 1000,
                replay_page_size: 100,
                journal_dir: None,
            },
            blob: BlobConfig {
                directory: PathBuf::from("data/blobs"),
                public_base_url: "http://127.0.0.1:8080/blobs".to_string(),
            },
            identity: IdentityConfig {
                jwt_secret: DEV_JWT_SECRET.to_string(),
                sign_in_providers: KNOWN_PROVIDERS.iter().map(|p| p.to_string()).collect(),
            },
        }
    }
}

impl AppConfig {
    /// 按优先级合并配置来源并校验
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_figment(Self::figment())
    }

    pub fn figment() -> Figment {
        let mut figment = Figment::new().merge(Serialized::defaults(AppConfig::default()));
        if let Ok(path) = std::env::var(CONFIG_FILE_ENV) {
            figment = if path.ends_with(".yml") || path.ends_with(".yaml") {
                figment.merge(Yaml::file(path))
            } else if path.ends_with(".json") {
                figment.merge(Json::file(path))
            } else {
                figment.merge(Toml::file(path))
            };
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: AppConfig = figment.extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// 用于日志输出的脱敏表示
    pub fn sanitize(&self) -> String {
        let mut sanitized = self.clone();
        sanitized.identity.jwt_secret = "[REDACTED]".to_string();
        format!("{:?}", sanitized)
    }
}

/// 配置错误类型
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
    #[error("invalid configuration: {0}")]
    Invalid(#[from] validator::ValidationErrors),
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.chat.default_room, "messages");
        assert_eq!(config.chat.max_message_length, 1000);
        assert!(config.identity.uses_development_secret());
    }

    #[test]
    fn test_env_overrides_defaults() {
        Jail::expect_with(|jail| {
            jail.set_env("FRIENDLYCHAT_SERVER__PORT", "9090");
            jail.set_env("FRIENDLYCHAT_CHAT__DEFAULT_ROOM", "lobby");
            jail.set_env("FRIENDLYCHAT_CHAT__JOURNAL_DIR", "/var/lib/chat");

            let config = AppConfig::from_figment(AppConfig::figment()).expect("config");
            assert_eq!(config.server.port, 9090);
            assert_eq!(config.chat.default_room, "lobby");
            assert_eq!(config.chat.journal_dir, Some(PathBuf::from("/var/lib/chat")));
            Ok(())
        });
    }

    #[test]
    fn test_config_file_is_merged() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "chat.toml",
                r#"
                [identity]
                jwt_secret = "production-grade-secret-key-with-sufficient-length"
                sign_in_providers = ["email"]
                "#,
            )?;
            jail.set_env(CONFIG_FILE_ENV, "chat.toml");

            let config = AppConfig::from_figment(AppConfig::figment()).expect("config");
            assert_eq!(config.identity.sign_in_providers, vec!["email".to_string()]);
            assert!(!config.identity.uses_development_secret());
            Ok(())
        });
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.identity.jwt_secret = "short".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.identity.sign_in_providers = vec!["myspace".to_string()];
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.chat.max_message_length = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.blob.public_base_url = "not a url".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sanitize_hides_secret() {
        let config = AppConfig::default();
        let text = config.sanitize();
        assert!(!text.contains(DEV_JWT_SECRET));
        assert!(text.contains("[REDACTED]"));
    }
}
