use serde::{Deserialize, Serialize};

/** \brief 默认的 OpenAI 兼容 API 基地址。 */
pub const DEFAULT_API_BASE: &str = "https://api.openai.com";

/**
 * \brief 消息结构，与 OpenAI Chat 消息格式对齐。
 */
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /** \brief 角色：system/user/assistant */
    pub role: String,
    /** \brief 内容 */
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Message {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Message {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Message {
            role: "system".to_string(),
            content: content.into(),
        }
    }
}

/**
 * \brief 完成服务的连接配置，从环境变量读取。
 * \details `OPENAI_API_KEY` 为必需凭证；`OPENAI_API_BASE` 可选，默认官方地址。
 */
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    /** \brief API 基地址 */
    pub api_base: String,
    /** \brief API 密钥（可能为空，由 has_key 判定） */
    pub api_key: String,
}

impl ProviderSettings {
    /**
     * \brief 读取当前进程环境中的完成服务配置。
     */
    pub fn from_env() -> Self {
        ProviderSettings {
            api_base: std::env::var("OPENAI_API_BASE")
                .unwrap_or_else(|_| DEFAULT_API_BASE.to_string()),
            api_key: std::env::var("OPENAI_API_KEY").unwrap_or_default(),
        }
    }

    /** \brief 凭证是否已配置。 */
    pub fn has_key(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}

/**
 * \brief 响应正文中提取出的 markdown 小节。
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    /** \brief 小节标题（去除 `##`/`###` 前缀后的文本） */
    pub title: String,
    /** \brief 标题层级，2 或 3 */
    pub level: u8,
}
