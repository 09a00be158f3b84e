use anyhow::{anyhow, Result};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde_json::{json, Value};

use crate::models::{Message, ProviderSettings};
use crate::prompts::ToolProfile;

/**
 * \brief 一次完成调用的结果。
 */
#[derive(Debug, Clone)]
pub struct Completion {
    /** \brief 首个 choice 的正文 */
    pub content: String,
    /** \brief 服务端返回的 usage 计数，原样透传（缺失时为 null） */
    pub usage: Value,
}

/**
 * \brief 非流式完成调用：按工具 Profile 把消息序列转发给 OpenAI 兼容服务。
 * \details Profile 的系统提示词会作为首条消息前置；单次尝试，不重试。
 */
pub async fn complete(
    settings: &ProviderSettings,
    profile: &ToolProfile,
    messages: &[Message],
) -> Result<Completion> {
    let url = format!(
        "{}/v1/chat/completions",
        settings.api_base.trim_end_matches('/')
    );
    let client = reqwest::Client::builder().build()?;

    let mut payload = Vec::with_capacity(messages.len() + 1);
    payload.push(Message::system(profile.system_prompt));
    payload.extend_from_slice(messages);

    let body = json!({
        "model": profile.model,
        "messages": payload,
        "max_tokens": profile.max_tokens,
        "temperature": profile.temperature,
        "stream": false
    });

    let resp = client
        .post(url)
        .header(CONTENT_TYPE, "application/json")
        .header(AUTHORIZATION, format!("Bearer {}", settings.api_key))
        .json(&body)
        .send()
        .await?;

    if !resp.status().is_success() {
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        return Err(anyhow!("completion request failed: {} -> {}", status, text));
    }

    let v: Value = resp.json().await?;
    Ok(Completion {
        content: extract_content(&v),
        usage: v.get("usage").cloned().unwrap_or(Value::Null),
    })
}

fn extract_content(v: &Value) -> String {
    v.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .unwrap_or("")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_content_first_choice() {
        let v = json!({
            "choices": [
                {"message": {"role": "assistant", "content": "first"}},
                {"message": {"role": "assistant", "content": "second"}}
            ]
        });
        assert_eq!(extract_content(&v), "first");
    }

    #[test]
    fn test_extract_content_malformed_payload_yields_empty() {
        assert_eq!(extract_content(&json!({})), "");
        assert_eq!(extract_content(&json!({"choices": []})), "");
        assert_eq!(
            extract_content(&json!({"choices": [{"message": {}}]})),
            ""
        );
    }
}
