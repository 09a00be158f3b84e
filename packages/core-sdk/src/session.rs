use anyhow::{anyhow, bail, Result};
use rusqlite::Connection;
use serde::Deserialize;
use serde_json::json;

use crate::db;
use crate::models::Message;
use crate::{prompts, telemetry};

/** \brief 出错时追加的合成助手消息，保证历史里总有回应可见。 */
const ERROR_REPLY: &str =
    "Sorry, something went wrong while contacting the study server. Please try again.";

/**
 * \brief 客户端观察到的服务端状态。
 * \details 由健康探测派生的 UI 信号，并非权威状态；未知时必须先探测再发送。
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerStatus {
    Checking,
    Online,
    Offline,
    NoKey,
}

struct SessionStore {
    conn: Connection,
    owner_id: String,
    conversation_id: Option<i64>,
}

/**
 * \brief 单个会话视图的客户端状态。
 * \details 显式会话对象，按视图各持一份，不做进程级单例。
 *          每次发送经历 idle → sending → (success|error) → idle；
 *          发送期间 loading 置位，同一视图同时最多一个在途请求。
 */
pub struct StudySession {
    server_url: String,
    client: reqwest::Client,
    advanced: bool,
    /** \brief 按时间顺序排列的会话消息。 */
    pub messages: Vec<Message>,
    /** \brief 在途请求标记。 */
    pub loading: bool,
    /** \brief 最近一次错误的可见文案。 */
    pub last_error: Option<String>,
    /** \brief 最近一次健康探测的结果。 */
    pub status: ServerStatus,
    store: Option<SessionStore>,
}

#[derive(Deserialize, Debug)]
struct HealthEnv {
    #[serde(rename = "apiKeySet")]
    api_key_set: bool,
}

#[derive(Deserialize, Debug)]
struct HealthEnvelope {
    status: String,
    env: HealthEnv,
}

#[derive(Deserialize, Debug)]
struct ChatEnvelope {
    message: String,
}

#[derive(Deserialize, Debug)]
struct ErrorEnvelope {
    message: String,
}

impl StudySession {
    /**
     * \brief 创建指向指定服务地址的会话。
     */
    pub fn new(server_url: impl Into<String>) -> Self {
        StudySession {
            server_url: server_url.into(),
            client: reqwest::Client::new(),
            advanced: false,
            messages: Vec::new(),
            loading: false,
            last_error: None,
            status: ServerStatus::Checking,
            store: None,
        }
    }

    /** \brief 改用进阶聊天端点。 */
    pub fn advanced(mut self) -> Self {
        self.advanced = true;
        self
    }

    /**
     * \brief 挂接会话持久化：首个回合时创建记录，此后每回合追加两条消息。
     */
    pub fn with_store(mut self, conn: Connection, owner_id: impl Into<String>) -> Self {
        self.store = Some(SessionStore {
            conn,
            owner_id: owner_id.into(),
            conversation_id: None,
        });
        self
    }

    /** \brief 已持久化的会话 ID（尚未创建时为 None）。 */
    pub fn conversation_id(&self) -> Option<i64> {
        self.store.as_ref().and_then(|s| s.conversation_id)
    }

    /**
     * \brief 探测服务健康状态并更新本地信号。
     */
    pub async fn check_health(&mut self) -> ServerStatus {
        self.status = ServerStatus::Checking;
        let url = format!("{}/api/health", self.server_url.trim_end_matches('/'));
        self.status = match self.client.get(url).send().await {
            Ok(resp) => match resp.json::<HealthEnvelope>().await {
                Ok(health) if health.status == "ok" => {
                    if health.env.api_key_set {
                        ServerStatus::Online
                    } else {
                        ServerStatus::NoKey
                    }
                }
                _ => ServerStatus::Offline,
            },
            Err(_) => ServerStatus::Offline,
        };
        self.status
    }

    /**
     * \brief 发送一条用户消息并返回助手回复。
     * \details 发送前必须确认服务在线；失败时会追加合成助手消息并设置 last_error。
     */
    pub async fn send(&mut self, prompt: &str) -> Result<String> {
        if self.status != ServerStatus::Online {
            self.check_health().await;
        }
        if let Err(e) = gate(self.status) {
            self.last_error = Some(e.to_string());
            return Err(e);
        }

        self.loading = true;
        let result = self.post_chat(prompt).await;
        self.loading = false;

        match result {
            Ok(reply) => {
                self.record_exchange(prompt, &reply);
                self.persist_turn(prompt, &reply)?;
                telemetry::log_event("client.chat", &format!("sent prompt_len={}", prompt.len()));
                Ok(reply)
            }
            Err(e) => {
                self.record_failure(prompt, &e.to_string());
                self.persist_turn(prompt, ERROR_REPLY)?;
                telemetry::log_error("client.chat", &format!("send failed: {}", e));
                Err(e)
            }
        }
    }

    async fn post_chat(&self, prompt: &str) -> Result<String> {
        let path = if self.advanced {
            "/api/chat/advanced"
        } else {
            "/api/chat"
        };
        let url = format!("{}{}", self.server_url.trim_end_matches('/'), path);

        let mut outgoing = self.messages.clone();
        outgoing.push(Message::user(prompt));

        let resp = self
            .client
            .post(url)
            .json(&json!({ "messages": outgoing }))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let message = resp
                .json::<ErrorEnvelope>()
                .await
                .map(|e| e.message)
                .unwrap_or_else(|_| format!("server answered {}", status));
            return Err(anyhow!(message));
        }

        let envelope: ChatEnvelope = resp.json().await?;
        Ok(envelope.message)
    }

    // 成功回合：依次追加用户消息与助手消息，并清除错误文案。
    fn record_exchange(&mut self, prompt: &str, reply: &str) {
        self.messages.push(Message::user(prompt));
        self.messages.push(Message::assistant(reply));
        self.last_error = None;
    }

    // 失败回合：仍追加用户消息，再补一条合成助手消息，错误保持可见。
    fn record_failure(&mut self, prompt: &str, error: &str) {
        self.messages.push(Message::user(prompt));
        self.messages.push(Message::assistant(ERROR_REPLY));
        self.last_error = Some(error.to_string());
    }

    fn persist_turn(&mut self, user_content: &str, assistant_content: &str) -> Result<()> {
        let model = if self.advanced {
            prompts::ADVANCED_CHAT.model
        } else {
            prompts::CHAT.model
        };
        let Some(store) = self.store.as_mut() else {
            return Ok(());
        };
        let conversation_id = match store.conversation_id {
            Some(id) => id,
            None => {
                let id = db::create_conversation(
                    &store.conn,
                    &store.owner_id,
                    &conversation_title(user_content),
                    model,
                )?;
                store.conversation_id = Some(id);
                id
            }
        };
        db::append_message(&store.conn, conversation_id, "user", user_content)?;
        db::append_message(&store.conn, conversation_id, "assistant", assistant_content)?;
        Ok(())
    }
}

fn gate(status: ServerStatus) -> Result<()> {
    match status {
        ServerStatus::Online => Ok(()),
        ServerStatus::NoKey => bail!("server has no completion API key configured"),
        ServerStatus::Offline => bail!("study server is offline"),
        ServerStatus::Checking => bail!("server status is still being checked"),
    }
}

// 首个用户消息截断后作为会话标题。
fn conversation_title(first_prompt: &str) -> String {
    const MAX: usize = 48;
    let trimmed = first_prompt.trim();
    if trimmed.chars().count() <= MAX {
        trimmed.to_string()
    } else {
        let head: String = trimmed.chars().take(MAX).collect();
        format!("{}…", head.trim_end())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_refuses_everything_but_online() {
        assert!(gate(ServerStatus::Online).is_ok());
        assert!(gate(ServerStatus::NoKey).is_err());
        assert!(gate(ServerStatus::Offline).is_err());
        assert!(gate(ServerStatus::Checking).is_err());
    }

    #[test]
    fn test_record_exchange_appends_user_then_assistant() {
        let mut session = StudySession::new("http://127.0.0.1:5173");
        session.last_error = Some("stale".to_string());
        session.record_exchange("What is grace?", "Unmerited favor.");
        assert_eq!(session.messages.len(), 2);
        assert_eq!(session.messages[0].role, "user");
        assert_eq!(session.messages[0].content, "What is grace?");
        assert_eq!(session.messages[1].role, "assistant");
        assert!(session.last_error.is_none());
    }

    #[test]
    fn test_record_failure_appends_synthetic_reply_and_error() {
        let mut session = StudySession::new("http://127.0.0.1:5173");
        session.record_failure("What is grace?", "connection refused");
        assert_eq!(session.messages.len(), 2);
        assert_eq!(session.messages[1].role, "assistant");
        assert_eq!(session.messages[1].content, ERROR_REPLY);
        assert_eq!(session.last_error.as_deref(), Some("connection refused"));
    }

    #[test]
    fn test_persist_turn_creates_record_once_then_appends() {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        db::migrate(&conn).expect("migrate");
        let mut session =
            StudySession::new("http://127.0.0.1:5173").with_store(conn, "user-a");

        session
            .persist_turn("What is grace?", "Unmerited favor.")
            .expect("persist first turn");
        let id = session.conversation_id().expect("record created");
        session
            .persist_turn("Where is it taught?", "See Ephesians 2:8.")
            .expect("persist second turn");
        assert_eq!(session.conversation_id(), Some(id));

        let store = session.store.as_ref().expect("store");
        let msgs = db::load_messages(&store.conn, id).expect("load");
        assert_eq!(msgs.len(), 4);
        assert_eq!(msgs[0].role, "user");
        assert_eq!(msgs[3].content, "See Ephesians 2:8.");

        let record = db::get_conversation(&store.conn, id)
            .expect("get")
            .expect("exists");
        assert_eq!(record.owner_id, "user-a");
        assert_eq!(record.model, prompts::CHAT.model);
        assert_eq!(record.title, "What is grace?");
    }

    #[test]
    fn test_conversation_title_truncates_long_prompts() {
        let long = "a".repeat(80);
        let title = conversation_title(&long);
        assert!(title.chars().count() <= 49);
        assert!(title.ends_with('…'));
        assert_eq!(conversation_title("  short  "), "short");
    }
}
