use anyhow::Result;
use axum::{
    http::StatusCode,
    routing::{get, get_service, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tower_http::services::ServeDir;

use crate::models::{Message, ProviderSettings, Section};
use crate::{extract, llm, prompts, telemetry};

/**
 * \brief 启动本地 HTTP 服务，提供静态前端与 API。
 * \param addr 监听地址，如 "127.0.0.1:5173"
 */
pub async fn run(addr: &str) -> Result<()> {
    let ui_root = std::env::var("BEREA_UI_DIR").unwrap_or_else(|_| "web".to_string());
    let static_service =
        get_service(ServeDir::new(ui_root).append_index_html_on_directories(true));

    let app = router().fallback_service(static_service);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    println!("Server listening on http://{}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

/**
 * \brief 构造 API 路由表（不含静态文件回退，便于测试）。
 */
pub fn router() -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/chat", post(chat))
        .route("/api/chat/advanced", post(chat_advanced))
        .route("/api/tools/bible-commentary", post(bible_commentary))
        .route("/api/tools/verse-analyzer", post(verse_analyzer))
}

/**
 * \brief 所有端点共用的错误响应体：`{message, error: true}`。
 */
#[derive(Serialize, Debug)]
struct ErrorBody {
    message: String,
    error: bool,
}

type ApiError = (StatusCode, Json<ErrorBody>);

fn server_err<E: std::fmt::Display>(e: E) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody {
            message: e.to_string(),
            error: true,
        }),
    )
}

/**
 * \brief 成功响应附带的派生元数据。
 */
#[derive(Serialize, Debug)]
struct Metadata {
    /** \brief 端点固定的模型 ID */
    model: String,
    /** \brief 服务端 usage 计数，原样透传 */
    usage: Value,
    /** \brief 响应生成时间（RFC 3339） */
    timestamp: String,
}

fn build_metadata(model: &str, usage: Value) -> Result<Metadata, ApiError> {
    let timestamp = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .map_err(server_err)?;
    Ok(Metadata {
        model: model.to_string(),
        usage,
        timestamp,
    })
}

// 凭证缺失属于配置错误：立即失败，不发起任何外部调用。
fn require_settings(category: &str) -> Result<ProviderSettings, ApiError> {
    let settings = ProviderSettings::from_env();
    if !settings.has_key() {
        telemetry::log_error(category, "rejected request: api key not configured");
        return Err(server_err(
            "completion provider API key is not configured",
        ));
    }
    Ok(settings)
}

#[derive(Serialize, Debug)]
struct EnvStatus {
    #[serde(rename = "apiKeySet")]
    api_key_set: bool,
}

#[derive(Serialize, Debug)]
struct HealthResponse {
    status: String,
    env: EnvStatus,
}

/**
 * \brief 健康检查：无副作用，客户端用它决定是否允许发送。
 */
async fn health_check() -> Json<HealthResponse> {
    let settings = ProviderSettings::from_env();
    Json(HealthResponse {
        status: "ok".to_string(),
        env: EnvStatus {
            api_key_set: settings.has_key(),
        },
    })
}

#[derive(Deserialize, Debug)]
struct ChatRequest {
    /** \brief 按时间顺序排列的消息序列 */
    messages: Vec<Message>,
}

#[derive(Serialize, Debug)]
struct ChatResponse {
    message: String,
    metadata: Metadata,
}

/**
 * \brief 通用聊天端点：POST /api/chat
 */
async fn chat(Json(req): Json<ChatRequest>) -> Result<Json<ChatResponse>, ApiError> {
    relay_chat(&prompts::CHAT, req).await
}

/**
 * \brief 进阶聊天端点：POST /api/chat/advanced
 */
async fn chat_advanced(Json(req): Json<ChatRequest>) -> Result<Json<ChatResponse>, ApiError> {
    relay_chat(&prompts::ADVANCED_CHAT, req).await
}

async fn relay_chat(
    profile: &prompts::ToolProfile,
    req: ChatRequest,
) -> Result<Json<ChatResponse>, ApiError> {
    if req.messages.is_empty() {
        return Err(server_err("messages must not be empty"));
    }
    let settings = require_settings("server.chat")?;

    let completion = llm::complete(&settings, profile, &req.messages)
        .await
        .map_err(|e| {
            telemetry::log_error("server.chat", &format!("completion failed: {}", e));
            server_err(e)
        })?;

    telemetry::log_event(
        "server.chat",
        &format!("model={} msgs={}", profile.model, req.messages.len()),
    );

    let metadata = build_metadata(profile.model, completion.usage)?;
    Ok(Json(ChatResponse {
        message: completion.content,
        metadata,
    }))
}

#[derive(Deserialize, Debug)]
struct CommentaryRequest {
    book: String,
    chapter: u32,
}

#[derive(Serialize, Debug)]
struct CommentaryResponse {
    commentary: String,
    book: String,
    chapter: u32,
    #[serde(rename = "keyVerses")]
    key_verses: Vec<String>,
    sections: Vec<Section>,
    metadata: Metadata,
}

/**
 * \brief 章节注释端点：POST /api/tools/bible-commentary
 */
async fn bible_commentary(
    Json(req): Json<CommentaryRequest>,
) -> Result<Json<CommentaryResponse>, ApiError> {
    let book = req.book.trim().to_string();
    if book.is_empty() {
        return Err(server_err("book must not be empty"));
    }
    if req.chapter == 0 {
        return Err(server_err("chapter must be at least 1"));
    }
    let settings = require_settings("server.tool")?;

    let messages = vec![Message::user(prompts::commentary_user_prompt(
        &book,
        req.chapter,
    ))];
    let completion = llm::complete(&settings, &prompts::COMMENTARY, &messages)
        .await
        .map_err(|e| {
            telemetry::log_error("server.tool", &format!("commentary failed: {}", e));
            server_err(e)
        })?;

    telemetry::log_event(
        "server.tool",
        &format!("commentary book={} chapter={}", book, req.chapter),
    );

    let sections = extract::sections(&completion.content);
    let key_verses = extract::chapter_verse_refs(&completion.content);
    let metadata = build_metadata(prompts::COMMENTARY.model, completion.usage)?;
    Ok(Json(CommentaryResponse {
        commentary: completion.content,
        book,
        chapter: req.chapter,
        key_verses,
        sections,
        metadata,
    }))
}

#[derive(Deserialize, Debug)]
struct VerseRequest {
    verse: String,
}

#[derive(Serialize, Debug)]
struct VerseResponse {
    analysis: String,
    verse: String,
    #[serde(rename = "relatedVerses")]
    related_verses: Vec<String>,
    sections: Vec<Section>,
    metadata: Metadata,
}

/**
 * \brief 经文分析端点：POST /api/tools/verse-analyzer
 */
async fn verse_analyzer(
    Json(req): Json<VerseRequest>,
) -> Result<Json<VerseResponse>, ApiError> {
    let verse = req.verse.trim().to_string();
    if verse.is_empty() {
        return Err(server_err("verse must not be empty"));
    }
    let settings = require_settings("server.tool")?;

    let messages = vec![Message::user(prompts::verse_user_prompt(&verse))];
    let completion = llm::complete(&settings, &prompts::VERSE_ANALYSIS, &messages)
        .await
        .map_err(|e| {
            telemetry::log_error("server.tool", &format!("verse analysis failed: {}", e));
            server_err(e)
        })?;

    telemetry::log_event("server.tool", &format!("analyze verse={}", verse));

    let sections = extract::sections(&completion.content);
    let related_verses = extract::verse_refs(&completion.content);
    let metadata = build_metadata(prompts::VERSE_ANALYSIS.model, completion.usage)?;
    Ok(Json(VerseResponse {
        analysis: completion.content,
        verse,
        related_verses,
        sections,
        metadata,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_reports_key_presence_without_side_effects() {
        let Json(resp) = health_check().await;
        assert_eq!(resp.status, "ok");
        let v = serde_json::to_value(&resp).expect("serialize health");
        assert!(v["env"]["apiKeySet"].is_boolean());
    }

    #[tokio::test]
    async fn test_chat_rejects_empty_message_list_with_envelope() {
        let (status, Json(body)) = chat(Json(ChatRequest { messages: vec![] }))
            .await
            .err()
            .expect("empty messages must fail");
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body.error);
        assert!(!body.message.is_empty());
    }

    #[tokio::test]
    async fn test_commentary_rejects_blank_book() {
        let req = CommentaryRequest {
            book: "   ".to_string(),
            chapter: 1,
        };
        let (status, Json(body)) = bible_commentary(Json(req))
            .await
            .err()
            .expect("blank book must fail");
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body.error);
    }

    #[tokio::test]
    async fn test_verse_analyzer_rejects_blank_verse() {
        let req = VerseRequest {
            verse: String::new(),
        };
        let result = verse_analyzer(Json(req)).await;
        let (_, Json(body)) = result.err().expect("blank verse must fail");
        assert!(body.error);
    }

    #[test]
    fn test_error_body_wire_shape() {
        let v = serde_json::to_value(server_err("boom").1 .0).expect("serialize");
        assert_eq!(v["message"], "boom");
        assert_eq!(v["error"], true);
    }

    #[test]
    fn test_metadata_reports_fixed_model_id() {
        let metadata =
            build_metadata(prompts::CHAT.model, Value::Null).expect("build metadata");
        assert_eq!(metadata.model, prompts::CHAT.model);
        let v = serde_json::to_value(&metadata).expect("serialize");
        assert!(v["timestamp"].as_str().expect("timestamp").contains('T'));
    }
}
