use anyhow::{bail, Result};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::{thread, time::Duration};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use crate::models::Message;

/**
 * \brief 会话记录摘要。
 */
#[derive(Debug, Clone)]
pub struct ConversationSummary {
    /** \brief 自增主键。 */
    pub id: i64,
    /** \brief 归属用户标识（调用方提供的字符串）。 */
    pub owner_id: String,
    /** \brief 会话标题。 */
    pub title: String,
    /** \brief 会话使用的模型 ID。 */
    pub model: String,
    /** \brief 创建时间（RFC 3339）。 */
    pub created_at: String,
    /** \brief 最近追加时间（RFC 3339）。 */
    pub updated_at: String,
}

/**
 * \brief 带主键与时间戳的消息结构。
 */
#[derive(Debug, Clone)]
pub struct StoredMessage {
    /** \brief 消息行主键。 */
    pub id: i64,
    /** \brief 消息角色。 */
    pub role: String,
    /** \brief 消息正文。 */
    pub content: String,
    /** \brief 写入时间（RFC 3339）。 */
    pub created_at: String,
}

/**
 * \brief 打开默认数据库文件（本地目录下的 berea.db）。
 */
pub fn open_default_db() -> Result<Connection> {
    let conn = Connection::open("berea.db")?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(conn)
}

/**
 * \brief 运行数据库迁移，创建必要表结构。
 */
pub fn migrate(conn: &Connection) -> Result<()> {
    retry_on_locked(|| {
        conn.execute_batch(
            r#"
        PRAGMA journal_mode=WAL;
        CREATE TABLE IF NOT EXISTS conversations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            owner_id TEXT NOT NULL,
            title TEXT NOT NULL,
            model TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS conversation_messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            conversation_id INTEGER NOT NULL REFERENCES conversations(id),
            role TEXT NOT NULL,
            content TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
        "#,
        )
    })?;
    Ok(())
}

fn now_rfc3339() -> Result<String> {
    Ok(OffsetDateTime::now_utc().format(&Rfc3339)?)
}

/**
 * \brief 创建会话记录。
 */
pub fn create_conversation(
    conn: &Connection,
    owner_id: &str,
    title: &str,
    model: &str,
) -> Result<i64> {
    let now = now_rfc3339()?;
    retry_on_locked(|| {
        conn.execute(
            "INSERT INTO conversations (owner_id, title, model, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![owner_id, title, model, now],
        )
    })?;
    Ok(conn.last_insert_rowid())
}

/**
 * \brief 向会话追加一条消息，并刷新会话的 updated_at。
 * \details 会话记录只追加不删除；删除属于外部协作方的职责。
 */
pub fn append_message(
    conn: &Connection,
    conversation_id: i64,
    role: &str,
    content: &str,
) -> Result<i64> {
    let now = now_rfc3339()?;
    let rows = retry_on_locked(|| {
        conn.execute(
            "UPDATE conversations SET updated_at=?1 WHERE id=?2",
            params![now, conversation_id],
        )
    })?;
    if rows == 0 {
        bail!("conversation id {} not found", conversation_id);
    }
    retry_on_locked(|| {
        conn.execute(
            "INSERT INTO conversation_messages (conversation_id, role, content, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![conversation_id, role, content, now],
        )
    })?;
    Ok(conn.last_insert_rowid())
}

/**
 * \brief 按写入顺序读取指定会话的全部消息。
 */
pub fn load_messages(conn: &Connection, conversation_id: i64) -> Result<Vec<Message>> {
    let mut stmt = conn.prepare(
        "SELECT role, content FROM conversation_messages WHERE conversation_id=?1 ORDER BY id ASC",
    )?;
    let rows = stmt
        .query_map(params![conversation_id], |row| {
            Ok(Message {
                role: row.get(0)?,
                content: row.get(1)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/**
 * \brief 读取带主键与时间戳的消息数组，用于展示。
 */
pub fn load_messages_with_meta(
    conn: &Connection,
    conversation_id: i64,
) -> Result<Vec<StoredMessage>> {
    let mut stmt = conn.prepare(
        "SELECT id, role, content, created_at FROM conversation_messages
         WHERE conversation_id=?1 ORDER BY id ASC",
    )?;
    let rows = stmt
        .query_map(params![conversation_id], |row| {
            Ok(StoredMessage {
                id: row.get(0)?,
                role: row.get(1)?,
                content: row.get(2)?,
                created_at: row.get(3)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/**
 * \brief 按 ID 获取会话摘要。
 */
pub fn get_conversation(conn: &Connection, id: i64) -> Result<Option<ConversationSummary>> {
    conn.query_row(
        "SELECT id, owner_id, title, model, created_at, updated_at
         FROM conversations WHERE id=?1",
        params![id],
        map_summary,
    )
    .optional()
    .map_err(Into::into)
}

/**
 * \brief 列出指定用户的会话，最近更新的在前。
 */
pub fn list_conversations(conn: &Connection, owner_id: &str) -> Result<Vec<ConversationSummary>> {
    let mut stmt = conn.prepare(
        "SELECT id, owner_id, title, model, created_at, updated_at
         FROM conversations WHERE owner_id=?1 ORDER BY updated_at DESC, id DESC",
    )?;
    let rows = stmt
        .query_map(params![owner_id], map_summary)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/**
 * \brief 更新会话标题。
 */
pub fn rename_conversation(conn: &Connection, id: i64, title: &str) -> Result<()> {
    let rows = retry_on_locked(|| {
        conn.execute(
            "UPDATE conversations SET title=?1 WHERE id=?2",
            params![title, id],
        )
    })?;
    if rows == 0 {
        bail!("conversation id {} not found", id);
    }
    Ok(())
}

fn map_summary(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationSummary> {
    Ok(ConversationSummary {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        title: row.get(2)?,
        model: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

/**
 * \brief 针对 SQLite 锁冲突的重试助手。
 * \details 捕获 `database is locked`/`database table is locked` 等错误并进行退避，最大尝试 6 次。
 */
fn retry_on_locked<T, F>(mut action: F) -> Result<T>
where
    F: FnMut() -> rusqlite::Result<T>,
{
    const MAX_RETRIES: usize = 5;
    for attempt in 0..=MAX_RETRIES {
        match action() {
            Ok(value) => return Ok(value),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if matches!(
                    err.code,
                    ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
                ) && attempt < MAX_RETRIES =>
            {
                let backoff = Duration::from_millis(200 * (attempt as u64 + 1));
                thread::sleep(backoff);
                continue;
            }
            Err(e) => return Err(e.into()),
        }
    }
    unreachable!("retry_on_locked should have returned within the loop");
}
