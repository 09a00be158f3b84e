use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;

use berea_core_sdk::{db, server, session::StudySession, telemetry};

const DEFAULT_SERVER: &str = "http://127.0.0.1:5173";

/**
 * \brief CLI 程序入口：本地服务与命令行客户端。
 */
#[derive(Parser, Debug)]
#[command(name = "berea", version, about = "Berea Bible study assistant")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /**
     * \brief 启动本地 HTTP 服务并提供前端页面。
     */
    Serve {
        #[arg(long, default_value = "127.0.0.1:5173")]
        addr: String,
    },

    /**
     * \brief 发送一条聊天消息并打印助手回复。
     * \param owner 给定时，本回合会持久化到该用户名下的会话记录。
     */
    Chat {
        #[arg(long)]
        prompt: String,
        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,
        #[arg(long, default_value_t = false)]
        advanced: bool,
        #[arg(long)]
        owner: Option<String>,
    },

    /**
     * \brief 生成一章经文的注释并打印小节与关键经文。
     */
    Commentary {
        #[arg(long)]
        book: String,
        #[arg(long)]
        chapter: u32,
        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,
    },

    /**
     * \brief 分析单节经文并打印相关引用。
     */
    Analyze {
        #[arg(long)]
        verse: String,
        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,
    },

    /**
     * \brief 列出指定用户已持久化的会话记录。
     */
    Conversations {
        #[arg(long)]
        owner: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { addr } => {
            server::run(&addr).await?;
        }
        Commands::Chat {
            prompt,
            server,
            advanced,
            owner,
        } => {
            let mut session = StudySession::new(server);
            if advanced {
                session = session.advanced();
            }
            if let Some(owner) = owner {
                let conn = db::open_default_db().context("open database failed")?;
                db::migrate(&conn).context("apply migrations failed")?;
                session = session.with_store(conn, owner);
            }

            telemetry::log_event("cli.chat", &format!("prompt_len={}", prompt.len()));
            match session.send(&prompt).await {
                Ok(reply) => {
                    println!("{}", reply);
                    if let Some(id) = session.conversation_id() {
                        println!("(saved to conversation {})", id);
                    }
                }
                Err(_) => {
                    let message = session
                        .last_error
                        .unwrap_or_else(|| "send failed".to_string());
                    return Err(anyhow!(message));
                }
            }
        }
        Commands::Commentary {
            book,
            chapter,
            server,
        } => {
            let body = post_tool(
                &server,
                "/api/tools/bible-commentary",
                serde_json::json!({ "book": book, "chapter": chapter }),
            )
            .await?;
            print_text(&body, "commentary");
            print_sections(&body);
            print_list(&body, "keyVerses", "Key verses");
        }
        Commands::Analyze { verse, server } => {
            let body = post_tool(
                &server,
                "/api/tools/verse-analyzer",
                serde_json::json!({ "verse": verse }),
            )
            .await?;
            print_text(&body, "analysis");
            print_sections(&body);
            print_list(&body, "relatedVerses", "Related verses");
        }
        Commands::Conversations { owner } => {
            let conn = db::open_default_db().context("open database failed")?;
            db::migrate(&conn).context("apply migrations failed")?;
            let records =
                db::list_conversations(&conn, &owner).context("list conversations failed")?;
            if records.is_empty() {
                println!("No conversations for {}", owner);
            }
            for record in records {
                println!(
                    "{}  {}  [{}]  updated {}",
                    record.id, record.title, record.model, record.updated_at
                );
            }
        }
    }

    Ok(())
}

async fn post_tool(server: &str, path: &str, body: Value) -> Result<Value> {
    let url = format!("{}{}", server.trim_end_matches('/'), path);
    let resp = reqwest::Client::new()
        .post(url)
        .json(&body)
        .send()
        .await
        .context("request failed")?;

    let status = resp.status();
    let value: Value = resp.json().await.context("decode response failed")?;
    if !status.is_success() {
        let message = value
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("server error");
        return Err(anyhow!("{}", message));
    }
    Ok(value)
}

fn print_text(body: &Value, field: &str) {
    if let Some(text) = body.get(field).and_then(|v| v.as_str()) {
        println!("{}", text);
    }
}

fn print_sections(body: &Value) {
    let Some(sections) = body.get("sections").and_then(|v| v.as_array()) else {
        return;
    };
    if sections.is_empty() {
        return;
    }
    println!("\nSections:");
    for section in sections {
        let title = section.get("title").and_then(|t| t.as_str()).unwrap_or("");
        let level = section.get("level").and_then(|l| l.as_u64()).unwrap_or(2);
        let indent = if level == 3 { "  - " } else { "- " };
        println!("{}{}", indent, title);
    }
}

fn print_list(body: &Value, field: &str, label: &str) {
    let Some(items) = body.get(field).and_then(|v| v.as_array()) else {
        return;
    };
    if items.is_empty() {
        return;
    }
    println!("\n{}:", label);
    for item in items {
        if let Some(s) = item.as_str() {
            println!("- {}", s);
        }
    }
}
