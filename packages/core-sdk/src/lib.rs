pub mod db;
pub mod extract;
pub mod llm;
pub mod models;
pub mod prompts;
pub mod server;
pub mod session;
pub mod telemetry;

/**
 * \brief SDK 预导入集合，方便外部引用常用模块。
 */
pub mod prelude {
    pub use crate::db;
    pub use crate::extract;
    pub use crate::llm;
    pub use crate::models;
    pub use crate::prompts;
    pub use crate::server;
    pub use crate::session;
    pub use crate::telemetry;
}
