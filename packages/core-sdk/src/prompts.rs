/**
 * \brief 各工具固定的模型参数与系统提示词。
 * \details 每个端点对应一个固定 Profile：模型 ID、输出上限、采样温度、系统提示词。
 */
#[derive(Debug, Clone, Copy)]
pub struct ToolProfile {
    /** \brief 模型 ID，响应 metadata 中原样返回 */
    pub model: &'static str,
    /** \brief 最大输出 token 数 */
    pub max_tokens: u32,
    /** \brief 采样温度 */
    pub temperature: f32,
    /** \brief 系统提示词 */
    pub system_prompt: &'static str,
}

/** \brief 通用聊天工具。 */
pub const CHAT: ToolProfile = ToolProfile {
    model: "gpt-4o-mini",
    max_tokens: 1024,
    temperature: 0.7,
    system_prompt: "You are a knowledgeable and friendly Bible study assistant. \
Answer questions about Scripture, theology, biblical history, and Christian living. \
Respond in markdown. When you cite Scripture, always give the full reference \
(book, chapter and verse, e.g. John 3:16). Be warm, accurate, and concise.",
};

/** \brief 进阶聊天工具，使用更强的模型与更长的输出。 */
pub const ADVANCED_CHAT: ToolProfile = ToolProfile {
    model: "gpt-4o",
    max_tokens: 2048,
    temperature: 0.7,
    system_prompt: "You are an advanced Bible study assistant with deep knowledge of \
biblical languages, historical context, hermeneutics, and systematic theology. \
Give thorough, well-structured answers in markdown, using `##` headings for major \
topics and `###` headings for sub-topics. Cite Scripture with full references \
(book, chapter and verse) and note significant Hebrew or Greek terms where relevant.",
};

/** \brief 章节注释工具，要求固定的小节结构。 */
pub const COMMENTARY: ToolProfile = ToolProfile {
    model: "gpt-4o",
    max_tokens: 2000,
    temperature: 0.7,
    system_prompt: "You are a biblical scholar writing a chapter commentary. \
Produce a markdown commentary with exactly these `##` sections, in this order: \
## Historical Context, ## Key Themes, ## Verse-by-Verse Analysis, \
## Theological Significance, ## Practical Applications. \
Inside Verse-by-Verse Analysis, introduce each passage with a `###` heading that \
names the verse range (e.g. `### Genesis 1:1-5`). Cite verses as chapter:verse.",
};

/** \brief 单节经文分析工具。 */
pub const VERSE_ANALYSIS: ToolProfile = ToolProfile {
    model: "gpt-4o",
    max_tokens: 1500,
    temperature: 0.7,
    system_prompt: "You are a biblical scholar analyzing a single verse. \
Produce a markdown analysis with exactly these `##` sections, in this order: \
## Immediate Context, ## Word Study, ## Cross References, \
## Theological Meaning, ## Practical Application. \
In Cross References, cite related passages with full references \
(book, chapter and verse, e.g. Romans 8:28 or 1 Corinthians 13:4-7).",
};

/**
 * \brief 构造章节注释的用户请求文本。
 */
pub fn commentary_user_prompt(book: &str, chapter: u32) -> String {
    format!(
        "Write a commentary on {} chapter {}. Follow the required section structure.",
        book, chapter
    )
}

/**
 * \brief 构造经文分析的用户请求文本。
 */
pub fn verse_user_prompt(verse: &str) -> String {
    format!(
        "Analyze the verse \"{}\". Follow the required section structure.",
        verse
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commentary_prompt_mandates_fixed_sections() {
        for heading in [
            "## Historical Context",
            "## Key Themes",
            "## Verse-by-Verse Analysis",
            "## Theological Significance",
            "## Practical Applications",
        ] {
            assert!(
                COMMENTARY.system_prompt.contains(heading),
                "missing heading: {}",
                heading
            );
        }
    }

    #[test]
    fn test_profiles_use_distinct_models_for_chat_tiers() {
        assert_ne!(CHAT.model, ADVANCED_CHAT.model);
    }

    #[test]
    fn test_user_prompts_carry_subject() {
        assert!(commentary_user_prompt("Genesis", 1).contains("Genesis chapter 1"));
        assert!(verse_user_prompt("John 3:16").contains("John 3:16"));
    }
}
