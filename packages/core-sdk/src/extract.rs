use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::Section;

static CHAPTER_VERSE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b\d{1,3}:\d{1,3}(?:-\d{1,3})?\b").expect("chapter:verse pattern")
});

// 书卷名按单个大写开头单词匹配（可带 1-3 的卷号前缀）。多词书卷名
// （如 Song of Solomon）不在覆盖范围内，提取本身就是尽力而为。
static FULL_REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:[1-3]\s)?[A-Z][a-z]+\s\d{1,3}:\d{1,3}(?:-\d{1,3})?\b")
        .expect("full reference pattern")
});

/**
 * \brief 逐行扫描 markdown，提取 `## `/`### ` 小节标题。
 * \details 保留出现顺序与重复项；小节是按位置排列的，不做去重。
 */
pub fn sections(text: &str) -> Vec<Section> {
    let mut out = Vec::new();
    for line in text.lines() {
        if let Some(title) = line.strip_prefix("### ") {
            out.push(Section {
                title: title.trim().to_string(),
                level: 3,
            });
        } else if let Some(title) = line.strip_prefix("## ") {
            out.push(Section {
                title: title.trim().to_string(),
                level: 2,
            });
        }
    }
    out
}

/**
 * \brief 将小节列表还原为标题行文本。
 */
pub fn sections_to_text(sections: &[Section]) -> String {
    sections
        .iter()
        .map(|s| match s.level {
            3 => format!("### {}", s.title),
            _ => format!("## {}", s.title),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/**
 * \brief 提取 `章:节[-节]` 形式的经文引用，如 "1:1-5"。
 * \details 按出现顺序收集，再按首次出现去重。
 */
pub fn chapter_verse_refs(text: &str) -> Vec<String> {
    dedupe_preserving_order(
        CHAPTER_VERSE
            .find_iter(text)
            .map(|m| m.as_str().to_string()),
    )
}

/**
 * \brief 提取带书卷名的完整经文引用，如 "John 3:16"、"1 Corinthians 13:4-7"。
 */
pub fn verse_refs(text: &str) -> Vec<String> {
    dedupe_preserving_order(
        FULL_REFERENCE
            .find_iter(text)
            .map(|m| m.as_str().to_string()),
    )
}

fn dedupe_preserving_order(items: impl Iterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sections_levels_and_order() {
        let text = "intro\n## Historical Context\nbody\n### Genesis 1:1-5\n## Key Themes\n";
        let got = sections(text);
        assert_eq!(got.len(), 3);
        assert_eq!(got[0].title, "Historical Context");
        assert_eq!(got[0].level, 2);
        assert_eq!(got[1].title, "Genesis 1:1-5");
        assert_eq!(got[1].level, 3);
        assert_eq!(got[2].title, "Key Themes");
        assert_eq!(got[2].level, 2);
    }

    #[test]
    fn test_sections_keep_duplicates() {
        let text = "## Key Themes\n## Key Themes\n";
        let got = sections(text);
        assert_eq!(got.len(), 2);
        assert_eq!(got[0], got[1]);
    }

    #[test]
    fn test_sections_ignore_other_heading_levels() {
        let text = "# Title\n#### Deep\n##NoSpace\n";
        assert!(sections(text).is_empty());
    }

    #[test]
    fn test_sections_idempotent_over_own_output() {
        let text = "## Historical Context\n### Genesis 1:1-5\n### Genesis 1:6-13\n## Key Themes";
        let first = sections(text);
        let second = sections(&sections_to_text(&first));
        assert_eq!(first, second);
    }

    #[test]
    fn test_chapter_verse_captures_range_verbatim() {
        let text = "## Historical Context\n### Genesis 1:1-5\n";
        let secs = sections(text);
        let refs = chapter_verse_refs(text);
        assert_eq!(
            secs.iter().filter(|s| s.level == 2).count(),
            1,
            "one level-2 section"
        );
        assert!(refs.contains(&"1:1-5".to_string()));
    }

    #[test]
    fn test_chapter_verse_dedupe_first_seen_order() {
        let text = "See 1:1 and 2:3, then 1:1 again, and finally 1:2.";
        assert_eq!(chapter_verse_refs(text), vec!["1:1", "2:3", "1:2"]);
    }

    #[test]
    fn test_verse_refs_with_book_numbers() {
        let text = "Compare John 3:16 with 1 Corinthians 13:4-7 and John 3:16.";
        assert_eq!(
            verse_refs(text),
            vec!["John 3:16", "1 Corinthians 13:4-7"]
        );
    }

    #[test]
    fn test_verse_refs_empty_input() {
        assert!(verse_refs("no references here").is_empty());
        assert!(chapter_verse_refs("").is_empty());
    }
}
