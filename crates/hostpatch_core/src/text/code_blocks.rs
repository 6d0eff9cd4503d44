//! Fenced code-block extraction from chat message markdown.
//!
//! # Invariants
//! - Blocks are returned in source order.
//! - An info string is reported only when it directly follows the opening
//!   fence and is followed by a newline.
//! - Unterminated fences are ignored.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

static FENCED_BLOCK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```(?:([^\s`]*)[ \t]*\r?\n)?(.*?)```").expect("valid fenced block regex")
});

/// One fenced block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CodeBlock {
    pub language: Option<String>,
    pub content: String,
}

/// Extracts every terminated fenced block from `text`.
pub fn extract_code_blocks(text: &str) -> Vec<CodeBlock> {
    FENCED_BLOCK_RE
        .captures_iter(text)
        .map(|captures| {
            let language = captures
                .get(1)
                .map(|m| m.as_str().trim())
                .filter(|lang| !lang.is_empty())
                .map(str::to_string);
            let content = captures
                .get(2)
                .map_or("", |m| m.as_str())
                .trim_end_matches(['\r', '\n'])
                .to_string();
            CodeBlock { language, content }
        })
        .collect()
}

/// Content of the first fenced block, as copied by a "copy code" action.
pub fn first_code_block(text: &str) -> Option<CodeBlock> {
    extract_code_blocks(text).into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::{extract_code_blocks, first_code_block, CodeBlock};

    #[test]
    fn extracts_language_and_content() {
        let blocks = extract_code_blocks("look:\n```rust\nfn main() {}\n```\nthanks");
        assert_eq!(
            blocks,
            vec![CodeBlock {
                language: Some("rust".to_string()),
                content: "fn main() {}".to_string(),
            }]
        );
    }

    #[test]
    fn inline_fence_has_no_language() {
        let block = first_code_block("```npm i```").expect("block");
        assert_eq!(block.language, None);
        assert_eq!(block.content, "npm i");
    }

    #[test]
    fn keeps_source_order_and_skips_unterminated() {
        let text = "```\na\n```\n```py\nb\n```\n```js\nnever closed";
        let blocks = extract_code_blocks(text);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].content, "a");
        assert_eq!(blocks[1].language.as_deref(), Some("py"));
    }

    #[test]
    fn plain_text_has_no_blocks() {
        assert!(first_code_block("no code here").is_none());
    }
}
