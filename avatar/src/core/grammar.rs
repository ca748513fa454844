//! The block grammar the completion service must answer in.
//!
//! ```text
//! FILE: <relative/path>
//! CONTENT:
//! <arbitrary file content>
//! END_FILE
//! ```
//!
//! Blocks repeat zero or more times. Matching is non-greedy per block and any
//! prose between blocks is discarded.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::GeneratedFile;

static BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)FILE:[ \t]*([^\r\n]*?)[ \t]*\r?\n?\s*CONTENT:[ \t]*(.*?)\s*END_FILE")
        .expect("file block pattern is valid")
});

/// Extract every `(path, content)` pair from a completion response.
///
/// Blocks with an empty path are dropped.
pub fn parse_blocks(text: &str) -> Vec<GeneratedFile> {
    BLOCK
        .captures_iter(text)
        .filter_map(|caps| {
            let path = caps.get(1)?.as_str().trim();
            if path.is_empty() {
                return None;
            }
            let raw = caps.get(2).map_or("", |m| m.as_str());
            let content = strip_code_fence(raw.trim_start_matches(['\r', '\n']).trim_end());
            Some(GeneratedFile::new(path, content))
        })
        .collect()
}

/// Render files back into the block grammar.
pub fn render_blocks(files: &[GeneratedFile]) -> String {
    let mut buf = String::new();
    for file in files {
        buf.push_str("FILE: ");
        buf.push_str(&file.path);
        buf.push_str("\nCONTENT:\n");
        buf.push_str(&file.content);
        buf.push_str("\nEND_FILE\n");
    }
    buf
}

/// Models often wrap the body in a markdown fence; keep only what is inside.
fn strip_code_fence(content: &str) -> String {
    let Some(rest) = content.strip_prefix("```") else {
        return content.to_string();
    };
    let Some((_lang, body)) = rest.split_once('\n') else {
        return content.to_string();
    };
    match body.trim_end().strip_suffix("```") {
        Some(inner) => inner.trim_end_matches(['\r', '\n']).to_string(),
        None => content.to_string(),
    }
}
