//! `GO` batch separator handling.
//!
//! `GO` is a client-side convention, not T-SQL: the server must receive
//! each batch separately.

use once_cell::sync::Lazy;
use regex::Regex;

/// A line holding only `GO`, an optional repeat count, and an optional comment.
static GO_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^\s*GO(?:\s+\d+)?\s*(?:--.*)?$").unwrap());

/// Split script text into non-empty batches.
pub fn split_batches(content: &str) -> Vec<String> {
    let mut batches = Vec::new();
    let mut current = String::new();

    for line in content.lines() {
        if GO_LINE.is_match(line) {
            push_batch(&mut batches, &mut current);
        } else {
            current.push_str(line);
            current.push('\n');
        }
    }
    push_batch(&mut batches, &mut current);

    batches
}

fn push_batch(batches: &mut Vec<String>, current: &mut String) {
    if has_executable_text(current) {
        batches.push(current.trim_end().to_string());
    }
    current.clear();
}

/// Whether the text contains anything besides blank lines, `--` comments,
/// `/* */` comments and `GO` separators.
pub fn has_executable_text(content: &str) -> bool {
    let mut in_block_comment = false;
    for line in content.lines() {
        let mut rest = line.trim();
        loop {
            if in_block_comment {
                match rest.find("*/") {
                    Some(end) => {
                        in_block_comment = false;
                        rest = rest[end + 2..].trim_start();
                    }
                    None => break,
                }
            } else if let Some(after) = rest.strip_prefix("/*") {
                in_block_comment = true;
                rest = after;
            } else {
                if !rest.is_empty() && !rest.starts_with("--") && !GO_LINE.is_match(rest) {
                    return true;
                }
                break;
            }
        }
    }
    false
}
