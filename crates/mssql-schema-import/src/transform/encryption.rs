//! Always Encrypted removal.
//!
//! Column master keys and column encryption keys reference key stores that
//! only exist on the source; columns are imported as plaintext.

use once_cell::sync::Lazy;
use regex::Regex;

static ENCRYPTED_WITH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bENCRYPTED\s+WITH\s*\(").unwrap());

static COLUMN_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bCREATE\s+COLUMN\s+(?:MASTER|ENCRYPTION)\s+KEY\b").unwrap());

/// Whether a script creates a column master key or column encryption key.
pub fn creates_column_key(content: &str) -> bool {
    COLUMN_KEY.is_match(content)
}

/// Remove every `ENCRYPTED WITH (...)` clause, including the whitespace
/// before it. Unbalanced clauses are left as-is.
pub fn strip(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    let mut cursor = 0;

    for m in ENCRYPTED_WITH.find_iter(content) {
        if m.start() < cursor {
            continue;
        }
        let open = m.end() - 1;
        let Some(close) = matching_paren(content, open) else {
            continue;
        };
        let start = cursor + content[cursor..m.start()].trim_end().len();
        out.push_str(&content[cursor..start]);
        cursor = close + 1;
    }

    out.push_str(&content[cursor..]);
    out
}

/// Byte offset of the `)` closing the `(` at `open`, skipping string
/// literals and bracketed identifiers.
fn matching_paren(content: &str, open: usize) -> Option<usize> {
    let bytes = content.as_bytes();
    let mut depth = 0usize;
    let mut i = open;

    while i < bytes.len() {
        match bytes[i] {
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            b'\'' => i = skip_until(bytes, i, b'\'')?,
            b'[' => i = skip_until(bytes, i, b']')?,
            _ => {}
        }
        i += 1;
    }
    None
}

/// Index of the delimiter ending a quoted run starting at `start`; a doubled
/// delimiter is an escape.
fn skip_until(bytes: &[u8], start: usize, delimiter: u8) -> Option<usize> {
    let mut i = start + 1;
    while i < bytes.len() {
        if bytes[i] == delimiter {
            if bytes.get(i + 1) == Some(&delimiter) {
                i += 2;
                continue;
            }
            return Some(i);
        }
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_line_clause_removed() {
        let script = "CREATE TABLE [dbo].[Patients](\n\t[Id] [int] NOT NULL,\n\t[SSN] [char](11) COLLATE Latin1_General_BIN2 ENCRYPTED WITH (COLUMN_ENCRYPTION_KEY = [CEK_Auto1], ENCRYPTION_TYPE = Deterministic, ALGORITHM = 'AEAD_AES_256_CBC_HMAC_SHA_256') NOT NULL,\n\t[Name] [nvarchar](50) NULL\n)";
        let out = strip(script);
        assert!(out.contains("[SSN] [char](11) COLLATE Latin1_General_BIN2 NOT NULL,\n"));
        assert!(!out.contains("ENCRYPTED"));
        assert!(out.contains("[Name] [nvarchar](50) NULL"));
    }

    #[test]
    fn test_multi_line_clause_leaves_no_dangling_comma() {
        let script = "CREATE TABLE t (\n\t[Salary] [money]\n\t\tENCRYPTED WITH (\n\t\t\tCOLUMN_ENCRYPTION_KEY = [CEK_1],\n\t\t\tENCRYPTION_TYPE = Randomized,\n\t\t\tALGORITHM = 'AEAD_AES_256_CBC_HMAC_SHA_256'\n\t\t),\n\t[Dept] [int] NULL\n)";
        let out = strip(script);
        assert_eq!(out, "CREATE TABLE t (\n\t[Salary] [money],\n\t[Dept] [int] NULL\n)");
    }

    #[test]
    fn test_parens_inside_literals_and_identifiers() {
        let script = "[a] int ENCRYPTED WITH (COLUMN_ENCRYPTION_KEY = [key)1], ALGORITHM = 'x)''y') NULL";
        assert_eq!(strip(script), "[a] int NULL");
    }

    #[test]
    fn test_unbalanced_clause_left_alone() {
        let script = "[a] int ENCRYPTED WITH (COLUMN_ENCRYPTION_KEY = [k]";
        assert_eq!(strip(script), script);
    }

    #[test]
    fn test_strip_is_idempotent() {
        let script = "[a] int ENCRYPTED WITH (ENCRYPTION_TYPE = Deterministic) NULL";
        let once = strip(script);
        assert_eq!(strip(&once), once);
    }

    #[test]
    fn test_detects_column_keys() {
        assert!(creates_column_key("CREATE COLUMN MASTER KEY [CMK_Auto1]\nWITH (KEY_STORE_PROVIDER_NAME = N'MSSQL_CERTIFICATE_STORE')"));
        assert!(creates_column_key("create column encryption key [CEK_Auto1] with values (...)"));
        assert!(!creates_column_key("CREATE MASTER KEY ENCRYPTION BY PASSWORD = 'x'"));
    }
}
