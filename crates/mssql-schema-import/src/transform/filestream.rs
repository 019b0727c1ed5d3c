//! FILESTREAM removal for targets without FILESTREAM support.

use crate::catalog::{ObjectType, ScriptUnit};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::HashSet;

static FILESTREAM_ON: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(?:\s*,)?\s*\bFILESTREAM_ON\s*(?:\[[^\]]*\]|"[^"]*"|DEFAULT\b)"#).unwrap()
});

static FILESTREAM_COLUMN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\bvarbinary\]?\s*\(\s*max\s*\))\s+FILESTREAM\b").unwrap()
});

static FILESTREAM_FILEGROUP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)ADD\s+FILEGROUP\s+\[([^\]]+)\]\s+CONTAINS\s+FILESTREAM\b").unwrap()
});

static ADD_FILESTREAM_FILEGROUP_STATEMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)ALTER\s+DATABASE\s+(?:\[[^\]]*\]|\w+)\s+ADD\s+FILEGROUP\s+\[[^\]]+\]\s+CONTAINS\s+FILESTREAM\b[^;\r\n]*;?",
    )
    .unwrap()
});

static ADD_FILE_STATEMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)ALTER\s+DATABASE\s+(?:\[[^\]]*\]|\w+)\s+ADD\s+FILE\s*(?:\([^()]*\)\s*,?\s*)+TO\s+FILEGROUP\s+\[([^\]]+)\]\s*;?",
    )
    .unwrap()
});

/// Lower-cased names of FILESTREAM filegroups defined in the catalog.
pub fn filestream_filegroups(units: &[ScriptUnit]) -> HashSet<String> {
    units
        .iter()
        .filter(|u| u.object_type == ObjectType::FileGroup)
        .flat_map(|u| {
            FILESTREAM_FILEGROUP
                .captures_iter(&u.content)
                .map(|c| c[1].trim().to_ascii_lowercase())
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Remove FILESTREAM placement, column attributes and FILESTREAM filegroup
/// creation from a script.
pub fn strip(content: &str, filestream_groups: &HashSet<String>) -> String {
    let stripped = FILESTREAM_ON.replace_all(content, "");
    let stripped = FILESTREAM_COLUMN.replace_all(&stripped, "$1");
    let stripped = ADD_FILESTREAM_FILEGROUP_STATEMENT.replace_all(&stripped, "");
    ADD_FILE_STATEMENT
        .replace_all(&stripped, |caps: &Captures| {
            if filestream_groups.contains(&caps[1].trim().to_ascii_lowercase()) {
                String::new()
            } else {
                caps[0].to_string()
            }
        })
        .into_owned()
}
