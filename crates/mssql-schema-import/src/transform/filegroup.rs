//! Filegroup strategy rewrites.
//!
//! `) ON [X]` names a filegroup; `ON [X](col)` names a partition scheme and
//! is never touched. Memory-optimized filegroups are never remapped.

use crate::catalog::{ObjectType, ScriptUnit};
use crate::config::FileGroupSizing;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::HashSet;

/// `) ON [name]`, with an optional trailing `(` (partition scheme) or `.`
/// (multi-part object name).
///
/// Whitespace, including line breaks, may sit between the name and the
/// partition column list: scripted DDL emits both `[PS]([c])` and `[PS] ([c])`.
static ON_REFERENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(\)\s*ON\s*)\[([^\]]+)\](\s*\(|\.)?").unwrap());

static STORAGE_CLAUSE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(TEXTIMAGE_ON|FILESTREAM_ON)(\s*)\[([^\]]+)\]").unwrap());

static CREATE_PARTITION_SCHEME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bCREATE\s+PARTITION\s+SCHEME\b").unwrap());

/// `TO ([a], [b])` or `ALL TO ([a])` in a partition scheme body.
static SCHEME_TARGETS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(ALL\s+)?TO\s*\(\s*(\[[^\]]*\](?:\s*,\s*\[[^\]]*\])*)\s*\)").unwrap()
});

static BRACKETED: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[([^\]]*)\]").unwrap());

static MEMORY_OPTIMIZED_FILEGROUP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)ADD\s+FILEGROUP\s+\[([^\]]+)\]\s+CONTAINS\s+MEMORY_OPTIMIZED_DATA").unwrap()
});

static ADD_FILEGROUP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)ADD\s+FILEGROUP\s+\[([^\]]+)\]").unwrap());

/// `( NAME = N'logical', FILENAME = N'path' <options> )`
static FILE_SPEC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)\(\s*NAME\s*=\s*N?'([^']*)'\s*,\s*FILENAME\s*=\s*N?'([^']*)'([^)]*)\)")
        .unwrap()
});

static SIZE_OPTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bSIZE\s*=\s*\d+\s*(?:KB|MB|GB|TB)?").unwrap());

static GROWTH_OPTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bFILEGROWTH\s*=\s*\d+\s*(?:%|KB|MB|GB|TB)?").unwrap());

const PRIMARY: &str = "PRIMARY";

fn is_primary(name: &str) -> bool {
    name.trim().eq_ignore_ascii_case(PRIMARY)
}

fn is_exempt(name: &str, memory_optimized: &HashSet<String>) -> bool {
    is_primary(name) || memory_optimized.contains(&name.trim().to_ascii_lowercase())
}

/// Rewrite every non-primary filegroup reference to `[PRIMARY]`.
///
/// Covers `) ON [X]`, `TEXTIMAGE_ON [X]`, `FILESTREAM_ON [X]` and partition
/// scheme target lists. Idempotent.
pub fn remove_to_primary(content: &str, memory_optimized: &HashSet<String>) -> String {
    let rewritten = ON_REFERENCE.replace_all(content, |caps: &Captures| {
        let name = &caps[2];
        if caps.get(3).is_some() || is_exempt(name, memory_optimized) {
            caps[0].to_string()
        } else {
            format!("{}[{}]", &caps[1], PRIMARY)
        }
    });

    let rewritten = STORAGE_CLAUSE.replace_all(&rewritten, |caps: &Captures| {
        if is_exempt(&caps[3], memory_optimized) {
            caps[0].to_string()
        } else {
            format!("{}{}[{}]", &caps[1], &caps[2], PRIMARY)
        }
    });

    if !CREATE_PARTITION_SCHEME.is_match(&rewritten) {
        return rewritten.into_owned();
    }

    SCHEME_TARGETS
        .replace_all(&rewritten, |caps: &Captures| {
            let all_primary = BRACKETED
                .captures_iter(&caps[2])
                .all(|c| is_primary(&c[1]));
            if all_primary {
                caps[0].to_string()
            } else {
                format!("ALL TO ([{}])", PRIMARY)
            }
        })
        .into_owned()
}

/// Lower-cased names of memory-optimized filegroups defined in the catalog.
pub fn memory_optimized_filegroups(units: &[ScriptUnit]) -> HashSet<String> {
    units
        .iter()
        .filter(|u| u.object_type == ObjectType::FileGroup)
        .flat_map(|u| {
            MEMORY_OPTIMIZED_FILEGROUP
                .captures_iter(&u.content)
                .map(|c| c[1].trim().to_ascii_lowercase())
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Whether a script creates a memory-optimized filegroup.
pub fn is_memory_optimized_script(content: &str) -> bool {
    MEMORY_OPTIMIZED_FILEGROUP.is_match(content)
}

/// Names of filegroups created by `ADD FILEGROUP` in a script.
pub fn defined_filegroups(content: &str) -> Vec<String> {
    ADD_FILEGROUP
        .captures_iter(content)
        .map(|c| c[1].trim().to_string())
        .collect()
}

/// Non-primary filegroups a script places data on, in first-seen order.
pub fn referenced_filegroups(content: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut names = Vec::new();
    let mut push = |name: &str| {
        let name = name.trim();
        if !is_primary(name) && seen.insert(name.to_ascii_lowercase()) {
            names.push(name.to_string());
        }
    };

    for caps in ON_REFERENCE.captures_iter(content) {
        if caps.get(3).is_none() {
            push(&caps[2]);
        }
    }
    for caps in STORAGE_CLAUSE.captures_iter(content) {
        push(&caps[3]);
    }
    if CREATE_PARTITION_SCHEME.is_match(content) {
        for caps in SCHEME_TARGETS.captures_iter(content) {
            for name in BRACKETED.captures_iter(&caps[2]) {
                push(&name[1]);
            }
        }
    }

    names
}

/// Repoint data files of a filegroup script at the target's data directory.
///
/// Each file becomes `<data_path><database>_<logical name><original extension>`;
/// `SIZE`/`FILEGROWTH` are set from `sizing` where present.
pub fn remap_file_definitions(
    content: &str,
    data_path: &str,
    database: &str,
    sizing: &FileGroupSizing,
) -> String {
    FILE_SPEC
        .replace_all(content, |caps: &Captures| {
            let logical = &caps[1];
            let original = &caps[2];
            let file_name = original.rsplit(['\\', '/']).next().unwrap_or(original);
            let extension = file_name
                .rfind('.')
                .map(|i| &file_name[i..])
                .unwrap_or("");
            let path = format!(
                "{}{}_{}{}",
                with_trailing_separator(data_path),
                database,
                logical,
                extension
            );

            let options = SIZE_OPTION.replace_all(&caps[3], |_: &Captures| {
                format!("SIZE = {}MB", sizing.initial_size_mb)
            });
            let options = GROWTH_OPTION.replace_all(&options, |_: &Captures| {
                format!("FILEGROWTH = {}MB", sizing.growth_mb)
            });

            format!(
                "( NAME = N'{}', FILENAME = N'{}'{})",
                logical,
                path.replace('\'', "''"),
                options
            )
        })
        .into_owned()
}

/// Batch that creates a filegroup with one data file unless it already exists.
pub fn ensure_filegroup_batch(
    name: &str,
    data_path: &str,
    database: &str,
    sizing: &FileGroupSizing,
) -> String {
    let logical = format!("{}_{}", database, name);
    let path = format!("{}{}.ndf", with_trailing_separator(data_path), logical);
    format!(
        "IF NOT EXISTS (SELECT 1 FROM sys.filegroups WHERE name = N'{name_lit}')\n\
         BEGIN\n\
         \x20   ALTER DATABASE CURRENT ADD FILEGROUP [{name_ident}];\n\
         \x20   ALTER DATABASE CURRENT ADD FILE (NAME = N'{logical_lit}', FILENAME = N'{path_lit}', \
         SIZE = {size}MB, FILEGROWTH = {growth}MB) TO FILEGROUP [{name_ident}];\n\
         END",
        name_lit = name.replace('\'', "''"),
        name_ident = name.replace(']', "]]"),
        logical_lit = logical.replace('\'', "''"),
        path_lit = path.replace('\'', "''"),
        size = sizing.initial_size_mb,
        growth = sizing.growth_mb,
    )
}

fn with_trailing_separator(path: &str) -> String {
    if path.is_empty() || path.ends_with('\\') || path.ends_with('/') {
        return path.to_string();
    }
    let separator = if path.contains('/') && !path.contains('\\') {
        '/'
    } else {
        '\\'
    };
    format!("{}{}", path, separator)
}
