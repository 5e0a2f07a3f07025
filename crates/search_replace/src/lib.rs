//! SEARCH/REPLACE patch blocks: parsing and sequential application.
//!
//! A diff document holds one or more blocks of the form
//!
//! ```text
//! <<<<<<< SEARCH
//! exact text to find
//! =======
//! replacement text
//! >>>>>>> REPLACE
//! ```
//!
//! Blocks apply in document order. Each replaces only the first occurrence of
//! its search text in the content produced by the blocks before it. Files are
//! only written once every block has applied.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

/// One search span and its replacement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchBlock {
    pub search: String,
    pub replace: String,
}

#[derive(Debug, Error)]
pub enum SearchReplaceError {
    #[error("no valid SEARCH/REPLACE blocks found in diff")]
    NoBlocks,
    #[error("SEARCH block {index} not found in file content:\n{search}")]
    BlockNotFound { index: usize, search: String },
    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to write {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
}

fn strict_block_regex() -> &'static Regex {
    static CACHED: OnceLock<Regex> = OnceLock::new();
    CACHED.get_or_init(|| {
        Regex::new(
            r"(?sm)<<<<<<< SEARCH[ \t]*\r?\n(.*?)\r?\n=======[ \t]*\r?\n(.*?)(?:\r?\n)?^>>>>>>> REPLACE",
        )
        .expect("strict block regex must compile")
    })
}

fn relaxed_block_regex() -> &'static Regex {
    static CACHED: OnceLock<Regex> = OnceLock::new();
    CACHED.get_or_init(|| {
        Regex::new(
            r"(?sm)<<<<<<<[ \t]*SEARCH[ \t]*\r?\n(.*?)\r?\n=======[ \t]*\r?\n(.*?)(?:\r?\n)?^>>>>>>>[ \t]*REPLACE",
        )
        .expect("relaxed block regex must compile")
    })
}

/// Parse every block of `diff` in document order.
///
/// Closing markers must start a line, and an empty replacement section
/// deletes the search text. The strict marker spelling is tried first; the relaxed spelling (flexible
/// whitespace around `SEARCH` and `REPLACE`) is only used when the strict one
/// matches nothing.
pub fn parse_blocks(diff: &str) -> Result<Vec<PatchBlock>, SearchReplaceError> {
    let mut blocks = collect_blocks(strict_block_regex(), diff);
    if blocks.is_empty() {
        blocks = collect_blocks(relaxed_block_regex(), diff);
    }
    if blocks.is_empty() {
        return Err(SearchReplaceError::NoBlocks);
    }
    Ok(blocks)
}

fn collect_blocks(regex: &Regex, diff: &str) -> Vec<PatchBlock> {
    regex
        .captures_iter(diff)
        .map(|captures| PatchBlock {
            search: captures
                .get(1)
                .map(|value| value.as_str().to_string())
                .unwrap_or_default(),
            replace: captures
                .get(2)
                .map(|value| value.as_str().to_string())
                .unwrap_or_default(),
        })
        .collect()
}

/// Apply `blocks` to `content` in order and return the edited text.
///
/// `content` itself is never modified; a failing block leaves the caller with
/// the original text and an error naming the 1-based block index.
pub fn apply_blocks(content: &str, blocks: &[PatchBlock]) -> Result<String, SearchReplaceError> {
    let mut current = content.to_string();

    for (offset, block) in blocks.iter().enumerate() {
        let Some(position) = current.find(&block.search) else {
            return Err(SearchReplaceError::BlockNotFound {
                index: offset + 1,
                search: block.search.clone(),
            });
        };
        current.replace_range(position..position + block.search.len(), &block.replace);
    }

    Ok(current)
}

/// Parse `diff` and apply it to `content`.
pub fn apply_diff(content: &str, diff: &str) -> Result<String, SearchReplaceError> {
    let blocks = parse_blocks(diff)?;
    apply_blocks(content, &blocks)
}

/// Whether `diff` would apply cleanly to `content`.
pub fn validate_diff(content: &str, diff: &str) -> bool {
    apply_diff(content, diff).is_ok()
}

/// Outcome of patching a file on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePatchSummary {
    pub path: PathBuf,
    pub blocks_applied: usize,
    pub bytes_written: usize,
}

/// Read `path`, apply `diff`, and write the result back.
///
/// The file is left untouched unless every block applies.
pub fn apply_diff_to_file(path: &Path, diff: &str) -> Result<FilePatchSummary, SearchReplaceError> {
    let blocks = parse_blocks(diff)?;
    let original = fs::read_to_string(path).map_err(|source| SearchReplaceError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let updated = apply_blocks(&original, &blocks)?;
    fs::write(path, &updated).map_err(|source| SearchReplaceError::Write {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(FilePatchSummary {
        path: path.to_path_buf(),
        blocks_applied: blocks.len(),
        bytes_written: updated.len(),
    })
}
