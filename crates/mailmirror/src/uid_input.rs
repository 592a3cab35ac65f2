use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};

#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct UidList {
    pub(crate) uids: Vec<u32>,
    /// Tokens that were not positive integers.
    pub(crate) rejected: Vec<String>,
}

/// Accepts one uid per line or comma/space separated lists. `#` starts a
/// comment that runs to the end of the line.
pub(crate) fn parse_uid_text(text: &str) -> UidList {
    let mut list = UidList::default();
    for line in text.lines() {
        let line = line.split('#').next().unwrap_or("");
        for token in line.split(|ch: char| ch == ',' || ch.is_whitespace()) {
            if token.is_empty() {
                continue;
            }
            match token.parse::<u32>() {
                Ok(uid) if uid > 0 => list.uids.push(uid),
                _ => list.rejected.push(token.to_string()),
            }
        }
    }
    list
}

/// `-` reads stdin.
pub(crate) fn read_uid_source(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("reading uids from stdin")?;
        return Ok(text);
    }
    std::fs::read_to_string(path).with_context(|| format!("reading uids from {}", path.display()))
}
