//! Neo4j config file patching
//!
//! The server's `neo4j.conf` / `neo4j-server.properties` is edited in place by
//! text substitution so that comments and layout survive. Shipped files keep
//! most keys commented out (`#key=...` or `# key=...`); setting a key first
//! uncomments it, then rewrites its value.

use std::collections::BTreeMap;
use std::path::Path;

use regex::{NoExpand, Regex};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Set `name` to `value` in the config file at `path`.
///
/// Returns `false` when the file has no line for `name`; nothing is inserted
/// in that case.
pub fn set_property(path: &Path, name: &str, value: &str) -> Result<bool> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| Error::io(format!("Failed to read config {}", path.display()), e))?;

    let (patched, found) = patch_property(&contents, name, value)?;
    if !found {
        warn!("{} has no entry for {}, leaving it unset", path.display(), name);
    }

    std::fs::write(path, patched)
        .map_err(|e| Error::io(format!("Failed to write config {}", path.display()), e))?;

    debug!("Set {}={} in {}", name, value, path.display());
    Ok(found)
}

/// Apply the uncomment-then-replace substitution to `contents`.
///
/// Only the first occurrence of each form is touched.
pub fn patch_property(contents: &str, name: &str, value: &str) -> Result<(String, bool)> {
    let uncommented = contents
        .replacen(&format!("#{}", name), name, 1)
        .replacen(&format!("# {}", name), name, 1);

    let pattern = Regex::new(&format!("{}=.*", regex::escape(name)))
        .map_err(|e| Error::Config(format!("Bad property name {}: {}", name, e)))?;

    if !pattern.is_match(&uncommented) {
        return Ok((uncommented, false));
    }

    let line = format!("{}={}", name, value);
    let patched = pattern.replacen(&uncommented, 1, NoExpand(&line)).into_owned();
    Ok((patched, true))
}

/// Active `key=value` entries of the config file at `path`.
///
/// Comments and blank lines are skipped; a repeated key keeps its last value,
/// as the server itself does.
pub fn read_properties(path: &Path) -> Result<BTreeMap<String, String>> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| Error::io(format!("Failed to read config {}", path.display()), e))?;

    Ok(parse_properties(&contents))
}

pub fn parse_properties(contents: &str) -> BTreeMap<String, String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .collect()
}
