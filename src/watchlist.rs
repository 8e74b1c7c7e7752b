//! Watchlist file merging.
//!
//! The watchlist is shared with other producers (hand-curated entries, other
//! collectors). Only entries carrying this collector's provenance are ever
//! replaced; everything else is written back untouched.

use crate::models::WhaleEntry;
use ethers::utils::to_checksum;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// `meta.source` value downstream monitors key on for auto-collected whales.
pub const PROVENANCE_SOURCE: &str = "collect_eth_whales";
pub const AUTO_LABEL_PREFIX: &str = "AUTO_WHALE_";
pub const WHALE_TYPE: &str = "whale_eth";
const MANAGED_TYPES: &[&str] = &[WHALE_TYPE, "whale"];

pub const DEFAULT_LIST_FIELD: &str = "markets";

#[derive(Debug, Error)]
pub enum WatchlistError {
    #[error("watchlist {0} does not exist, create a base file first")]
    Missing(PathBuf),
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("watchlist {path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("watchlist {path} has an unsupported shape, expected an array or {{\"{field}\": [...]}}")]
    UnsupportedShape { path: PathBuf, field: String },
    #[error("failed to serialize watchlist: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Top-level layout of the file, kept so it can be written back the same way.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchlistFile {
    Array(Vec<Value>),
    /// `root[field]` is the entry list; other top-level keys ride along.
    Wrapped { field: String, root: Map<String, Value> },
}

impl WatchlistFile {
    pub fn from_value(value: Value, field: &str) -> Option<Self> {
        match value {
            Value::Array(entries) => Some(Self::Array(entries)),
            Value::Object(root) if root.get(field).is_some_and(Value::is_array) => {
                Some(Self::Wrapped {
                    field: field.to_string(),
                    root,
                })
            }
            _ => None,
        }
    }

    pub fn load(path: &Path, field: &str) -> Result<Self, WatchlistError> {
        let raw = fs::read_to_string(path).map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => WatchlistError::Missing(path.to_path_buf()),
            _ => WatchlistError::Io {
                path: path.to_path_buf(),
                source,
            },
        })?;
        let value: Value = serde_json::from_str(&raw).map_err(|source| WatchlistError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_value(value, field).ok_or_else(|| WatchlistError::UnsupportedShape {
            path: path.to_path_buf(),
            field: field.to_string(),
        })
    }

    pub fn entries(&self) -> &[Value] {
        match self {
            Self::Array(entries) => entries,
            Self::Wrapped { field, root } => root
                .get(field)
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or(&[]),
        }
    }

    fn take_entries(&mut self) -> Vec<Value> {
        match self {
            Self::Array(entries) => std::mem::take(entries),
            Self::Wrapped { field, root } => match root.get_mut(field.as_str()) {
                Some(Value::Array(entries)) => std::mem::take(entries),
                _ => Vec::new(),
            },
        }
    }

    fn set_entries(&mut self, new_entries: Vec<Value>) {
        match self {
            Self::Array(entries) => *entries = new_entries,
            Self::Wrapped { field, root } => {
                root.insert(field.clone(), Value::Array(new_entries));
            }
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::Array(entries) => Value::Array(entries.clone()),
            Self::Wrapped { root, .. } => Value::Object(root.clone()),
        }
    }

    /// Pretty-printed, written to a sibling temp file and renamed into place.
    pub fn save(&self, path: &Path) -> Result<(), WatchlistError> {
        let mut body = serde_json::to_string_pretty(&self.to_value())?;
        body.push('\n');

        let io_err = |source| WatchlistError::Io {
            path: path.to_path_buf(),
            source,
        };
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, body).map_err(io_err)?;
        fs::rename(&tmp, path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            io_err(e)
        })
    }
}

#[derive(Debug, Serialize)]
struct EntryMeta<'a> {
    source: &'a str,
    token: String,
    rank: usize,
    volume_wei: String,
    tx_count: u64,
    timestamp: i64,
}

#[derive(Debug, Serialize)]
struct AutoEntry<'a> {
    label: String,
    address: String,
    #[serde(rename = "type")]
    kind: &'a str,
    network: &'a str,
    meta: EntryMeta<'a>,
}

impl<'a> From<&'a WhaleEntry> for AutoEntry<'a> {
    fn from(whale: &'a WhaleEntry) -> Self {
        Self {
            label: format!("{}{}", AUTO_LABEL_PREFIX, whale.rank),
            address: format!("{:#x}", whale.address),
            kind: WHALE_TYPE,
            network: &whale.network,
            meta: EntryMeta {
                source: PROVENANCE_SOURCE,
                token: to_checksum(&whale.token, None),
                rank: whale.rank,
                volume_wei: whale.volume_wei.to_string(),
                tx_count: whale.tx_count,
                timestamp: whale.timestamp,
            },
        }
    }
}

pub fn whale_entry_value(whale: &WhaleEntry) -> Result<Value, serde_json::Error> {
    serde_json::to_value(AutoEntry::from(whale))
}

/// True for entries this collector wrote on an earlier run.
pub fn is_managed(entry: &Value) -> bool {
    let kind = entry.get("type").and_then(Value::as_str);
    if !kind.is_some_and(|k| MANAGED_TYPES.contains(&k)) {
        return false;
    }
    let auto_label = entry
        .get("label")
        .and_then(Value::as_str)
        .is_some_and(|l| l.to_uppercase().starts_with(AUTO_LABEL_PREFIX));
    let ours = entry
        .get("meta")
        .and_then(|m| m.get("source"))
        .and_then(Value::as_str)
        == Some(PROVENANCE_SOURCE);
    auto_label || ours
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeSummary {
    pub removed: usize,
    pub added: usize,
    pub total: usize,
}

/// Drop our stale entries and append the new whales, in memory.
pub fn merge(file: &mut WatchlistFile, whales: &[WhaleEntry]) -> Result<MergeSummary, WatchlistError> {
    let existing = file.take_entries();
    let before = existing.len();
    let mut kept: Vec<Value> = existing.into_iter().filter(|e| !is_managed(e)).collect();
    let removed = before - kept.len();

    for whale in whales {
        kept.push(whale_entry_value(whale)?);
    }
    let total = kept.len();
    file.set_entries(kept);

    Ok(MergeSummary {
        removed,
        added: whales.len(),
        total,
    })
}

/// Load, merge and save the watchlist at `path`.
pub fn update_watchlist(
    path: &Path,
    field: &str,
    whales: &[WhaleEntry],
) -> Result<MergeSummary, WatchlistError> {
    let mut file = WatchlistFile::load(path, field)?;
    log::debug!("Loaded {} entries from {}", file.entries().len(), path.display());
    let summary = merge(&mut file, whales)?;
    file.save(path)?;
    log::info!(
        "Updated {}: removed {} stale auto entries, added {}, {} entries total",
        path.display(),
        summary.removed,
        summary.added,
        summary.total
    );
    Ok(summary)
}
