use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{AppError, Result};
use crate::pipeline::component::{AnalysisRecord, ComponentKind, ANALYSIS_SCHEMA_VERSION};

const LARGE_FILE_THRESHOLD: u64 = 10 * 1024 * 1024;

/// On-disk cache entry. Extra fields beyond the documented shape are
/// tolerated on read so hand-edited files with drift still parse.
#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    key: String,
    #[serde(rename = "type")]
    kind: String,
    timestamp: DateTime<Utc>,
    file_path: String,
    file_hash: String,
    data: Value,
    #[serde(default)]
    description: String,
    #[serde(default = "default_schema_version")]
    schema_version: u32,
}

fn default_schema_version() -> u32 {
    ANALYSIS_SCHEMA_VERSION
}

#[derive(Debug, Default, Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub entries_by_type: HashMap<String, usize>,
    pub total_size_bytes: u64,
    pub oldest_entry: Option<DateTime<Utc>>,
    pub newest_entry: Option<DateTime<Utc>>,
}

/// Identity of a large file without reading it: size and mtime stand in for
/// the content.
fn identity_for_metadata(size: u64, mtime_unix: i64) -> String {
    format!("{:x}", md5::compute(format!("size_{size}_mod_{mtime_unix}")))
}

/// Content-derived identity. Equal files produce equal identities; files over
/// 10 MiB are identified by (size, mtime) for performance.
pub fn file_identity(path: &Path) -> Result<String> {
    let metadata = fs::metadata(path).map_err(|err| AppError::file(path, err))?;

    if metadata.len() > LARGE_FILE_THRESHOLD {
        let mtime = metadata
            .modified()
            .map_err(|err| AppError::file(path, err))?
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        return Ok(identity_for_metadata(metadata.len(), mtime));
    }

    let bytes = fs::read(path).map_err(|err| AppError::file(path, err))?;
    Ok(format!("{:x}", md5::compute(&bytes)))
}

/// Per-kind analysis cache: one JSON file per reference, keyed by the
/// sanitized basename so entries survive moves between directories.
pub struct Cache {
    cache_dir: PathBuf,
    ttl: Duration,
}

impl Cache {
    pub fn new(cache_dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        let cache_dir = cache_dir.into();
        if let Err(err) = fs::create_dir_all(&cache_dir) {
            warn!("Failed to create cache directory {}: {err}", cache_dir.display());
        }
        Cache { cache_dir, ttl }
    }

    pub fn for_kind(root: &Path, kind: ComponentKind, ttl: Duration) -> Self {
        Cache::new(root.join(kind.cache_dir()), ttl)
    }

    fn generate_key(kind: ComponentKind, file_path: &Path) -> String {
        let base_name = file_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unnamed".to_string());
        let clean = base_name.replace(' ', "_");
        format!("{}_{}", kind.analysis_kind().as_str(), clean)
    }

    fn entry_path(&self, kind: ComponentKind, file_path: &Path) -> PathBuf {
        self.cache_dir
            .join(format!("{}.json", Self::generate_key(kind, file_path)))
    }

    /// Valid hit requires an unexpired timestamp and a matching recomputed
    /// identity. An unreadable source file leaves the entry usable (the
    /// reference may have been moved since it was analyzed).
    pub fn get(&self, kind: ComponentKind, file_path: &Path) -> Option<AnalysisRecord> {
        let cache_path = self.entry_path(kind, file_path);
        let raw = fs::read_to_string(&cache_path).ok()?;

        let entry: CacheEntry = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(err) => {
                debug!("Removing unparseable cache entry {}: {err}", cache_path.display());
                let _ = fs::remove_file(&cache_path);
                return None;
            }
        };

        if Utc::now().signed_duration_since(entry.timestamp) > self.ttl {
            let _ = fs::remove_file(&cache_path);
            return None;
        }

        if let Ok(current_hash) = file_identity(file_path) {
            if current_hash != entry.file_hash {
                let _ = fs::remove_file(&cache_path);
                return None;
            }
        }

        Some(AnalysisRecord {
            kind: kind.analysis_kind(),
            schema_version: entry.schema_version,
            identity: entry.file_hash,
            timestamp: entry.timestamp,
            structured: entry.data,
            description: entry.description,
        })
    }

    /// Write-once: an existing parseable entry is never overwritten, so
    /// hand edits persist across runs. Corrupt files are replaced.
    pub fn set(&self, kind: ComponentKind, file_path: &Path, record: &AnalysisRecord) -> Result<()> {
        let cache_path = self.entry_path(kind, file_path);

        if let Ok(existing) = fs::read_to_string(&cache_path) {
            if serde_json::from_str::<CacheEntry>(&existing).is_ok() {
                debug!("Cache entry already exists, keeping {}", cache_path.display());
                return Ok(());
            }
        }

        let absolute = file_path
            .canonicalize()
            .unwrap_or_else(|_| file_path.to_path_buf());
        let entry = CacheEntry {
            key: Self::generate_key(kind, file_path),
            kind: kind.analysis_kind().as_str().to_string(),
            timestamp: record.timestamp,
            file_path: absolute.to_string_lossy().into_owned(),
            file_hash: record.identity.clone(),
            data: record.structured.clone(),
            description: record.description.clone(),
            schema_version: record.schema_version,
        };

        let json = serde_json::to_string_pretty(&entry)
            .map_err(|err| AppError::Cache(format!("serialize cache entry: {err}")))?;

        // Write-then-rename so concurrent readers never see a torn file.
        let tmp_path = cache_path.with_extension("json.tmp");
        fs::write(&tmp_path, json).map_err(|err| AppError::file(&tmp_path, err))?;
        fs::rename(&tmp_path, &cache_path).map_err(|err| AppError::file(&cache_path, err))?;
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        let entries = match fs::read_dir(&self.cache_dir) {
            Ok(entries) => entries,
            Err(_) => return Ok(()),
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().map(|ext| ext == "json").unwrap_or(false) {
                fs::remove_file(&path).map_err(|err| AppError::file(&path, err))?;
            }
        }
        Ok(())
    }

    pub fn stats(&self) -> Result<CacheStats> {
        let mut stats = CacheStats::default();
        let entries = match fs::read_dir(&self.cache_dir) {
            Ok(entries) => entries,
            Err(_) => return Ok(stats),
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().map(|ext| ext != "json").unwrap_or(true) {
                continue;
            }
            stats.total_entries += 1;
            if let Ok(metadata) = entry.metadata() {
                stats.total_size_bytes += metadata.len();
            }

            let Ok(raw) = fs::read_to_string(&path) else {
                continue;
            };
            let Ok(parsed) = serde_json::from_str::<CacheEntry>(&raw) else {
                continue;
            };
            *stats.entries_by_type.entry(parsed.kind).or_default() += 1;
            if stats
                .oldest_entry
                .map(|oldest| parsed.timestamp < oldest)
                .unwrap_or(true)
            {
                stats.oldest_entry = Some(parsed.timestamp);
            }
            if stats
                .newest_entry
                .map(|newest| parsed.timestamp > newest)
                .unwrap_or(true)
            {
                stats.newest_entry = Some(parsed.timestamp);
            }
        }

        Ok(stats)
    }
}
