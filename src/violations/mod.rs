pub mod canonical;
pub mod types;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use canonical::canonicalize;
use types::{CacheLookup, CacheRecord, Violation};

/// Whole-file mapping of canonical URL to its latest scan.
type CacheFile = BTreeMap<String, CacheRecord>;

/// JSON-file violation cache keyed by canonical URL.
///
/// Writers are serialized by an in-process lock and every write lands through
/// a temp file renamed over the mapping file, so readers never observe a
/// partially written document.
pub struct ViolationStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl ViolationStore {
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("create cache directory {:?}", parent))?;
        }
        let store = Self {
            path: path.to_path_buf(),
            write_lock: Mutex::new(()),
        };
        // Fail fast on a corrupt file rather than on the first scan.
        let existing = store.read_all().await?;
        debug!(path = ?path, urls = existing.len(), "violation cache opened");
        Ok(store)
    }

    /// Latest record for `url`, if any scan has stored one.
    pub async fn get(&self, url: &str) -> Result<Option<CacheRecord>> {
        let key = canonicalize(url);
        let mut all = self.read_all().await?;
        Ok(all.remove(key.as_str()))
    }

    /// Like [`get`](Self::get) but treats records older than `max_age` as absent.
    /// `None` disables the check.
    pub async fn get_fresh(
        &self,
        url: &str,
        max_age: Option<chrono::Duration>,
    ) -> Result<Option<CacheRecord>> {
        let record = self.get(url).await?;
        Ok(match (record, max_age) {
            (Some(r), Some(age)) if r.is_stale(Utc::now(), age) => {
                debug!(url, "cached violations are stale");
                None
            }
            (record, _) => record,
        })
    }

    /// Query surface: a hit with the stored violations, or an error payload.
    pub async fn lookup(&self, url: &str) -> Result<CacheLookup> {
        let key = canonicalize(url);
        Ok(match self.get(url).await? {
            Some(record) => CacheLookup::Hit {
                url: key.into_string(),
                violations: record.violations,
                cached: true,
                timestamp: record.timestamp,
            },
            None => CacheLookup::Miss {
                error: format!("No cached violations found for {}", key),
            },
        })
    }

    /// Replace the record for `url` with `violations`, stamped now.
    pub async fn put(&self, url: &str, violations: Vec<Violation>) -> Result<CacheRecord> {
        let key = canonicalize(url);
        let record = CacheRecord {
            timestamp: Utc::now(),
            violations,
        };

        let _guard = self.write_lock.lock().await;
        let mut all = self.read_all().await?;
        all.insert(key.as_str().to_string(), record.clone());
        let bytes = serde_json::to_vec_pretty(&all).context("serialize violation cache")?;
        write_atomic(&self.path, &bytes).await?;

        info!(
            url = %key,
            violations = record.violations.len(),
            "violations cached"
        );
        Ok(record)
    }

    /// Canonical URLs currently cached, sorted.
    pub async fn urls(&self) -> Result<Vec<String>> {
        Ok(self.read_all().await?.into_keys().collect())
    }

    async fn read_all(&self) -> Result<CacheFile> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(CacheFile::new()),
            Ok(bytes) => serde_json::from_slice(&bytes)
                .with_context(|| format!("parse violation cache {:?}", self.path)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(CacheFile::new()),
            Err(e) => Err(e).with_context(|| format!("read violation cache {:?}", self.path)),
        }
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("violations.json");
    let tmp = path.with_file_name(format!(".{}.tmp.{}", file_name, std::process::id()));
    {
        let mut file = tokio::fs::File::create(&tmp)
            .await
            .with_context(|| format!("create {:?}", tmp))?;
        file.write_all(bytes)
            .await
            .with_context(|| format!("write {:?}", tmp))?;
        file.sync_all()
            .await
            .with_context(|| format!("sync {:?}", tmp))?;
    }
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("rename {:?} over {:?}", tmp, path))?;
    // Persist the rename itself; not every platform can open a directory.
    let parent = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    if let Ok(dir) = tokio::fs::File::open(parent).await {
        let _ = dir.sync_all().await;
    }
    Ok(())
}
