use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Context as _;
use tokio::fs;
use tokio::sync::OwnedMutexGuard;

use crate::formats::{CatalogEntry, CatalogStats, SummaryIndex, TitleRecord};

/// Where every durable document lives below the data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorePaths {
    pub summaries: PathBuf,
    pub records_dir: PathBuf,
    pub catalog: PathBuf,
    pub stats: PathBuf,
}

impl StorePaths {
    pub fn under(data_dir: &Path) -> Self {
        Self {
            summaries: data_dir.join("manga_list.json"),
            records_dir: data_dir.join("manga_data"),
            catalog: data_dir.join("data").join("catalog.json"),
            stats: data_dir.join("data").join("stats.json"),
        }
    }

    pub fn record(&self, slug: &str) -> PathBuf {
        self.records_dir.join(format!("{slug}.json"))
    }
}

/// One async mutex per document key, created on first use.
#[derive(Debug, Clone, Default)]
pub struct DocumentLocks {
    locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl DocumentLocks {
    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(key.to_owned()).or_default())
        };
        lock.lock_owned().await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogLoad {
    pub slugs: Vec<String>,
    pub migrated_from_legacy: bool,
}

#[derive(Debug, Clone)]
pub struct Store {
    paths: StorePaths,
    locks: DocumentLocks,
}

impl Store {
    pub fn new(paths: StorePaths) -> Self {
        Self {
            paths,
            locks: DocumentLocks::default(),
        }
    }

    pub fn paths(&self) -> &StorePaths {
        &self.paths
    }

    pub async fn load_summaries(&self) -> anyhow::Result<Option<SummaryIndex>> {
        read_json(&self.paths.summaries)
            .await
            .with_context(|| format!("read: {}", self.paths.summaries.display()))
    }

    pub async fn save_summaries(&self, index: &SummaryIndex) -> anyhow::Result<()> {
        write_json_atomic(&self.paths.summaries, index)
            .await
            .with_context(|| format!("write: {}", self.paths.summaries.display()))
    }

    /// Slugs of every stored record, sorted.
    pub async fn list_slugs(&self) -> anyhow::Result<Vec<String>> {
        let dir = &self.paths.records_dir;
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).with_context(|| format!("read dir: {}", dir.display()));
            }
        };

        let mut slugs = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .with_context(|| format!("list dir: {}", dir.display()))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                slugs.push(stem.to_owned());
            }
        }
        slugs.sort();
        Ok(slugs)
    }

    /// Reads and normalizes the record for `slug`.
    pub async fn load_record(&self, slug: &str) -> anyhow::Result<Option<TitleRecord>> {
        let path = self.paths.record(slug);
        let record: Option<TitleRecord> = read_json(&path)
            .await
            .with_context(|| format!("read: {}", path.display()))?;
        Ok(record.map(|mut r| {
            r.normalize(slug);
            r
        }))
    }

    pub async fn save_record(&self, record: &TitleRecord) -> anyhow::Result<()> {
        let path = self.record_path(record)?;
        write_json_atomic(&path, record)
            .await
            .with_context(|| format!("write: {}", path.display()))
    }

    pub async fn save_record_if_changed(&self, record: &TitleRecord) -> anyhow::Result<bool> {
        let path = self.record_path(record)?;
        write_json_if_changed(&path, record)
            .await
            .with_context(|| format!("write: {}", path.display()))
    }

    /// Read-modify-write of one record while holding that record's lock.
    /// `update` returning `None` leaves the document untouched.
    pub async fn update_record<F>(&self, slug: &str, update: F) -> anyhow::Result<Option<TitleRecord>>
    where
        F: FnOnce(Option<TitleRecord>) -> Option<TitleRecord>,
    {
        let _guard = self.locks.lock(slug).await;
        let existing = self.load_record(slug).await?;
        let Some(updated) = update(existing) else {
            return Ok(None);
        };
        self.save_record(&updated).await?;
        Ok(Some(updated))
    }

    pub async fn lock_record(&self, slug: &str) -> OwnedMutexGuard<()> {
        self.locks.lock(slug).await
    }

    /// Loads the catalog, converting a legacy object-per-title catalog into
    /// slugs. Order is preserved and duplicates dropped. A catalog that exists
    /// but cannot be parsed is an error; it is never replaced blindly.
    pub async fn load_catalog(&self) -> anyhow::Result<CatalogLoad> {
        let path = &self.paths.catalog;
        let entries: Vec<CatalogEntry> = read_json(path)
            .await
            .with_context(|| format!("read: {}", path.display()))?
            .unwrap_or_default();

        let migrated_from_legacy = entries.iter().any(CatalogEntry::is_legacy);
        let mut seen = HashSet::new();
        let slugs = entries
            .iter()
            .filter_map(CatalogEntry::slug)
            .filter(|slug| seen.insert(slug.to_string()))
            .map(str::to_owned)
            .collect();
        Ok(CatalogLoad {
            slugs,
            migrated_from_legacy,
        })
    }

    /// Copies the current catalog document aside before a format migration.
    pub async fn backup_catalog(&self, stamp: &str) -> anyhow::Result<PathBuf> {
        let path = &self.paths.catalog;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("catalog.json");
        let backup = path.with_file_name(format!("{file_name}.backup.{stamp}"));
        fs::copy(path, &backup)
            .await
            .with_context(|| format!("copy {} -> {}", path.display(), backup.display()))?;
        Ok(backup)
    }

    pub async fn save_catalog_if_changed(&self, slugs: &[String]) -> anyhow::Result<bool> {
        write_json_if_changed(&self.paths.catalog, slugs)
            .await
            .with_context(|| format!("write: {}", self.paths.catalog.display()))
    }

    pub async fn save_stats_if_changed(&self, stats: &CatalogStats) -> anyhow::Result<bool> {
        write_json_if_changed(&self.paths.stats, stats)
            .await
            .with_context(|| format!("write: {}", self.paths.stats.display()))
    }

    fn record_path(&self, record: &TitleRecord) -> anyhow::Result<PathBuf> {
        if record.slug.is_empty() || record.slug.contains(['/', '\\']) || record.slug == ".." {
            anyhow::bail!("invalid record slug: {:?}", record.slug);
        }
        Ok(self.paths.record(&record.slug))
    }
}

pub(crate) async fn read_json<T: serde::de::DeserializeOwned>(
    path: &Path,
) -> anyhow::Result<Option<T>> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let value = serde_json::from_slice(&bytes).context("parse json")?;
    Ok(Some(value))
}

/// Writes to a unique temp file beside `path`, then renames it over `path`.
pub(crate) async fn write_json_atomic<T: serde::Serialize + ?Sized>(
    path: &Path,
    value: &T,
) -> anyhow::Result<()> {
    let data = to_json_bytes(value)?;
    write_bytes_atomic(path, &data).await
}

/// Skips the write when the serialized bytes equal the file on disk.
pub(crate) async fn write_json_if_changed<T: serde::Serialize + ?Sized>(
    path: &Path,
    value: &T,
) -> anyhow::Result<bool> {
    let data = to_json_bytes(value)?;
    match fs::read(path).await {
        Ok(existing) if existing == data => return Ok(false),
        Ok(_) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(err.into()),
    }
    write_bytes_atomic(path, &data).await?;
    Ok(true)
}

fn to_json_bytes<T: serde::Serialize + ?Sized>(value: &T) -> anyhow::Result<Vec<u8>> {
    let mut data = serde_json::to_vec_pretty(value).context("serialize json")?;
    data.push(b'\n');
    Ok(data)
}

async fn write_bytes_atomic(path: &Path, data: &[u8]) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)
        .await
        .with_context(|| format!("create parent dir: {}", parent.display()))?;

    let tmp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4().simple()));
    fs::write(&tmp_path, data)
        .await
        .with_context(|| format!("write tmp: {}", tmp_path.display()))?;
    if let Err(err) = fs::rename(&tmp_path, path).await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(err).with_context(|| format!("rename tmp to final: {}", path.display()));
    }
    Ok(())
}
