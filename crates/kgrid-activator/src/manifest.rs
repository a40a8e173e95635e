//! The manifest: an ordered, id-keyed list of KO records.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{ActivatorError, ActivatorResult};
use crate::fetch::HttpFetcher;
use crate::record::{KoId, KoRecord};

/// File name of the manifest snapshot under the cache root.
pub const SNAPSHOT_FILE: &str = "local_manifest.json";

/// Ordered KO records with unique ids.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Manifest {
    records: Vec<KoRecord>,
}

impl Manifest {
    /// Parse a manifest document: a JSON array of objects, each with at
    /// least `@id` and `url`.
    ///
    /// Entries are parsed one at a time. A malformed entry that still names
    /// an `@id` becomes an `error` record carrying the parse message; one
    /// without a usable id is logged and dropped.
    ///
    /// # Errors
    ///
    /// Returns [`ActivatorError::Manifest`] if the document is not a JSON
    /// array or two entries share an id.
    pub fn parse(json: &str) -> ActivatorResult<Self> {
        let value: Value = serde_json::from_str(json)
            .map_err(|e| ActivatorError::Manifest(format!("invalid JSON: {e}")))?;
        Self::from_value(value)
    }

    /// Build a manifest from an already-parsed JSON value.
    ///
    /// # Errors
    ///
    /// See [`Manifest::parse`].
    pub fn from_value(value: Value) -> ActivatorResult<Self> {
        let Value::Array(items) = value else {
            return Err(ActivatorError::Manifest(
                "manifest must be a JSON array".into(),
            ));
        };

        let records = items
            .into_iter()
            .enumerate()
            .filter_map(|(index, item)| parse_entry(index, item))
            .collect();
        Self::from_records(records)
    }

    /// Build a manifest from records.
    ///
    /// # Errors
    ///
    /// Returns [`ActivatorError::Manifest`] on duplicate ids.
    pub fn from_records(records: Vec<KoRecord>) -> ActivatorResult<Self> {
        let mut seen = HashSet::with_capacity(records.len());
        for record in &records {
            if !seen.insert(record.id.clone()) {
                return Err(ActivatorError::Manifest(format!(
                    "duplicate knowledge object id: {}",
                    record.id
                )));
            }
        }
        Ok(Self { records })
    }

    /// Replace the record with the same id, keeping its position.
    ///
    /// # Errors
    ///
    /// Returns [`ActivatorError::KoNotFound`] if no record has that id.
    pub fn update(&mut self, record: KoRecord) -> ActivatorResult<()> {
        let slot = self
            .records
            .iter_mut()
            .find(|r| r.id == record.id)
            .ok_or_else(|| ActivatorError::KoNotFound(record.id.to_string()))?;
        *slot = record;
        Ok(())
    }

    /// Look up a record by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&KoRecord> {
        self.records.iter().find(|r| r.id.as_str() == id)
    }

    /// All records in manifest order.
    #[must_use]
    pub fn records(&self) -> &[KoRecord] {
        &self.records
    }

    /// Iterate over records in manifest order.
    pub fn iter(&self) -> impl Iterator<Item = &KoRecord> {
        self.records.iter()
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the manifest has no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Ids in manifest order.
    #[must_use]
    pub fn ids(&self) -> Vec<KoId> {
        self.records.iter().map(|r| r.id.clone()).collect()
    }

    /// Consume the manifest, yielding its records.
    #[must_use]
    pub fn into_records(self) -> Vec<KoRecord> {
        self.records
    }
}

fn parse_entry(index: usize, item: Value) -> Option<KoRecord> {
    let id = item
        .get("@id")
        .and_then(Value::as_str)
        .and_then(|id| KoId::new(id).ok());
    let url = item
        .get("url")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned();

    match serde_json::from_value::<KoRecord>(item) {
        Ok(record) => Some(record),
        Err(e) => {
            let Some(id) = id else {
                warn!(index, error = %e, "skipping manifest entry without an @id");
                return None;
            };
            warn!(index, ko_id = %id, error = %e, "malformed manifest entry");
            let mut record = KoRecord::new(id, url);
            record.fail(format!("malformed manifest entry: {e}"));
            Some(record)
        },
    }
}

/// Where a manifest lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestSource {
    /// A file on disk (absolute).
    Local(PathBuf),
    /// An `http` or `https` URL.
    Remote(Url),
}

impl ManifestSource {
    /// Interpret a configured manifest location.
    ///
    /// Relative paths are made absolute against the working directory;
    /// `file:` URLs are local.
    ///
    /// # Errors
    ///
    /// Returns [`ActivatorError::Manifest`] for unsupported URL schemes or
    /// a working directory that cannot be determined.
    pub fn parse(location: &str) -> ActivatorResult<Self> {
        if let Ok(url) = Url::parse(location) {
            match url.scheme() {
                "http" | "https" => return Ok(Self::Remote(url)),
                "file" => {
                    let path = url.to_file_path().map_err(|()| {
                        ActivatorError::Manifest(format!("invalid file URL: {location}"))
                    })?;
                    return Ok(Self::Local(path));
                },
                // Single-letter schemes are Windows drive letters.
                scheme if scheme.len() > 1 => {
                    return Err(ActivatorError::Manifest(format!(
                        "unsupported manifest URL scheme '{scheme}' in {location}"
                    )));
                },
                _ => {},
            }
        }

        let path = std::path::absolute(Path::new(location)).map_err(|e| {
            ActivatorError::Manifest(format!("cannot resolve manifest path {location}: {e}"))
        })?;
        Ok(Self::Local(path))
    }

    /// The URL relative KO locations resolve against.
    ///
    /// # Errors
    ///
    /// Returns [`ActivatorError::Manifest`] if a local path cannot be
    /// expressed as a `file:` URL.
    pub fn base_url(&self) -> ActivatorResult<Url> {
        match self {
            Self::Remote(url) => Ok(url.clone()),
            Self::Local(path) => Url::from_file_path(path).map_err(|()| {
                ActivatorError::Manifest(format!(
                    "cannot express {} as a file URL",
                    path.display()
                ))
            }),
        }
    }
}

impl std::fmt::Display for ManifestSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local(path) => write!(f, "{}", path.display()),
            Self::Remote(url) => write!(f, "{url}"),
        }
    }
}

/// Read or download a manifest and parse it.
///
/// # Errors
///
/// Returns [`ActivatorError::Acquisition`] if the document cannot be read or
/// fetched and [`ActivatorError::Manifest`] if it does not parse.
pub async fn load_manifest(
    source: &ManifestSource,
    fetcher: &HttpFetcher,
) -> ActivatorResult<Manifest> {
    let text = match source {
        ManifestSource::Local(path) => {
            tokio::fs::read_to_string(path)
                .await
                .map_err(|e| ActivatorError::Acquisition {
                    location: path.display().to_string(),
                    message: e.to_string(),
                })?
        },
        ManifestSource::Remote(url) => fetcher.get_text(url).await?,
    };
    let manifest = Manifest::parse(&text)?;
    info!(source = %source, count = manifest.len(), "manifest loaded");
    Ok(manifest)
}

/// Path of the snapshot file under `cache_root`.
#[must_use]
pub fn snapshot_path(cache_root: &Path) -> PathBuf {
    cache_root.join(SNAPSHOT_FILE)
}

/// Atomically write the manifest to `<cache_root>/local_manifest.json`.
///
/// # Errors
///
/// Returns [`ActivatorError::Io`] if the cache root cannot be created or the
/// file cannot be written.
pub fn write_snapshot(cache_root: &Path, manifest: &Manifest) -> ActivatorResult<()> {
    use std::io::Write;

    std::fs::create_dir_all(cache_root)?;
    let path = snapshot_path(cache_root);
    let body = serde_json::to_string_pretty(manifest.records())
        .map_err(|e| ActivatorError::Manifest(format!("cannot serialize snapshot: {e}")))?;

    let mut tmp = tempfile::NamedTempFile::new_in(cache_root)?;
    tmp.write_all(body.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(&path).map_err(|e| e.error)?;

    debug!(path = %path.display(), count = manifest.len(), "manifest snapshot written");
    Ok(())
}

/// Read `<cache_root>/local_manifest.json` if present.
///
/// # Errors
///
/// Returns [`ActivatorError::Io`] if the file exists but cannot be read and
/// [`ActivatorError::Manifest`] if it does not parse.
pub fn read_snapshot(cache_root: &Path) -> ActivatorResult<Option<Manifest>> {
    let path = snapshot_path(cache_root);
    if !path.is_file() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(&path)?;
    Manifest::parse(&text).map(Some)
}
