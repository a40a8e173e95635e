//! KO acquisition: resolve a source location, download it if remote, and
//! unpack it into the cache.
//!
//! Cache layout:
//! ```text
//! <cache_root>/
//!   local_manifest.json
//!   ko1.zip            downloaded archive
//!   ko1/               unpacked install directory
//! ```

use std::path::{Path, PathBuf};

use tracing::{debug, info};
use url::Url;

use crate::blocking::run_blocking;
use crate::error::{ActivatorError, ActivatorResult};
use crate::extract::extract_archive;
use crate::fetch::HttpFetcher;
use crate::record::KoRecord;

/// Archive extensions stripped to form a cache directory name, longest first.
const ARCHIVE_EXTENSIONS: &[&str] = &[".tar.gz", ".tgz", ".zip"];

/// Top-level entries ignored when looking for a single root directory.
const IGNORED_TOP_LEVEL: &[&str] = &["__MACOSX", ".DS_Store"];

/// A source location after resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocation {
    /// A file or directory on this machine.
    Local(PathBuf),
    /// An `http`/`https` URL.
    Remote(Url),
}

impl SourceLocation {
    /// Canonical string form, stored back into the record's `url`.
    #[must_use]
    pub fn to_url_string(&self) -> String {
        match self {
            Self::Remote(url) => url.to_string(),
            Self::Local(path) => Url::from_file_path(path)
                .map_or_else(|()| path.display().to_string(), |u| u.to_string()),
        }
    }
}

/// Result of acquiring one KO.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acquired {
    /// Directory holding `metadata.json` and the artifacts.
    pub install_dir: PathBuf,
    /// Value for the record's `local_url`.
    pub local_url: String,
    /// Value for the record's `url`.
    pub resolved_url: String,
}

/// Resolve `location` against `base` unless it is already absolute.
///
/// Absolute filesystem paths and `http`, `https` and `file` URLs stand on
/// their own; anything else is joined onto `base` (the manifest's URL), or
/// onto the working directory when there is no base.
///
/// # Errors
///
/// Returns [`ActivatorError::Acquisition`] for unsupported schemes or
/// locations that cannot be joined.
pub fn resolve_location(location: &str, base: Option<&Url>) -> ActivatorResult<SourceLocation> {
    let fail = |message: String| ActivatorError::Acquisition {
        location: location.to_owned(),
        message,
    };

    if Path::new(location).is_absolute() {
        return Ok(SourceLocation::Local(PathBuf::from(location)));
    }

    if let Ok(url) = Url::parse(location) {
        match url.scheme() {
            "http" | "https" | "file" => return classify(url).map_err(fail),
            scheme if scheme.len() > 1 => {
                return Err(fail(format!("unsupported URL scheme '{scheme}'")));
            },
            _ => {},
        }
    }

    match base {
        Some(base) => {
            let joined = base
                .join(location)
                .map_err(|e| fail(format!("cannot resolve against {base}: {e}")))?;
            classify(joined).map_err(fail)
        },
        None => std::path::absolute(location)
            .map(SourceLocation::Local)
            .map_err(|e| fail(e.to_string())),
    }
}

fn classify(url: Url) -> Result<SourceLocation, String> {
    match url.scheme() {
        "http" | "https" => Ok(SourceLocation::Remote(url)),
        "file" => url
            .to_file_path()
            .map(SourceLocation::Local)
            .map_err(|()| format!("invalid file URL {url}")),
        other => Err(format!("unsupported URL scheme '{other}'")),
    }
}

/// Cache directory name for an archive file name: `ko1.zip` → `ko1`,
/// `ko1.tar.gz` → `ko1`, `ko1.v2.bin` → `ko1.v2`.
#[must_use]
pub fn canonical_name(basename: &str) -> String {
    let lower = basename.to_ascii_lowercase();
    for ext in ARCHIVE_EXTENSIONS {
        if lower.ends_with(ext) && lower.len() > ext.len() {
            let cut = basename.len().saturating_sub(ext.len());
            return basename.get(..cut).unwrap_or(basename).to_owned();
        }
    }
    Path::new(basename)
        .file_stem()
        .map_or_else(|| basename.to_owned(), |s| s.to_string_lossy().into_owned())
}

/// Downloads and unpacks KOs into a cache root.
#[derive(Debug, Clone)]
pub struct Acquirer {
    cache_root: PathBuf,
    fetcher: HttpFetcher,
}

impl Acquirer {
    /// Create an acquirer writing under `cache_root`.
    #[must_use]
    pub fn new(cache_root: impl Into<PathBuf>, fetcher: HttpFetcher) -> Self {
        Self {
            cache_root: cache_root.into(),
            fetcher,
        }
    }

    /// The cache root.
    #[must_use]
    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    /// The install directory recorded for `record`, if it was acquired.
    #[must_use]
    pub fn install_dir(&self, record: &KoRecord) -> Option<PathBuf> {
        record.local_url.as_deref().map(|local| {
            let path = Path::new(local);
            if path.is_absolute() {
                path.to_path_buf()
            } else {
                self.cache_root.join(path)
            }
        })
    }

    /// Acquire the KO at `location`.
    ///
    /// An existing cache directory short-circuits both download and unpack.
    ///
    /// # Errors
    ///
    /// Returns [`ActivatorError::Acquisition`] when the source cannot be
    /// resolved, read or downloaded, and extraction errors for bad archives.
    pub async fn acquire(
        &self,
        location: &str,
        manifest_base: Option<&Url>,
    ) -> ActivatorResult<Acquired> {
        let source = resolve_location(location, manifest_base)?;
        let resolved_url = source.to_url_string();

        match &source {
            SourceLocation::Local(path) if path.is_dir() => {
                debug!(path = %path.display(), "using local directory as install dir");
                Ok(Acquired {
                    install_dir: path.clone(),
                    local_url: path.display().to_string(),
                    resolved_url,
                })
            },
            SourceLocation::Local(path) => {
                let basename = file_name(path).ok_or_else(|| ActivatorError::Acquisition {
                    location: resolved_url.clone(),
                    message: "location has no file name".into(),
                })?;
                let name = canonical_name(&basename);
                let install_dir = self.cache_root.join(&name);
                if install_dir.is_dir() {
                    debug!(install_dir = %install_dir.display(), "cache hit");
                } else {
                    if !path.is_file() {
                        return Err(ActivatorError::Acquisition {
                            location: resolved_url,
                            message: "no such file".into(),
                        });
                    }
                    unpack_in_cache(path.clone(), self.cache_root.clone(), install_dir.clone()).await?;
                    info!(source = %path.display(), install_dir = %install_dir.display(), "KO unpacked");
                }
                Ok(Acquired {
                    install_dir,
                    local_url: name,
                    resolved_url,
                })
            },
            SourceLocation::Remote(url) => {
                let basename = url
                    .path_segments()
                    .and_then(|mut segments| segments.next_back())
                    .filter(|s| !s.is_empty())
                    .map(str::to_owned)
                    .ok_or_else(|| ActivatorError::Acquisition {
                        location: resolved_url.clone(),
                        message: "URL has no file name".into(),
                    })?;
                let name = canonical_name(&basename);
                if name == basename {
                    return Err(ActivatorError::Acquisition {
                        location: resolved_url,
                        message: "cannot derive a cache directory name from an extensionless file".into(),
                    });
                }
                let install_dir = self.cache_root.join(&name);
                if install_dir.is_dir() {
                    debug!(install_dir = %install_dir.display(), "cache hit");
                } else {
                    let archive = self.cache_root.join(&basename);
                    self.download(url, &archive).await?;
                    unpack_in_cache(archive, self.cache_root.clone(), install_dir.clone()).await?;
                    info!(url = %url, install_dir = %install_dir.display(), "KO downloaded and unpacked");
                }
                Ok(Acquired {
                    install_dir,
                    local_url: name,
                    resolved_url,
                })
            },
        }
    }

    async fn download(&self, url: &Url, dest: &Path) -> ActivatorResult<()> {
        use std::io::Write;

        let bytes = self.fetcher.get_bytes(url).await?;
        let size = bytes.len();
        let cache_root = self.cache_root.clone();
        let target = dest.to_path_buf();
        run_blocking(move || {
            std::fs::create_dir_all(&cache_root)?;
            let mut tmp = tempfile::NamedTempFile::new_in(&cache_root)?;
            tmp.write_all(&bytes)?;
            tmp.as_file().sync_all()?;
            tmp.persist(&target).map_err(|e| e.error)?;
            Ok(())
        })
        .await?;
        debug!(url = %url, path = %dest.display(), bytes = size, "archive downloaded");
        Ok(())
    }
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().into_owned())
}

async fn unpack_in_cache(
    archive: PathBuf,
    cache_root: PathBuf,
    install_dir: PathBuf,
) -> ActivatorResult<()> {
    run_blocking(move || {
        std::fs::create_dir_all(&cache_root)?;
        unpack(&archive, &cache_root, &install_dir)
    })
    .await
}

/// Extract `archive` into a staging directory under `cache_root`, then move
/// the result to `install_dir`. A single top-level directory in the archive
/// becomes the install dir itself.
fn unpack(archive: &Path, cache_root: &Path, install_dir: &Path) -> ActivatorResult<()> {
    let staging = tempfile::Builder::new()
        .prefix(".staging-")
        .tempdir_in(cache_root)?;
    extract_archive(archive, staging.path())?;

    let mut top_level = Vec::new();
    for entry in std::fs::read_dir(staging.path())? {
        let entry = entry?;
        let name = entry.file_name();
        if IGNORED_TOP_LEVEL.iter().any(|ignored| name == *ignored) {
            continue;
        }
        top_level.push(entry.path());
    }

    let root = match top_level.as_slice() {
        [only] if only.is_dir() => only.clone(),
        _ => staging.path().to_path_buf(),
    };
    std::fs::rename(&root, install_dir)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use kgrid_config::FetchConfig;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::extract::tests::{tar_gz_bytes, zip_bytes};

    fn acquirer(root: &Path) -> Acquirer {
        let fetcher = HttpFetcher::new(&FetchConfig {
            retries: 0,
            backoff_ms: 1,
            ..FetchConfig::default()
        })
        .unwrap();
        Acquirer::new(root, fetcher)
    }

    fn ko_zip() -> Vec<u8> {
        zip_bytes(&[
            ("ko1/", b""),
            ("ko1/metadata.json", br#"{"@id":"ko1"}"#),
            ("ko1/deployment.yaml", b"/run: {}"),
        ])
    }

    #[test]
    fn canonical_names() {
        assert_eq!(canonical_name("ko1.zip"), "ko1");
        assert_eq!(canonical_name("ko1.tar.gz"), "ko1");
        assert_eq!(canonical_name("ko1.TGZ"), "ko1");
        assert_eq!(canonical_name("ko1-v1.0.bin"), "ko1-v1.0");
        assert_eq!(canonical_name("plain"), "plain");
    }

    #[test]
    fn resolution_rules() {
        let base = Url::parse("https://example.org/kos/manifest.json").unwrap();
        assert_eq!(
            resolve_location("ko1.zip", Some(&base)).unwrap(),
            SourceLocation::Remote(Url::parse("https://example.org/kos/ko1.zip").unwrap())
        );
        assert_eq!(
            resolve_location("/srv/ko1.zip", Some(&base)).unwrap(),
            SourceLocation::Local(PathBuf::from("/srv/ko1.zip"))
        );
        assert_eq!(
            resolve_location("file:///srv/ko1.zip", Some(&base)).unwrap(),
            SourceLocation::Local(PathBuf::from("/srv/ko1.zip"))
        );

        let local_base = Url::parse("file:///srv/kos/manifest.json").unwrap();
        assert_eq!(
            resolve_location("../other/ko2.zip", Some(&local_base)).unwrap(),
            SourceLocation::Local(PathBuf::from("/srv/other/ko2.zip"))
        );
        assert!(resolve_location("ftp://example.org/ko.zip", None).is_err());
    }

    #[tokio::test]
    async fn local_zip_unpacks_single_root() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("ko1.zip");
        std::fs::write(&archive, ko_zip()).unwrap();
        let root = tmp.path().join("shelf");

        let acquired = acquirer(&root)
            .acquire(archive.to_str().unwrap(), None)
            .await
            .unwrap();
        assert_eq!(acquired.install_dir, root.join("ko1"));
        assert_eq!(acquired.local_url, "ko1");
        assert!(acquired.resolved_url.starts_with("file://"));
        assert!(root.join("ko1/metadata.json").is_file());
    }

    #[tokio::test]
    async fn flat_tarball_becomes_install_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("flat.tgz");
        std::fs::write(
            &archive,
            tar_gz_bytes(&[("metadata.json", b"{}"), ("deployment.yaml", b"{}")]),
        )
        .unwrap();
        let root = tmp.path().join("shelf");

        let acquired = acquirer(&root)
            .acquire(archive.to_str().unwrap(), None)
            .await
            .unwrap();
        assert_eq!(acquired.install_dir, root.join("flat"));
        assert!(root.join("flat/metadata.json").is_file());
    }

    #[tokio::test]
    async fn local_directory_used_in_place() {
        let tmp = tempfile::tempdir().unwrap();
        let ko = tmp.path().join("ko-dir");
        std::fs::create_dir(&ko).unwrap();
        let root = tmp.path().join("shelf");

        let acquired = acquirer(&root)
            .acquire(ko.to_str().unwrap(), None)
            .await
            .unwrap();
        assert_eq!(acquired.install_dir, ko);
        assert_eq!(acquired.local_url, ko.display().to_string());
        assert!(!root.exists());
    }

    #[tokio::test]
    async fn missing_local_file_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let err = acquirer(tmp.path())
            .acquire("/definitely/not/here.zip", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ActivatorError::Acquisition { .. }));
    }

    #[tokio::test]
    async fn remote_acquisition_is_idempotent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/kos/ko1.zip"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(ko_zip()))
            .expect(1)
            .mount(&server)
            .await;

        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("shelf");
        let acq = acquirer(&root);
        let base = Url::parse(&format!("{}/kos/manifest.json", server.uri())).unwrap();

        let first = acq.acquire("ko1.zip", Some(&base)).await.unwrap();
        let second = acq.acquire("ko1.zip", Some(&base)).await.unwrap();
        assert_eq!(first, second);
        assert!(root.join("ko1.zip").is_file());
        assert!(root.join("ko1/deployment.yaml").is_file());
    }

    #[tokio::test]
    async fn remote_not_found_is_acquisition_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let tmp = tempfile::tempdir().unwrap();
        let url = format!("{}/ko9.zip", server.uri());
        let err = acquirer(tmp.path()).acquire(&url, None).await.unwrap_err();
        assert!(err.to_string().contains("404"), "got: {err}");
        assert!(!tmp.path().join("ko9").exists());
    }

    #[test]
    fn install_dir_from_record() {
        let tmp = tempfile::tempdir().unwrap();
        let acq = acquirer(tmp.path());
        let mut record = KoRecord::new(crate::record::KoId::new("k").unwrap(), "k.zip");
        assert!(acq.install_dir(&record).is_none());
        record.local_url = Some("k".into());
        assert_eq!(acq.install_dir(&record).unwrap(), tmp.path().join("k"));
        record.local_url = Some("/abs/k".into());
        assert_eq!(acq.install_dir(&record).unwrap(), PathBuf::from("/abs/k"));
    }
}
