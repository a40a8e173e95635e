//! Safe archive extraction for zip and gzip-tar KO packages.
//!
//! Guards against:
//! - Path traversal (`../` components) and absolute paths
//! - Symlinks, hardlinks, and device entries
//! - Excessive entry counts and decompression bombs

use std::fs::File;
use std::io::{Read, Seek};
use std::path::{Component, Path};

use flate2::read::GzDecoder;

use crate::error::{ActivatorError, ActivatorResult};

/// Maximum number of entries allowed in an archive.
const MAX_ENTRY_COUNT: usize = 10_000;

/// Maximum total extracted size (500 MB).
const MAX_EXTRACTED_SIZE: u64 = 500_000_000;

const ZIP_MAGIC: [u8; 4] = *b"PK\x03\x04";
const EMPTY_ZIP_MAGIC: [u8; 4] = *b"PK\x05\x06";
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Archive formats the activator unpacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    /// PKZIP.
    Zip,
    /// Gzip-compressed tar.
    TarGz,
}

/// Identify an archive by its leading bytes.
#[must_use]
pub fn sniff_format(header: &[u8]) -> Option<ArchiveFormat> {
    if header.starts_with(&ZIP_MAGIC) || header.starts_with(&EMPTY_ZIP_MAGIC) {
        Some(ArchiveFormat::Zip)
    } else if header.starts_with(&GZIP_MAGIC) {
        Some(ArchiveFormat::TarGz)
    } else {
        None
    }
}

/// Extract the archive at `archive` into the existing directory `dest`.
///
/// # Errors
///
/// Returns [`ActivatorError::Extraction`] for unreadable or unrecognised
/// archives and limit violations, [`ActivatorError::PathTraversal`] for
/// escaping paths, and [`ActivatorError::UnsafeEntryType`] for links and
/// device nodes.
pub fn extract_archive(archive: &Path, dest: &Path) -> ActivatorResult<()> {
    let mut file = File::open(archive).map_err(|e| ActivatorError::Extraction {
        message: format!("cannot open {}: {e}", archive.display()),
    })?;

    let mut header = [0u8; 4];
    let read = file.read(&mut header)?;
    file.rewind()?;

    match sniff_format(header.get(..read).unwrap_or_default()) {
        Some(ArchiveFormat::Zip) => extract_zip(file, dest),
        Some(ArchiveFormat::TarGz) => extract_tar_gz(file, dest),
        None => Err(ActivatorError::Extraction {
            message: format!("{} is not a zip or gzip tar archive", archive.display()),
        }),
    }
}

fn extract_zip<R: Read + Seek>(reader: R, dest: &Path) -> ActivatorResult<()> {
    let mut archive = zip::ZipArchive::new(reader).map_err(|e| ActivatorError::Extraction {
        message: format!("failed to read zip archive: {e}"),
    })?;

    if archive.len() > MAX_ENTRY_COUNT {
        return Err(ActivatorError::Extraction {
            message: format!("archive exceeds maximum entry count ({MAX_ENTRY_COUNT})"),
        });
    }
    if archive.is_empty() {
        return Err(ActivatorError::Extraction {
            message: "archive is empty".into(),
        });
    }

    let dest = canonical_dest(dest)?;
    let mut total_size: u64 = 0;

    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| ActivatorError::Extraction {
                message: format!("failed to read zip entry {index}: {e}"),
            })?;

        let name = entry.name().to_owned();
        if let Some(mode) = entry.unix_mode() {
            let kind = mode & 0o170_000;
            if kind != 0 && kind != 0o100_000 && kind != 0o040_000 {
                return Err(ActivatorError::UnsafeEntryType {
                    entry_type: format!("unix mode {kind:o}"),
                    path: name,
                });
            }
        }

        let entry_path = Path::new(&name).to_path_buf();
        validate_entry_path(&entry_path)?;
        let target = dest.join(&entry_path);

        if entry.is_dir() {
            std::fs::create_dir_all(&target)?;
            continue;
        }

        total_size = total_size.saturating_add(entry.size());
        if total_size > MAX_EXTRACTED_SIZE {
            return Err(too_big());
        }

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&target)?;
        let budget = MAX_EXTRACTED_SIZE.saturating_sub(total_size.saturating_sub(entry.size()));
        let written = std::io::copy(&mut (&mut entry).take(budget.saturating_add(1)), &mut out)
            .map_err(|e| ActivatorError::Extraction {
                message: format!("failed to unpack {name}: {e}"),
            })?;
        if written > budget {
            return Err(too_big());
        }
    }

    Ok(())
}

fn extract_tar_gz<R: Read>(reader: R, dest: &Path) -> ActivatorResult<()> {
    let mut archive = tar::Archive::new(GzDecoder::new(reader));
    archive.set_preserve_permissions(false);

    let dest = canonical_dest(dest)?;
    let mut entry_count = 0usize;
    let mut total_size: u64 = 0;

    for entry_result in archive
        .entries()
        .map_err(|e| ActivatorError::Extraction {
            message: format!("failed to read archive entries: {e}"),
        })?
    {
        let mut entry = entry_result.map_err(|e| ActivatorError::Extraction {
            message: format!("failed to read archive entry: {e}"),
        })?;

        entry_count = entry_count.saturating_add(1);
        if entry_count > MAX_ENTRY_COUNT {
            return Err(ActivatorError::Extraction {
                message: format!("archive exceeds maximum entry count ({MAX_ENTRY_COUNT})"),
            });
        }

        let entry_type = entry.header().entry_type();
        if !is_safe_entry_type(entry_type) {
            let entry_path = entry
                .path()
                .map_or_else(|_| "<unknown>".to_string(), |p| p.display().to_string());
            return Err(ActivatorError::UnsafeEntryType {
                entry_type: format!("{entry_type:?}"),
                path: entry_path,
            });
        }
        if matches!(
            entry_type,
            tar::EntryType::XHeader | tar::EntryType::XGlobalHeader | tar::EntryType::GNULongName
        ) {
            continue;
        }

        let entry_size = entry
            .header()
            .size()
            .map_err(|e| ActivatorError::Extraction {
                message: format!("failed to read entry size: {e}"),
            })?;
        total_size = total_size.saturating_add(entry_size);
        if total_size > MAX_EXTRACTED_SIZE {
            return Err(too_big());
        }

        let entry_path = entry
            .path()
            .map_err(|e| ActivatorError::Extraction {
                message: format!("failed to read entry path: {e}"),
            })?
            .into_owned();
        validate_entry_path(&entry_path)?;
        let target = dest.join(&entry_path);

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        entry
            .unpack(&target)
            .map_err(|e| ActivatorError::Extraction {
                message: format!("failed to unpack {}: {e}", entry_path.display()),
            })?;
    }

    if entry_count == 0 {
        return Err(ActivatorError::Extraction {
            message: "archive is empty".into(),
        });
    }
    Ok(())
}

fn canonical_dest(dest: &Path) -> ActivatorResult<std::path::PathBuf> {
    dest.canonicalize().map_err(|e| ActivatorError::Extraction {
        message: format!("failed to canonicalize destination: {e}"),
    })
}

fn too_big() -> ActivatorError {
    ActivatorError::Extraction {
        message: format!("archive exceeds maximum extracted size ({MAX_EXTRACTED_SIZE} bytes)"),
    }
}

/// Regular files, directories, and metadata headers only.
fn is_safe_entry_type(entry_type: tar::EntryType) -> bool {
    matches!(
        entry_type,
        tar::EntryType::Regular
            | tar::EntryType::Directory
            | tar::EntryType::GNULongName
            | tar::EntryType::XHeader
            | tar::EntryType::XGlobalHeader
    )
}

fn validate_entry_path(path: &Path) -> ActivatorResult<()> {
    if path.is_absolute()
        || path.components().any(|c| {
            matches!(
                c,
                Component::ParentDir | Component::Prefix(_) | Component::RootDir
            )
        })
    {
        return Err(ActivatorError::PathTraversal {
            path: path.display().to_string(),
        });
    }
    Ok(())
}
