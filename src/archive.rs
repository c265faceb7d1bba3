//! Archive extraction into a scoped staging directory
//!
//! Only `ADDROB<nn>.DBF` entries are extracted. The staging directory is a
//! `TempDir` inside the archive directory, so it is removed when the
//! `StagingArea` drops, whichever way the run ends.

use std::collections::HashSet;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::error::{EnrichError, EnrichResult};

const STAGING_PREFIX: &str = "fias-staging-";

/// Address-object tables: ADDROB01.DBF .. ADDROB99.DBF
static SOURCE_ENTRY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^ADDROB\d{2}\.DBF$").unwrap());

/// True when an archive entry's file name is a table the pipeline reads.
pub fn is_source_entry(file_name: &str) -> bool {
    SOURCE_ENTRY_RE.is_match(file_name)
}

/// Extracted tables, alive as long as this value is
#[derive(Debug)]
pub struct StagingArea {
    dir: TempDir,
    files: Vec<PathBuf>,
}

impl StagingArea {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Extracted files in archive order.
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Remove the staging directory now, reporting any failure.
    pub fn close(self) -> std::io::Result<()> {
        self.dir.close()
    }
}

/// Extract every source table from `archive_path` into a fresh staging
/// directory under `staging_parent`.
///
/// Any IO or archive error aborts before anything is processed; the
/// partially filled directory is removed on return.
pub fn extract_sources(archive_path: &Path, staging_parent: &Path) -> EnrichResult<StagingArea> {
    if !archive_path.is_file() {
        return Err(EnrichError::ArchiveNotFound {
            path: archive_path.to_path_buf(),
        });
    }

    let dir = tempfile::Builder::new()
        .prefix(STAGING_PREFIX)
        .tempdir_in(staging_parent)?;
    debug!(staging = %dir.path().display(), "Created staging directory");

    let mut archive = zip::ZipArchive::new(File::open(archive_path)?)?;
    let mut files = Vec::new();
    let mut seen = HashSet::new();

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        if entry.is_dir() {
            continue;
        }

        let Some(file_name) = entry
            .enclosed_name()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        else {
            warn!(entry = entry.name(), "Skipping archive entry with unsafe path");
            continue;
        };

        if !is_source_entry(&file_name) {
            continue;
        }
        if !seen.insert(file_name.to_ascii_uppercase()) {
            warn!(entry = entry.name(), "Skipping duplicate source table");
            continue;
        }

        let target = dir.path().join(&file_name);
        let mut out = BufWriter::new(File::create(&target)?);
        let bytes = std::io::copy(&mut entry, &mut out)?;
        out.into_inner().map_err(|e| e.into_error())?.sync_all()?;

        debug!(file = %file_name, bytes, "Extracted source table");
        files.push(target);
    }

    info!(
        archive = %archive_path.display(),
        tables = files.len(),
        "Extracted source tables"
    );

    Ok(StagingArea { dir, files })
}
