//! Archive extraction for downloaded observation bundles
//!
//! Only tabular entries are unpacked. Faults never propagate: the caller
//! receives whatever was extracted before the fault, possibly nothing.

use crate::error::PipelineError;
use crate::Result;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use zip::ZipArchive;

/// Extension of the entries kept from an archive
pub const TABULAR_EXTENSION: &str = ".csv";

/// Extract every `.csv` entry of `archive_path` into `dest_dir`.
///
/// Returned paths follow the archive listing order.
pub fn extract_tabular_files(archive_path: &Path, dest_dir: &Path) -> Vec<PathBuf> {
    let mut extracted = Vec::new();

    if let Err(e) = extract_into(archive_path, dest_dir, &mut extracted) {
        error!(
            archive = %archive_path.display(),
            extracted = extracted.len(),
            error = %e,
            "Error extracting archive"
        );
    }

    info!(
        archive = %archive_path.display(),
        files = ?extracted,
        "Tabular files extracted"
    );
    extracted
}

fn extract_into(archive_path: &Path, dest_dir: &Path, extracted: &mut Vec<PathBuf>) -> Result<()> {
    let mut archive = ZipArchive::new(File::open(archive_path)?).map_err(|e| {
        PipelineError::ArchiveError(format!("{} is not a readable archive: {}", archive_path.display(), e))
    })?;

    // Entries are visited in listing order; an unreadable one ends the walk.
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let name = entry.name().to_string();
        if !name.ends_with(TABULAR_EXTENSION) {
            continue;
        }

        let Some(relative) = entry.enclosed_name().map(Path::to_path_buf) else {
            warn!(entry = %name, "Skipping entry with unsafe path");
            continue;
        };

        let target = dest_dir.join(relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut out = File::create(&target)?;
        io::copy(&mut entry, &mut out)?;
        extracted.push(target);
    }

    Ok(())
}
