use crate::error::{ProcessingError, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;
use zip::ZipArchive;

/// Make the KML document inside a bulletin available as a plain file.
///
/// Compressed bulletins are zip containers holding a single `.kml` entry;
/// the entry is streamed out into `work_dir`. Plain `.kml` files pass
/// through untouched.
pub fn extract_kml(path: &Path, work_dir: &Path) -> Result<PathBuf> {
    let is_compressed = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("kmz") || ext.eq_ignore_ascii_case("zip"))
        .unwrap_or(false);

    if !is_compressed {
        return Ok(path.to_path_buf());
    }

    let file = fs::File::open(path)?;
    let mut archive = ZipArchive::new(file)?;

    let entry_index = (0..archive.len())
        .find(|&i| {
            archive
                .by_index(i)
                .map(|entry| entry.name().to_ascii_lowercase().ends_with(".kml"))
                .unwrap_or(false)
        })
        .ok_or_else(|| {
            ProcessingError::InvalidFormat(format!(
                "no .kml entry in archive '{}'",
                path.display()
            ))
        })?;

    let mut entry = archive.by_index(entry_index)?;
    debug!(entry = entry.name(), "extracting bulletin document");

    let target = work_dir.join("bulletin.kml");
    let mut out = fs::File::create(&target)?;
    io::copy(&mut entry, &mut out)?;

    Ok(target)
}
