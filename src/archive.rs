//! Zip export of a finished batch.

use crate::batch::BatchResult;
use crate::error::{PortraitVizError, Result};
use crate::image::{EncodedImage, SourceImage};
use std::io::{Cursor, Write};
use std::path::Path;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// File name offered for download.
pub const ARCHIVE_FILE_NAME: &str = "ai_generated_faces.zip";

/// Stem of the archive entry holding the uploaded portrait.
pub const ORIGINAL_ENTRY_STEM: &str = "original";

/// Archive entry name for the source image.
pub fn original_entry_name(source: &SourceImage) -> String {
    format!("{ORIGINAL_ENTRY_STEM}.{}", source.image.extension())
}

/// Archive entry name for the image in slot `index` (zero-based).
pub fn generated_entry_name(index: usize, extension: &str) -> String {
    format!("generated_{}.{extension}", index + 1)
}

/// Packs the source image and every successful slot into a zip.
///
/// Failed, pending and idle slots are left out, so the archive holds
/// `1 + success_count` entries.
pub fn build_archive(source: &SourceImage, batch: &BatchResult) -> Result<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let original = decode_entry(&source.image)?;
    add_entry(&mut writer, original_entry_name(source), &original, options)?;

    for (index, generated) in batch.successes() {
        let name = generated_entry_name(index, generated.image.extension());
        add_entry(&mut writer, name, &decode_entry(&generated.image)?, options)?;
    }

    let cursor = writer
        .finish()
        .map_err(|e| PortraitVizError::ArchiveBuild(e.to_string()))?;
    let bytes = cursor.into_inner();
    tracing::debug!(
        entries = 1 + batch.success_count(),
        size_bytes = bytes.len(),
        "built archive"
    );
    Ok(bytes)
}

fn decode_entry(image: &EncodedImage) -> Result<Vec<u8>> {
    image
        .decode()
        .map_err(|e| PortraitVizError::ArchiveBuild(e.to_string()))
}

fn add_entry(
    writer: &mut ZipWriter<Cursor<Vec<u8>>>,
    name: String,
    data: &[u8],
    options: SimpleFileOptions,
) -> Result<()> {
    writer
        .start_file(name.as_str(), options)
        .map_err(|e| PortraitVizError::ArchiveBuild(format!("{name}: {e}")))?;
    writer
        .write_all(data)
        .map_err(|e| PortraitVizError::ArchiveBuild(format!("{name}: {e}")))
}

/// Writes archive bytes to `path` without ever leaving a partial file.
///
/// The bytes go to a temporary file next to `path` which is then renamed over
/// it; on failure the temporary file is removed and `path` is untouched.
pub fn save_archive(bytes: &[u8], path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)
        .map_err(|e| PortraitVizError::ArchiveBuild(format!("{}: {e}", dir.display())))?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".portraitviz-")
        .suffix(".zip.part")
        .tempfile_in(dir)
        .map_err(|e| PortraitVizError::ArchiveBuild(e.to_string()))?;
    tmp.write_all(bytes)
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| PortraitVizError::ArchiveBuild(e.to_string()))?;
    tmp.persist(path)
        .map_err(|e| PortraitVizError::ArchiveBuild(e.error.to_string()))?;

    tracing::info!(path = %path.display(), size_bytes = bytes.len(), "saved archive");
    Ok(())
}
