//! File transfer helpers
//!
//! Chunking math, base64 framing of chunk data, MIME guessing from file extensions,
//! and resolution of collision-free destination paths for inbound files.

use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::errors::{LanError, Result};
use crate::protocol::message::FileMeta;

/// Raw bytes carried by one FILE_CHUNK
pub const CHUNK_SIZE: usize = 64 * 1024;

const FALLBACK_FILE_NAME: &str = "download";

// ----------------------------------------------------------------------------
// Chunking
// ----------------------------------------------------------------------------

/// Number of chunks announced for a file; an empty file still sends one
pub fn total_chunks(size: u64, chunk_size: usize) -> u64 {
    let chunk_size = chunk_size.max(1) as u64;
    size.div_ceil(chunk_size).max(1)
}

pub fn encode_chunk(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub fn decode_chunk(data: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(data)
        .map_err(|e| LanError::invalid_payload(format!("invalid chunk encoding: {}", e)))
}

// ----------------------------------------------------------------------------
// Metadata
// ----------------------------------------------------------------------------

/// MIME type from the file extension, `application/octet-stream` when unknown
pub fn guess_mime(name: &str) -> &'static str {
    let ext = Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("pdf") => "application/pdf",
        Some("xlsx") => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        Some("xls") => "application/vnd.ms-excel",
        Some("csv") => "text/csv",
        Some("doc") => "application/msword",
        Some("docx") => {
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        }
        Some("ppt") => "application/vnd.ms-powerpoint",
        Some("pptx") => {
            "application/vnd.openxmlformats-officedocument.presentationml.presentation"
        }
        _ => "application/octet-stream",
    }
}

impl FileMeta {
    /// Metadata for an outbound file with a fresh id
    pub fn describe(name: &str, size: u64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            size,
            mime: Some(guess_mime(name).to_string()),
        }
    }
}

// ----------------------------------------------------------------------------
// Destination Resolution
// ----------------------------------------------------------------------------

/// Reduce an offered name to its final path component
///
/// Both `/` and `\` separate components, so `..\evil.txt` becomes `evil.txt`.
pub fn sanitize_file_name(name: &str) -> String {
    let last = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .chars()
        .filter(|c| !c.is_control())
        .collect::<String>();
    let last = last.trim();
    if last.is_empty() || last == "." || last == ".." {
        FALLBACK_FILE_NAME.to_string()
    } else {
        last.to_string()
    }
}

/// Name for the `n`th collision: `report (n).pdf`; `n == 0` is the name itself
pub fn numbered_name(name: &str, n: u32) -> String {
    if n == 0 {
        return name.to_string();
    }
    let path = Path::new(name);
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(name);
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{} ({}).{}", stem, n, ext),
        None => format!("{} ({})", stem, n),
    }
}

/// Endless sequence of candidate paths: `name`, `name (1)`, `name (2)`, ...
pub fn destination_candidates<'a>(
    dir: &'a Path,
    name: &'a str,
) -> impl Iterator<Item = PathBuf> + 'a {
    (0u32..).map(move |n| dir.join(numbered_name(name, n)))
}

/// First candidate that does not exist yet
pub fn unique_destination(dir: &Path, name: &str) -> PathBuf {
    destination_candidates(dir, name)
        .find(|candidate| !candidate.exists())
        .unwrap_or_else(|| dir.join(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_chunks() {
        assert_eq!(total_chunks(0, CHUNK_SIZE), 1);
        assert_eq!(total_chunks(1, CHUNK_SIZE), 1);
        assert_eq!(total_chunks(65536, CHUNK_SIZE), 1);
        assert_eq!(total_chunks(65537, CHUNK_SIZE), 2);
        assert_eq!(total_chunks(150_000, CHUNK_SIZE), 3);
    }

    #[test]
    fn test_guess_mime() {
        assert_eq!(guess_mime("photo.JPG"), "image/jpeg");
        assert_eq!(guess_mime("report.pdf"), "application/pdf");
        assert_eq!(guess_mime("data.csv"), "text/csv");
        assert_eq!(guess_mime("noext"), "application/octet-stream");
        assert_eq!(guess_mime("archive.tar.gz"), "application/octet-stream");
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("report.pdf"), "report.pdf");
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("..\\evil.txt"), "evil.txt");
        assert_eq!(sanitize_file_name("dir/"), "download");
        assert_eq!(sanitize_file_name(".."), "download");
    }

    #[test]
    fn test_numbered_name() {
        assert_eq!(numbered_name("report.pdf", 1), "report (1).pdf");
        assert_eq!(numbered_name("archive.tar.gz", 2), "archive.tar (2).gz");
        assert_eq!(numbered_name("README", 1), "README (1)");
        assert_eq!(numbered_name(".bashrc", 1), ".bashrc (1)");
    }

    #[test]
    fn test_chunk_encoding_rejects_garbage() {
        assert_eq!(decode_chunk(&encode_chunk(b"abc")).unwrap(), b"abc");
        assert!(decode_chunk("***").is_err());
    }

    #[test]
    fn test_unique_destination_skips_existing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("report.pdf"), b"x").unwrap();
        assert_eq!(
            unique_destination(dir.path(), "report.pdf"),
            dir.path().join("report (1).pdf")
        );
    }
}
