use crate::{
    build_chunks, detect_kind, extract_document_text, ChunkingOptions, DocumentChunk,
    DocumentFingerprint, IngestError,
};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const SUPPORTED_EXTENSIONS: [&str; 2] = ["txt", "pdf"];

/// A file handed to the application: its display name plus raw bytes.
#[derive(Debug, Clone)]
pub struct Upload {
    pub name: String,
    pub bytes: Vec<u8>,
}

pub fn discover_documents(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let supported = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                SUPPORTED_EXTENSIONS
                    .iter()
                    .any(|known| ext.eq_ignore_ascii_case(known))
            });

        if supported {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

pub fn read_upload(path: &Path) -> Result<Upload, IngestError> {
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| {
            IngestError::MissingFileName(format!("path missing filename: {}", path.display()))
        })?;

    Ok(Upload {
        name: name.to_string(),
        bytes: fs::read(path)?,
    })
}

pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

pub fn fingerprint(name: &str, bytes: &[u8]) -> Result<DocumentFingerprint, IngestError> {
    Ok(DocumentFingerprint {
        file_name: name.to_string(),
        kind: detect_kind(name)?,
        checksum: digest_bytes(bytes),
        ingested_at: Utc::now(),
    })
}

/// Extracts and chunks one uploaded document. A document that yields no
/// chunks is an error so the caller can surface it.
pub fn ingest_document(
    name: &str,
    bytes: &[u8],
    options: &ChunkingOptions,
) -> Result<(DocumentFingerprint, Vec<DocumentChunk>), IngestError> {
    let document = fingerprint(name, bytes)?;
    let text = extract_document_text(document.kind, bytes)?;
    let chunks = build_chunks(&document, &text, options)?;

    if chunks.is_empty() {
        return Err(IngestError::NoContent(name.to_string()));
    }

    Ok((document, chunks))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn discovery_is_recursive_and_filters_extensions() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let base = dir.path();
        let nested = base.join("nested");
        fs::create_dir(&nested)?;

        File::create(base.join("a.pdf")).and_then(|mut file| file.write_all(b"%PDF-1.4\n%fake"))?;
        fs::write(nested.join("b.TXT"), "hello")?;
        fs::write(nested.join("c.docx"), "ignored")?;

        let files = discover_documents(base);
        assert_eq!(files.len(), 2);
        assert!(files.iter().all(|path| !path.ends_with("c.docx")));
        Ok(())
    }

    #[test]
    fn checksum_is_reproducible() {
        assert_eq!(digest_bytes(b"abc"), digest_bytes(b"abc"));
        assert_ne!(digest_bytes(b"abc"), digest_bytes(b"abd"));
    }

    #[test]
    fn upload_takes_the_file_name() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("notes.txt");
        fs::write(&path, "content")?;

        let upload = read_upload(&path)?;
        assert_eq!(upload.name, "notes.txt");
        assert_eq!(upload.bytes, b"content");
        Ok(())
    }

    #[test]
    fn text_document_is_chunked() -> Result<(), IngestError> {
        let (document, chunks) = ingest_document(
            "guide.txt",
            b"First paragraph.\n\nSecond paragraph.",
            &ChunkingOptions::default(),
        )?;

        assert_eq!(document.file_name, "guide.txt");
        assert_eq!(document.checksum.len(), 64);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].text, "Second paragraph.");
        Ok(())
    }

    #[test]
    fn blank_document_has_no_content() {
        let result = ingest_document("blank.txt", b"  \n\n \n", &ChunkingOptions::default());
        assert!(matches!(result, Err(IngestError::NoContent(name)) if name == "blank.txt"));
    }

    #[test]
    fn unsupported_upload_is_rejected() {
        let result = ingest_document("image.png", b"\x89PNG", &ChunkingOptions::default());
        assert!(matches!(result, Err(IngestError::UnsupportedType { .. })));
    }
}
