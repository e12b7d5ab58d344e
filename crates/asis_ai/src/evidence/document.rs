use std::fs;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;

use asis_core::error::AppError;

use super::model::{Document, DocumentKind, DocumentPage, PagePosition};

const PDF_MAGIC: &[u8] = b"%PDF-";

/// One file handed over by the upload interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl UploadedFile {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }

    /// Reads a file from disk, refusing oversized files before reading them.
    pub fn from_path(path: &Path, max_bytes: u64) -> Result<Self, AppError> {
        let meta = fs::metadata(path).map_err(|e| {
            AppError::new("INGEST_UNREADABLE", "Failed to stat uploaded file")
                .with_details(format!("path={}; err={}", path.display(), e))
        })?;
        if !meta.is_file() {
            return Err(AppError::new("INGEST_UNREADABLE", "Upload path is not a file")
                .with_details(format!("path={}", path.display())));
        }
        check_size(meta.len(), max_bytes)?;
        let bytes = fs::read(path).map_err(|e| {
            AppError::new("INGEST_UNREADABLE", "Failed to read uploaded file")
                .with_details(format!("path={}; err={}", path.display(), e))
        })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self::new(name, bytes))
    }
}

fn check_size(len: u64, max_bytes: u64) -> Result<(), AppError> {
    if len == 0 {
        return Err(AppError::new("INGEST_EMPTY_DOCUMENT", "Uploaded file is empty"));
    }
    if len > max_bytes {
        return Err(AppError::new("INGEST_TOO_LARGE", "Uploaded file exceeds the size limit")
            .with_details(format!("size={len}; max={max_bytes}")));
    }
    Ok(())
}

pub fn detect_kind(file: &UploadedFile) -> Result<DocumentKind, AppError> {
    let ext = Path::new(&file.name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    if file.bytes.starts_with(PDF_MAGIC) || ext.as_deref() == Some("pdf") {
        return Ok(DocumentKind::Pdf);
    }
    match ext.as_deref() {
        Some("txt") | Some("md") => Ok(DocumentKind::PlainText),
        _ => Err(AppError::new(
            "INGEST_UNSUPPORTED_TYPE",
            "Only PDF or plain-text documents are accepted",
        )
        .with_details(format!("name={}", file.name))),
    }
}

pub fn load_document(file: &UploadedFile, max_bytes: u64) -> Result<Document, AppError> {
    check_size(file.bytes.len() as u64, max_bytes)?;
    let kind = detect_kind(file)?;
    let pages = match kind {
        DocumentKind::Pdf => extract_pdf_pages(file)?,
        DocumentKind::PlainText => {
            let text = String::from_utf8(file.bytes.clone()).map_err(|e| {
                AppError::new("INGEST_UNREADABLE", "Text document is not valid UTF-8")
                    .with_details(format!("name={}; err={}", file.name, e))
            })?;
            vec![DocumentPage {
                position: PagePosition::Unknown,
                text: normalize_text(&text),
            }]
        }
    };

    if pages.iter().all(|p| p.text.trim().is_empty()) {
        return Err(AppError::new("INGEST_EMPTY_DOCUMENT", "Document has no extractable text")
            .with_details(format!("name={}", file.name)));
    }

    Ok(Document {
        source_id: file.name.clone(),
        kind,
        pages,
    })
}

fn extract_pdf_pages(file: &UploadedFile) -> Result<Vec<DocumentPage>, AppError> {
    // pdf-extract panics on some malformed inputs.
    let extracted = catch_unwind(AssertUnwindSafe(|| {
        pdf_extract::extract_text_from_mem_by_pages(&file.bytes)
    }))
    .map_err(|_| {
        AppError::new("INGEST_UNREADABLE", "PDF parser aborted on this document")
            .with_details(format!("name={}", file.name))
    })?
    .map_err(|e| {
        AppError::new("INGEST_UNREADABLE", "Failed to extract text from PDF")
            .with_details(format!("name={}; err={}", file.name, e))
    })?;

    Ok(extracted
        .into_iter()
        .enumerate()
        .map(|(i, text)| DocumentPage {
            position: PagePosition::Page(i as u32),
            text: normalize_text(&text),
        })
        .collect())
}

pub(crate) fn normalize_text(s: &str) -> String {
    s.replace("\r\n", "\n").replace('\r', "\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn plain_text_has_unknown_position() {
        let f = UploadedFile::new("notes.txt", b"line one\r\nline two".to_vec());
        let doc = load_document(&f, 1024).expect("load");
        assert_eq!(doc.kind, DocumentKind::PlainText);
        assert_eq!(doc.pages.len(), 1);
        assert_eq!(doc.pages[0].position, PagePosition::Unknown);
        assert_eq!(doc.pages[0].text, "line one\nline two");
        assert_eq!(doc.source_id, "notes.txt");
    }

    #[test]
    fn rejects_unsupported_and_oversized_uploads() {
        let f = UploadedFile::new("photo.png", vec![1, 2, 3]);
        assert_eq!(load_document(&f, 1024).unwrap_err().code, "INGEST_UNSUPPORTED_TYPE");

        let f = UploadedFile::new("big.txt", vec![b'a'; 2048]);
        assert_eq!(load_document(&f, 1024).unwrap_err().code, "INGEST_TOO_LARGE");

        let f = UploadedFile::new("blank.txt", b"   \n\n ".to_vec());
        assert_eq!(load_document(&f, 1024).unwrap_err().code, "INGEST_EMPTY_DOCUMENT");
    }

    #[test]
    fn pdf_magic_wins_over_extension() {
        let f = UploadedFile::new("report.bin", b"%PDF-1.7 rest".to_vec());
        assert_eq!(detect_kind(&f).expect("kind"), DocumentKind::Pdf);
    }

    #[test]
    fn garbage_pdf_is_unreadable_not_a_panic() {
        let f = UploadedFile::new("broken.pdf", b"%PDF-1.4 this is not a pdf".to_vec());
        assert_eq!(load_document(&f, 1024).unwrap_err().code, "INGEST_UNREADABLE");
    }

    #[test]
    fn from_path_checks_size_before_reading() {
        let dir = tempfile::tempdir().expect("tmp");
        let path = dir.path().join("doc.txt");
        let mut file = fs::File::create(&path).expect("create");
        file.write_all(&vec![b'z'; 64]).expect("write");

        assert_eq!(UploadedFile::from_path(&path, 10).unwrap_err().code, "INGEST_TOO_LARGE");
        let up = UploadedFile::from_path(&path, 100).expect("read");
        assert_eq!(up.name, "doc.txt");
        assert_eq!(up.bytes.len(), 64);
    }
}
