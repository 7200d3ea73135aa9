//! Source document loading.
//!
//! PDFs (by `.pdf` extension) go through `pdf-extract` and are split into
//! one [`SourceSection`] per page on form-feed characters. Anything else is
//! read as UTF-8 text and becomes a single section.

use std::path::Path;

use thiserror::Error;

use crate::models::SourceSection;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("PDF extraction failed for {path}: {message}")]
    Pdf { path: String, message: String },
    #[error("{path} is not valid UTF-8 text")]
    NotUtf8 { path: String },
    #[error("{path} contains no extractable text")]
    Empty { path: String },
}

/// Load the corpus file as ordered sections.
pub fn load_source(path: &Path) -> Result<Vec<SourceSection>, ExtractError> {
    let display = path.display().to_string();
    let bytes = std::fs::read(path).map_err(|source| ExtractError::Io {
        path: display.clone(),
        source,
    })?;

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| display.clone());

    let is_pdf = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

    let sections = if is_pdf {
        let text = pdf_extract::extract_text_from_mem(&bytes).map_err(|e| ExtractError::Pdf {
            path: display.clone(),
            message: e.to_string(),
        })?;
        split_pages(&name, &text)
    } else {
        let text = String::from_utf8(bytes).map_err(|_| ExtractError::NotUtf8 {
            path: display.clone(),
        })?;
        vec![SourceSection {
            source_id: name,
            text,
        }]
    };

    if sections.iter().all(|s| s.text.trim().is_empty()) {
        return Err(ExtractError::Empty { path: display });
    }
    Ok(sections)
}

/// One section per non-blank page; page numbers count from 1 and keep
/// their original position even when blank pages are dropped.
fn split_pages(name: &str, text: &str) -> Vec<SourceSection> {
    text.split('\u{c}')
        .enumerate()
        .filter(|(_, page)| !page.trim().is_empty())
        .map(|(i, page)| SourceSection {
            source_id: format!("{}#page={}", name, i + 1),
            text: page.to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_plain_text_single_section() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("notes.txt");
        std::fs::write(&path, "line one\n\nline two").unwrap();

        let sections = load_source(&path).unwrap();
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].source_id, "notes.txt");
        assert_eq!(sections[0].text, "line one\n\nline two");
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let tmp = TempDir::new().unwrap();
        let err = load_source(&tmp.path().join("absent.txt")).unwrap_err();
        assert!(matches!(err, ExtractError::Io { .. }));
    }

    #[test]
    fn test_blank_file_is_empty_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("blank.md");
        std::fs::write(&path, "  \n\n ").unwrap();
        assert!(matches!(load_source(&path).unwrap_err(), ExtractError::Empty { .. }));
    }

    #[test]
    fn test_binary_text_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("data.txt");
        std::fs::write(&path, [0xff, 0xfe, 0x00, 0x41]).unwrap();
        assert!(matches!(load_source(&path).unwrap_err(), ExtractError::NotUtf8 { .. }));
    }

    #[test]
    fn test_garbage_pdf_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("broken.pdf");
        std::fs::write(&path, b"this is not a pdf").unwrap();
        assert!(matches!(load_source(&path).unwrap_err(), ExtractError::Pdf { .. }));
    }

    #[test]
    fn test_split_pages_numbers_from_one() {
        let sections = split_pages("manual.pdf", "intro\u{c}\u{c}chapter two");
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].source_id, "manual.pdf#page=1");
        assert_eq!(sections[1].source_id, "manual.pdf#page=3");
    }
}
