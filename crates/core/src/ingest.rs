use crate::IngestError;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::warn;
use walkdir::WalkDir;

pub const PDF_EXTENSION: &str = "pdf";
pub const MARKDOWN_EXTENSION: &str = "md";

pub fn discover_files(folder: &Path, extension: &str) -> Vec<PathBuf> {
    let (files, errors) = walk_matching(folder, extension);
    for error in errors {
        warn!(
            folder = %folder.display(),
            path = ?error.path(),
            %error,
            "skipping unreadable entry during discovery"
        );
    }
    files
}

fn walk_matching(folder: &Path, extension: &str) -> (Vec<PathBuf>, Vec<walkdir::Error>) {
    let mut files = Vec::new();
    let mut errors = Vec::new();

    for item in WalkDir::new(folder) {
        let entry = match item {
            Ok(entry) => entry,
            Err(error) => {
                errors.push(error);
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let matches = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(extension));

        if matches {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    (files, errors)
}

pub fn discover_pdf_files(folder: &Path) -> Vec<PathBuf> {
    discover_files(folder, PDF_EXTENSION)
}

pub fn discover_markdown_files(folder: &Path) -> Vec<PathBuf> {
    discover_files(folder, MARKDOWN_EXTENSION)
}

/// `report.pdf` -> `report.pdf.md`, next to the PDF.
pub fn sidecar_path(pdf: &Path) -> PathBuf {
    let mut name = OsString::from(pdf.as_os_str());
    name.push(".");
    name.push(MARKDOWN_EXTENSION);
    PathBuf::from(name)
}

pub fn document_id_for(path: &Path) -> Result<String, IngestError> {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .ok_or_else(|| {
            IngestError::MissingFileName(format!("path missing filename: {}", path.display()))
        })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedPdf {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OcrReport {
    pub created: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
    pub failed: Vec<FailedPdf>,
}

impl OcrReport {
    pub fn processed(&self) -> usize {
        self.created.len() + self.skipped.len() + self.failed.len()
    }
}
