use crate::error::ExtractionError;
use crate::extract::{DocxReader, PdfReader, XlsxReader};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Document types the indexer knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DocumentKind {
    Text,
    Markdown,
    Pdf,
    Docx,
    Csv,
    Xlsx,
    Image,
}

impl DocumentKind {
    /// Detect kind from file extension
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "txt" => Some(Self::Text),
            "md" => Some(Self::Markdown),
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Docx),
            "csv" => Some(Self::Csv),
            "xlsx" => Some(Self::Xlsx),
            "png" | "jpg" | "jpeg" | "gif" | "bmp" | "tiff" | "webp" | "heic" => Some(Self::Image),
            _ => None,
        }
    }

    pub fn from_path(path: impl AsRef<Path>) -> Option<Self> {
        path.as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Markdown => "markdown",
            Self::Pdf => "pdf",
            Self::Docx => "docx",
            Self::Csv => "csv",
            Self::Xlsx => "xlsx",
            Self::Image => "image",
        }
    }

    pub const fn is_image(self) -> bool {
        matches!(self, Self::Image)
    }
}

/// Extracts plain text from one kind of document
pub trait ContentReader: Send + Sync {
    fn read(&self, path: &Path) -> Result<String, ExtractionError>;
}

/// Reads the file as UTF-8, replacing invalid sequences
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextReader;

impl ContentReader for PlainTextReader {
    fn read(&self, path: &Path) -> Result<String, ExtractionError> {
        let bytes = std::fs::read(path).map_err(|e| ExtractionError::ReadFailure {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// Registry of readers by document kind.
///
/// Only kinds with a registered reader are scanned.
#[derive(Clone)]
pub struct ContentReaders {
    readers: HashMap<DocumentKind, Arc<dyn ContentReader>>,
}

impl Default for ContentReaders {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for ContentReaders {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentReaders")
            .field("kinds", &self.supported_kinds())
            .finish()
    }
}

impl ContentReaders {
    pub fn empty() -> Self {
        Self {
            readers: HashMap::new(),
        }
    }

    /// Plain-text kinds (`.txt`, `.md`, `.csv`) plus PDF, DOCX and XLSX
    pub fn with_defaults() -> Self {
        let plain: Arc<dyn ContentReader> = Arc::new(PlainTextReader);
        let mut readers = Self::empty();
        for kind in [DocumentKind::Text, DocumentKind::Markdown, DocumentKind::Csv] {
            readers.readers.insert(kind, plain.clone());
        }
        readers
            .register(DocumentKind::Pdf, PdfReader)
            .register(DocumentKind::Docx, DocxReader)
            .register(DocumentKind::Xlsx, XlsxReader)
    }

    #[must_use]
    pub fn register(mut self, kind: DocumentKind, reader: impl ContentReader + 'static) -> Self {
        self.readers.insert(kind, Arc::new(reader));
        self
    }

    pub fn supports(&self, kind: DocumentKind) -> bool {
        self.readers.contains_key(&kind)
    }

    pub fn supported_kinds(&self) -> Vec<DocumentKind> {
        let mut kinds: Vec<DocumentKind> = self.readers.keys().copied().collect();
        kinds.sort();
        kinds
    }

    pub fn read(&self, path: &Path) -> Result<String, ExtractionError> {
        DocumentKind::from_path(path)
            .and_then(|kind| self.readers.get(&kind))
            .ok_or_else(|| ExtractionError::UnsupportedType(path.to_path_buf()))?
            .read(path)
    }
}
