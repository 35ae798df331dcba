//! PDF document source: one entry per page

use super::{ArchiveEntry, ArchiveSource, EntryInfo, EntryKind, EntryStream};
use crate::error::{LoadError, LoadResult};
use async_trait::async_trait;
use folio_pdf::PdfDocument;
use folio_scheduler::CancellationToken;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

pub struct PdfArchive {
    name: String,
    document: Arc<PdfDocument>,
}

impl PdfArchive {
    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> LoadResult<Self> {
        Ok(Self {
            name: name.into(),
            document: Arc::new(PdfDocument::from_bytes(bytes)?),
        })
    }

    /// Read and parse a PDF file; parsing runs on the blocking pool
    pub async fn open(path: impl AsRef<Path>) -> LoadResult<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await.map_err(|err| {
            LoadError::SourceUnavailable(format!("{}: {err}", path.display()))
        })?;
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        tokio::task::spawn_blocking(move || Self::from_bytes(name, bytes))
            .await
            .map_err(|err| LoadError::Decode(format!("PDF parse task failed: {err}")))?
    }

    pub fn document(&self) -> &Arc<PdfDocument> {
        &self.document
    }
}

#[async_trait]
impl ArchiveSource for PdfArchive {
    fn name(&self) -> &str {
        &self.name
    }

    async fn entries(&self, token: &CancellationToken) -> LoadResult<Vec<EntryInfo>> {
        token.check()?;
        Ok((0..self.document.page_count())
            .map(|page_index| EntryInfo {
                path: format!("page {:04}", page_index + 1),
                length: 0,
                last_write: None,
                kind: EntryKind::PdfPage { page_index },
                is_filesystem: false,
            })
            .collect())
    }

    /// Pages have no bytes of their own; the stream is the whole document
    async fn open_entry(
        &self,
        _entry: &ArchiveEntry,
        _decrypt: bool,
        token: &CancellationToken,
    ) -> LoadResult<EntryStream> {
        token.check()?;
        Ok(Box::pin(Cursor::new(self.document.bytes().to_vec())))
    }

    async fn open_container(
        &self,
        _entry: &ArchiveEntry,
        _token: &CancellationToken,
    ) -> LoadResult<Option<Arc<dyn ArchiveSource>>> {
        Ok(None)
    }

    async fn pdf_document(
        &self,
        entry: &ArchiveEntry,
        token: &CancellationToken,
    ) -> LoadResult<Arc<PdfDocument>> {
        token.check()?;
        match entry.kind() {
            EntryKind::PdfPage { .. } => Ok(Arc::clone(&self.document)),
            _ => Err(LoadError::Unsupported(format!(
                "{} is not a PDF page",
                entry.path()
            ))),
        }
    }
}
