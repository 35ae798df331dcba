//! ZIP archive source

use super::{
    capacity_hint, container_format, kind_for_file, ArchiveEntry, ArchiveSource, ContainerFormat, EntryInfo,
    EntryKind, EntryStream, PdfArchive,
};
use crate::context::run_blocking;
use crate::error::{LoadError, LoadResult};
use async_trait::async_trait;
use folio_scheduler::CancellationToken;
use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Files of a ZIP archive held in memory, flattened and sorted by path
///
/// Enumeration and extraction run on the blocking pool. Nested ZIP and PDF files are
/// reported as `Archive` entries and can be opened as sources of their own.
pub struct ZipArchive {
    name: String,
    bytes: Arc<Vec<u8>>,
    password: Option<Arc<Vec<u8>>>,
}

impl ZipArchive {
    /// Wrap in-memory archive bytes, validating the central directory
    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> LoadResult<Self> {
        ::zip::ZipArchive::new(Cursor::new(bytes.as_slice()))?;
        Ok(Self {
            name: name.into(),
            bytes: Arc::new(bytes),
            password: None,
        })
    }

    /// Read an archive file from disk
    pub async fn open(path: impl AsRef<Path>) -> LoadResult<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await.map_err(|err| {
            LoadError::SourceUnavailable(format!("{}: {err}", path.display()))
        })?;
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::from_bytes(name, bytes)
    }

    /// Password used when an entry is opened with `decrypt` set
    pub fn with_password(mut self, password: impl Into<Vec<u8>>) -> Self {
        self.password = Some(Arc::new(password.into()));
        self
    }

    /// Size of the archive in bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    async fn extract(
        &self,
        entry: &ArchiveEntry,
        decrypt: bool,
        token: &CancellationToken,
    ) -> LoadResult<Vec<u8>> {
        let bytes = Arc::clone(&self.bytes);
        let path = entry.path().to_string();
        let password = if decrypt { self.password.clone() } else { None };

        run_blocking(token, move || {
            let mut archive = ::zip::ZipArchive::new(Cursor::new(bytes.as_slice()))?;
            let index = archive
                .index_for_name(&path)
                .ok_or(::zip::result::ZipError::FileNotFound)?;
            let encrypted = archive.by_index_raw(index)?.encrypted();
            let mut file = match password {
                Some(password) if encrypted => {
                    archive.by_index_decrypt(index, password.as_slice())?
                }
                _ => archive.by_index(index)?,
            };
            let mut buf = Vec::with_capacity(capacity_hint(file.size()));
            file.read_to_end(&mut buf)?;
            Ok(buf)
        })
        .await
    }
}

#[async_trait]
impl ArchiveSource for ZipArchive {
    fn name(&self) -> &str {
        &self.name
    }

    async fn entries(&self, token: &CancellationToken) -> LoadResult<Vec<EntryInfo>> {
        let bytes = Arc::clone(&self.bytes);

        run_blocking(token, move || {
            let mut archive = ::zip::ZipArchive::new(Cursor::new(bytes.as_slice()))?;

            let mut entries = Vec::with_capacity(archive.len());
            for index in 0..archive.len() {
                let file = archive.by_index_raw(index)?;
                let path = file.name().to_string();
                if file.is_dir() || path.starts_with("__MACOSX/") {
                    continue;
                }
                entries.push(EntryInfo {
                    kind: kind_for_file(&path),
                    length: file.size(),
                    last_write: None,
                    is_filesystem: false,
                    path,
                });
            }

            entries.sort_by(|a, b| a.path.cmp(&b.path));
            Ok(entries)
        })
        .await
    }

    async fn open_entry(
        &self,
        entry: &ArchiveEntry,
        decrypt: bool,
        token: &CancellationToken,
    ) -> LoadResult<EntryStream> {
        let bytes = self.extract(entry, decrypt, token).await?;
        Ok(Box::pin(Cursor::new(bytes)))
    }

    async fn open_container(
        &self,
        entry: &ArchiveEntry,
        token: &CancellationToken,
    ) -> LoadResult<Option<Arc<dyn ArchiveSource>>> {
        if entry.kind() != EntryKind::Archive {
            return Ok(None);
        }
        let Some(format) = container_format(entry.name()) else {
            return Ok(None);
        };

        let bytes = self.extract(entry, false, token).await?;
        debug!(archive = %self.name, entry = entry.path(), bytes = bytes.len(), "Opening nested container");
        let container: Arc<dyn ArchiveSource> = match format {
            ContainerFormat::Zip => Arc::new(ZipArchive::from_bytes(entry.name(), bytes)?),
            ContainerFormat::Pdf => Arc::new(PdfArchive::from_bytes(entry.name(), bytes)?),
        };
        Ok(Some(container))
    }
}
