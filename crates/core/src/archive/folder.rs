//! Filesystem folder source

use super::{
    container_format, kind_for_file, ArchiveEntry, ArchiveSource, ContainerFormat, EntryInfo,
    EntryKind, EntryStream, PdfArchive, ZipArchive,
};
use crate::error::{LoadError, LoadResult};
use async_trait::async_trait;
use folio_scheduler::CancellationToken;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Entries of one directory on disk, sorted by name
///
/// Entries are filesystem backed, so their streams are never cached.
pub struct FolderArchive {
    root: PathBuf,
    name: String,
}

impl FolderArchive {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        let name = root
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| root.display().to_string());
        Self { root, name }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, entry: &ArchiveEntry) -> PathBuf {
        self.root.join(entry.path().trim_end_matches('/'))
    }
}

#[async_trait]
impl ArchiveSource for FolderArchive {
    fn name(&self) -> &str {
        &self.name
    }

    async fn entries(&self, token: &CancellationToken) -> LoadResult<Vec<EntryInfo>> {
        let mut dir = tokio::fs::read_dir(&self.root).await.map_err(|err| {
            LoadError::SourceUnavailable(format!("{}: {err}", self.root.display()))
        })?;

        let mut entries = Vec::new();
        while let Some(item) = dir.next_entry().await? {
            token.check()?;
            let metadata = match item.metadata().await {
                Ok(metadata) => metadata,
                Err(err) => {
                    debug!(path = %item.path().display(), error = %err, "Skipping unreadable entry");
                    continue;
                }
            };
            let name = item.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }

            let kind = if metadata.is_dir() {
                EntryKind::Directory
            } else {
                kind_for_file(&name)
            };
            entries.push(EntryInfo {
                path: name,
                length: if metadata.is_dir() { 0 } else { metadata.len() },
                last_write: metadata.modified().ok(),
                kind,
                is_filesystem: true,
            });
        }

        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    async fn open_entry(
        &self,
        entry: &ArchiveEntry,
        _decrypt: bool,
        token: &CancellationToken,
    ) -> LoadResult<EntryStream> {
        token.check()?;
        let path = self.resolve(entry);
        let file = tokio::fs::File::open(&path).await.map_err(|err| {
            LoadError::SourceUnavailable(format!("{}: {err}", path.display()))
        })?;
        Ok(Box::pin(file))
    }

    async fn open_container(
        &self,
        entry: &ArchiveEntry,
        _token: &CancellationToken,
    ) -> LoadResult<Option<Arc<dyn ArchiveSource>>> {
        let path = self.resolve(entry);
        let container: Arc<dyn ArchiveSource> = match entry.kind() {
            EntryKind::Directory => Arc::new(FolderArchive::new(&path)),
            EntryKind::Archive => match container_format(entry.name()) {
                Some(ContainerFormat::Zip) => Arc::new(ZipArchive::open(&path).await?),
                Some(ContainerFormat::Pdf) => Arc::new(PdfArchive::open(&path).await?),
                None => return Ok(None),
            },
            _ => return Ok(None),
        };
        Ok(Some(container))
    }
}
