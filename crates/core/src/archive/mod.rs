//! Archive layer: where page bytes come from.
//!
//! An [`ArchiveSource`] enumerates entries and opens byte streams for them.
//! Three sources ship with the crate: plain folders, ZIP archives (nested
//! archives included) and PDF documents (one entry per page).

mod folder;
mod pdf;
mod zip_archive;

pub use self::folder::FolderArchive;
pub use self::pdf::PdfArchive;
pub use self::zip_archive::ZipArchive;

use crate::error::{LoadError, LoadResult};
use async_trait::async_trait;
use folio_pdf::PdfDocument;
use folio_scheduler::CancellationToken;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::path::Path;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::io::AsyncRead;
use tracing::trace;

/// Byte stream over one entry
pub type EntryStream = Pin<Box<dyn AsyncRead + Send>>;

const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "webp", "bmp", "tif", "tiff", "ico", "tga", "pnm", "qoi",
];
const ANIMATED_EXTENSIONS: &[&str] = &["png", "gif", "webp"];
const ARCHIVE_EXTENSIONS: &[&str] = &["zip", "cbz"];
const MEDIA_EXTENSIONS: &[&str] = &[
    "mp4", "m4v", "mkv", "webm", "avi", "mov", "wmv", "mp3", "flac", "ogg", "wav",
];

/// What an entry is, as far as the archive layer can tell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// A plain file
    File,
    /// A folder
    Directory,
    /// A container file (ZIP or PDF) that can be opened as a source itself
    Archive,
    /// One page of a PDF document
    PdfPage { page_index: u32 },
}

/// Entry attributes reported by a source during enumeration
#[derive(Debug, Clone)]
pub struct EntryInfo {
    /// Path inside the source, `/` separated
    pub path: String,
    pub length: u64,
    pub last_write: Option<SystemTime>,
    pub kind: EntryKind,
    pub is_filesystem: bool,
}

/// An addressable byte source representing one page
pub struct ArchiveEntry {
    info: EntryInfo,
    deleted: AtomicBool,
    source: Arc<dyn ArchiveSource>,
}

impl ArchiveEntry {
    pub fn new(info: EntryInfo, source: Arc<dyn ArchiveSource>) -> Self {
        Self {
            info,
            deleted: AtomicBool::new(false),
            source,
        }
    }

    pub fn path(&self) -> &str {
        &self.info.path
    }

    /// Last path component
    pub fn name(&self) -> &str {
        self.info
            .path
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or(&self.info.path)
    }

    /// Lower-case extension, if any
    pub fn extension(&self) -> Option<String> {
        Path::new(self.name())
            .extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
    }

    pub fn length(&self) -> u64 {
        self.info.length
    }

    pub fn last_write(&self) -> Option<SystemTime> {
        self.info.last_write
    }

    pub fn kind(&self) -> EntryKind {
        self.info.kind
    }

    pub fn is_filesystem(&self) -> bool {
        self.info.is_filesystem
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }

    pub fn set_deleted(&self, deleted: bool) {
        self.deleted.store(deleted, Ordering::Release);
    }

    pub fn source(&self) -> &Arc<dyn ArchiveSource> {
        &self.source
    }

    pub fn is_image(&self) -> bool {
        self.info.kind == EntryKind::File
            && self
                .extension()
                .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
    }

    /// Image container formats that may hold an animation
    pub fn may_be_animated(&self) -> bool {
        self.is_image()
            && self
                .extension()
                .is_some_and(|ext| ANIMATED_EXTENSIONS.contains(&ext.as_str()))
    }

    pub fn is_media(&self) -> bool {
        self.info.kind == EntryKind::File
            && self
                .extension()
                .is_some_and(|ext| MEDIA_EXTENSIONS.contains(&ext.as_str()))
    }

    /// Open a byte stream over the entry
    pub async fn open(&self, decrypt: bool, token: &CancellationToken) -> LoadResult<EntryStream> {
        if self.is_deleted() {
            return Err(LoadError::SourceUnavailable(format!(
                "{} has been deleted",
                self.path()
            )));
        }
        token.check()?;
        self.source.open_entry(self, decrypt, token).await
    }
}

impl std::fmt::Debug for ArchiveEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveEntry")
            .field("source", &self.source.name())
            .field("path", &self.info.path)
            .field("kind", &self.info.kind)
            .field("length", &self.info.length)
            .finish()
    }
}

/// A container of entries: a folder, an archive file, a PDF document
#[async_trait]
pub trait ArchiveSource: Send + Sync {
    /// Display name of the source
    fn name(&self) -> &str;

    /// List the entries directly inside the source
    async fn entries(&self, token: &CancellationToken) -> LoadResult<Vec<EntryInfo>>;

    /// Open a byte stream over one of the source's entries
    async fn open_entry(
        &self,
        entry: &ArchiveEntry,
        decrypt: bool,
        token: &CancellationToken,
    ) -> LoadResult<EntryStream>;

    /// Open a `Directory` or `Archive` entry as a source of its own
    ///
    /// Returns `None` if the entry cannot be opened as a container.
    async fn open_container(
        &self,
        entry: &ArchiveEntry,
        token: &CancellationToken,
    ) -> LoadResult<Option<Arc<dyn ArchiveSource>>>;

    /// The PDF document behind a `PdfPage` entry
    async fn pdf_document(
        &self,
        entry: &ArchiveEntry,
        _token: &CancellationToken,
    ) -> LoadResult<Arc<PdfDocument>> {
        Err(LoadError::Unsupported(format!(
            "{} is not a PDF page",
            entry.path()
        )))
    }
}

/// Enumerate a source into shareable entries
pub async fn enumerate(
    source: &Arc<dyn ArchiveSource>,
    token: &CancellationToken,
) -> LoadResult<Vec<Arc<ArchiveEntry>>> {
    let infos = source.entries(token).await?;
    trace!(source = source.name(), entries = infos.len(), "Enumerated source");
    Ok(infos
        .into_iter()
        .map(|info| Arc::new(ArchiveEntry::new(info, Arc::clone(source))))
        .collect())
}

/// Outcome of searching a container for a representative image
#[derive(Debug, Clone, Default)]
pub struct ImageSearch {
    /// First image found within the depth bound
    pub image: Option<Arc<ArchiveEntry>>,
    /// A media file was seen while searching
    pub saw_media: bool,
}

/// Find the first image inside a folder or archive entry
///
/// Direct children are searched before descending; `max_depth` of 1 only
/// looks at direct children and 0 does not search at all.
pub fn find_first_image<'a>(
    entry: &'a ArchiveEntry,
    max_depth: usize,
    token: &'a CancellationToken,
) -> BoxFuture<'a, LoadResult<ImageSearch>> {
    async move {
        let mut search = ImageSearch::default();
        if max_depth == 0 {
            return Ok(search);
        }
        token.check()?;

        let Some(container) = entry.source().open_container(entry, token).await? else {
            return Ok(search);
        };
        let children = enumerate(&container, token).await?;

        if let Some(image) = children
            .iter()
            .find(|child| child.is_image() || matches!(child.kind(), EntryKind::PdfPage { .. }))
        {
            search.image = Some(Arc::clone(image));
            return Ok(search);
        }
        search.saw_media = children.iter().any(|child| child.is_media());

        for child in children
            .iter()
            .filter(|child| matches!(child.kind(), EntryKind::Directory | EntryKind::Archive))
        {
            let nested = find_first_image(child, max_depth - 1, token).await?;
            search.saw_media |= nested.saw_media;
            if nested.image.is_some() {
                search.image = nested.image;
                return Ok(search);
            }
        }

        Ok(search)
    }
    .boxed()
}

/// Container type of an `Archive` entry, judged by extension
pub(crate) fn container_format(name: &str) -> Option<ContainerFormat> {
    let ext = Path::new(name)
        .extension()?
        .to_string_lossy()
        .to_ascii_lowercase();
    if ARCHIVE_EXTENSIONS.contains(&ext.as_str()) {
        Some(ContainerFormat::Zip)
    } else if ext == "pdf" {
        Some(ContainerFormat::Pdf)
    } else {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ContainerFormat {
    Zip,
    Pdf,
}

/// Classify a plain file name into an entry kind
pub(crate) fn kind_for_file(name: &str) -> EntryKind {
    if container_format(name).is_some() {
        EntryKind::Archive
    } else {
        EntryKind::File
    }
}

/// Most bytes reserved up front on the strength of a reported entry length
const MAX_PREALLOCATION: u64 = 64 * 1024 * 1024;

/// Buffer capacity for reading an entry that claims to be `length` bytes
///
/// Lengths come from archive headers and may be corrupt; larger entries
/// still read fine, the buffer just grows as bytes arrive.
pub(crate) fn capacity_hint(length: u64) -> usize {
    usize::try_from(length.min(MAX_PREALLOCATION)).unwrap_or(0)
}

/// Open the source that best matches a filesystem path
pub async fn open_path(path: impl AsRef<Path>) -> LoadResult<Arc<dyn ArchiveSource>> {
    let path = path.as_ref();
    let metadata = tokio::fs::metadata(path).await.map_err(|err| {
        LoadError::SourceUnavailable(format!("{}: {err}", path.display()))
    })?;

    if metadata.is_dir() {
        return Ok(Arc::new(FolderArchive::new(path)));
    }

    let name = path.to_string_lossy();
    match container_format(&name) {
        Some(ContainerFormat::Zip) => Ok(Arc::new(ZipArchive::open(path).await?)),
        Some(ContainerFormat::Pdf) => Ok(Arc::new(PdfArchive::open(path).await?)),
        None => Err(LoadError::Unsupported(format!(
            "{} is not a folder, archive or PDF",
            path.display()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EmptySource;

    #[async_trait]
    impl ArchiveSource for EmptySource {
        fn name(&self) -> &str {
            "empty"
        }

        async fn entries(&self, _token: &CancellationToken) -> LoadResult<Vec<EntryInfo>> {
            Ok(Vec::new())
        }

        async fn open_entry(
            &self,
            entry: &ArchiveEntry,
            _decrypt: bool,
            _token: &CancellationToken,
        ) -> LoadResult<EntryStream> {
            Err(LoadError::SourceUnavailable(entry.path().to_string()))
        }

        async fn open_container(
            &self,
            _entry: &ArchiveEntry,
            _token: &CancellationToken,
        ) -> LoadResult<Option<Arc<dyn ArchiveSource>>> {
            Ok(None)
        }
    }

    fn entry(path: &str, kind: EntryKind) -> ArchiveEntry {
        ArchiveEntry::new(
            EntryInfo {
                path: path.to_string(),
                length: 0,
                last_write: None,
                kind,
                is_filesystem: false,
            },
            Arc::new(EmptySource),
        )
    }

    #[test]
    fn test_entry_name_and_extension() {
        let entry = entry("chapter 1/Page01.JPG", EntryKind::File);
        assert_eq!(entry.name(), "Page01.JPG");
        assert_eq!(entry.extension().as_deref(), Some("jpg"));
        assert!(entry.is_image());
        assert!(!entry.may_be_animated());
    }

    #[test]
    fn test_entry_classification_helpers() {
        assert!(entry("a.gif", EntryKind::File).may_be_animated());
        assert!(entry("clip.mp4", EntryKind::File).is_media());
        assert!(!entry("notes.txt", EntryKind::File).is_image());
        assert!(!entry("sub/", EntryKind::Directory).is_image());
        assert_eq!(entry("sub/", EntryKind::Directory).name(), "sub");
    }

    #[test]
    fn test_kind_for_file() {
        assert_eq!(kind_for_file("book.cbz"), EntryKind::Archive);
        assert_eq!(kind_for_file("doc.PDF"), EntryKind::Archive);
        assert_eq!(kind_for_file("page.png"), EntryKind::File);
        assert_eq!(container_format("x.zip"), Some(ContainerFormat::Zip));
    }

    #[test]
    fn test_capacity_hint_is_capped() {
        assert_eq!(capacity_hint(0), 0);
        assert_eq!(capacity_hint(4096), 4096);
        assert_eq!(capacity_hint(u64::MAX), MAX_PREALLOCATION as usize);
    }

    #[tokio::test]
    async fn test_deleted_entry_cannot_open() {
        let entry = entry("a.png", EntryKind::File);
        entry.set_deleted(true);

        let result = entry.open(false, &CancellationToken::new()).await;
        assert!(matches!(result, Err(LoadError::SourceUnavailable(_))));
    }

    #[tokio::test]
    async fn test_find_first_image_depth_zero() {
        let entry = entry("sub/", EntryKind::Directory);
        let search = find_first_image(&entry, 0, &CancellationToken::new())
            .await
            .unwrap();
        assert!(search.image.is_none());
        assert!(!search.saw_media);
    }
}
