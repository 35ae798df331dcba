//! Folio Core Library
//!
//! Page content loading for an image and document viewer: per-page load
//! state machines for bitmaps, animations, PDF pages, archives and plain
//! files, a shared byte cache for archive entries, a thumbnail pipeline and
//! memory accounting through the `folio-cache` pool.
//!
//! # Example
//!
//! ```no_run
//! use folio_core::{Book, LoadContext, ViewerConfig};
//! use folio_scheduler::CancellationToken;
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), folio_core::LoadError> {
//! let ctx = Arc::new(LoadContext::new(ViewerConfig::default().with_memory_limit_mb(256)));
//! let token = CancellationToken::new();
//!
//! let book = Book::open_path("comic.cbz", ctx, &token).await?;
//! let summary = book.load_all(&token).await;
//! println!("{} pages loaded, {} failed", summary.loaded, summary.failed);
//!
//! book.close().await;
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod book;
pub mod config;
pub mod content;
pub mod context;
pub mod decoder;
pub mod error;
pub mod page;
pub mod picture;
pub mod sniff;
pub mod stream;
pub mod thumbnail;

#[cfg(test)]
mod testing;

pub use archive::{
    ArchiveEntry, ArchiveSource, EntryInfo, EntryKind, FolderArchive, PdfArchive, ZipArchive,
};
pub use book::{Book, LoadSummary};
pub use config::{ConfigError, ViewerConfig};
pub use content::{
    AnimationClass, ArchiveClass, ContentState, Frame, PageContent, PageKind, PagePayload,
    PageSource, PlaceholderIcon,
};
pub use context::LoadContext;
pub use decoder::{DecoderRegistry, ImageCrateDecoder, ImageDecoder};
pub use error::{BatchError, ErrorKind, LoadError, LoadResult, PageOpError};
pub use page::{Page, PageEvent, PageId, PendingOperation};
pub use picture::{DisplayPolicy, PictureInfo, Size};
pub use stream::{ByteView, StreamSource};
pub use thumbnail::{Thumbnail, ThumbnailLoader, ThumbnailPlaceholder};
