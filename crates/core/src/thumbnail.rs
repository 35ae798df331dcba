//! Thumbnail pipeline.
//!
//! Runs beside full content loading. A thumbnail is computed once and kept
//! for the life of its page; it is not charged to the memory pool and never
//! evicted. Any failure degrades to a placeholder.

use crate::archive::{find_first_image, ArchiveEntry, EntryKind};
use crate::content::{classify_search, ArchiveClass, PageContent, PageKind, PagePayload};
use crate::context::{run_blocking, LoadContext};
use crate::decoder::PreferredDecoder;
use crate::error::{LoadError, LoadResult};
use crate::picture::Size;
use crate::stream::StreamSource;
use folio_pdf::{RgbaImage, ThumbnailSize};
use folio_scheduler::{Cancelled, CancellationToken};
use image::{imageops, DynamicImage};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::debug;

/// Categories shown when no unique pixel thumbnail applies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThumbnailPlaceholder {
    Media,
    Empty,
    Folder,
}

#[derive(Clone)]
pub enum Thumbnail {
    Image(Arc<RgbaImage>),
    Placeholder(ThumbnailPlaceholder),
}

impl Thumbnail {
    pub fn image(&self) -> Option<&Arc<RgbaImage>> {
        match self {
            Thumbnail::Image(image) => Some(image),
            Thumbnail::Placeholder(_) => None,
        }
    }

    pub fn placeholder(&self) -> Option<ThumbnailPlaceholder> {
        match self {
            Thumbnail::Image(_) => None,
            Thumbnail::Placeholder(placeholder) => Some(*placeholder),
        }
    }
}

impl std::fmt::Debug for Thumbnail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Thumbnail::Image(image) => write!(f, "Image({}x{})", image.width(), image.height()),
            Thumbnail::Placeholder(placeholder) => write!(f, "Placeholder({placeholder:?})"),
        }
    }
}

/// Produces and retains one page's thumbnail
#[derive(Default)]
pub struct ThumbnailLoader {
    cell: OnceCell<Thumbnail>,
    preferred: PreferredDecoder,
}

impl ThumbnailLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<Thumbnail> {
        self.cell.get().cloned()
    }

    /// Thumbnail of `content`, computing it on first call
    ///
    /// Concurrent callers wait for the same computation. The flag is true
    /// for the call that produced the thumbnail. A cancelled computation
    /// stores nothing, so the next call starts over.
    pub(crate) async fn load(
        &self,
        content: &PageContent,
        token: &CancellationToken,
    ) -> Result<(Thumbnail, bool), Cancelled> {
        let mut created = false;
        let created_flag = &mut created;

        let thumbnail = self
            .cell
            .get_or_try_init(|| async move {
                let thumbnail = match self.produce(content, token).await {
                    Ok(thumbnail) => thumbnail,
                    Err(err) if err.is_cancelled() => return Err(Cancelled),
                    Err(err) => {
                        let fallback = fallback_for(content);
                        debug!(
                            entry = content.entry().path(),
                            error = %err,
                            ?fallback,
                            "Thumbnail degraded to placeholder"
                        );
                        Thumbnail::Placeholder(fallback)
                    }
                };
                if token.is_cancelled() {
                    return Err(Cancelled);
                }
                *created_flag = true;
                Ok(thumbnail)
            })
            .await?
            .clone();

        Ok((thumbnail, created))
    }

    async fn produce(&self, content: &PageContent, token: &CancellationToken) -> LoadResult<Thumbnail> {
        let ctx = content.context();
        let entry = content.entry();

        match content.kind() {
            PageKind::Bitmap | PageKind::Animated => {
                if let Some(image) = resident_image(content) {
                    return scaled(image, ctx, token).await;
                }
                let stream = content.stream_source();
                self.decode_stream(&stream, ctx, token).await
            }
            PageKind::Pdf => pdf_thumbnail(entry, ctx, token).await,
            PageKind::Archive => {
                let (representative, class) = match content.payload() {
                    Some(PagePayload::Archive {
                        representative,
                        class,
                    }) => (representative, class),
                    _ => {
                        let depth = ctx.config().archive_search_depth;
                        let search = find_first_image(entry, depth, token).await?;
                        let class = classify_search(&search);
                        (search.image, class)
                    }
                };
                match representative {
                    Some(image) if matches!(image.kind(), EntryKind::PdfPage { .. }) => {
                        pdf_thumbnail(&image, ctx, token).await
                    }
                    Some(image) => {
                        let stream = StreamSource::new(image, true).with_caching(false);
                        self.decode_stream(&stream, ctx, token).await
                    }
                    None if class == ArchiveClass::Media => {
                        Ok(Thumbnail::Placeholder(ThumbnailPlaceholder::Media))
                    }
                    None => Ok(Thumbnail::Placeholder(fallback_for(content))),
                }
            }
            PageKind::File => Ok(Thumbnail::Placeholder(fallback_for(content))),
        }
    }

    async fn decode_stream(
        &self,
        stream: &StreamSource,
        ctx: &LoadContext,
        token: &CancellationToken,
    ) -> LoadResult<Thumbnail> {
        stream.ensure_cached(token).await?;
        let bytes = stream.read_all(token).await?;
        let (image, _) = ctx.decoders().decode(bytes, &self.preferred, token).await?;
        scaled(Arc::new(image), ctx, token).await
    }
}

/// Full-resolution pixels already held by the content
fn resident_image(content: &PageContent) -> Option<Arc<DynamicImage>> {
    match content.payload()? {
        PagePayload::Bitmap(image) => Some(image),
        PagePayload::Animation(frames) => frames
            .first()
            .map(|frame| Arc::new(DynamicImage::ImageRgba8(frame.image.clone()))),
        _ => None,
    }
}

async fn scaled(
    image: Arc<DynamicImage>,
    ctx: &LoadContext,
    token: &CancellationToken,
) -> LoadResult<Thumbnail> {
    let edge = ctx.config().thumbnail_size;
    run_blocking(token, move || {
        let target = Size::new(image.width(), image.height()).fit_within(Size::new(edge, edge));
        let thumbnail = imageops::thumbnail(&*image, target.width, target.height);
        Ok(Thumbnail::Image(Arc::new(thumbnail)))
    })
    .await
}

async fn pdf_thumbnail(
    entry: &ArchiveEntry,
    ctx: &LoadContext,
    token: &CancellationToken,
) -> LoadResult<Thumbnail> {
    let EntryKind::PdfPage { page_index } = entry.kind() else {
        return Err(LoadError::Unsupported(format!("{} is not a PDF page", entry.path())));
    };
    let document = entry.source().pdf_document(entry, token).await?;
    let rasterizer = Arc::clone(ctx.rasterizer());
    let edge = ctx.config().thumbnail_size;

    run_blocking(token, move || {
        let target = ThumbnailSize {
            width_px: edge,
            height_px: edge,
        };
        let image = rasterizer.render_thumbnail(&document, page_index, target)?;
        Ok(Thumbnail::Image(Arc::new(image)))
    })
    .await
}

fn fallback_for(content: &PageContent) -> ThumbnailPlaceholder {
    let entry = content.entry();
    match content.kind() {
        PageKind::Archive if entry.kind() == EntryKind::Directory => ThumbnailPlaceholder::Folder,
        PageKind::File if entry.is_media() => ThumbnailPlaceholder::Media,
        _ => ThumbnailPlaceholder::Empty,
    }
}
