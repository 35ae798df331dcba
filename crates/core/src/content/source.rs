use crate::archive::ArchiveEntry;
use crate::picture::{PictureInfo, Size};
use crate::stream::StreamSource;
use folio_pdf::RgbaImage;
use image::DynamicImage;
use std::fmt;
use std::sync::Arc;

/// One frame of an animation
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: RgbaImage,
    pub delay_ms: u32,
}

/// Icon shown by a placeholder payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderIcon {
    Document,
    Media,
}

/// What a folder or archive page resolved to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveClass {
    /// Holds media files but no image
    Media,
    /// Has an image to use as its thumbnail
    Unique,
    /// Nothing displayable within the search depth
    Empty,
}

/// Decoded in-memory representation of a page
#[derive(Clone)]
pub enum PagePayload {
    Bitmap(Arc<DynamicImage>),
    Animation(Arc<Vec<Frame>>),
    PdfRaster(Arc<RgbaImage>),
    Placeholder {
        icon: PlaceholderIcon,
        message: String,
    },
    Archive {
        representative: Option<Arc<ArchiveEntry>>,
        class: ArchiveClass,
    },
}

impl PagePayload {
    /// Bytes of pixel data held by the payload
    pub fn memory_size(&self) -> usize {
        match self {
            PagePayload::Bitmap(image) => image.as_bytes().len(),
            PagePayload::Animation(frames) => {
                frames.iter().map(|frame| frame.image.as_raw().len()).sum()
            }
            PagePayload::PdfRaster(image) => image.as_raw().len(),
            PagePayload::Placeholder { .. } | PagePayload::Archive { .. } => 0,
        }
    }
}

impl fmt::Debug for PagePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PagePayload::Bitmap(image) => write!(f, "Bitmap({}x{})", image.width(), image.height()),
            PagePayload::Animation(frames) => write!(f, "Animation({} frames)", frames.len()),
            PagePayload::PdfRaster(image) => {
                write!(f, "PdfRaster({}x{})", image.width(), image.height())
            }
            PagePayload::Placeholder { icon, message } => f
                .debug_struct("Placeholder")
                .field("icon", icon)
                .field("message", message)
                .finish(),
            PagePayload::Archive {
                representative,
                class,
            } => f
                .debug_struct("Archive")
                .field("representative", &representative.as_ref().map(|e| e.path()))
                .field("class", class)
                .finish(),
        }
    }
}

/// Result of one load attempt
#[derive(Clone, Default)]
pub struct PageSource {
    /// Decoded payload; `None` when unloaded or failed
    pub data: Option<PagePayload>,
    /// Present iff the load failed
    pub error_message: Option<String>,
    pub picture_info: Option<PictureInfo>,
    /// Bytes charged to the memory pool
    pub data_size: usize,
    /// Stream whose byte cache the payload retains
    pub(crate) stream: Option<Arc<StreamSource>>,
}

impl PageSource {
    pub fn new(data: PagePayload, picture_info: Option<PictureInfo>) -> Self {
        let data_size = data.memory_size();
        Self {
            data: Some(data),
            error_message: None,
            picture_info,
            data_size,
            stream: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            error_message: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn is_failed(&self) -> bool {
        self.error_message.is_some()
    }

    /// Display size, or zero when there is no picture
    pub fn size(&self) -> Size {
        self.picture_info
            .as_ref()
            .map(|info| info.size)
            .unwrap_or_default()
    }

    /// Keep the stream's byte cache alive with the payload, charging it too
    pub(crate) fn retain_stream(mut self, stream: Arc<StreamSource>) -> Self {
        let cached = stream.cache_size();
        if cached > 0 {
            self.data_size += cached;
            self.stream = Some(stream);
        }
        self
    }

    /// Release the retained stream cache
    pub(crate) fn release_stream(&self) {
        if let Some(stream) = &self.stream {
            stream.clear_cache();
        }
    }
}

impl fmt::Debug for PageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageSource")
            .field("data", &self.data)
            .field("error_message", &self.error_message)
            .field("picture_info", &self.picture_info)
            .field("data_size", &self.data_size)
            .finish()
    }
}
