//! In-memory fixtures shared by unit tests

use crate::archive::{kind_for_file, ArchiveEntry, ArchiveSource, EntryInfo, EntryStream};
use crate::error::{LoadError, LoadResult};
use async_trait::async_trait;
use folio_scheduler::CancellationToken;
use image::codecs::gif::{GifEncoder, Repeat};
use image::{DynamicImage, Frame, ImageFormat, Rgba, RgbaImage};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Flat list of named files held in memory
pub(crate) struct MemorySource {
    files: Vec<(String, Vec<u8>)>,
    is_filesystem: bool,
    open_delay: Option<Duration>,
    reported_length: Option<u64>,
    opens: AtomicUsize,
}

impl MemorySource {
    pub(crate) fn new(files: Vec<(&str, Vec<u8>)>) -> Self {
        Self {
            files: files
                .into_iter()
                .map(|(name, bytes)| (name.to_string(), bytes))
                .collect(),
            is_filesystem: false,
            open_delay: None,
            reported_length: None,
            opens: AtomicUsize::new(0),
        }
    }

    pub(crate) fn filesystem(mut self) -> Self {
        self.is_filesystem = true;
        self
    }

    /// Make every open wait, so loads can be observed in flight
    pub(crate) fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = Some(delay);
        self
    }

    /// Report this length for every entry instead of the real one
    pub(crate) fn with_reported_length(mut self, length: u64) -> Self {
        self.reported_length = Some(length);
        self
    }

    pub(crate) fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArchiveSource for MemorySource {
    fn name(&self) -> &str {
        "memory"
    }

    async fn entries(&self, _token: &CancellationToken) -> LoadResult<Vec<EntryInfo>> {
        Ok(self
            .files
            .iter()
            .map(|(name, bytes)| EntryInfo {
                path: name.clone(),
                length: self.reported_length.unwrap_or(bytes.len() as u64),
                last_write: None,
                kind: kind_for_file(name),
                is_filesystem: self.is_filesystem,
            })
            .collect())
    }

    async fn open_entry(
        &self,
        entry: &ArchiveEntry,
        _decrypt: bool,
        token: &CancellationToken,
    ) -> LoadResult<EntryStream> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.open_delay {
            tokio::select! {
                _ = token.cancelled() => return Err(LoadError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
        let (_, bytes) = self
            .files
            .iter()
            .find(|(name, _)| name == entry.path())
            .ok_or_else(|| LoadError::SourceUnavailable(entry.path().to_string()))?;
        Ok(Box::pin(Cursor::new(bytes.clone())))
    }

    async fn open_container(
        &self,
        _entry: &ArchiveEntry,
        _token: &CancellationToken,
    ) -> LoadResult<Option<Arc<dyn ArchiveSource>>> {
        Ok(None)
    }
}

pub(crate) async fn entries_of(source: MemorySource) -> (Arc<MemorySource>, Vec<Arc<ArchiveEntry>>) {
    let source = Arc::new(source);
    let dyn_source: Arc<dyn ArchiveSource> = source.clone();
    let entries = crate::archive::enumerate(&dyn_source, &CancellationToken::new())
        .await
        .unwrap();
    (source, entries)
}

pub(crate) fn encode(image: &DynamicImage, format: ImageFormat) -> Vec<u8> {
    let mut bytes = Cursor::new(Vec::new());
    image.write_to(&mut bytes, format).unwrap();
    bytes.into_inner()
}

pub(crate) fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    encode(
        &DynamicImage::ImageRgba8(RgbaImage::from_pixel(width, height, Rgba([10, 20, 30, 255]))),
        ImageFormat::Png,
    )
}

pub(crate) fn gif_bytes(width: u32, height: u32, frames: usize) -> Vec<u8> {
    let mut bytes = Vec::new();
    {
        let mut encoder = GifEncoder::new(&mut bytes);
        encoder.set_repeat(Repeat::Infinite).unwrap();
        for i in 0..frames {
            let shade = (i * 20) as u8;
            let image = RgbaImage::from_pixel(width, height, Rgba([shade, 0, 0, 255]));
            encoder.encode_frame(Frame::new(image)).unwrap();
        }
    }
    bytes
}
