use super::bitmap::BitmapLoader;
use super::{Frame, LoadInput, PagePayload, PageSource};
use crate::context::run_blocking;
use crate::error::{LoadError, LoadResult};
use crate::picture::{PictureInfo, Size};
use crate::sniff::{self, AnimatedContainer};
use crate::stream::ByteView;
use image::codecs::gif::GifDecoder;
use image::codecs::png::PngDecoder;
use image::codecs::webp::WebPDecoder;
use image::AnimationDecoder;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::debug;

/// Outcome of the signature sniff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnimationClass {
    Animated,
    Static,
}

/// GIF, APNG and animated WebP
///
/// The container is sniffed once per instance. Later loads, including
/// reloads after an eviction, reuse the classification.
#[derive(Default)]
pub(crate) struct AnimatedLoader {
    class: OnceLock<AnimationClass>,
    sniffs: AtomicUsize,
    still: BitmapLoader,
}

impl AnimatedLoader {
    pub(crate) fn class(&self) -> Option<AnimationClass> {
        self.class.get().copied()
    }

    pub(crate) fn sniff_count(&self) -> usize {
        self.sniffs.load(Ordering::Relaxed)
    }

    fn classify(&self, bytes: &[u8]) -> AnimationClass {
        *self.class.get_or_init(|| {
            self.sniffs.fetch_add(1, Ordering::Relaxed);
            let class = if sniff::is_animated(bytes) {
                AnimationClass::Animated
            } else {
                AnimationClass::Static
            };
            debug!(?class, "Classified animation container");
            class
        })
    }

    pub(crate) async fn load(&self, input: &LoadInput<'_>) -> LoadResult<PageSource> {
        input.stream.ensure_cached(input.token).await?;
        let bytes = input.stream.read_all(input.token).await?;

        if self.classify(bytes.as_ref()) == AnimationClass::Static {
            return self.still.load_bytes(input, bytes).await;
        }

        let frames = run_blocking(input.token, move || decode_frames(bytes)).await?;
        let first = frames
            .first()
            .ok_or_else(|| LoadError::Decode("animation has no frames".into()))?;
        let natural = Size::new(first.image.width(), first.image.height());
        let info = PictureInfo::new(natural, &input.ctx.display_policy(), 32, "image-rs");
        debug!(entry = input.entry.path(), frames = frames.len(), "Decoded animation");

        Ok(
            PageSource::new(PagePayload::Animation(Arc::new(frames)), Some(info))
                .retain_stream(Arc::clone(input.stream)),
        )
    }
}

fn decode_frames(bytes: ByteView) -> LoadResult<Vec<Frame>> {
    let container = AnimatedContainer::detect(bytes.as_ref())
        .ok_or_else(|| LoadError::Unsupported("unknown animation container".into()))?;
    let reader = Cursor::new(bytes);

    let frames = match container {
        AnimatedContainer::Gif => GifDecoder::new(reader)?.into_frames().collect_frames()?,
        AnimatedContainer::Png => PngDecoder::new(reader)?
            .apng()?
            .into_frames()
            .collect_frames()?,
        AnimatedContainer::WebP => WebPDecoder::new(reader)?.into_frames().collect_frames()?,
    };

    Ok(frames
        .into_iter()
        .map(|frame| {
            let (numer, denom) = frame.delay().numer_denom_ms();
            Frame {
                delay_ms: numer / denom.max(1),
                image: frame.into_buffer(),
            }
        })
        .collect())
}
