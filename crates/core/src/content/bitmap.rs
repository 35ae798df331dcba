use super::{LoadInput, PagePayload, PageSource};
use crate::context::run_blocking;
use crate::decoder::PreferredDecoder;
use crate::error::LoadResult;
use crate::picture::{DisplayPolicy, PictureInfo, Size};
use crate::stream::ByteView;
use image::imageops::FilterType;
use image::DynamicImage;
use std::sync::Arc;

/// Still images through the decoder registry
#[derive(Default)]
pub(crate) struct BitmapLoader {
    preferred: PreferredDecoder,
}

impl BitmapLoader {
    pub(crate) async fn load(&self, input: &LoadInput<'_>) -> LoadResult<PageSource> {
        input.stream.ensure_cached(input.token).await?;
        let bytes = input.stream.read_all(input.token).await?;
        self.load_bytes(input, bytes).await
    }

    pub(crate) async fn load_bytes(
        &self,
        input: &LoadInput<'_>,
        bytes: ByteView,
    ) -> LoadResult<PageSource> {
        let (image, decoder) = input
            .ctx
            .decoders()
            .decode(bytes, &self.preferred, input.token)
            .await?;

        let policy = input.ctx.display_policy();
        let natural = Size::new(image.width(), image.height());
        let (image, info) = if policy.decode_target(natural).is_some() {
            run_blocking(input.token, move || Ok(fit_to_policy(image, &policy, decoder))).await?
        } else {
            fit_to_policy(image, &policy, decoder)
        };

        Ok(PageSource::new(PagePayload::Bitmap(Arc::new(image)), Some(info))
            .retain_stream(Arc::clone(input.stream)))
    }
}

/// Picture info for a decoded image, downscaling it when the policy limits
/// source size
fn fit_to_policy(
    image: DynamicImage,
    policy: &DisplayPolicy,
    decoder: String,
) -> (DynamicImage, PictureInfo) {
    let natural = Size::new(image.width(), image.height());
    let info = PictureInfo::new(
        natural,
        policy,
        image.color().bits_per_pixel() as u32,
        decoder,
    );
    let image = match policy.decode_target(natural) {
        Some(target) => image.resize_exact(target.width, target.height, FilterType::Triangle),
        None => image,
    };
    (image, info)
}
