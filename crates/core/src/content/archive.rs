use super::{ArchiveClass, LoadInput, PagePayload, PageSource};
use crate::archive::{find_first_image, ImageSearch};
use crate::error::LoadResult;
use tracing::debug;

/// Resolves a folder or archive to a representative image
///
/// Never decodes pixels and carries no data size.
pub(crate) async fn load(input: &LoadInput<'_>) -> LoadResult<PageSource> {
    let depth = input.ctx.config().archive_search_depth;
    let search = find_first_image(input.entry, depth, input.token).await?;
    let class = classify(&search);
    debug!(
        entry = input.entry.path(),
        ?class,
        representative = search.image.as_ref().map(|image| image.path()),
        "Resolved container"
    );

    Ok(PageSource::new(
        PagePayload::Archive {
            representative: search.image,
            class,
        },
        None,
    ))
}

pub(crate) fn classify(search: &ImageSearch) -> ArchiveClass {
    if search.image.is_some() {
        ArchiveClass::Unique
    } else if search.saw_media {
        ArchiveClass::Media
    } else {
        ArchiveClass::Empty
    }
}
