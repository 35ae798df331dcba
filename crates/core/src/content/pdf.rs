use super::{LoadInput, PagePayload, PageSource};
use crate::archive::EntryKind;
use crate::context::run_blocking;
use crate::error::{LoadError, LoadResult};
use crate::picture::{PictureInfo, Size};
use folio_pdf::RenderRequest;
use std::sync::Arc;

/// Rasterizes one PDF page at its clamped display size
///
/// Reads straight from the parsed document, so no stream cache is involved.
pub(crate) async fn load(input: &LoadInput<'_>) -> LoadResult<PageSource> {
    let EntryKind::PdfPage { page_index } = input.entry.kind() else {
        return Err(LoadError::Unsupported(format!(
            "{} is not a PDF page",
            input.entry.path()
        )));
    };

    let document = input
        .entry
        .source()
        .pdf_document(input.entry, input.token)
        .await?;
    let rasterizer = Arc::clone(input.ctx.rasterizer());
    let policy = input.ctx.display_policy();

    run_blocking(input.token, move || {
        let page = document.page_size(page_index)?;
        let natural = Size::new(
            page.width_pt.round().max(1.0) as u32,
            page.height_pt.round().max(1.0) as u32,
        );
        let info = PictureInfo::new(natural, &policy, 32, rasterizer.name());
        let request = RenderRequest::fit(page_index, page, info.size.width, info.size.height);
        let image = rasterizer.render_page(&document, request)?;
        Ok(PageSource::new(
            PagePayload::PdfRaster(Arc::new(image)),
            Some(info),
        ))
    })
    .await
}
