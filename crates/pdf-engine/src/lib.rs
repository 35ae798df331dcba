use image::{ImageBuffer, Rgba};
use lopdf::{Document, ObjectId};
use std::fs;
use std::path::Path;
use tracing::debug;

pub type RgbaImage = ImageBuffer<Rgba<u8>, Vec<u8>>;

/// Fallback page size (US Letter) when no MediaBox can be resolved
pub const DEFAULT_PAGE_SIZE: PageSize = PageSize {
    width_pt: 612.0,
    height_pt: 792.0,
};

/// Limit for walking `/Parent` links when resolving an inherited MediaBox
const MAX_INHERITANCE_DEPTH: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSize {
    pub width_pt: f32,
    pub height_pt: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderRequest {
    pub page_index: u32,
    pub scale: f32,
}

impl Default for RenderRequest {
    fn default() -> Self {
        Self { page_index: 0, scale: 1.0 }
    }
}

impl RenderRequest {
    /// Scale that fits a page of `page` points into `width`×`height` pixels
    pub fn fit(page_index: u32, page: PageSize, width: u32, height: u32) -> Self {
        let sx = width.max(1) as f32 / page.width_pt.max(1.0);
        let sy = height.max(1) as f32 / page.height_pt.max(1.0);
        Self { page_index, scale: sx.min(sy) }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThumbnailSize {
    pub width_px: u32,
    pub height_px: u32,
}

impl Default for ThumbnailSize {
    fn default() -> Self {
        Self { width_px: 256, height_px: 256 }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PdfEngineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("PDF parse error: {0}")]
    Parse(#[from] lopdf::Error),
    #[error("page {page} out of range (page_count={page_count})")]
    PageOutOfRange { page: u32, page_count: u32 },
    #[error("encrypted PDFs are not supported in the default backend")]
    EncryptedUnsupported,
    #[error("backend error: {0}")]
    Backend(String),
}

/// A parsed PDF: raw bytes plus the native size of every page.
#[derive(Debug, Clone)]
pub struct PdfDocument {
    bytes: Vec<u8>,
    page_sizes: Vec<PageSize>,
}

impl PdfDocument {
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, PdfEngineError> {
        let page_sizes = parse_sizes(&bytes)?;
        debug!(pages = page_sizes.len(), bytes = bytes.len(), "Parsed PDF");
        Ok(Self { bytes, page_sizes })
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self, PdfEngineError> {
        Self::from_bytes(fs::read(path)?)
    }

    pub fn page_count(&self) -> u32 {
        self.page_sizes.len() as u32
    }

    pub fn page_size(&self, page_index: u32) -> Result<PageSize, PdfEngineError> {
        self.page_sizes.get(page_index as usize).copied().ok_or(
            PdfEngineError::PageOutOfRange {
                page: page_index,
                page_count: self.page_count(),
            },
        )
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

fn parse_sizes(bytes: &[u8]) -> Result<Vec<PageSize>, PdfEngineError> {
    if bytes.windows("/Encrypt".len()).any(|window| window == b"/Encrypt") {
        return Err(PdfEngineError::EncryptedUnsupported);
    }

    let doc = Document::load_mem(bytes)?;
    let sizes: Vec<PageSize> = doc
        .get_pages()
        .into_values()
        .map(|object_id| media_box(&doc, object_id).unwrap_or(DEFAULT_PAGE_SIZE))
        .collect();

    if sizes.is_empty() {
        return Err(PdfEngineError::Backend("document has no pages".to_owned()));
    }

    Ok(sizes)
}

/// MediaBox of a page, following `/Parent` links for inherited boxes
fn media_box(doc: &Document, page_id: ObjectId) -> Option<PageSize> {
    let mut current = page_id;
    for _ in 0..MAX_INHERITANCE_DEPTH {
        let dict = doc.get_dictionary(current).ok()?;
        if let Ok(array) = dict.get(b"MediaBox").and_then(|obj| obj.as_array()) {
            if array.len() != 4 {
                return None;
            }
            let x0 = array[0].as_float().ok()?;
            let y0 = array[1].as_float().ok()?;
            let x1 = array[2].as_float().ok()?;
            let y1 = array[3].as_float().ok()?;
            return Some(PageSize {
                width_pt: (x1 - x0).abs(),
                height_pt: (y1 - y0).abs(),
            });
        }
        current = dict.get(b"Parent").and_then(|obj| obj.as_reference()).ok()?;
    }
    None
}

/// Turns PDF pages into pixels.
pub trait PdfRasterizer: Send + Sync {
    fn name(&self) -> &str;

    fn render_page(
        &self,
        document: &PdfDocument,
        request: RenderRequest,
    ) -> Result<RgbaImage, PdfEngineError>;

    fn render_thumbnail(
        &self,
        document: &PdfDocument,
        page_index: u32,
        target: ThumbnailSize,
    ) -> Result<RgbaImage, PdfEngineError> {
        let page = document.page_size(page_index)?;
        let request = RenderRequest::fit(page_index, page, target.width_px, target.height_px);
        let image = self.render_page(document, request)?;
        Ok(image::imageops::thumbnail(
            &image,
            target.width_px.max(1).min(image.width()),
            target.height_px.max(1).min(image.height()),
        ))
    }
}

/// Page-geometry rasterizer: a white sheet with a grey border at the page's
/// native aspect ratio. Stands in when no content renderer is linked.
#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfRasterizer;

impl PdfRasterizer for LopdfRasterizer {
    fn name(&self) -> &str {
        "lopdf"
    }

    fn render_page(
        &self,
        document: &PdfDocument,
        request: RenderRequest,
    ) -> Result<RgbaImage, PdfEngineError> {
        let page_size = document.page_size(request.page_index)?;
        let scale = if request.scale <= 0.0 { 1.0 } else { request.scale };

        let width = (page_size.width_pt * scale).round().max(1.0) as u32;
        let height = (page_size.height_pt * scale).round().max(1.0) as u32;

        let mut image = RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255]));

        if width >= 4 && height >= 4 {
            let border = Rgba([220, 220, 220, 255]);
            for x in 0..width {
                image.put_pixel(x, 0, border);
                image.put_pixel(x, height - 1, border);
            }
            for y in 0..height {
                image.put_pixel(0, y, border);
                image.put_pixel(width - 1, y, border);
            }
        }

        Ok(image)
    }
}

pub fn default_rasterizer() -> LopdfRasterizer {
    LopdfRasterizer
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::{dictionary, Object};

    fn sample_pdf_bytes(sizes: &[(i64, i64)]) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let kids: Vec<Object> = sizes
            .iter()
            .map(|(w, h)| {
                doc.add_object(dictionary! {
                    "Type" => "Page",
                    "Parent" => pages_id,
                    "MediaBox" => vec![0.into(), 0.into(), (*w).into(), (*h).into()],
                })
                .into()
            })
            .collect();
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => sizes.len() as i64,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();
        bytes
    }

    #[test]
    fn parses_page_count_and_sizes() {
        let document = PdfDocument::from_bytes(sample_pdf_bytes(&[(300, 400), (600, 200)]))
            .expect("open should succeed");

        assert_eq!(document.page_count(), 2);
        assert_eq!(
            document.page_size(0).unwrap(),
            PageSize { width_pt: 300.0, height_pt: 400.0 }
        );
        assert_eq!(
            document.page_size(1).unwrap(),
            PageSize { width_pt: 600.0, height_pt: 200.0 }
        );
    }

    #[test]
    fn page_out_of_range_returns_error() {
        let document = PdfDocument::from_bytes(sample_pdf_bytes(&[(100, 100)])).unwrap();
        let err = document.page_size(3).expect_err("should fail for missing page");

        assert!(matches!(err, PdfEngineError::PageOutOfRange { page: 3, page_count: 1 }));
    }

    #[test]
    fn rejects_garbage() {
        assert!(PdfDocument::from_bytes(b"not a pdf".to_vec()).is_err());
    }

    #[test]
    fn rejects_encrypted_marker() {
        let mut bytes = sample_pdf_bytes(&[(100, 100)]);
        bytes.extend_from_slice(b"\n% /Encrypt\n");

        assert!(matches!(
            PdfDocument::from_bytes(bytes),
            Err(PdfEngineError::EncryptedUnsupported)
        ));
    }

    #[test]
    fn render_page_uses_scale() {
        let document = PdfDocument::from_bytes(sample_pdf_bytes(&[(300, 400)])).unwrap();
        let image = LopdfRasterizer
            .render_page(&document, RenderRequest { page_index: 0, scale: 0.5 })
            .expect("page should render");

        assert_eq!((image.width(), image.height()), (150, 200));
        assert_eq!(image.get_pixel(75, 100), &Rgba([255, 255, 255, 255]));
        assert_eq!(image.get_pixel(0, 0), &Rgba([220, 220, 220, 255]));
    }

    #[test]
    fn render_thumbnail_fits_target() {
        let document = PdfDocument::from_bytes(sample_pdf_bytes(&[(300, 600)])).unwrap();
        let image = LopdfRasterizer
            .render_thumbnail(&document, 0, ThumbnailSize { width_px: 80, height_px: 80 })
            .expect("thumbnail should render");

        assert!(image.width() > 0 && image.width() <= 80);
        assert!(image.height() > 0 && image.height() <= 80);
    }

    #[test]
    fn fit_request_preserves_aspect() {
        let request = RenderRequest::fit(0, PageSize { width_pt: 200.0, height_pt: 100.0 }, 100, 100);
        assert!((request.scale - 0.5).abs() < f32::EPSILON);
    }
}
