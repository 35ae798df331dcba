//! Fixtures shared by the integration scenarios

#![allow(dead_code)]

use folio_core::{ImageDecoder, LoadError, LoadResult};
use image::codecs::gif::{GifEncoder, Repeat};
use image::{DynamicImage, Frame, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
use lopdf::{dictionary, Document, Object};
use std::io::{Cursor, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use zip::write::SimpleFileOptions;

fn encode(image: DynamicImage, format: ImageFormat) -> Vec<u8> {
    let mut bytes = Cursor::new(Vec::new());
    image
        .write_to(&mut bytes, format)
        .expect("fixture image should encode");
    bytes.into_inner()
}

pub fn jpeg(width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::from_pixel(width, height, Rgb([200, 120, 40]));
    encode(DynamicImage::ImageRgb8(image), ImageFormat::Jpeg)
}

pub fn png(width: u32, height: u32) -> Vec<u8> {
    let image = RgbaImage::from_pixel(width, height, Rgba([40, 80, 120, 255]));
    encode(DynamicImage::ImageRgba8(image), ImageFormat::Png)
}

pub fn animated_gif(width: u32, height: u32, frames: usize) -> Vec<u8> {
    let mut bytes = Vec::new();
    {
        let mut encoder = GifEncoder::new(&mut bytes);
        encoder
            .set_repeat(Repeat::Infinite)
            .expect("gif repeat should be set");
        for i in 0..frames {
            let image = RgbaImage::from_pixel(width, height, Rgba([(i * 25) as u8, 0, 0, 255]));
            encoder
                .encode_frame(Frame::new(image))
                .expect("gif frame should encode");
        }
    }
    bytes
}

pub fn zip(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, data) in files {
        writer
            .start_file(*name, SimpleFileOptions::default())
            .expect("zip entry should start");
        writer.write_all(data).expect("zip entry should be written");
    }
    writer
        .finish()
        .expect("zip archive should finish")
        .into_inner()
}

/// PDF with `pages` empty pages of `width`×`height` points
pub fn pdf(pages: usize, width: i64, height: i64) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let kids: Vec<Object> = (0..pages)
        .map(|_| {
            doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "MediaBox" => vec![0.into(), 0.into(), width.into(), height.into()],
            })
            .into()
        })
        .collect();
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => pages as i64,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("pdf should serialize");
    bytes
}

/// Magic understood by [`PluginDecoder`]
pub const PLUGIN_MAGIC: &[u8] = b"TEST";

/// Plugin-style decoder for a format the `image` crate does not know
///
/// Produces a 1024×768 RGBA image (exactly 3 MiB) for any input starting
/// with [`PLUGIN_MAGIC`], and counts probe and decode calls.
#[derive(Default)]
pub struct PluginDecoder {
    pub probes: AtomicUsize,
    pub decodes: AtomicUsize,
    delay: Option<Duration>,
}

impl PluginDecoder {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn decodes(&self) -> usize {
        self.decodes.load(Ordering::SeqCst)
    }
}

impl ImageDecoder for PluginDecoder {
    fn name(&self) -> &str {
        "test-plugin"
    }

    fn probe(&self, header: &[u8]) -> bool {
        self.probes.fetch_add(1, Ordering::SeqCst);
        header.starts_with(PLUGIN_MAGIC)
    }

    fn decode(&self, bytes: &[u8]) -> LoadResult<DynamicImage> {
        self.decodes.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if !bytes.starts_with(PLUGIN_MAGIC) {
            return Err(LoadError::Decode("missing plugin magic".into()));
        }
        Ok(DynamicImage::ImageRgba8(RgbaImage::new(1024, 768)))
    }
}

/// Bytes the plugin decoder accepts
pub fn plugin_image(seed: u8) -> Vec<u8> {
    let mut bytes = PLUGIN_MAGIC.to_vec();
    bytes.extend_from_slice(&[seed; 12]);
    bytes
}
