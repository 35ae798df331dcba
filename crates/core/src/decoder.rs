//! Image decoders and plugin fallback

use crate::context::run_blocking;
use crate::error::{LoadError, LoadResult};
use crate::stream::ByteView;
use folio_scheduler::CancellationToken;
use image::DynamicImage;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// A decode capability
///
/// Implementations are synchronous; callers run them on the blocking pool.
pub trait ImageDecoder: Send + Sync {
    fn name(&self) -> &str;

    /// Returns true if the decoder recognizes the leading bytes
    fn probe(&self, header: &[u8]) -> bool;

    fn decode(&self, bytes: &[u8]) -> LoadResult<DynamicImage>;
}

/// Decoder backed by the `image` crate
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageCrateDecoder;

impl ImageDecoder for ImageCrateDecoder {
    fn name(&self) -> &str {
        "image-rs"
    }

    fn probe(&self, header: &[u8]) -> bool {
        image::guess_format(header).is_ok()
    }

    fn decode(&self, bytes: &[u8]) -> LoadResult<DynamicImage> {
        Ok(image::load_from_memory(bytes)?)
    }
}

/// A decoder picked for some bytes
#[derive(Clone)]
pub struct DecoderCandidate {
    pub decoder: Arc<dyn ImageDecoder>,
    pub is_plugin: bool,
}

/// Primary decoder followed by plugin decoders, in registration order
pub struct DecoderRegistry {
    primary: Arc<dyn ImageDecoder>,
    plugins: Vec<Arc<dyn ImageDecoder>>,
}

impl DecoderRegistry {
    pub fn new() -> Self {
        Self {
            primary: Arc::new(ImageCrateDecoder),
            plugins: Vec::new(),
        }
    }

    /// Append a plugin decoder, tried after the primary one
    pub fn with_plugin(mut self, plugin: Arc<dyn ImageDecoder>) -> Self {
        self.plugins.push(plugin);
        self
    }

    pub fn plugins(&self) -> &[Arc<dyn ImageDecoder>] {
        &self.plugins
    }

    /// Every decoder whose probe accepts `header`, primary first
    pub fn candidates(&self, header: &[u8]) -> Vec<DecoderCandidate> {
        let primary = self.primary.probe(header).then(|| DecoderCandidate {
            decoder: Arc::clone(&self.primary),
            is_plugin: false,
        });
        primary
            .into_iter()
            .chain(
                self.plugins
                    .iter()
                    .filter(|plugin| plugin.probe(header))
                    .map(|plugin| DecoderCandidate {
                        decoder: Arc::clone(plugin),
                        is_plugin: true,
                    }),
            )
            .collect()
    }

    /// The first decoder that claims `header`
    pub fn select(&self, header: &[u8]) -> Option<DecoderCandidate> {
        self.candidates(header).into_iter().next()
    }

    /// Decode with fallback across candidates
    ///
    /// A plugin that succeeds is remembered in `preferred` and tried first
    /// on the next call, skipping the probe.
    pub(crate) async fn decode(
        &self,
        bytes: ByteView,
        preferred: &PreferredDecoder,
        token: &CancellationToken,
    ) -> LoadResult<(DynamicImage, String)> {
        if let Some(decoder) = preferred.get() {
            match decode_blocking(Arc::clone(&decoder), bytes.clone(), token).await {
                Ok(image) => return Ok((image, decoder.name().to_string())),
                Err(err) if err.is_cancelled() => return Err(err),
                Err(err) => {
                    debug!(decoder = decoder.name(), error = %err, "Remembered decoder failed, probing again");
                    preferred.clear();
                }
            }
        }

        let candidates = self.candidates(bytes.as_ref());
        if candidates.is_empty() {
            return Err(LoadError::Unsupported("no decoder recognizes the data".into()));
        }

        let mut last_error = None;
        for candidate in candidates {
            let name = candidate.decoder.name().to_string();
            match decode_blocking(Arc::clone(&candidate.decoder), bytes.clone(), token).await {
                Ok(image) => {
                    if candidate.is_plugin {
                        debug!(decoder = %name, "Plugin decoder succeeded");
                        preferred.set(candidate.decoder);
                    }
                    return Ok((image, name));
                }
                Err(err) if err.is_cancelled() => return Err(err),
                Err(err) => {
                    debug!(decoder = %name, error = %err, "Decoder rejected data");
                    last_error = Some(err);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| LoadError::Unsupported("no decoder succeeded".into())))
    }
}

impl Default for DecoderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

async fn decode_blocking(
    decoder: Arc<dyn ImageDecoder>,
    bytes: ByteView,
    token: &CancellationToken,
) -> LoadResult<DynamicImage> {
    run_blocking(token, move || decoder.decode(bytes.as_ref())).await
}

/// Decoder remembered after a successful plugin decode
#[derive(Default)]
pub(crate) struct PreferredDecoder(Mutex<Option<Arc<dyn ImageDecoder>>>);

impl PreferredDecoder {
    pub(crate) fn get(&self) -> Option<Arc<dyn ImageDecoder>> {
        self.0.lock().clone()
    }

    fn set(&self, decoder: Arc<dyn ImageDecoder>) {
        *self.0.lock() = Some(decoder);
    }

    fn clear(&self) {
        *self.0.lock() = None;
    }
}
