//! Animation detection by container signature.
//!
//! File extensions lie (`.png` files are often APNGs, `.gif` files are often
//! a single frame), so animated content is classified from the bytes: the
//! container magic plus an animation control chunk or a second frame.

/// Image containers that can carry an animation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnimatedContainer {
    Gif,
    Png,
    WebP,
}

impl AnimatedContainer {
    /// Container format from the leading magic bytes
    pub fn detect(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
            Some(Self::Gif)
        } else if bytes.starts_with(PNG_SIGNATURE) {
            Some(Self::Png)
        } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
            Some(Self::WebP)
        } else {
            None
        }
    }
}

const PNG_SIGNATURE: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// Returns true if the bytes hold an animation with more than one frame
pub fn is_animated(bytes: &[u8]) -> bool {
    match AnimatedContainer::detect(bytes) {
        Some(AnimatedContainer::Gif) => gif_frame_count(bytes, 2) >= 2,
        Some(AnimatedContainer::Png) => png_is_animated(bytes),
        Some(AnimatedContainer::WebP) => webp_is_animated(bytes),
        None => false,
    }
}

/// Count GIF image descriptors, stopping once `limit` is reached
fn gif_frame_count(bytes: &[u8], limit: usize) -> usize {
    // Header (6) + logical screen descriptor (7)
    let Some(&packed) = bytes.get(10) else {
        return 0;
    };
    let mut pos = 13;
    if packed & 0x80 != 0 {
        pos += 3 << ((packed & 0x07) + 1);
    }

    let mut frames = 0;
    while let Some(&block) = bytes.get(pos) {
        match block {
            // Extension: label, then data sub-blocks
            0x21 => pos = skip_sub_blocks(bytes, pos + 2),
            // Image descriptor
            0x2C => {
                frames += 1;
                if frames >= limit {
                    return frames;
                }
                let Some(&local) = bytes.get(pos + 9) else {
                    return frames;
                };
                pos += 10;
                if local & 0x80 != 0 {
                    pos += 3 << ((local & 0x07) + 1);
                }
                // LZW minimum code size, then image data sub-blocks
                pos = skip_sub_blocks(bytes, pos + 1);
            }
            _ => break,
        }
    }
    frames
}

/// Position after a run of GIF data sub-blocks and its terminator
fn skip_sub_blocks(bytes: &[u8], mut pos: usize) -> usize {
    while let Some(&len) = bytes.get(pos) {
        pos += 1;
        if len == 0 {
            return pos;
        }
        pos += len as usize;
    }
    bytes.len()
}

/// An `acTL` chunk announcing more than one frame before the first `IDAT`
fn png_is_animated(bytes: &[u8]) -> bool {
    let mut pos = PNG_SIGNATURE.len();
    while pos + 8 <= bytes.len() {
        let len = u32::from_be_bytes([bytes[pos], bytes[pos + 1], bytes[pos + 2], bytes[pos + 3]])
            as usize;
        let kind = &bytes[pos + 4..pos + 8];
        match kind {
            b"acTL" => {
                return bytes
                    .get(pos + 8..pos + 12)
                    .map(|n| u32::from_be_bytes([n[0], n[1], n[2], n[3]]) > 1)
                    .unwrap_or(false);
            }
            b"IDAT" | b"IEND" => return false,
            _ => pos = pos.saturating_add(12).saturating_add(len),
        }
    }
    false
}

/// A VP8X animation flag or an `ANIM` chunk
fn webp_is_animated(bytes: &[u8]) -> bool {
    let mut pos = 12;
    while pos + 8 <= bytes.len() {
        let kind = &bytes[pos..pos + 4];
        let len = u32::from_le_bytes([bytes[pos + 4], bytes[pos + 5], bytes[pos + 6], bytes[pos + 7]])
            as usize;
        match kind {
            b"VP8X" => {
                if bytes.get(pos + 8).is_some_and(|flags| flags & 0x02 != 0) {
                    return true;
                }
            }
            b"ANIM" | b"ANMF" => return true,
            _ => {}
        }
        // Chunks are padded to an even length
        pos = pos.saturating_add(8).saturating_add(len + (len & 1));
    }
    false
}
