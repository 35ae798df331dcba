use super::{PagePayload, PageSource, PlaceholderIcon};
use crate::archive::ArchiveEntry;

/// Icon and file name for entries no image decoder claims
pub(crate) fn load(entry: &ArchiveEntry) -> PageSource {
    let icon = if entry.is_media() {
        PlaceholderIcon::Media
    } else {
        PlaceholderIcon::Document
    };
    PageSource::new(
        PagePayload::Placeholder {
            icon,
            message: entry.name().to_string(),
        },
        None,
    )
}
