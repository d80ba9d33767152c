//! Embedding payload text composition.
//!
//! Combines item metadata with the optional AI visual description into
//! one labeled text block, `"Key: value"` segments joined with periods.

use curio_shared::SourceItem;

use crate::Description;

/// Build the text sent to the embedding service for one item.
///
/// Empty fields are omitted. Returns an empty string when nothing is
/// present — the driver counts such items as skipped without making an
/// external call.
pub fn compose_text(item: &SourceItem, description: Option<&Description>) -> String {
    let mut parts: Vec<String> = Vec::new();

    let mut push = |label: &str, value: &Option<String>| {
        if let Some(v) = value {
            parts.push(format!("{label}: {v}"));
        }
    };

    // Title and artist first: most important for retrieval.
    push("Title", &item.title);
    push("Artist", &item.artist);
    push("Date", &item.date);
    push("Medium", &item.medium);
    push("Type", &item.classification);
    push("Department", &item.department);
    push("Nationality", &item.nationality);
    push("Artist bio", &item.artist_bio);
    push("Dimensions", &item.dimensions);
    push("Credit", &item.credit_line);

    if let Some(desc) = description {
        push("Visual description", &desc.alt_text);
        push("Detailed description", &desc.long_description);
    }

    parts.join(". ")
}
