//! The built-in attribute dictionary, mapping tags to their standard
//! value representation and a human readable name.
//!
//! The dictionary is immutable process-wide state, populated once on first
//! use from the built-in table in [`entries`]. Lookups never fail: an
//! absent tag yields the [`VR::XX`] sentinel and the name `"unknown"`.

mod entries;

use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::header::{Tag, VR};

/// One attribute known to the dictionary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DictionaryEntry {
    /// The attribute tag
    pub tag: Tag,
    /// The default value representation for implicit-VR streams
    pub vr: VR,
    /// Human readable attribute name
    pub name: &'static str,
}

/// Generic entry handed out for any group length attribute
/// (element number 0x0000).
static GROUP_LENGTH_ENTRY: DictionaryEntry = DictionaryEntry {
    tag: Tag(0x0000, 0x0000),
    vr: VR::UL,
    name: "Generic Group Length",
};

static REGISTRY: Lazy<HashMap<Tag, &'static DictionaryEntry>> = Lazy::new(|| {
    let mut index = HashMap::with_capacity(entries::ENTRIES.len());
    for entry in entries::ENTRIES {
        index.insert(entry.tag, entry);
    }
    index
});

/// Look up the full dictionary entry for a tag.
pub fn entry_of(tag: Tag) -> Option<&'static DictionaryEntry> {
    REGISTRY.get(&tag).copied().or({
        if tag.element() == 0x0000 {
            Some(&GROUP_LENGTH_ENTRY)
        } else {
            None
        }
    })
}

/// The default value representation of a tag, for resolving implicit-VR
/// streams. Yields [`VR::XX`] when the tag is not known.
pub fn vr_of(tag: Tag) -> VR {
    entry_of(tag).map(|e| e.vr).unwrap_or(VR::XX)
}

/// The human readable name of a tag, or `"unknown"` when not known.
pub fn name_of(tag: Tag) -> &'static str {
    entry_of(tag).map(|e| e.name).unwrap_or("unknown")
}
