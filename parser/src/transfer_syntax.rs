//! Built-in registry of recognized transfer syntax UIDs.
//!
//! A transfer syntax determines how element headers encode their value
//! representation and which byte order multi-byte values use. The registry
//! is immutable process-wide state; looking up an unrecognized UID yields
//! `None` rather than an error, so that the decoder can fall back to its
//! header heuristics.
//!
//! The JPEG family is registered for metadata purposes only: such files
//! can be walked element by element, but decoding their compressed pixel
//! data is unsupported.

use std::collections::HashMap;

use byteordered::Endianness;
use once_cell::sync::Lazy;

/// How element headers declare the value representation.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum VrEncoding {
    /// The VR is resolved from the attribute dictionary.
    Implicit,
    /// The VR is carried in the element header itself.
    Explicit,
}

/// A transfer syntax known to the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferSyntaxEntry {
    uid: &'static str,
    name: &'static str,
    encoding: VrEncoding,
    endianness: Endianness,
    retired: bool,
    compressed: bool,
}

impl TransferSyntaxEntry {
    /// The unique identifier of this transfer syntax.
    pub fn uid(&self) -> &'static str {
        self.uid
    }

    /// A human readable name for this transfer syntax.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// How element headers declare their VR under this syntax.
    pub fn encoding(&self) -> VrEncoding {
        self.encoding
    }

    /// The byte order of multi-byte values under this syntax.
    pub fn endianness(&self) -> Endianness {
        self.endianness
    }

    /// Whether the standard has retired this transfer syntax.
    pub fn retired(&self) -> bool {
        self.retired
    }

    /// Whether pixel data under this syntax is stored compressed
    /// (and therefore cannot be turned into a volume here).
    pub fn compressed(&self) -> bool {
        self.compressed
    }
}

const fn ts(
    uid: &'static str,
    name: &'static str,
    encoding: VrEncoding,
    endianness: Endianness,
    retired: bool,
    compressed: bool,
) -> TransferSyntaxEntry {
    TransferSyntaxEntry {
        uid,
        name,
        encoding,
        endianness,
        retired,
        compressed,
    }
}

#[rustfmt::skip]
static ENTRIES: &[TransferSyntaxEntry] = &[
    ts("1.2.840.10008.1.2",        "Implicit VR Little Endian", VrEncoding::Implicit, Endianness::Little, false, false),
    ts("1.2.840.10008.1.2.1",      "Explicit VR Little Endian", VrEncoding::Explicit, Endianness::Little, false, false),
    ts("1.2.840.10008.1.2.1.99",   "Deflated Explicit VR Little Endian", VrEncoding::Explicit, Endianness::Little, false, true),
    ts("1.2.840.10008.1.2.2",      "Explicit VR Big Endian", VrEncoding::Explicit, Endianness::Big, true, false),
    // compressed syntaxes, recognized for metadata only
    ts("1.2.840.10008.1.2.4.50",   "JPEG Baseline (Process 1)", VrEncoding::Explicit, Endianness::Little, false, true),
    ts("1.2.840.10008.1.2.4.51",   "JPEG Extended (Process 2 & 4)", VrEncoding::Explicit, Endianness::Little, false, true),
    ts("1.2.840.10008.1.2.4.57",   "JPEG Lossless, Non-Hierarchical (Process 14)", VrEncoding::Explicit, Endianness::Little, false, true),
    ts("1.2.840.10008.1.2.4.70",   "JPEG Lossless, Non-Hierarchical, First-Order Prediction", VrEncoding::Explicit, Endianness::Little, false, true),
    ts("1.2.840.10008.1.2.4.80",   "JPEG-LS Lossless", VrEncoding::Explicit, Endianness::Little, false, true),
    ts("1.2.840.10008.1.2.4.81",   "JPEG-LS Lossy (Near-Lossless)", VrEncoding::Explicit, Endianness::Little, false, true),
    ts("1.2.840.10008.1.2.4.90",   "JPEG 2000 (Lossless Only)", VrEncoding::Explicit, Endianness::Little, false, true),
    ts("1.2.840.10008.1.2.4.91",   "JPEG 2000", VrEncoding::Explicit, Endianness::Little, false, true),
    ts("1.2.840.10008.1.2.5",      "RLE Lossless", VrEncoding::Explicit, Endianness::Little, false, true),
];

static REGISTRY: Lazy<HashMap<&'static str, &'static TransferSyntaxEntry>> = Lazy::new(|| {
    ENTRIES.iter().map(|entry| (entry.uid, entry)).collect()
});

/// Look up a transfer syntax by its UID.
///
/// Trailing NUL and space padding is stripped from the given value, since
/// UID attributes are padded to even length on the wire. Unrecognized UIDs
/// yield `None`; this is the "unknown" outcome and never a panic.
pub fn transfer_syntax(uid: &str) -> Option<&'static TransferSyntaxEntry> {
    let trimmed = uid.trim_end_matches(['\0', ' ']);
    REGISTRY.get(trimmed).copied()
}
