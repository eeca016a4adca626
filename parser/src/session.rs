//! Decode session state.
//!
//! A DICOM stream declares, inside itself, the encoding used for the
//! remainder of the stream: the file meta group is always Explicit VR
//! Little Endian, and the Transfer Syntax UID element found there selects
//! the encoding of everything that follows. This small state machine is
//! owned by the file-level decode loop and threaded by mutable reference
//! through every element decode, which keeps the decoder reentrant and
//! testable in isolation.

use byteordered::Endianness;
use volscan_core::Tag;

use crate::transfer_syntax::{transfer_syntax, VrEncoding};

/// The group number of the file meta group.
pub const META_GROUP: u16 = 0x0002;

/// Where the cursor currently is relative to the file meta group.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum MetaPosition {
    /// No meta group element has been seen yet.
    Before,
    /// The cursor is inside the meta group.
    Inside,
    /// The cursor has moved past the meta group.
    After,
}

/// Mutable state carried across element decode calls.
#[derive(Debug)]
pub struct DecodeSession {
    meta: MetaPosition,
    vr_encoding: Option<VrEncoding>,
    endianness: Option<Endianness>,
    last_top_level: Option<Tag>,
}

impl Default for DecodeSession {
    fn default() -> Self {
        DecodeSession::new()
    }
}

impl DecodeSession {
    /// Create the state for a fresh stream: positioned before the meta
    /// group, with both the VR encoding and the byte order still unknown.
    pub fn new() -> Self {
        DecodeSession {
            meta: MetaPosition::Before,
            vr_encoding: None,
            endianness: None,
            last_top_level: None,
        }
    }

    /// Record the group number of the element about to be decoded,
    /// updating the meta group position.
    ///
    /// The group value is the raw little endian interpretation of the
    /// first two bytes; the meta group itself is always little endian,
    /// so the transition test is exact wherever it matters.
    pub fn observe_group(&mut self, group: u16) {
        match self.meta {
            MetaPosition::Before if group == META_GROUP => {
                self.meta = MetaPosition::Inside;
            }
            MetaPosition::Inside if group != META_GROUP => {
                self.meta = MetaPosition::After;
            }
            _ => {}
        }
    }

    /// Where the cursor currently is relative to the meta group.
    pub fn meta_position(&self) -> MetaPosition {
        self.meta
    }

    /// The VR encoding in effect for the current element.
    ///
    /// Before and inside the meta group the standard mandates explicit
    /// VR; afterwards, whatever the Transfer Syntax UID selected (or
    /// `None` when it was absent or unrecognized).
    pub fn effective_encoding(&self) -> Option<VrEncoding> {
        match self.meta {
            MetaPosition::Before | MetaPosition::Inside => Some(VrEncoding::Explicit),
            MetaPosition::After => self.vr_encoding,
        }
    }

    /// The byte order in effect for the current element.
    /// Little endian before and inside the meta group.
    pub fn effective_endianness(&self) -> Option<Endianness> {
        match self.meta {
            MetaPosition::Before | MetaPosition::Inside => Some(Endianness::Little),
            MetaPosition::After => self.endianness,
        }
    }

    /// Apply a decoded Transfer Syntax UID value to the session,
    /// selecting the encoding of all subsequent elements.
    ///
    /// Returns `false` when the UID is unrecognized, in which case the
    /// encoding and byte order are left unknown and the element decoder's
    /// header heuristics take over.
    pub fn apply_transfer_syntax(&mut self, uid: &str) -> bool {
        match transfer_syntax(uid) {
            Some(ts) => {
                self.vr_encoding = Some(ts.encoding());
                self.endianness = Some(ts.endianness());
                true
            }
            None => false,
        }
    }

    /// The tag of the most recent top-level element, used to associate
    /// sequence content with the element that introduced it.
    pub fn last_top_level(&self) -> Option<Tag> {
        self.last_top_level
    }

    /// Record the tag of a decoded top-level element.
    pub fn set_last_top_level(&mut self, tag: Tag) {
        self.last_top_level = Some(tag);
    }
}
