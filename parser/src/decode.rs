//! The tag-by-tag data element decoder.
//!
//! One call to [`decode_element`] reads exactly one data element from the
//! byte source, resolving the competing header encodings (explicit or
//! implicit VR, little or big endian) against the state carried in the
//! [`DecodeSession`]. Decoding certain elements mutates the session as a
//! side effect, because the stream describes its own encoding: entering or
//! leaving the file meta group, and the Transfer Syntax UID element.

use std::io::Read;

use byteordered::byteorder::{BigEndian, ByteOrder, LittleEndian};
use byteordered::Endianness;
use snafu::{ResultExt, Snafu};
use volscan_core::header::{DataElementHeader, Length, Tag, VR};
use volscan_core::{dictionary, tags, DataElement};

use crate::session::DecodeSession;
use crate::transfer_syntax::VrEncoding;

/// An error while decoding a single data element.
#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum DecodeError {
    /// Could not read the element tag.
    #[snafu(display("could not read element tag"))]
    ReadTag { source: std::io::Error },

    /// Could not read the value representation bytes.
    #[snafu(display("could not read value representation of {}", tag))]
    ReadVr {
        tag: Tag,
        source: std::io::Error,
    },

    /// Could not read the reserved bytes of an extended-length header.
    #[snafu(display("could not read reserved header bytes of {}", tag))]
    ReadReserved {
        tag: Tag,
        source: std::io::Error,
    },

    /// Could not read the declared value length.
    #[snafu(display("could not read value length of {}", tag))]
    ReadLength {
        tag: Tag,
        source: std::io::Error,
    },

    /// Could not read the declared number of value bytes.
    #[snafu(display("could not read value of {} ({} bytes)", tag, len))]
    ReadValue {
        tag: Tag,
        len: u32,
        source: std::io::Error,
    },
}

impl DecodeError {
    /// Whether this error is a clean end of stream at an element boundary,
    /// which terminates a data set rather than failing it.
    pub fn is_end_of_stream(&self) -> bool {
        matches!(
            self,
            DecodeError::ReadTag { source } if source.kind() == std::io::ErrorKind::UnexpectedEof
        )
    }
}

type Result<T, E = DecodeError> = std::result::Result<T, E>;

#[inline]
fn read_u16_with(buf: [u8; 2], endianness: Option<Endianness>) -> u16 {
    match endianness {
        Some(Endianness::Big) => BigEndian::read_u16(&buf),
        _ => LittleEndian::read_u16(&buf),
    }
}

#[inline]
fn read_u32_with(buf: [u8; 4], endianness: Option<Endianness>) -> u32 {
    match endianness {
        Some(Endianness::Big) => BigEndian::read_u32(&buf),
        _ => LittleEndian::read_u32(&buf),
    }
}

/// Decode one data element from the given source.
///
/// The session must be positioned at the start of the element's tag
/// bytes. Structural marker tags (Item, Item Delimiter, Sequence
/// Delimiter) yield an element with an empty value: their content, when
/// any, is delimited by further elements and read by the file-level loop.
pub fn decode_element<S>(source: &mut S, session: &mut DecodeSession) -> Result<DataElement>
where
    S: ?Sized + Read,
{
    // the group number is read before the byte order of the current
    // element can be known: the meta group transition itself decides it
    let mut buf = [0u8; 2];
    source.read_exact(&mut buf).context(ReadTagSnafu)?;
    let raw_group = LittleEndian::read_u16(&buf);
    session.observe_group(raw_group);

    let endianness = session.effective_endianness();
    let group = match endianness {
        Some(Endianness::Big) => raw_group.swap_bytes(),
        _ => raw_group,
    };

    source.read_exact(&mut buf).context(ReadTagSnafu)?;
    let element_no = read_u16_with(buf, endianness);
    let tag = Tag(group, element_no);

    // the next two bytes are either an explicit VR code or the low half
    // of an implicit 4-byte length
    source.read_exact(&mut buf).context(ReadVrSnafu { tag })?;
    let tentative = buf;

    let explicit = if tag.is_marker() {
        // markers are always implicitly encoded
        false
    } else {
        match session.effective_encoding() {
            Some(VrEncoding::Explicit) => true,
            Some(VrEncoding::Implicit) => false,
            None => VR::from_binary(tentative).is_some(),
        }
    };

    let (vr, declared_len) = if explicit {
        let vr = VR::from_binary(tentative).unwrap_or(VR::XX);
        if vr.has_extended_length() {
            source
                .read_exact(&mut buf)
                .context(ReadReservedSnafu { tag })?;
            let mut len_buf = [0u8; 4];
            source
                .read_exact(&mut len_buf)
                .context(ReadLengthSnafu { tag })?;
            (vr, read_u32_with(len_buf, endianness))
        } else {
            source
                .read_exact(&mut buf)
                .context(ReadLengthSnafu { tag })?;
            (vr, u32::from(read_u16_with(buf, endianness)))
        }
    } else {
        // the two bytes already read become the first half of the length
        source
            .read_exact(&mut buf)
            .context(ReadLengthSnafu { tag })?;
        let len_buf = [tentative[0], tentative[1], buf[0], buf[1]];
        (dictionary::vr_of(tag), read_u32_with(len_buf, endianness))
    };

    // an undefined length is only meaningful for true sequences
    let len = if declared_len == 0xFFFF_FFFF {
        if vr == VR::SQ {
            Length::UNDEFINED
        } else {
            Length(0)
        }
    } else {
        Length(declared_len)
    };

    if tag.is_marker() {
        return Ok(DataElement::empty(tag, vr, len));
    }

    let value_len = len.get().unwrap_or(0) as usize;
    let mut data = vec![0u8; value_len];
    source.read_exact(&mut data).context(ReadValueSnafu {
        tag,
        len: value_len as u32,
    })?;

    if endianness == Some(Endianness::Big) && vr.is_multi_byte_numeric() {
        // normalize the payload to little endian by whole-buffer reversal
        data.reverse();
    }

    let element = DataElement::new(DataElementHeader::new(tag, vr, len), data);

    // the transfer syntax element selects the encoding of the remainder
    // of the stream
    if tag == tags::TRANSFER_SYNTAX_UID {
        let uid = element.to_text();
        if !session.apply_transfer_syntax(&uid) {
            tracing::warn!(uid = uid.as_str(), "unrecognized transfer syntax UID");
        }
    }

    Ok(element)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use volscan_core::Header;

    /// Prime a session as if the meta group had been traversed,
    /// declaring the given transfer syntax.
    fn session_after_meta(uid: &str) -> DecodeSession {
        let mut session = DecodeSession::new();
        session.observe_group(0x0002);
        if !uid.is_empty() {
            assert!(session.apply_transfer_syntax(uid));
        }
        session.observe_group(0x0008);
        session
    }

    #[test]
    fn explicit_le_short_form() {
        #[rustfmt::skip]
        let raw: &[u8] = &[
            0x28, 0x00, 0x10, 0x00, // (0028,0010) Rows
            b'U', b'S',             // VR: US
            0x02, 0x00,             // length: 2
            0x00, 0x02,             // value: 512
        ];
        let mut session = session_after_meta("1.2.840.10008.1.2.1");
        let elem = decode_element(&mut Cursor::new(raw), &mut session).unwrap();
        assert_eq!(elem.tag(), Tag(0x0028, 0x0010));
        assert_eq!(elem.vr(), VR::US);
        assert_eq!(elem.length(), Length(2));
        assert_eq!(elem.int(), Some(512));
    }

    #[test]
    fn explicit_le_extended_form() {
        #[rustfmt::skip]
        let raw: &[u8] = &[
            0xE0, 0x7F, 0x10, 0x00, // (7FE0,0010) Pixel Data
            b'O', b'B',             // VR: OB
            0x00, 0x00,             // reserved
            0x04, 0x00, 0x00, 0x00, // length: 4
            0xAA, 0xBB, 0xCC, 0xDD,
        ];
        let mut session = session_after_meta("1.2.840.10008.1.2.1");
        let elem = decode_element(&mut Cursor::new(raw), &mut session).unwrap();
        assert_eq!(elem.tag(), Tag(0x7FE0, 0x0010));
        assert_eq!(elem.vr(), VR::OB);
        assert_eq!(elem.data(), &[0xAA, 0xBB, 0xCC, 0xDD]);
    }

    #[test]
    fn implicit_le_resolves_vr_from_dictionary() {
        #[rustfmt::skip]
        let raw: &[u8] = &[
            0x28, 0x00, 0x10, 0x00, // (0028,0010) Rows
            0x02, 0x00, 0x00, 0x00, // length: 2 (4-byte form)
            0x00, 0x02,             // value: 512
        ];
        let mut session = session_after_meta("1.2.840.10008.1.2");
        let elem = decode_element(&mut Cursor::new(raw), &mut session).unwrap();
        assert_eq!(elem.tag(), Tag(0x0028, 0x0010));
        assert_eq!(elem.vr(), VR::US);
        assert_eq!(elem.int(), Some(512));
    }

    #[test]
    fn big_endian_value_is_normalized() {
        #[rustfmt::skip]
        let raw: &[u8] = &[
            0x00, 0x28, 0x00, 0x10, // (0028,0010) Rows, big endian
            b'U', b'S',
            0x00, 0x02,             // length: 2, big endian
            0x02, 0x00,             // value: 512, big endian
        ];
        let mut session = session_after_meta("1.2.840.10008.1.2.2");
        let elem = decode_element(&mut Cursor::new(raw), &mut session).unwrap();
        assert_eq!(elem.tag(), Tag(0x0028, 0x0010));
        assert_eq!(elem.int(), Some(512));
    }

    #[test]
    fn same_value_under_either_byte_order() {
        #[rustfmt::skip]
        let le: &[u8] = &[
            0x28, 0x00, 0x00, 0x01, b'U', b'S', 0x02, 0x00, 0x10, 0x00,
        ];
        #[rustfmt::skip]
        let be: &[u8] = &[
            0x00, 0x28, 0x01, 0x00, b'U', b'S', 0x00, 0x02, 0x00, 0x10,
        ];
        let mut s1 = session_after_meta("1.2.840.10008.1.2.1");
        let mut s2 = session_after_meta("1.2.840.10008.1.2.2");
        let e1 = decode_element(&mut Cursor::new(le), &mut s1).unwrap();
        let e2 = decode_element(&mut Cursor::new(be), &mut s2).unwrap();
        assert_eq!(e1.tag(), e2.tag());
        assert_eq!(e1.int(), Some(16));
        assert_eq!(e1.int(), e2.int());
    }

    #[test]
    fn unknown_encoding_falls_back_to_vr_code_heuristic() {
        let mut session = session_after_meta("");
        assert_eq!(session.effective_encoding(), None);

        // looks like an explicit element: decoded as such
        #[rustfmt::skip]
        let explicit: &[u8] = &[
            0x28, 0x00, 0x10, 0x00, b'U', b'S', 0x02, 0x00, 0x00, 0x02,
        ];
        let elem = decode_element(&mut Cursor::new(explicit), &mut session).unwrap();
        assert_eq!(elem.vr(), VR::US);
        assert_eq!(elem.int(), Some(512));

        // does not look like a VR code: decoded implicitly
        #[rustfmt::skip]
        let implicit: &[u8] = &[
            0x28, 0x00, 0x11, 0x00, 0x02, 0x00, 0x00, 0x00, 0x00, 0x02,
        ];
        let elem = decode_element(&mut Cursor::new(implicit), &mut session).unwrap();
        assert_eq!(elem.vr(), VR::US);
        assert_eq!(elem.int(), Some(512));
    }

    #[test]
    fn markers_are_implicit_even_in_explicit_streams() {
        #[rustfmt::skip]
        let raw: &[u8] = &[
            0xFE, 0xFF, 0x00, 0xE0, // (FFFE,E000) Item
            0x20, 0x00, 0x00, 0x00, // length: 32
        ];
        let mut session = session_after_meta("1.2.840.10008.1.2.1");
        let elem = decode_element(&mut Cursor::new(raw), &mut session).unwrap();
        assert!(elem.header().tag.is_marker());
        assert_eq!(elem.length(), Length(32));
        // marker content is not consumed here
        assert!(elem.data().is_empty());
    }

    #[test]
    fn undefined_length_is_normalized_for_non_sequences() {
        #[rustfmt::skip]
        let raw: &[u8] = &[
            0xE0, 0x7F, 0x10, 0x00, // (7FE0,0010) Pixel Data
            b'O', b'W',
            0x00, 0x00,             // reserved
            0xFF, 0xFF, 0xFF, 0xFF, // undefined length
        ];
        let mut session = session_after_meta("1.2.840.10008.1.2.1");
        let elem = decode_element(&mut Cursor::new(raw), &mut session).unwrap();
        assert_eq!(elem.length(), Length(0));
        assert!(elem.data().is_empty());
    }

    #[test]
    fn undefined_length_is_kept_for_sequences() {
        #[rustfmt::skip]
        let raw: &[u8] = &[
            0x08, 0x00, 0x10, 0x11, // (0008,1110) Referenced Study Sequence
            b'S', b'Q',
            0x00, 0x00,             // reserved
            0xFF, 0xFF, 0xFF, 0xFF, // undefined length
        ];
        let mut session = session_after_meta("1.2.840.10008.1.2.1");
        let elem = decode_element(&mut Cursor::new(raw), &mut session).unwrap();
        assert_eq!(elem.vr(), VR::SQ);
        assert!(elem.length().is_undefined());
    }

    #[test]
    fn transfer_syntax_element_updates_the_session() {
        #[rustfmt::skip]
        let raw: &[u8] = &[
            0x02, 0x00, 0x10, 0x00, // (0002,0010) Transfer Syntax UID
            b'U', b'I',
            0x12, 0x00,             // length: 18
            b'1', b'.', b'2', b'.', b'8', b'4', b'0', b'.',
            b'1', b'0', b'0', b'0', b'8', b'.', b'1', b'.', b'2', b'\0',
        ];
        let mut session = DecodeSession::new();
        let elem = decode_element(&mut Cursor::new(raw), &mut session).unwrap();
        assert_eq!(elem.tag(), Tag(0x0002, 0x0010));

        session.observe_group(0x0008);
        assert_eq!(
            session.effective_encoding(),
            Some(VrEncoding::Implicit)
        );
        assert_eq!(session.effective_endianness(), Some(Endianness::Little));
    }

    #[test]
    fn end_of_stream_is_distinguishable() {
        let mut session = session_after_meta("1.2.840.10008.1.2.1");
        let err = decode_element(&mut Cursor::new(&[][..]), &mut session).unwrap_err();
        assert!(err.is_end_of_stream());

        // a truncated value is not a clean end of stream
        #[rustfmt::skip]
        let raw: &[u8] = &[
            0x28, 0x00, 0x10, 0x00, b'U', b'S', 0x02, 0x00, 0x00,
        ];
        let err = decode_element(&mut Cursor::new(raw), &mut session).unwrap_err();
        assert!(!err.is_end_of_stream());
    }
}
