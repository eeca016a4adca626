//! Whole-file decoding: preamble and magic code checking, the element
//! decode loop with sequence and encapsulated pixel data handling, and
//! the resulting [`FileRecord`] attribute map.

use std::collections::BTreeMap;
use std::io::Read;

use snafu::{ensure, ResultExt, Snafu};
use volscan_core::header::{DataElementHeader, Header, Length, Tag};
use volscan_core::{tags, DataElement};

use crate::decode::{decode_element, DecodeError};
use crate::session::DecodeSession;

const DICM_MAGIC_CODE: [u8; 4] = [b'D', b'I', b'C', b'M'];

/// An error while reading a DICOM file.
#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum ReadError {
    /// The 128-byte preamble could not be read.
    #[snafu(display("could not read file preamble"))]
    ReadPreamble { source: std::io::Error },

    /// The 4-byte magic code could not be read.
    #[snafu(display("could not read magic code"))]
    ReadMagicCode { source: std::io::Error },

    /// The magic code is not `DICM`: this is not a DICOM file.
    #[snafu(display("not a DICOM file"))]
    NotDicom,

    /// A data element could not be decoded.
    #[snafu(display("could not decode data element #{}", index))]
    DecodeElement {
        index: usize,
        source: DecodeError,
    },

    /// A pixel data fragment's payload could not be read.
    #[snafu(display("could not read pixel data fragment of {} bytes", len))]
    ReadFragment {
        len: usize,
        source: std::io::Error,
    },
}

type Result<T, E = ReadError> = std::result::Result<T, E>;

/// Tunable limits of the file decode loop.
///
/// Both values are pragmatic guards rather than rules of the format, and
/// are therefore configurable instead of hard-coded.
#[derive(Debug, Clone)]
pub struct DecodeOptions {
    /// Maximum number of data elements decoded from one file. An image
    /// file carries a few dozen; a stream still going after this many is
    /// considered malformed and truncated at this point.
    pub max_elements: usize,
    /// Minimum payload size for an encapsulated pixel data fragment to be
    /// considered actual image data. Shorter fragments are basic offset
    /// tables or framing.
    pub min_pixel_fragment: usize,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        DecodeOptions {
            max_elements: 150,
            min_pixel_fragment: 4,
        }
    }
}

/// One decoded DICOM file: its data elements keyed by tag, nested
/// sequence content, and scalar attributes cached for fast access during
/// volume assembly.
#[derive(Debug, Default)]
pub struct FileRecord {
    elements: BTreeMap<Tag, DataElement>,
    sequences: BTreeMap<Tag, BTreeMap<Tag, DataElement>>,
    image_number: i32,
    rows: u16,
    columns: u16,
    bits_allocated: u16,
    bits_stored: u16,
    high_bit: u16,
}

impl FileRecord {
    /// Borrow the element with the given tag, if present.
    pub fn element(&self, tag: Tag) -> Option<&DataElement> {
        self.elements.get(&tag)
    }

    /// Borrow the nested data set associated with the element of the
    /// given tag, if one was decoded.
    pub fn sequence(&self, tag: Tag) -> Option<&BTreeMap<Tag, DataElement>> {
        self.sequences.get(&tag)
    }

    /// Iterate over all top-level elements in tag order.
    pub fn elements(&self) -> impl Iterator<Item = &DataElement> {
        self.elements.values()
    }

    /// Number of top-level elements.
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Whether the record holds no elements.
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Take ownership of the pixel data element, detaching it from the
    /// record. Pixel buffers dominate a file's memory, and once the
    /// volume preprocessing step has consumed one there is no reason to
    /// keep it attached.
    pub fn take_pixel_data(&mut self) -> Option<DataElement> {
        self.elements.remove(&tags::PIXEL_DATA)
    }

    /// The declared image (slice) number, or 0 when absent.
    pub fn image_number(&self) -> i32 {
        self.image_number
    }

    /// The image height in pixels, or 0 when absent.
    pub fn rows(&self) -> u16 {
        self.rows
    }

    /// The image width in pixels, or 0 when absent.
    pub fn columns(&self) -> u16 {
        self.columns
    }

    /// Bits allocated per pixel sample, or 0 when absent.
    pub fn bits_allocated(&self) -> u16 {
        self.bits_allocated
    }

    /// Bits stored per pixel sample, or 0 when absent.
    pub fn bits_stored(&self) -> u16 {
        self.bits_stored
    }

    /// The highest significant bit of a pixel sample, or 0 when absent.
    pub fn high_bit(&self) -> u16 {
        self.high_bit
    }

    /// The rescale slope, defaulting to 1 when absent.
    pub fn rescale_slope(&self) -> f64 {
        self.element(tags::RESCALE_SLOPE)
            .and_then(DataElement::first_float)
            .unwrap_or(1.0)
    }

    /// The rescale intercept, defaulting to 0 when absent.
    pub fn rescale_intercept(&self) -> f64 {
        self.element(tags::RESCALE_INTERCEPT)
            .and_then(DataElement::first_float)
            .unwrap_or(0.0)
    }

    /// The window center presets carried by the file; empty when absent.
    pub fn window_centers(&self) -> &[f64] {
        self.element(tags::WINDOW_CENTER)
            .map(DataElement::floats)
            .unwrap_or(&[])
    }

    /// The window width presets carried by the file; empty when absent.
    pub fn window_widths(&self) -> &[f64] {
        self.element(tags::WINDOW_WIDTH)
            .map(DataElement::floats)
            .unwrap_or(&[])
    }

    /// Whether the record carries everything needed to place its pixels
    /// into a volume: a pixel grid, sample layout, and pixel data.
    pub fn has_pixel_grid(&self) -> bool {
        self.rows > 0
            && self.columns > 0
            && self.bits_allocated > 0
            && self.elements.contains_key(&tags::PIXEL_DATA)
    }

    fn cached_int(&self, tag: Tag) -> i64 {
        self.element(tag).and_then(DataElement::int).unwrap_or(0)
    }

    fn cache_scalars(&mut self) {
        self.image_number = self.cached_int(tags::INSTANCE_NUMBER) as i32;
        self.rows = self.cached_int(tags::ROWS) as u16;
        self.columns = self.cached_int(tags::COLUMNS) as u16;
        self.bits_allocated = self.cached_int(tags::BITS_ALLOCATED) as u16;
        self.bits_stored = self.cached_int(tags::BITS_STORED) as u16;
        self.high_bit = self.cached_int(tags::HIGH_BIT) as u16;
    }
}

/// Decode one DICOM file from the given source.
///
/// The source must be positioned at the start of the 128-byte preamble.
/// Elements are decoded sequentially until the stream is exhausted or the
/// element cap in `options` is hit, at which point the file is truncated
/// with a warning rather than failing.
pub fn decode_file<S>(source: &mut S, options: &DecodeOptions) -> Result<FileRecord>
where
    S: ?Sized + Read,
{
    let mut preamble = [0u8; 128];
    source
        .read_exact(&mut preamble)
        .context(ReadPreambleSnafu)?;
    let mut magic = [0u8; 4];
    source.read_exact(&mut magic).context(ReadMagicCodeSnafu)?;
    ensure!(magic == DICM_MAGIC_CODE, NotDicomSnafu);

    let mut session = DecodeSession::new();
    let mut elements: BTreeMap<Tag, DataElement> = BTreeMap::new();
    let mut sequences: BTreeMap<Tag, BTreeMap<Tag, DataElement>> = BTreeMap::new();
    let mut decoded = 0usize;

    'top: loop {
        if decoded >= options.max_elements {
            tracing::warn!(
                max_elements = options.max_elements,
                "element cap hit, truncating file decode"
            );
            break;
        }
        let element = match decode_element(source, &mut session) {
            Ok(element) => element,
            Err(e) if e.is_end_of_stream() => break,
            Err(source) => return Err(ReadError::DecodeElement { index: decoded, source }),
        };
        decoded += 1;
        let tag = element.tag();

        if tag == Tag::ITEM {
            // a sequence opens: collect its elements into a nested map
            // associated with the element that introduced it
            let owner = session.last_top_level();
            let mut nested = BTreeMap::new();
            loop {
                if decoded >= options.max_elements {
                    tracing::warn!(
                        max_elements = options.max_elements,
                        "element cap hit inside a sequence, truncating file decode"
                    );
                    break 'top;
                }
                let child = match decode_element(source, &mut session) {
                    Ok(child) => child,
                    Err(e) if e.is_end_of_stream() => break 'top,
                    Err(source) => {
                        return Err(ReadError::DecodeElement { index: decoded, source })
                    }
                };
                decoded += 1;
                let child_tag = child.tag();
                if child_tag == Tag::SEQUENCE_DELIMITER {
                    break;
                }
                if child_tag.is_marker() {
                    // item boundaries are flattened into one nested map
                    continue;
                }
                nested.insert(child_tag, child);
            }
            if let Some(owner) = owner {
                sequences.insert(owner, nested);
            }
            continue;
        }

        if tag.is_marker() {
            continue;
        }

        if tag == tags::PIXEL_DATA && element.length() == Length(0) {
            // encapsulated pixel data: the payload is a fragment list
            let fragment = read_pixel_fragments(source, &mut session, options, &mut decoded)?;
            let element = match fragment {
                Some(data) => DataElement::new(
                    DataElementHeader::new(tag, element.vr(), Length(data.len() as u32)),
                    data,
                ),
                None => element,
            };
            session.set_last_top_level(tag);
            elements.insert(tag, element);
            continue;
        }

        session.set_last_top_level(tag);
        elements.insert(tag, element);
    }

    let mut record = FileRecord {
        elements,
        sequences,
        ..FileRecord::default()
    };
    record.cache_scalars();
    Ok(record)
}

/// Read an encapsulated pixel data fragment list, returning the payload
/// of the largest fragment above the configured size threshold.
fn read_pixel_fragments<S>(
    source: &mut S,
    session: &mut DecodeSession,
    options: &DecodeOptions,
    decoded: &mut usize,
) -> Result<Option<Vec<u8>>>
where
    S: ?Sized + Read,
{
    let mut best: Option<Vec<u8>> = None;
    loop {
        if *decoded >= options.max_elements {
            tracing::warn!(
                max_elements = options.max_elements,
                "element cap hit inside pixel data fragments"
            );
            break;
        }
        let marker = match decode_element(source, session) {
            Ok(marker) => marker,
            Err(e) if e.is_end_of_stream() => break,
            Err(source) => {
                return Err(ReadError::DecodeElement {
                    index: *decoded,
                    source,
                })
            }
        };
        *decoded += 1;
        let tag = marker.tag();
        if tag == Tag::SEQUENCE_DELIMITER {
            break;
        }
        if tag != Tag::ITEM {
            continue;
        }
        let len = marker.length().get().unwrap_or(0) as usize;
        if len == 0 {
            continue;
        }
        let mut data = vec![0u8; len];
        source
            .read_exact(&mut data)
            .context(ReadFragmentSnafu { len })?;
        if len > options.min_pixel_fragment
            && best.as_ref().map_or(true, |b| data.len() > b.len())
        {
            best = Some(data);
        }
    }
    Ok(best)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use volscan_core::VR;

    // ---- synthetic file builders ----

    fn explicit_short(group: u16, elem: u16, vr: &[u8; 2], value: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&group.to_le_bytes());
        out.extend_from_slice(&elem.to_le_bytes());
        out.extend_from_slice(vr);
        out.extend_from_slice(&(value.len() as u16).to_le_bytes());
        out.extend_from_slice(value);
        out
    }

    fn explicit_extended(group: u16, elem: u16, vr: &[u8; 2], len: u32, value: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&group.to_le_bytes());
        out.extend_from_slice(&elem.to_le_bytes());
        out.extend_from_slice(vr);
        out.extend_from_slice(&[0, 0]);
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(value);
        out
    }

    fn implicit(group: u16, elem: u16, value: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&group.to_le_bytes());
        out.extend_from_slice(&elem.to_le_bytes());
        out.extend_from_slice(&(value.len() as u32).to_le_bytes());
        out.extend_from_slice(value);
        out
    }

    fn explicit_short_be(group: u16, elem: u16, vr: &[u8; 2], value: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&group.to_be_bytes());
        out.extend_from_slice(&elem.to_be_bytes());
        out.extend_from_slice(vr);
        out.extend_from_slice(&(value.len() as u16).to_be_bytes());
        out.extend_from_slice(value);
        out
    }

    /// A file preamble plus a meta group declaring the given transfer
    /// syntax, followed by the given data set bytes.
    fn file_bytes(ts_uid: &str, data_set: &[u8]) -> Vec<u8> {
        let mut uid = ts_uid.as_bytes().to_vec();
        if uid.len() % 2 == 1 {
            uid.push(0);
        }
        let mut out = vec![0u8; 128];
        out.extend_from_slice(b"DICM");
        out.extend_from_slice(&explicit_short(0x0002, 0x0000, b"UL", &28u32.to_le_bytes()));
        out.extend_from_slice(&explicit_short(0x0002, 0x0010, b"UI", &uid));
        out.extend_from_slice(data_set);
        out
    }

    fn decode(bytes: &[u8]) -> FileRecord {
        decode_file(&mut Cursor::new(bytes), &DecodeOptions::default()).unwrap()
    }

    #[test]
    fn rejects_non_dicom_input() {
        let mut bytes = vec![0u8; 128];
        bytes.extend_from_slice(b"NOPE");
        let err = decode_file(&mut Cursor::new(&bytes), &DecodeOptions::default()).unwrap_err();
        assert!(matches!(err, ReadError::NotDicom));

        let err =
            decode_file(&mut Cursor::new(&[0u8; 16][..]), &DecodeOptions::default()).unwrap_err();
        assert!(matches!(err, ReadError::ReadPreamble { .. }));
    }

    #[test]
    fn minimal_file_round_trip() {
        let pixels: Vec<u8> = (0..32).collect();
        let mut ds = Vec::new();
        ds.extend_from_slice(&explicit_short(0x0028, 0x0010, b"US", &4u16.to_le_bytes()));
        ds.extend_from_slice(&explicit_short(0x0028, 0x0011, b"US", &4u16.to_le_bytes()));
        ds.extend_from_slice(&explicit_short(0x0028, 0x0100, b"US", &16u16.to_le_bytes()));
        ds.extend_from_slice(&explicit_short(0x0028, 0x0101, b"US", &16u16.to_le_bytes()));
        ds.extend_from_slice(&explicit_short(0x0028, 0x0102, b"US", &15u16.to_le_bytes()));
        ds.extend_from_slice(&explicit_extended(0x7FE0, 0x0010, b"OW", 32, &pixels));

        let record = decode(&file_bytes("1.2.840.10008.1.2.1", &ds));

        assert_eq!(record.rows(), 4);
        assert_eq!(record.columns(), 4);
        assert_eq!(record.bits_allocated(), 16);
        assert_eq!(record.bits_stored(), 16);
        assert_eq!(record.high_bit(), 15);
        assert!(record.has_pixel_grid());

        let elem = record.element(tags::ROWS).unwrap();
        assert_eq!(elem.vr(), VR::US);
        assert_eq!(elem.length(), Length(2));

        let pixel = record.element(tags::PIXEL_DATA).unwrap();
        assert_eq!(pixel.vr(), VR::OW);
        assert_eq!(pixel.data(), &pixels[..]);
        // one sample per pixel over a 4x4 grid at 16 bits
        assert_eq!(
            pixel.data().len(),
            usize::from(record.rows()) * usize::from(record.columns()) * 2
        );
    }

    #[test]
    fn implicit_and_explicit_encodings_are_equivalent() {
        let mut ds = Vec::new();
        ds.extend_from_slice(&explicit_short(0x0028, 0x0010, b"US", &256u16.to_le_bytes()));
        let explicit_record = decode(&file_bytes("1.2.840.10008.1.2.1", &ds));

        let mut ds = Vec::new();
        ds.extend_from_slice(&implicit(0x0028, 0x0010, &256u16.to_le_bytes()));
        let implicit_record = decode(&file_bytes("1.2.840.10008.1.2", &ds));

        let e = explicit_record.element(tags::ROWS).unwrap();
        let i = implicit_record.element(tags::ROWS).unwrap();
        assert_eq!(e.vr(), i.vr());
        assert_eq!(e.int(), i.int());
        assert_eq!(e.data(), i.data());
    }

    #[test]
    fn big_endian_and_little_endian_decode_to_the_same_value() {
        let mut ds = Vec::new();
        ds.extend_from_slice(&explicit_short(0x0028, 0x0010, b"US", &512u16.to_le_bytes()));
        let le = decode(&file_bytes("1.2.840.10008.1.2.1", &ds));

        let mut ds = Vec::new();
        ds.extend_from_slice(&explicit_short_be(0x0028, 0x0010, b"US", &512u16.to_be_bytes()));
        let be = decode(&file_bytes("1.2.840.10008.1.2.2", &ds));

        assert_eq!(le.rows(), 512);
        assert_eq!(be.rows(), 512);
    }

    #[test]
    fn unknown_transfer_syntax_falls_back_to_heuristics() {
        let mut ds = Vec::new();
        ds.extend_from_slice(&explicit_short(0x0028, 0x0010, b"US", &64u16.to_le_bytes()));
        ds.extend_from_slice(&implicit(0x0028, 0x0011, &64u16.to_le_bytes()));
        let record = decode(&file_bytes("1.2.999.1", &ds));

        // every element still decodes, via the VR code heuristic
        assert_eq!(record.rows(), 64);
        assert_eq!(record.columns(), 64);
    }

    #[test]
    fn window_presets_are_cached_as_arrays() {
        let mut ds = Vec::new();
        ds.extend_from_slice(&explicit_short(0x0028, 0x1050, b"DS", b"40\\400"));
        ds.extend_from_slice(&explicit_short(0x0028, 0x1051, b"DS", b"80\\2000"));
        ds.extend_from_slice(&explicit_short(0x0028, 0x1052, b"DS", b"-1024"));
        ds.extend_from_slice(&explicit_short(0x0028, 0x1053, b"DS", b"2"));
        let record = decode(&file_bytes("1.2.840.10008.1.2.1", &ds));

        assert_eq!(record.window_centers(), &[40.0, 400.0]);
        assert_eq!(record.window_widths(), &[80.0, 2000.0]);
        assert_eq!(record.rescale_intercept(), -1024.0);
        assert_eq!(record.rescale_slope(), 2.0);
    }

    #[test]
    fn sequences_are_keyed_by_the_preceding_element() {
        let mut ds = Vec::new();
        // (0008,1110) SQ with undefined length
        ds.extend_from_slice(&[0x08, 0x00, 0x10, 0x11]);
        ds.extend_from_slice(b"SQ");
        ds.extend_from_slice(&[0, 0, 0xFF, 0xFF, 0xFF, 0xFF]);
        // item with undefined length
        ds.extend_from_slice(&[0xFE, 0xFF, 0x00, 0xE0, 0xFF, 0xFF, 0xFF, 0xFF]);
        ds.extend_from_slice(&explicit_short(0x0008, 0x1150, b"UI", b"1.2\0"));
        // item delimiter, then sequence delimiter
        ds.extend_from_slice(&[0xFE, 0xFF, 0x0D, 0xE0, 0, 0, 0, 0]);
        ds.extend_from_slice(&[0xFE, 0xFF, 0xDD, 0xE0, 0, 0, 0, 0]);
        // a regular element afterwards
        ds.extend_from_slice(&explicit_short(0x0020, 0x0013, b"IS", b"7 "));

        let record = decode(&file_bytes("1.2.840.10008.1.2.1", &ds));

        let nested = record.sequence(Tag(0x0008, 0x1110)).unwrap();
        let uid = nested.get(&Tag(0x0008, 0x1150)).unwrap();
        assert_eq!(uid.to_text(), "1.2");
        assert_eq!(record.image_number(), 7);
    }

    #[test]
    fn encapsulated_pixel_data_selects_the_largest_fragment() {
        let payload: Vec<u8> = (0u8..64).collect();
        let mut ds = Vec::new();
        // pixel data with undefined length opens a fragment list
        ds.extend_from_slice(&[0xE0, 0x7F, 0x10, 0x00]);
        ds.extend_from_slice(b"OB");
        ds.extend_from_slice(&[0, 0, 0xFF, 0xFF, 0xFF, 0xFF]);
        // basic offset table fragment: 4 bytes, below the threshold
        ds.extend_from_slice(&[0xFE, 0xFF, 0x00, 0xE0, 4, 0, 0, 0]);
        ds.extend_from_slice(&[0, 0, 0, 0]);
        // the actual image fragment
        ds.extend_from_slice(&[0xFE, 0xFF, 0x00, 0xE0, 64, 0, 0, 0]);
        ds.extend_from_slice(&payload);
        // sequence delimiter closes the list
        ds.extend_from_slice(&[0xFE, 0xFF, 0xDD, 0xE0, 0, 0, 0, 0]);

        let record = decode(&file_bytes("1.2.840.10008.1.2.1", &ds));

        let pixel = record.element(tags::PIXEL_DATA).unwrap();
        assert_eq!(pixel.data(), &payload[..]);
        assert_eq!(pixel.length(), Length(64));
    }

    #[test]
    fn element_cap_truncates_instead_of_looping() {
        let mut ds = Vec::new();
        for elem in 0..32u16 {
            ds.extend_from_slice(&explicit_short(0x0009, 0x1000 + elem, b"LO", b"x "));
        }
        let options = DecodeOptions {
            max_elements: 10,
            ..DecodeOptions::default()
        };
        let bytes = file_bytes("1.2.840.10008.1.2.1", &ds);
        let record = decode_file(&mut Cursor::new(&bytes), &options).unwrap();
        // 2 meta elements + 8 data set elements
        assert_eq!(record.len(), 10);
    }
}
