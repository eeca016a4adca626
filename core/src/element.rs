//! An owned DICOM data element together with memoized numeric
//! interpretations of its value.

use byteordered::byteorder::{ByteOrder, LittleEndian};
use smallvec::SmallVec;

use crate::header::{DataElementHeader, Header, Length, Tag, VR};
use crate::tags;

/// Multi-valued numeric container.
///
/// Most multi-valued attributes in practice carry one or two values
/// (window presets being the canonical two-valued case).
pub type C<T> = SmallVec<[T; 2]>;

/// Values longer than this are not materialized as text, to bound the
/// cost of formatting pathological elements such as pixel data.
const MAX_TEXT_LEN: usize = 255;

/// A data type that represents and owns one decoded DICOM data element.
///
/// An element is constructed in one go from its decoded header and raw
/// value bytes, and is immutable afterwards. Construction opportunistically
/// interprets the value as an integer and as one or more floating point
/// numbers (split on the `\` multi-value delimiter); those parses are
/// memoized because downstream consumers read attributes such as image
/// dimensions and window presets repeatedly. A failed parse is routine
/// for non-numeric representations and leaves the memo empty.
#[derive(Debug, Clone, PartialEq)]
pub struct DataElement {
    header: DataElementHeader,
    data: Vec<u8>,
    int_value: Option<i64>,
    float_values: C<f64>,
}

impl DataElement {
    /// Build a data element from its header and raw value bytes,
    /// memoizing the numeric interpretations of the value.
    pub fn new(header: DataElementHeader, data: Vec<u8>) -> Self {
        let mut element = DataElement {
            header,
            data,
            int_value: None,
            float_values: SmallVec::new(),
        };
        element.int_value = element.parse_int();
        element.float_values = element.parse_floats();
        element
    }

    /// Create an element with an empty value.
    pub fn empty(tag: Tag, vr: VR, len: Length) -> Self {
        DataElement {
            header: DataElementHeader::new(tag, vr, len),
            data: Vec::new(),
            int_value: None,
            float_values: SmallVec::new(),
        }
    }

    /// Retrieve the element header.
    #[inline]
    pub fn header(&self) -> &DataElementHeader {
        &self.header
    }

    /// Retrieve the value representation.
    #[inline]
    pub fn vr(&self) -> VR {
        self.header.vr
    }

    /// Borrow the raw value bytes.
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Move the raw value bytes out of the element, discarding the rest.
    ///
    /// Used by the volume preprocessing step to take ownership of large
    /// pixel buffers once the enclosing file record no longer needs them.
    #[inline]
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// The memoized integer interpretation of the value, if one parsed.
    #[inline]
    pub fn int(&self) -> Option<i64> {
        self.int_value
    }

    /// The memoized floating point interpretations of the value.
    /// Multi-valued attributes are split on the `\` delimiter.
    #[inline]
    pub fn floats(&self) -> &[f64] {
        &self.float_values
    }

    /// The first memoized floating point value, if any parsed.
    #[inline]
    pub fn first_float(&self) -> Option<f64> {
        self.float_values.first().copied()
    }

    /// Render the value as text, according to its value representation.
    ///
    /// Character-string representations drop NUL padding bytes; `FL` and
    /// `FD` values are formatted as fixed-point decimals; `SS`, `US`, `SL`
    /// and `UL` are decoded as little endian integers directly from the
    /// raw bytes (payloads were normalized to little endian at decode
    /// time). Values longer than 255 bytes are reported as an elided
    /// placeholder instead of being materialized.
    pub fn to_text(&self) -> String {
        if self.data.len() > MAX_TEXT_LEN {
            return format!("<{} bytes>", self.data.len());
        }
        if self.data.is_empty() {
            return String::new();
        }
        match self.header.vr {
            vr if vr.is_string() => {
                let cleaned: Vec<u8> =
                    self.data.iter().copied().filter(|&b| b > 0).collect();
                String::from_utf8_lossy(&cleaned).into_owned()
            }
            VR::FL if self.data.len() >= 4 => {
                format!("{:.4}", LittleEndian::read_f32(&self.data))
            }
            VR::FD if self.data.len() >= 8 => {
                format!("{:.4}", LittleEndian::read_f64(&self.data))
            }
            VR::SS if self.data.len() >= 2 => {
                LittleEndian::read_i16(&self.data).to_string()
            }
            VR::US if self.data.len() >= 2 => {
                LittleEndian::read_u16(&self.data).to_string()
            }
            VR::SL if self.data.len() >= 4 => {
                LittleEndian::read_i32(&self.data).to_string()
            }
            VR::UL if self.data.len() >= 4 => {
                LittleEndian::read_u32(&self.data).to_string()
            }
            _ => format!("<{} bytes>", self.data.len()),
        }
    }

    fn parse_int(&self) -> Option<i64> {
        match self.header.vr {
            VR::US if self.data.len() >= 2 => {
                Some(i64::from(LittleEndian::read_u16(&self.data)))
            }
            VR::SS if self.data.len() >= 2 => {
                Some(i64::from(LittleEndian::read_i16(&self.data)))
            }
            VR::UL if self.data.len() >= 4 => {
                Some(i64::from(LittleEndian::read_u32(&self.data)))
            }
            VR::SL if self.data.len() >= 4 => {
                Some(i64::from(LittleEndian::read_i32(&self.data)))
            }
            _ => self.to_text().trim().parse().ok(),
        }
    }

    fn parse_floats(&self) -> C<f64> {
        match self.header.vr {
            VR::FL if self.data.len() >= 4 => {
                let mut v = SmallVec::new();
                v.push(f64::from(LittleEndian::read_f32(&self.data)));
                v
            }
            VR::FD if self.data.len() >= 8 => {
                let mut v = SmallVec::new();
                v.push(LittleEndian::read_f64(&self.data));
                v
            }
            _ => {
                let text = self.to_text();
                if self.is_multi_valued_numeric() {
                    text.split('\\')
                        .filter_map(|part| part.trim().parse().ok())
                        .collect()
                } else {
                    // single-valued interpretation: first component only
                    text.split('\\')
                        .next()
                        .and_then(|part| part.trim().parse().ok())
                        .into_iter()
                        .collect()
                }
            }
        }
    }

    /// Window presets are the attributes read as full arrays; every other
    /// consumer only looks at the first value.
    fn is_multi_valued_numeric(&self) -> bool {
        self.header.tag == tags::WINDOW_CENTER || self.header.tag == tags::WINDOW_WIDTH
    }
}

impl Header for DataElement {
    #[inline]
    fn tag(&self) -> Tag {
        self.header.tag
    }

    #[inline]
    fn length(&self) -> Length {
        self.header.len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(tag: Tag, vr: VR, data: &[u8]) -> DataElement {
        DataElement::new(
            DataElementHeader::new(tag, vr, Length(data.len() as u32)),
            data.to_vec(),
        )
    }

    #[test]
    fn string_value_strips_nul_padding() {
        let e = element(Tag(0x0002, 0x0010), VR::UI, b"1.2.840.10008.1.2.1\0");
        assert_eq!(e.to_text(), "1.2.840.10008.1.2.1");
    }

    #[test]
    fn binary_integers_decode_little_endian() {
        let e = element(Tag(0x0028, 0x0010), VR::US, &[0x00, 0x02]);
        assert_eq!(e.to_text(), "512");
        assert_eq!(e.int(), Some(512));

        let e = element(Tag(0x0028, 0x1052), VR::SS, &[0x00, 0xFC]);
        assert_eq!(e.int(), Some(-1024));
    }

    #[test]
    fn text_integers_memoize() {
        let e = element(Tag(0x0020, 0x0013), VR::IS, b"42 ");
        assert_eq!(e.int(), Some(42));
        assert_eq!(e.first_float(), Some(42.0));
    }

    #[test]
    fn decimal_strings_memoize() {
        let e = element(Tag(0x0028, 0x1053), VR::DS, b"1.5");
        assert_eq!(e.first_float(), Some(1.5));
        assert_eq!(e.int(), None);
    }

    #[test]
    fn window_presets_split_on_backslash() {
        let e = element(Tag(0x0028, 0x1050), VR::DS, b"40\\400\\-600");
        assert_eq!(e.floats(), &[40.0, 400.0, -600.0]);

        // any other attribute only memoizes its first value
        let e = element(Tag(0x0028, 0x0030), VR::DS, b"0.5\\0.5");
        assert_eq!(e.floats(), &[0.5]);
    }

    #[test]
    fn long_values_are_elided() {
        let e = element(Tag(0x7FE0, 0x0010), VR::OW, &[0u8; 1024]);
        assert_eq!(e.to_text(), "<1024 bytes>");
        assert_eq!(e.int(), None);
    }

    #[test]
    fn non_numeric_parse_failures_are_silent() {
        let e = element(Tag(0x0010, 0x0010), VR::PN, b"DOE^JOHN");
        assert_eq!(e.int(), None);
        assert!(e.floats().is_empty());
    }
}
