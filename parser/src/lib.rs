#![deny(trivial_numeric_casts, unsafe_code)]
#![warn(missing_docs, missing_debug_implementations, unused_qualifications)]

//! A tag-by-tag decoder for DICOM files of uncompressed image series.
//!
//! The crate is organized by decoding layer:
//!
//! - [`transfer_syntax`] is the built-in registry of recognized transfer
//!   syntax UIDs and the encodings they select.
//! - [`session`] holds the mutable state threaded through element decode
//!   calls: the file meta group position, the active VR encoding and byte
//!   order, and the last top-level tag.
//! - [`decode`] reads one data element at a time, resolving the explicit
//!   versus implicit VR encodings and either byte order.
//! - [`file`] reads whole files into a [`FileRecord`](file::FileRecord)
//!   attribute map, with sequence and encapsulated pixel data handling.

pub mod decode;
pub mod file;
pub mod session;
pub mod transfer_syntax;

pub use decode::{decode_element, DecodeError};
pub use file::{decode_file, DecodeOptions, FileRecord, ReadError};
pub use session::DecodeSession;
pub use transfer_syntax::{transfer_syntax, TransferSyntaxEntry, VrEncoding};
