#![deny(trivial_numeric_casts, unsafe_code)]
#![warn(missing_docs, missing_debug_implementations, unused_qualifications)]

//! Core data types for reading DICOM image series:
//!
//! - [`header`] holds the basic vocabulary of the format: attribute tags,
//!   value representation codes, value lengths, and element headers.
//! - [`element`] holds the owned data element type with its memoized
//!   numeric interpretations.
//! - [`dictionary`] is the built-in attribute dictionary used to resolve
//!   implicit-VR streams and to name attributes for display.
//! - [`tags`] declares constants for the attributes that the volume
//!   reconstruction pipeline reads directly.

pub mod dictionary;
pub mod element;
pub mod header;
pub mod tags;

pub use element::DataElement;
pub use header::{DataElementHeader, Header, Length, Tag, VR};

// re-export crates that are part of the public API
pub use byteordered;
pub use smallvec;
