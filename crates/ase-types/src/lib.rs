//! # ase-types
//!
//! ASE to Rust type mappings and conversions.
//!
//! This crate interprets raw TDS 5.0 wire values against their column
//! formats and converts them to Rust types, and encodes Rust values as
//! request parameters. The byte order and charset negotiated at login flow
//! in through [`tds5_protocol::codec::Session`].
//!
//! Exact numerics keep their full 38-digit wire precision in [`Numeric`];
//! conversion to [`rust_decimal::Decimal`] is available but fails rather
//! than rounds when the value does not fit.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod datetime;
pub mod decode;
pub mod encode;
pub mod error;
pub mod numeric;
pub mod value;

pub use decode::decode_value;
pub use encode::{encode_value, format_column_for, wire_type_for};
pub use error::TypeError;
pub use numeric::{Numeric, MAX_PRECISION};
pub use value::AseValue;
