//!
//! Protoframe reads a stream of length-prefixed protocol buffer records and renders every record
//! as text through a schema-aware decoder.
//!
//! The stream is split into records by a [`Framer`](frame::Framer). Every record is handed to a
//! [`Decoder`](decoder::Decoder) by the [`Dispatcher`](dispatch::Dispatcher), which writes a
//! numbered block per record. A record that fails to decode is reported and skipped; framing
//! errors and decoders that cannot be run end the whole run.
//!
//! ```
//! use protoframe::decoder::{DecodeOutput, Decoder, DecoderError};
//! use protoframe::dispatch::Dispatcher;
//! use protoframe::frame::{Framer, HeaderWidth};
//!
//! struct Length;
//! impl Decoder for Length
//! {
//!     fn decode(&mut self, payload: &[u8]) -> Result<DecodeOutput, DecoderError>
//!     {
//!         Ok(DecodeOutput::decoded(format!("{} bytes", payload.len())))
//!     }
//! }
//!
//! let input: &[u8] = b"\x02\x00\x00\x00OK\x00\x00\x00\x00";
//! let mut out = vec![];
//! let summary = Dispatcher::new(Length, &mut out)
//!     .run(Framer::new(input, HeaderWidth::default()))
//!     .unwrap();
//!
//! assert_eq!(summary.records, 2);
//! assert_eq!(
//!     String::from_utf8(out).unwrap(),
//!     "Record 1:\n2 bytes\nRecord 2:\n0 bytes\n"
//! );
//! ```
#![warn(missing_docs)]

pub mod config;
pub mod decoder;
pub mod dispatch;
pub mod frame;
pub mod protoc;
pub mod schema;
