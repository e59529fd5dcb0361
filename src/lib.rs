//! Single-frame Zstandard (RFC 8878) decompressor.
//!
//! Decodes one complete frame from an in-memory buffer into a caller-
//! provided destination, with optional dictionary support. Checksums are
//! skipped, not verified, and multi-frame input is out of scope.

#![warn(clippy::unwrap_used, clippy::panic)]

mod bit_reader;
mod dictionary;
mod error;
mod frame;
mod fse;
mod huffman;
mod literals;
mod sequences;

pub use crate::dictionary::Dictionary;
pub use crate::error::{ErrorKind, Res, ZstdError};
pub use crate::frame::{decompress, decompress_with_dict, peek_decompressed_size};
