//! Extraction of classic Macintosh archives and transport encodings:
//! StuffIt (SIT, SIT5), Compact Pro (CPT), BinHex 4.0 (HQX) and MacBinary
//! (BIN), surfaced as a stack of [`Layer`]s that each emit per-file,
//! per-fork byte streams with Finder metadata.

#![warn(clippy::pedantic)]
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss,
    clippy::missing_errors_doc,
    clippy::module_name_repetitions,
    clippy::verbose_bit_mask,
)]
#![warn(rust_2018_idioms)]

pub(crate) mod compress;
pub mod crc;
mod detect;
mod error;
pub mod formats;
mod layer;
pub mod macos;
pub(crate) mod string;
mod types;

pub use crate::detect::process;
pub use crate::error::{Error, Result};
pub use crate::layer::{
    Advance, FileInfo, FileLayer, FinderFlags, ForkType, Layer, MemLayer, Prefetch,
};
pub use crate::types::os_type::{OsType, OsTypeReadExt};
