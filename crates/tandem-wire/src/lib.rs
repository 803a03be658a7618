//! Wire primitives for the tandem BFT protocol.
//!
//! Messages are flat big-endian byte streams; field order is part of the
//! format. Lists and byte strings carry a LEB128 varint length prefix.
//! This crate provides only the stream primitives; message layouts live
//! next to their types in `tandem-consensus`.

pub mod error;
pub mod io;

pub use error::WireError;
pub use io::{WireDecode, WireEncode};
