//! Shared primitives for the tbxi-rs workspace: big-endian struct
//! encoding, the Mac OS Roman text codec, and manifest text parsing.
//!
//! Every format crate in this workspace (`tbxi-lzss`, `tbxi-pef`,
//! `tbxi-supermario`, `tbxi-powerpc`, `tbxi-parcels`, `tbxi-bootinfo`,
//! `tbxi-format`) depends on this crate instead of duplicating struct
//! or text-parsing plumbing.

pub mod endian;
pub mod error;
pub mod macroman;
pub mod manifest;
pub mod recurse;

pub use endian::{BeU16, BeU32, BeU64, BigEndian, Endianness, U16, U32, U64};
pub use error::DispatchError;
pub use recurse::{NoRecurse, Recurser};
