//! On-disk record layouts for the Toolbox Parcels format.
//!
//! A parcels file is a singly-linked chain of `Node`s, each followed
//! immediately by its array of `Child` records. `Node.hdr_size` and
//! `Node.child_size` are the file's own word for how far to step to find
//! the children and to step between them — read those fields rather than
//! assuming `size_of` on disk, since the format is meant to tolerate
//! future extension of either record.
//!
//! Section 3 of the format description spells out the node's `a`/`b`
//! label fields as "32-byte" explicitly, which this implementation
//! follows; the parenthetical node total elsewhere undercounts by not
//! tallying both `a` and `b` at 32 bytes each — see `DESIGN.md`. The
//! child struct's 32-byte `name` field was already accounted for in its
//! own parenthetical total, so `PrclChildStruct` stays at 60 bytes.

use tbxi_common::BeU32;

#[repr(C, packed)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PrclNodeStruct {
    pub link: BeU32,
    pub ostype: [u8; 4],
    pub hdr_size: BeU32,
    pub flags: BeU32,
    pub n_children: BeU32,
    pub child_size: BeU32,
    pub a: [u8; 32],
    pub b: [u8; 32],
}

pub const NODE_STRUCT_SIZE: usize = std::mem::size_of::<PrclNodeStruct>();

impl PrclNodeStruct {
    pub fn read_from(binary: &[u8], offset: usize) -> Option<Self> {
        Some(*bytemuck::from_bytes(
            binary.get(offset..offset + NODE_STRUCT_SIZE)?,
        ))
    }

    pub fn write_into(&self, binary: &mut [u8], offset: usize) {
        binary[offset..offset + NODE_STRUCT_SIZE].copy_from_slice(bytemuck::bytes_of(self));
    }
}

#[repr(C, packed)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PrclChildStruct {
    pub ostype: [u8; 4],
    pub flags: BeU32,
    pub compress: [u8; 4],
    pub unpackedlen: BeU32,
    pub cksum: BeU32,
    pub packedlen: BeU32,
    pub ptr: BeU32,
    pub name: [u8; 32],
}

pub const CHILD_STRUCT_SIZE: usize = std::mem::size_of::<PrclChildStruct>();

impl PrclChildStruct {
    pub fn read_from(binary: &[u8], offset: usize) -> Option<Self> {
        Some(*bytemuck::from_bytes(
            binary.get(offset..offset + CHILD_STRUCT_SIZE)?,
        ))
    }

    pub fn write_into(&self, binary: &mut [u8], offset: usize) {
        binary[offset..offset + CHILD_STRUCT_SIZE].copy_from_slice(bytemuck::bytes_of(self));
    }
}

/// File magic: `"prcl"` followed by a one-byte version and three zero bytes.
pub const MAGIC: &[u8; 8] = b"prcl\x01\x00\x00\x00";
/// Stored but otherwise unused file-header-size constant at offset 8.
pub const HEADER_SIZE_CONST: u32 = 0x14;
/// Offset of the head-of-chain pointer.
pub const HEAD_PTR_OFFSET: usize = 12;
/// Total size of the fixed file preamble (magic + header-size constant + head pointer).
pub const PREAMBLE_SIZE: usize = 16;

/// Pad byte used to 4-byte-align child data regions.
pub const DATA_PAD: u8 = 0x99;

/// Flag bit (value, not index) marking a child as CRC-32 checksummed.
pub const FLAG_CKSUM: u32 = 0x10;

/// Child ostypes whose payload is rendered as inline NUL-terminated strings
/// rather than dumped to a sidecar file.
pub fn is_string_ostype(ostype: &[u8; 4]) -> bool {
    ostype == b"cstr" || ostype == b"csta"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn struct_sizes() {
        assert_eq!(NODE_STRUCT_SIZE, 88);
        assert_eq!(CHILD_STRUCT_SIZE, 60);
    }

    #[test]
    fn head_ptr_at_byte_12() {
        assert_eq!(HEAD_PTR_OFFSET, 12);
        assert_eq!(MAGIC.len() + 4, HEAD_PTR_OFFSET);
    }
}
