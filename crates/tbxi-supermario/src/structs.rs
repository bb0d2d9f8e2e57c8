//! On-disk record layouts for the SuperMario (classic 68k) ROM format.
//!
//! Field names and offsets follow Apple's `ROMDefs.h`/`ResourceLoads.h`
//! vintage headers: a flat header, a singly-linked resource chain, and
//! each resource preceded by a "fake Memory Manager" handle header so
//! Resource Manager code can treat ROM resources like ordinary handles.

use tbxi_common::{BeU16, BeU32, BeU64};

#[repr(C, packed)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct SuperMarioHeader {
    pub check_sum: BeU32,
    pub reset_pc: BeU32,
    pub machine_number: u8,
    pub rom_version: u8,
    pub restart_jmp: BeU32,
    pub bad_disk_jmp: BeU32,
    pub rom_release: BeU16,
    pub patch_flags: u8,
    pub unused1: u8,
    pub foreign_os_tbl: BeU32,
    pub rom_rsrc: BeU32,
    pub eject_jmp: BeU32,
    pub disp_table_off: BeU32,
    pub critical_jmp: BeU32,
    pub reset_entry_jmp: BeU32,
    pub rom_loc: u8,
    pub unused2: u8,
    pub check_sum0: BeU32,
    pub check_sum1: BeU32,
    pub check_sum2: BeU32,
    pub check_sum3: BeU32,
    pub rom_size: BeU32,
    pub erase_icon_off: BeU32,
    pub init_sys7_toolbox_off: BeU32,
    pub sub_vers: BeU32,
}

pub const HEADER_SIZE: usize = std::mem::size_of::<SuperMarioHeader>();

impl SuperMarioHeader {
    pub fn read_from(binary: &[u8]) -> Option<Self> {
        Some(*bytemuck::from_bytes(binary.get(..HEADER_SIZE)?))
    }

    pub fn write_into(&self, binary: &mut [u8]) {
        binary[..HEADER_SIZE].copy_from_slice(bytemuck::bytes_of(self));
    }
}

/// `ResHeader`: 16-byte header pointing at the most-recently-inserted
/// `ResEntry`; the chain is walked via `offsetToNext` toward the first.
#[repr(C, packed)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ResHeader {
    pub offset_to_first: BeU32,
    pub max_valid_index: u8,
    pub combo_field_size: u8,
    pub combo_version: BeU16,
    pub header_size: BeU16,
    _pad: [u8; 6],
}

pub const RES_HEADER_SIZE: usize = std::mem::size_of::<ResHeader>();

impl ResHeader {
    pub fn read_from(binary: &[u8], offset: usize) -> Option<Self> {
        Some(*bytemuck::from_bytes(
            binary.get(offset..offset + RES_HEADER_SIZE)?,
        ))
    }

    pub fn write_into(&self, binary: &mut [u8], offset: usize) {
        binary[offset..offset + RES_HEADER_SIZE].copy_from_slice(bytemuck::bytes_of(self));
    }
}

/// `ResEntry`'s fixed portion, before the 256-byte Pascal-string name
/// field. The on-disk record is truncated to `FIXED_SIZE + 1 + name_len`
/// (the length byte plus that many name bytes) — never the full 279.
#[repr(C, packed)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ResEntryFixed {
    pub combo: BeU64,
    pub offset_to_next: BeU32,
    pub offset_to_data: BeU32,
    pub rsrc_type: [u8; 4],
    pub rsrc_id: BeU16,
    pub rsrc_attr: u8,
}

pub const RES_ENTRY_FIXED_SIZE: usize = std::mem::size_of::<ResEntryFixed>();
/// Offset of the Pascal-string length byte within a `ResEntry` record.
pub const RES_ENTRY_NAME_OFFSET: usize = RES_ENTRY_FIXED_SIZE;

#[derive(Debug, Clone)]
pub struct ResEntry {
    pub combo: u64,
    pub offset_to_next: u32,
    pub offset_to_data: u32,
    pub rsrc_type: [u8; 4],
    pub rsrc_id: i16,
    pub rsrc_attr: u8,
    pub rsrc_name: Vec<u8>,
}

impl ResEntry {
    pub fn read_from(binary: &[u8], offset: usize) -> Option<Self> {
        let fixed: ResEntryFixed =
            *bytemuck::from_bytes(binary.get(offset..offset + RES_ENTRY_FIXED_SIZE)?);
        let name_len = *binary.get(offset + RES_ENTRY_NAME_OFFSET)? as usize;
        let name_start = offset + RES_ENTRY_NAME_OFFSET + 1;
        let rsrc_name = binary.get(name_start..name_start + name_len)?.to_vec();

        Some(ResEntry {
            combo: fixed.combo.get(),
            offset_to_next: fixed.offset_to_next.get(),
            offset_to_data: fixed.offset_to_data.get(),
            rsrc_type: fixed.rsrc_type,
            rsrc_id: fixed.rsrc_id.get() as i16,
            rsrc_attr: fixed.rsrc_attr,
            rsrc_name,
        })
    }

    /// The truncated on-disk record: the fixed portion, the length byte,
    /// then exactly `rsrc_name.len()` bytes of name (never padded out to
    /// the full 256-byte Pascal string capacity).
    pub fn to_bytes(&self) -> Vec<u8> {
        let fixed = ResEntryFixed {
            combo: BeU64::new(self.combo),
            offset_to_next: BeU32::new(self.offset_to_next),
            offset_to_data: BeU32::new(self.offset_to_data),
            rsrc_type: self.rsrc_type,
            rsrc_id: BeU16::new(self.rsrc_id as u16),
            rsrc_attr: self.rsrc_attr,
        };
        let mut out = bytemuck::bytes_of(&fixed).to_vec();
        out.push(self.rsrc_name.len() as u8);
        out.extend_from_slice(&self.rsrc_name);
        out
    }

    /// Total on-disk length of the truncated record.
    pub fn packed_len(&self) -> usize {
        RES_ENTRY_NAME_OFFSET + 1 + self.rsrc_name.len()
    }
}

/// `FakeMMHeader`: makes ROM resource data look like a relocatable Memory
/// Manager handle to code that dereferences resource handles directly.
#[repr(C, packed)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct FakeMMHeader {
    pub magic_kurt: [u8; 4],
    pub magic_c0a00000: BeU32,
    pub data_size_plus_12: BeU32,
    pub bogus_off: BeU32,
}

pub const FAKE_MM_HEADER_SIZE: usize = std::mem::size_of::<FakeMMHeader>();
pub const FAKE_MM_MAGIC: &[u8; 4] = b"Kurt";
pub const FAKE_MM_MAGIC_WORD: u32 = 0xC0A0_0000;

impl FakeMMHeader {
    pub fn read_from(binary: &[u8], offset: usize) -> Option<Self> {
        Some(*bytemuck::from_bytes(
            binary.get(offset..offset + FAKE_MM_HEADER_SIZE)?,
        ))
    }

    pub fn write_into(&self, binary: &mut [u8], offset: usize) {
        binary[offset..offset + FAKE_MM_HEADER_SIZE].copy_from_slice(bytemuck::bytes_of(self));
    }
}

/// Known `combo` byte-lane values (the top byte of the 8-byte `combo`
/// field) named for manifest readability.
pub const COMBO_FIELDS: &[(u8, &str)] = &[
    (0x40, "AppleTalk1"),
    (0x20, "AppleTalk2"),
    (0x30, "AppleTalk2_NetBoot_FPU"),
    (0x08, "AppleTalk2_NetBoot_NoFPU"),
    (0x10, "NetBoot"),
    (0x78, "AllCombos"),
];

pub fn combo_name(combo: u64) -> String {
    let top = (combo >> 56) as u8;
    COMBO_FIELDS
        .iter()
        .find(|(byte, _)| *byte == top)
        .map(|(_, name)| name.to_string())
        .unwrap_or_else(|| format!("0b{:08b}", top))
}

pub fn combo_from_name(name: &str) -> Option<u64> {
    COMBO_FIELDS
        .iter()
        .find(|(_, n)| *n == name)
        .map(|(byte, _)| (*byte as u64) << 56)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytemuck::Zeroable;

    #[test]
    fn header_size_matches_python_struct() {
        assert_eq!(HEADER_SIZE, 0x50);
    }

    #[test]
    fn header_checksum_lanes_land_at_0x30() {
        let mut page = vec![0u8; HEADER_SIZE];
        let mut hdr = SuperMarioHeader::zeroed();
        hdr.check_sum0 = BeU32::new(0x1111_1111);
        hdr.write_into(&mut page);
        assert_eq!(&page[0x30..0x34], &0x1111_1111u32.to_be_bytes());
    }

    #[test]
    fn res_entry_round_trips_truncated() {
        let entry = ResEntry {
            combo: 0x7800_0000_0000_0000,
            offset_to_next: 0x1000,
            offset_to_data: 0x2000,
            rsrc_type: *b"ndrv",
            rsrc_id: -1,
            rsrc_attr: 0x58,
            rsrc_name: b"Main".to_vec(),
        };
        let bytes = entry.to_bytes();
        assert_eq!(bytes.len(), 0x18 + 4);

        let mut buf = vec![0u8; 0x100];
        buf[0x10..0x10 + bytes.len()].copy_from_slice(&bytes);
        let read_back = ResEntry::read_from(&buf, 0x10).unwrap();
        assert_eq!(read_back.rsrc_name, b"Main");
        assert_eq!(read_back.rsrc_id, -1);
        assert_eq!(read_back.combo, 0x7800_0000_0000_0000);
    }

    #[test]
    fn combo_name_known_and_unknown() {
        assert_eq!(combo_name(0x7800_0000_0000_0000), "AllCombos");
        assert_eq!(combo_name(0x0100_0000_0000_0000), "0b00000001");
    }
}
