//! On-disk `ConfigInfo` layout (`PCCInfoRecordsPriv.h` in Apple's SDK).
//!
//! The struct begins at offset [`FIELDS_OFFSET`] within the ConfigInfo
//! page; the 40 bytes before it are the checksum computed in
//! [`crate::checksum`]. Signed "offset from ROM base" fields use plain
//! `u32` storage with two's-complement reinterpretation at the call
//! site, since `bytemuck::Pod` needs no sign-aware wrapper to round-trip
//! the bit pattern faithfully.

use tbxi_common::BeU32;

pub const PAGE_SIZE: usize = 0x1000;
pub const FIELDS_OFFSET: usize = 0x28;

#[repr(C, packed)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ConfigInfo {
    pub rom_image_base_offset: BeU32,
    pub rom_image_size: BeU32,
    pub rom_image_version: BeU32,

    pub mac68k_rom_offset: BeU32,
    pub mac68k_rom_size: BeU32,

    pub exception_table_offset: BeU32,
    pub exception_table_size: BeU32,

    pub hw_init_code_offset: BeU32,
    pub hw_init_code_size: BeU32,

    pub kernel_code_offset: BeU32,
    pub kernel_code_size: BeU32,

    pub emulator_code_offset: BeU32,
    pub emulator_code_size: BeU32,

    pub opcode_table_offset: BeU32,
    pub opcode_table_size: BeU32,

    pub bootstrap_version: [u8; 16],

    pub boot_version_offset: BeU32,
    pub ecb_offset: BeU32,
    pub ipl_value_offset: BeU32,

    pub emulator_entry_offset: BeU32,
    pub kernel_trap_table_offset: BeU32,

    pub test_int_mask_init: BeU32,
    pub clear_int_mask_init: BeU32,
    pub post_int_mask_init: BeU32,
    pub la_interrupt_ctl: BeU32,
    pub interrupt_handler_kind: u8,
    _pad0: [u8; 3],

    pub la_info_record: BeU32,
    pub la_kernel_data: BeU32,
    pub la_emulator_data: BeU32,
    pub la_dispatch_table: BeU32,
    pub la_emulator_code: BeU32,

    pub mac_low_mem_init_offset: BeU32,

    pub page_attribute_init: BeU32,
    pub page_map_init_size: BeU32,
    pub page_map_init_offset: BeU32,
    pub page_map_irp_offset: BeU32,
    pub page_map_kdp_offset: BeU32,
    pub page_map_edp_offset: BeU32,

    pub seg_map32_sup_init: [u8; 128],
    pub seg_map32_usr_init: [u8; 128],
    pub seg_map32_cpu_init: [u8; 128],
    pub seg_map32_ovl_init: [u8; 128],

    pub bat_range_init: [u8; 128],

    pub bat_map32_sup_init: BeU32,
    pub bat_map32_usr_init: BeU32,
    pub bat_map32_cpu_init: BeU32,
    pub bat_map32_ovl_init: BeU32,

    pub shared_memory_addr: BeU32,
    pub pa_relocated_low_mem_init: BeU32,

    pub open_fw_bundle_offset: BeU32,
    pub open_fw_bundle_size: BeU32,

    pub la_open_firmware: BeU32,
    pub pa_open_firmware: BeU32,
    pub la_hardware_priv: BeU32,
}

impl ConfigInfo {
    pub fn read_from(binary: &[u8], page_offset: usize) -> Option<Self> {
        let start = page_offset + FIELDS_OFFSET;
        let bytes = binary.get(start..start + std::mem::size_of::<Self>())?;
        Some(*bytemuck::from_bytes(bytes))
    }

    pub fn write_into(&self, binary: &mut [u8], page_offset: usize) {
        let start = page_offset + FIELDS_OFFSET;
        binary[start..start + std::mem::size_of::<Self>()].copy_from_slice(bytemuck::bytes_of(self));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytemuck::Zeroable;

    #[test]
    fn struct_size_matches_python_format_string() {
        // 40x lLL lL lL lL lL lL lL 16sLLL LL LLLLbxxx LLLLL L LLLLLL
        // 128s128s128s128s 128s LLLL L L lL LLL, minus the leading 40x pad.
        assert_eq!(std::mem::size_of::<ConfigInfo>(), 0x350);
    }

    #[test]
    fn round_trips_through_a_page() {
        let mut page = vec![0u8; PAGE_SIZE];
        let mut ci = ConfigInfo::zeroed();
        ci.rom_image_base_offset = BeU32::new(0xFFCF_4000);
        ci.rom_image_size = BeU32::new(0x40_0000);
        ci.write_into(&mut page, 0);

        let read_back = ConfigInfo::read_from(&page, 0).unwrap();
        assert_eq!(read_back.rom_image_base_offset.get(), 0xFFCF_4000);
        assert_eq!(read_back.rom_image_size.get(), 0x40_0000);
    }
}
