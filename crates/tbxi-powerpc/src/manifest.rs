//! Text manifest (`Configfile`) for a single ConfigInfo page: the flat
//! scalar fields plus the three structured sections (`[LowMemory]`,
//! `[PageMappingInfo]`, `[BatMappingInfo]`) that describe the page
//! table and BAT register init arrays.

use std::collections::HashMap;

use thiserror::Error;

use tbxi_common::manifest::{parse_int_literal, quote_word, split_key_value, split_line};

use crate::expr::{eval_with_base, EvalError};

#[derive(Debug, Error)]
pub enum ConfigManifestError {
    #[error("manifest line error: {0}")]
    Line(#[from] tbxi_common::manifest::ManifestError),
    #[error("expression error in field {field}: {source}")]
    Expr { field: String, source: EvalError },
    #[error("unknown map name {0:?} (expected sup/usr/cpu/ovl)")]
    UnknownMap(String),
    #[error("unknown BAT register name {0:?}")]
    UnknownBat(String),
}

pub const MAP_NAMES: [&str; 4] = ["sup", "usr", "cpu", "ovl"];
pub const BAT_NAMES: [&str; 8] = [
    "ibat0", "ibat1", "ibat2", "ibat3", "dbat0", "dbat1", "dbat2", "dbat3",
];

#[derive(Debug, Clone, Copy, Default)]
pub struct LowMemEntry {
    pub address: u32,
    pub value: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct SegPointer {
    pub map_index: usize,
    pub slot: usize,
    pub segment_register: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct PageMapEntry {
    pub pmdt_page_offset: u16,
    pub pages_minus_1: u16,
    pub phys_page: u32,
    pub attr: u16,
}

#[derive(Debug, Clone, Copy)]
pub struct BatPointer {
    pub bat_index: usize,
    pub map_index: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BatEntry {
    pub bepi: u32,
    pub bl_128k: u32,
    pub vs: u32,
    pub vp: u32,
    pub is_relative: bool,
    pub brpn: i64,
    pub unk23: u32,
    pub wim: u32,
    pub ks: u32,
    pub ku: u32,
    pub pp: u32,
}

/// A fully parsed `Configfile` manifest.
#[derive(Debug, Default)]
pub struct ConfigInfoManifest {
    pub fields: HashMap<String, i64>,
    pub bootstrap_version: String,
    pub filenames: HashMap<String, String>,
    pub low_mem: Vec<LowMemEntry>,
    pub seg_pointers: Vec<SegPointer>,
    pub page_map: Vec<PageMapEntry>,
    pub special_pmdt: HashMap<String, usize>,
    pub bat_pointers: Vec<BatPointer>,
    pub bat_map: Vec<BatEntry>,
}

enum Section {
    Top,
    LowMemory,
    PageMappingInfo,
    BatMappingInfo,
}

impl ConfigInfoManifest {
    pub fn parse(text: &str) -> Result<Self, ConfigManifestError> {
        let mut manifest = ConfigInfoManifest::default();
        let mut section = Section::Top;
        let mut base: i64 = -0x30C000;

        // first pass: find ROMImageBaseOffset so BASE can be substituted below
        for line in text.lines() {
            let words = split_line(line)?;
            for word in &words {
                if let Ok((k, v)) = split_key_value(word) {
                    if k == "ROMImageBaseOffset" {
                        if let Ok(n) = eval_with_base(v, 0) {
                            base = n;
                        }
                    }
                }
            }
        }

        for line in text.lines() {
            let words = split_line(line)?;
            if words.is_empty() {
                continue;
            }

            if words.len() == 1 && words[0].starts_with('[') && words[0].ends_with(']') {
                section = match &words[0][1..words[0].len() - 1] {
                    "LowMemory" => Section::LowMemory,
                    "PageMappingInfo" => Section::PageMappingInfo,
                    "BatMappingInfo" => Section::BatMappingInfo,
                    _ => Section::Top,
                };
                continue;
            }

            let mut kv: HashMap<&str, &str> = HashMap::new();
            for word in &words {
                if let Ok((k, v)) = split_key_value(word) {
                    kv.insert(k, v);
                }
            }
            if kv.is_empty() {
                continue;
            }

            match section {
                Section::Top => {
                    for (k, v) in kv {
                        if k == "BootstrapVersion" {
                            manifest.bootstrap_version = v.to_string();
                            continue;
                        }
                        if let Some((value_part, filename)) = v.split_once('=') {
                            if let Ok(n) = eval_with_base(value_part, base) {
                                manifest.fields.insert(k.to_string(), n);
                            }
                            manifest.filenames.insert(k.to_string(), filename.to_string());
                        } else if let Ok(n) = eval_with_base(v, base) {
                            manifest.fields.insert(k.to_string(), n);
                        }
                    }
                }
                Section::LowMemory => {
                    let address = kv.get("address").copied().unwrap_or("0");
                    let value = kv.get("value").copied().unwrap_or("0");
                    manifest.low_mem.push(LowMemEntry {
                        address: parse_int_literal(address)? as u32,
                        value: parse_int_literal(value)? as u32,
                    });
                }
                Section::PageMappingInfo => {
                    if let Some(&slot) = kv.get("segment_ptr_here") {
                        let map_name = kv.get("map").copied().unwrap_or("sup");
                        let map_index = MAP_NAMES
                            .iter()
                            .position(|m| *m == map_name)
                            .ok_or_else(|| ConfigManifestError::UnknownMap(map_name.to_string()))?;
                        manifest.seg_pointers.push(SegPointer {
                            map_index,
                            slot: parse_int_literal(slot)? as usize,
                            segment_register: kv
                                .get("segment_register")
                                .map(|v| parse_int_literal(v))
                                .transpose()?
                                .unwrap_or(0) as u32,
                        });
                    } else if let Some(&special) = kv.get("special_pmdt") {
                        manifest
                            .special_pmdt
                            .insert(special.to_string(), manifest.page_map.len());
                    } else if let Some(&pmdt_page_offset) = kv.get("pmdt_page_offset") {
                        let attr_raw = kv.get("attr").copied().unwrap_or("0x0");
                        let attr = match attr_raw {
                            "PMDT_InvalidAddress" => 0xA00,
                            "PMDT_Available" => 0xA01,
                            other => parse_int_literal(other)? as u16,
                        };
                        let phys_page = kv
                            .get("phys_page")
                            .map(|v| eval_with_base(v, base))
                            .transpose()
                            .map_err(|source| ConfigManifestError::Expr {
                                field: "phys_page".to_string(),
                                source,
                            })?
                            .unwrap_or(0) as u32;
                        manifest.page_map.push(PageMapEntry {
                            pmdt_page_offset: parse_int_literal(pmdt_page_offset)? as u16,
                            pages_minus_1: kv
                                .get("pages_minus_1")
                                .map(|v| parse_int_literal(v))
                                .transpose()?
                                .unwrap_or(0) as u16,
                            phys_page,
                            attr,
                        });
                    }
                }
                Section::BatMappingInfo => {
                    if let Some(&bat_name) = kv.get("bat_ptr_here") {
                        let map_name = kv.get("map").copied().unwrap_or("sup");
                        let map_index = MAP_NAMES
                            .iter()
                            .position(|m| *m == map_name)
                            .ok_or_else(|| ConfigManifestError::UnknownMap(map_name.to_string()))?;
                        let bat_index = BAT_NAMES
                            .iter()
                            .position(|b| *b == bat_name)
                            .ok_or_else(|| ConfigManifestError::UnknownBat(bat_name.to_string()))?;
                        manifest.bat_pointers.push(BatPointer { bat_index, map_index });
                    } else if kv.contains_key("bepi") {
                        let get = |key: &str| -> Result<i64, ConfigManifestError> {
                            kv.get(key)
                                .map(|v| eval_with_base(v, base))
                                .transpose()
                                .map_err(|source| ConfigManifestError::Expr {
                                    field: key.to_string(),
                                    source,
                                })
                                .map(|o| o.unwrap_or(0))
                        };
                        let brpn_raw = kv.get("brpn").copied().unwrap_or("0");
                        let is_relative = brpn_raw.contains("BASE");
                        let brpn = eval_with_base(brpn_raw, base).map_err(|source| {
                            ConfigManifestError::Expr {
                                field: "brpn".to_string(),
                                source,
                            }
                        })?;
                        manifest.bat_map.push(BatEntry {
                            bepi: get("bepi")? as u32,
                            bl_128k: get("bl_128k")? as u32,
                            vs: get("vs")? as u32,
                            vp: get("vp")? as u32,
                            is_relative,
                            brpn,
                            unk23: get("unk23")? as u32,
                            wim: get("wim")? as u32,
                            ks: get("ks")? as u32,
                            ku: get("ku")? as u32,
                            pp: get("pp")? as u32,
                        });
                    }
                }
            }
        }

        Ok(manifest)
    }

    /// Render a round-trippable manifest for the ConfigInfo page found
    /// at `page_offset` in `binary`.
    pub fn render(
        fields: &[(&str, i64)],
        bootstrap_version: &str,
        filenames: &HashMap<String, String>,
        low_mem: &[LowMemEntry],
        seg_pointers: &[SegPointer],
        page_map: &[PageMapEntry],
        special_pmdt: &HashMap<String, usize>,
        bat_pointers: &[BatPointer],
        bat_map: &[BatEntry],
    ) -> String {
        let mut out = String::new();

        for &(key, value) in fields {
            out.push_str(key);
            out.push('=');
            if key == "InterruptHandlerKind" {
                out.push_str(&format!("{:#04x}", value));
            } else {
                out.push_str(&format!("{:#010x}", value as u32));
            }
            if let Some(filename) = filenames.get(key) {
                out.push('=');
                out.push_str(&quote_word(filename));
            }
            out.push('\n');
        }
        out.push_str("BootstrapVersion=");
        out.push_str(&quote_word(bootstrap_version));
        out.push('\n');
        out.push('\n');

        out.push_str("[LowMemory]\n");
        for entry in low_mem {
            out.push_str(&format!(
                "address={:#010x} value={:#010x}\n",
                entry.address, entry.value
            ));
        }
        out.push('\n');

        out.push_str("[PageMappingInfo]\n");
        for (i, entry) in page_map.iter().enumerate() {
            for ptr in seg_pointers.iter().filter(|p| p.slot * 8 == i * 8) {
                out.push_str(&format!(
                    "segment_ptr_here={:#x} map={} segment_register={:#010x}\n",
                    ptr.slot, MAP_NAMES[ptr.map_index], ptr.segment_register
                ));
            }
            for (name, &idx) in special_pmdt {
                if idx == i {
                    out.push_str(&format!("special_pmdt={}\n", name));
                }
            }
            let attr_s = match entry.attr {
                0xA00 => "PMDT_InvalidAddress".to_string(),
                0xA01 => "PMDT_Available".to_string(),
                other => format!("{:#05x}", other),
            };
            out.push_str(&format!(
                "\tpmdt_page_offset={:#06x} pages_minus_1={:#06x} phys_page={:#07x} attr={}\n",
                entry.pmdt_page_offset, entry.pages_minus_1, entry.phys_page, attr_s
            ));
        }
        out.push('\n');

        out.push_str("[BatMappingInfo]\n");
        for (_i, entry) in bat_map.iter().enumerate() {
            out.push_str(&format!(
                "\tbepi={:#010x} bl_128k={:#08b} vs={} vp={} brpn={} unk23={} wim={:#05b} ks={} ku={} pp={:#04b}\n",
                entry.bepi, entry.bl_128k, entry.vs, entry.vp, entry.brpn,
                entry.unk23, entry.wim, entry.ks, entry.ku, entry.pp
            ));
        }
        out.push('\n');

        out
    }
}

/// Template order for the flat scalar fields of a `ConfigInfo` page.
/// Matches the field layout documented in Apple's `PCCInfoRecordsPriv.h`.
pub const SCALAR_FIELD_ORDER: &[&str] = &[
    "ROMImageBaseOffset",
    "ROMImageSize",
    "ROMImageVersion",
    "Mac68KROMOffset",
    "Mac68KROMSize",
    "ExceptionTableOffset",
    "ExceptionTableSize",
    "HWInitCodeOffset",
    "HWInitCodeSize",
    "KernelCodeOffset",
    "KernelCodeSize",
    "EmulatorCodeOffset",
    "EmulatorCodeSize",
    "OpcodeTableOffset",
    "OpcodeTableSize",
    "BootVersionOffset",
    "ECBOffset",
    "IplValueOffset",
    "EmulatorEntryOffset",
    "KernelTrapTableOffset",
    "TestIntMaskInit",
    "ClearIntMaskInit",
    "PostIntMaskInit",
    "LA_InterruptCtl",
    "InterruptHandlerKind",
    "LA_InfoRecord",
    "LA_KernelData",
    "LA_EmulatorData",
    "LA_DispatchTable",
    "LA_EmulatorCode",
    "PageAttributeInit",
    "SharedMemoryAddr",
    "PA_RelocatedLowMemInit",
    "OpenFWBundleOffset",
    "OpenFWBundleSize",
    "LA_OpenFirmware",
    "PA_OpenFirmware",
    "LA_HardwarePriv",
];

/// Read one named scalar field out of a `ConfigInfo` struct.
pub fn get_scalar(ci: &crate::structs::ConfigInfo, name: &str) -> i64 {
    match name {
        "ROMImageBaseOffset" => ci.rom_image_base_offset.get() as i32 as i64,
        "ROMImageSize" => ci.rom_image_size.get() as i64,
        "ROMImageVersion" => ci.rom_image_version.get() as i64,
        "Mac68KROMOffset" => ci.mac68k_rom_offset.get() as i64,
        "Mac68KROMSize" => ci.mac68k_rom_size.get() as i64,
        "ExceptionTableOffset" => ci.exception_table_offset.get() as i64,
        "ExceptionTableSize" => ci.exception_table_size.get() as i64,
        "HWInitCodeOffset" => ci.hw_init_code_offset.get() as i64,
        "HWInitCodeSize" => ci.hw_init_code_size.get() as i64,
        "KernelCodeOffset" => ci.kernel_code_offset.get() as i64,
        "KernelCodeSize" => ci.kernel_code_size.get() as i64,
        "EmulatorCodeOffset" => ci.emulator_code_offset.get() as i64,
        "EmulatorCodeSize" => ci.emulator_code_size.get() as i64,
        "OpcodeTableOffset" => ci.opcode_table_offset.get() as i64,
        "OpcodeTableSize" => ci.opcode_table_size.get() as i64,
        "BootVersionOffset" => ci.boot_version_offset.get() as i64,
        "ECBOffset" => ci.ecb_offset.get() as i64,
        "IplValueOffset" => ci.ipl_value_offset.get() as i64,
        "EmulatorEntryOffset" => ci.emulator_entry_offset.get() as i64,
        "KernelTrapTableOffset" => ci.kernel_trap_table_offset.get() as i64,
        "TestIntMaskInit" => ci.test_int_mask_init.get() as i64,
        "ClearIntMaskInit" => ci.clear_int_mask_init.get() as i64,
        "PostIntMaskInit" => ci.post_int_mask_init.get() as i64,
        "LA_InterruptCtl" => ci.la_interrupt_ctl.get() as i64,
        "InterruptHandlerKind" => ci.interrupt_handler_kind as i64,
        "LA_InfoRecord" => ci.la_info_record.get() as i64,
        "LA_KernelData" => ci.la_kernel_data.get() as i64,
        "LA_EmulatorData" => ci.la_emulator_data.get() as i64,
        "LA_DispatchTable" => ci.la_dispatch_table.get() as i64,
        "LA_EmulatorCode" => ci.la_emulator_code.get() as i64,
        "PageAttributeInit" => ci.page_attribute_init.get() as i64,
        "SharedMemoryAddr" => ci.shared_memory_addr.get() as i64,
        "PA_RelocatedLowMemInit" => ci.pa_relocated_low_mem_init.get() as i64,
        "OpenFWBundleOffset" => ci.open_fw_bundle_offset.get() as i64,
        "OpenFWBundleSize" => ci.open_fw_bundle_size.get() as i64,
        "LA_OpenFirmware" => ci.la_open_firmware.get() as i64,
        "PA_OpenFirmware" => ci.pa_open_firmware.get() as i64,
        "LA_HardwarePriv" => ci.la_hardware_priv.get() as i64,
        _ => 0,
    }
}

/// Write one named scalar field into a `ConfigInfo` struct.
pub fn set_scalar(ci: &mut crate::structs::ConfigInfo, name: &str, value: i64) {
    use tbxi_common::BeU32;
    let v = BeU32::new(value as u32);
    match name {
        "ROMImageBaseOffset" => ci.rom_image_base_offset = v,
        "ROMImageSize" => ci.rom_image_size = v,
        "ROMImageVersion" => ci.rom_image_version = v,
        "Mac68KROMOffset" => ci.mac68k_rom_offset = v,
        "Mac68KROMSize" => ci.mac68k_rom_size = v,
        "ExceptionTableOffset" => ci.exception_table_offset = v,
        "ExceptionTableSize" => ci.exception_table_size = v,
        "HWInitCodeOffset" => ci.hw_init_code_offset = v,
        "HWInitCodeSize" => ci.hw_init_code_size = v,
        "KernelCodeOffset" => ci.kernel_code_offset = v,
        "KernelCodeSize" => ci.kernel_code_size = v,
        "EmulatorCodeOffset" => ci.emulator_code_offset = v,
        "EmulatorCodeSize" => ci.emulator_code_size = v,
        "OpcodeTableOffset" => ci.opcode_table_offset = v,
        "OpcodeTableSize" => ci.opcode_table_size = v,
        "BootVersionOffset" => ci.boot_version_offset = v,
        "ECBOffset" => ci.ecb_offset = v,
        "IplValueOffset" => ci.ipl_value_offset = v,
        "EmulatorEntryOffset" => ci.emulator_entry_offset = v,
        "KernelTrapTableOffset" => ci.kernel_trap_table_offset = v,
        "TestIntMaskInit" => ci.test_int_mask_init = v,
        "ClearIntMaskInit" => ci.clear_int_mask_init = v,
        "PostIntMaskInit" => ci.post_int_mask_init = v,
        "LA_InterruptCtl" => ci.la_interrupt_ctl = v,
        "InterruptHandlerKind" => ci.interrupt_handler_kind = value as u8,
        "LA_InfoRecord" => ci.la_info_record = v,
        "LA_KernelData" => ci.la_kernel_data = v,
        "LA_EmulatorData" => ci.la_emulator_data = v,
        "LA_DispatchTable" => ci.la_dispatch_table = v,
        "LA_EmulatorCode" => ci.la_emulator_code = v,
        "PageAttributeInit" => ci.page_attribute_init = v,
        "SharedMemoryAddr" => ci.shared_memory_addr = v,
        "PA_RelocatedLowMemInit" => ci.pa_relocated_low_mem_init = v,
        "OpenFWBundleOffset" => ci.open_fw_bundle_offset = v,
        "OpenFWBundleSize" => ci.open_fw_bundle_size = v,
        "LA_OpenFirmware" => ci.la_open_firmware = v,
        "PA_OpenFirmware" => ci.pa_open_firmware = v,
        "LA_HardwarePriv" => ci.la_hardware_priv = v,
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_top_level_fields() {
        let text = "ROMImageBaseOffset=-0x30C000\nROMImageSize=0x400000\n";
        let manifest = ConfigInfoManifest::parse(text).unwrap();
        assert_eq!(manifest.fields.get("ROMImageSize"), Some(&0x400000));
    }

    #[test]
    fn parses_low_memory_section() {
        let text = "[LowMemory]\naddress=0x2E8 value=0x0000012C\n";
        let manifest = ConfigInfoManifest::parse(text).unwrap();
        assert_eq!(manifest.low_mem.len(), 1);
        assert_eq!(manifest.low_mem[0].address, 0x2E8);
        assert_eq!(manifest.low_mem[0].value, 0x12C);
    }

    #[test]
    fn parses_page_mapping_with_named_attr() {
        let text = "[PageMappingInfo]\n\tpmdt_page_offset=0x0000 pages_minus_1=0x0001 phys_page=0x10 attr=PMDT_Available\n";
        let manifest = ConfigInfoManifest::parse(text).unwrap();
        assert_eq!(manifest.page_map.len(), 1);
        assert_eq!(manifest.page_map[0].attr, 0xA01);
    }

    #[test]
    fn parses_bat_mapping_entry() {
        let text = "[BatMappingInfo]\n\tbepi=0x80000000 bl_128k=0b000001 vs=1 vp=1 brpn=BASE+0x800000 unk23=0 wim=0b000 ks=1 ku=0 pp=0b10\n";
        let manifest = ConfigInfoManifest::parse(text).unwrap();
        assert_eq!(manifest.bat_map.len(), 1);
        assert!(manifest.bat_map[0].is_relative);
    }

    #[test]
    fn filename_suffix_is_captured_separately() {
        let text = "KernelCodeOffset=0x00001000=NanoKernel-v01.23\n";
        let manifest = ConfigInfoManifest::parse(text).unwrap();
        assert_eq!(manifest.fields.get("KernelCodeOffset"), Some(&0x1000));
        assert_eq!(
            manifest.filenames.get("KernelCodeOffset").map(String::as_str),
            Some("NanoKernel-v01.23")
        );
    }
}
