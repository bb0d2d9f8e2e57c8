//! PowerPC (Power Mac "New World"/"Old World" NuBus+PCI) ROM container.
//!
//! A flat 4MB image built around one or more `ConfigInfo` pages (see
//! [`structs::ConfigInfo`]), each describing where its sibling ROM
//! components (the emulated 68K ROM, PowerPC exception table, hardware
//! init code, NanoKernel, Open Firmware bundle) live by byte offset from
//! the page's own base. `probe`/`dump`/`build` extract those components
//! into sibling files and render each `ConfigInfo` page as a `Configfile`
//! text manifest.

pub mod checksum;
pub mod expr;
pub mod manifest;
pub mod structs;

use std::collections::HashMap;
use std::path::Path;

use tbxi_common::manifest::quote_word;
use tbxi_common::{BeU32, DispatchError, Recurser};

use manifest::{ConfigInfoManifest, BAT_NAMES, MAP_NAMES};
use structs::{ConfigInfo, FIELDS_OFFSET, PAGE_SIZE};

const PAD_LEN: usize = 200;

fn pad() -> Vec<u8> {
    b"kc".repeat(100)
}

fn is_powerpc(binary: &[u8]) -> bool {
    if binary.len() != 0x400000 {
        return false;
    }
    let pad = pad();
    binary[..0x300000.min(binary.len())]
        .windows(pad.len())
        .any(|w| w == pad.as_slice())
}

/// Cut `[start, stop)` out of `binary` and zero the hole it leaves behind.
fn extract_and_zero(binary: &mut [u8], start: usize, stop: usize) -> Vec<u8> {
    let fragment = binary[start..stop].to_vec();
    binary[start..stop].fill(0);
    fragment
}

fn get_nk_version(nk: &[u8]) -> Option<String> {
    if nk.starts_with(&[0x48, 0x00, 0x00, 0x0C]) && nk.len() >= 6 {
        return Some(format!("v{:02X}.{:02X}", nk[4], nk[5]));
    }
    let mut i = 0;
    while i + 8 <= nk.len() {
        if nk[i..i + 2] == [0x39, 0x80] && nk[i + 4..i + 8] == [0xB1, 0x81, 0x0F, 0xE4] {
            return Some(format!("v{:02X}.{:02X}", nk[i + 2], nk[i + 3]));
        }
        i += 4;
    }
    None
}

/// Component described by `ConfigInfo` offset/size fields, ordered the
/// way the dump walks them (OpenFWBundle last among the "real" ones,
/// `EverythingElse` dead last and never reordered into the size sort).
fn components(ci: &ConfigInfo, base: usize, binary_len: usize) -> Vec<(usize, usize, &'static str)> {
    let mut parts = vec![
        (
            base + ci.mac68k_rom_offset.get() as usize,
            base + ci.mac68k_rom_offset.get() as usize + ci.mac68k_rom_size.get() as usize,
            "Mac68KROM",
        ),
        (
            base + ci.exception_table_offset.get() as usize,
            base + ci.exception_table_offset.get() as usize + ci.exception_table_size.get() as usize,
            "ExceptionTable",
        ),
        (
            base + ci.hw_init_code_offset.get() as usize,
            base + ci.hw_init_code_offset.get() as usize + ci.hw_init_code_size.get() as usize,
            "HWInitCode",
        ),
        (
            base + ci.kernel_code_offset.get() as usize,
            base + ci.kernel_code_offset.get() as usize + ci.kernel_code_size.get() as usize,
            "KernelCode",
        ),
        (
            base + ci.open_fw_bundle_offset.get() as usize,
            base + ci.open_fw_bundle_offset.get() as usize + ci.open_fw_bundle_size.get() as usize,
            "OpenFWBundle",
        ),
    ];
    parts.sort();
    parts.push((base, binary_len, "ROMImageBase"));
    parts
}

fn component_filename(field: &str) -> String {
    field
        .replace("Code", "")
        .replace("Bundle", "")
        .replace("Kern", "NanoKern")
        .replace("ROMImageBase", "EverythingElse")
}

pub fn probe(binary: &[u8]) -> bool {
    is_powerpc(binary)
}

pub fn dump(orig_binary: &[u8], dest_dir: &Path, recurser: &dyn Recurser) -> Result<(), DispatchError> {
    if !is_powerpc(orig_binary) {
        return Err(DispatchError::NotMine);
    }
    std::fs::create_dir_all(dest_dir)?;

    let ci_offsets = checksum::find_configinfo(orig_binary);
    if ci_offsets.is_empty() {
        return Err(DispatchError::NotMine);
    }
    let ci_structs: Vec<ConfigInfo> = ci_offsets
        .iter()
        .map(|&off| ConfigInfo::read_from(orig_binary, off).ok_or(DispatchError::Layout {
            offset: off,
            message: "ConfigInfo page truncated".to_string(),
        }))
        .collect::<Result<_, _>>()?;

    let mut work = orig_binary.to_vec();
    for &off in &ci_offsets {
        extract_and_zero(&mut work, off, off + PAGE_SIZE);
    }

    let first = &ci_structs[0];
    let base = ci_offsets[0];

    let mut filenames: HashMap<String, String> = HashMap::new();

    for (start, stop, field) in components(first, base, work.len()) {
        let mut stop = stop;
        if matches!(field, "HWInitCode" | "KernelCode" | "OpenFWBundle") {
            stop = find_zero_run(&work, start, 1024).unwrap_or(stop);
        }
        while stop % 4 != 0 {
            stop += 1;
        }
        if start >= stop || stop > work.len() {
            continue;
        }

        let fragment = extract_and_zero(&mut work, start, stop);
        if fragment.is_empty() || fragment.iter().all(|&b| b == 0) {
            continue;
        }

        let mut filename = component_filename(field);
        if field == "KernelCode" {
            if let Some(vers) = get_nk_version(&fragment) {
                filename.push('-');
                filename.push_str(&vers);
            }
        }

        filenames.insert(format!("{field}Offset"), filename.clone());
        recurser.dump(&fragment, &dest_dir.join(&filename))?;
    }

    for (i, (&offset, ci)) in ci_offsets.iter().zip(ci_structs.iter()).enumerate() {
        let name = if i == 0 {
            "Configfile".to_string()
        } else {
            format!("Configfile-{i}")
        };
        let text = render_configinfo(orig_binary, offset, ci, &filenames);
        std::fs::write(dest_dir.join(name), text)?;
    }

    Ok(())
}

fn find_zero_run(binary: &[u8], start: usize, run: usize) -> Option<usize> {
    if start > binary.len() {
        return None;
    }
    binary[start..]
        .windows(run)
        .position(|w| w.iter().all(|&b| b == 0))
        .map(|p| start + p)
}

fn render_configinfo(
    binary: &[u8],
    page_offset: usize,
    ci: &ConfigInfo,
    filenames: &HashMap<String, String>,
) -> String {
    let mut out = String::new();
    out.push_str("# Automated dump of the ConfigInfo page of a Power Mac ROM\n");
    out.push_str("# (at least one per ROM)\n\n");

    for &name in manifest::SCALAR_FIELD_ORDER {
        let value = manifest::get_scalar(ci, name);
        let rendered = if name == "InterruptHandlerKind" {
            format!("{:#04x}", value as u8)
        } else {
            format!("{:#010x}", value as u32)
        };
        out.push_str(name);
        out.push('=');
        out.push_str(&rendered);
        if let Some(filename) = filenames.get(name) {
            out.push('=');
            out.push_str(&quote_word(filename));
        }
        out.push('\n');
    }
    out.push_str("BootstrapVersion=");
    out.push_str(&quote_word(&tbxi_common::macroman::decode_fixed(&ci.bootstrap_version)));
    out.push_str("\n\n");

    out.push_str("[LowMemory]\n");
    let mut lm_offset = ci.mac_low_mem_init_offset.get() as usize;
    loop {
        let start = page_offset + lm_offset;
        if start + 8 > binary.len() {
            break;
        }
        let key = u32::from_be_bytes(binary[start..start + 4].try_into().unwrap());
        let value = u32::from_be_bytes(binary[start + 4..start + 8].try_into().unwrap());
        if key == 0 && value == 0 {
            break;
        }
        out.push_str(&format!("address={:#010x} value={:#010x}\n", key, value));
        lm_offset += 8;
    }
    out.push('\n');

    out.push_str("[PageMappingInfo]\n");
    let seg_maps = [
        &ci.seg_map32_sup_init,
        &ci.seg_map32_usr_init,
        &ci.seg_map32_cpu_init,
        &ci.seg_map32_ovl_init,
    ];
    let page_map_size = ci.page_map_init_size.get() as usize;
    if page_map_size > 0 {
        let page_map_offset = ci.page_map_init_offset.get() as usize;
        let start = page_offset + page_map_offset;
        let end = (start + page_map_size).min(binary.len());
        let page_map = &binary[start.min(binary.len())..end];

        for (i, entry) in page_map.chunks_exact(8).enumerate() {
            let byte_offset = i * 8;
            for (map_idx, blob) in seg_maps.iter().enumerate() {
                for (slot, seg) in blob.chunks_exact(8).enumerate() {
                    let seg_offset = u32::from_be_bytes(seg[0..4].try_into().unwrap());
                    let seg_reg = u32::from_be_bytes(seg[4..8].try_into().unwrap());
                    if seg_offset as usize == byte_offset {
                        out.push_str(&format!(
                            "segment_ptr_here={:#x} map={} segment_register={:#010x}\n",
                            slot, MAP_NAMES[map_idx], seg_reg
                        ));
                    }
                }
            }
            if byte_offset == ci.page_map_irp_offset.get() as usize {
                out.push_str("special_pmdt=irp\n");
            }
            if byte_offset == ci.page_map_kdp_offset.get() as usize {
                out.push_str("special_pmdt=kdp\n");
            }
            if byte_offset == ci.page_map_edp_offset.get() as usize {
                out.push_str("special_pmdt=edp\n");
            }

            let pgidx = u16::from_be_bytes(entry[0..2].try_into().unwrap());
            let pgcnt = u16::from_be_bytes(entry[2..4].try_into().unwrap());
            let word2 = u32::from_be_bytes(entry[4..8].try_into().unwrap());
            let attr = word2 & 0xFFF;
            let attr_s = match attr {
                0xA00 => "PMDT_InvalidAddress".to_string(),
                0xA01 => "PMDT_Available".to_string(),
                other => format!("{:#05x}", other),
            };
            let phys_page = word2 >> 12;
            out.push_str(&format!(
                "\tpmdt_page_offset={:#06x} pages_minus_1={:#06x} phys_page={:#07x} attr={}\n",
                pgidx, pgcnt, phys_page, attr_s
            ));
        }
    }
    out.push('\n');

    out.push_str("[BatMappingInfo]\n");
    let bat_map32 = [
        ci.bat_map32_sup_init.get(),
        ci.bat_map32_usr_init.get(),
        ci.bat_map32_cpu_init.get(),
        ci.bat_map32_ovl_init.get(),
    ];
    let bat_maps: Vec<[usize; 8]> = bat_map32
        .iter()
        .map(|&blob| {
            let mut out = [0usize; 8];
            for (k, slot) in (0..32).step_by(4).rev().enumerate() {
                out[k] = (((blob >> slot) & 0xF) * 8) as usize;
            }
            out
        })
        .collect();
    let last_used = bat_maps.iter().flatten().copied().max().unwrap_or(0);

    let bat_range = &ci.bat_range_init;
    for (i, entry) in bat_range.chunks_exact(8).enumerate() {
        let byte_offset = i * 8;
        if byte_offset > last_used {
            break;
        }
        for (map_idx, bats) in bat_maps.iter().enumerate() {
            for (k, &off) in bats.iter().enumerate() {
                if off == byte_offset {
                    out.push_str(&format!("bat_ptr_here={} map={}\n", BAT_NAMES[k], MAP_NAMES[map_idx]));
                }
            }
        }

        let u = u32::from_be_bytes(entry[0..4].try_into().unwrap());
        let l = u32::from_be_bytes(entry[4..8].try_into().unwrap());
        let is_relative = l & 0x200 != 0;

        let bepi = u >> 17;
        let bl = (u >> 2) & 0x7FF;
        let vs = (u >> 1) & 1;
        let vp = u & 1;
        let brpn = l >> 17;
        let unk23 = (l >> 8) & 1;
        let wim = (l >> 4) & 0x7;
        let ks = (l >> 3) & 1;
        let ku = (l >> 2) & 1;
        let pp = l & 0x3;

        let brpn_s = if is_relative {
            format!("BASE+{:#08x}", brpn << 17)
        } else {
            format!("{:#010x}", brpn << 17)
        };

        out.push_str(&format!(
            "\tbepi={:#010x} bl_128k={:#08b} vs={} vp={} brpn={} unk23={} wim={:#05b} ks={} ku={} pp={:#04b}\n",
            bepi << 17, bl, vs, vp, brpn_s, unk23, wim, ks, ku, pp
        ));
    }
    out.push('\n');

    out
}

/// Glob the component's sibling file by prefix (`basename*`), returning
/// the alphabetically-first match (a bare `NanoKernel` sorts before
/// `NanoKernel-v01.23`).
fn find_component_file(src: &Path, basename: &str) -> Option<std::path::PathBuf> {
    let entries = std::fs::read_dir(src).ok()?;
    let mut matches: Vec<_> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with(basename))
        .collect();
    matches.sort();
    matches.into_iter().next().map(|name| src.join(name))
}

fn iter_configinfo_names() -> impl Iterator<Item = String> {
    std::iter::once("Configfile".to_string()).chain((1..).map(|n| format!("Configfile-{n}")))
}

pub fn build(src: &Path, recurser: &dyn Recurser) -> Result<Vec<u8>, DispatchError> {
    if !src.join("Configfile").exists() {
        return Err(DispatchError::NotMine);
    }

    let mut manifests = Vec::new();
    for name in iter_configinfo_names() {
        let path = src.join(&name);
        if !path.exists() {
            break;
        }
        let text = std::fs::read_to_string(&path)?;
        manifests.push(ConfigInfoManifest::parse(&text).map_err(|e| DispatchError::Parse {
            line: 0,
            message: e.to_string(),
        })?);
    }
    if manifests.is_empty() {
        return Err(DispatchError::NotMine);
    }

    let everything_else = src.join("EverythingElse");
    let mut rom = if everything_else.exists() {
        recurser.build(&everything_else)?
    } else {
        vec![0u8; 0x400000]
    };
    if rom.len() < 0x400000 {
        rom.resize(0x400000, 0);
    }

    let mut configinfo_offset = 0usize;

    for manifest in manifests.iter().rev() {
        let base = *manifest.fields.get("ROMImageBaseOffset").unwrap_or(&-0x30C000);

        let mut ci: ConfigInfo = bytemuck::Zeroable::zeroed();
        for &name in manifest::SCALAR_FIELD_ORDER {
            let value = manifest.fields.get(name).copied().unwrap_or(0);
            manifest::set_scalar(&mut ci, name, value);
        }
        ci.bootstrap_version = fixed16(&tbxi_common::macroman::encode(&manifest.bootstrap_version));

        let mut low_mem = Vec::new();
        for entry in &manifest.low_mem {
            low_mem.extend_from_slice(&entry.address.to_be_bytes());
            low_mem.extend_from_slice(&entry.value.to_be_bytes());
        }
        low_mem.extend_from_slice(&[0u8; 4]);

        let mut page_map = Vec::new();
        for entry in &manifest.page_map {
            let word2 = ((entry.phys_page) << 12) | entry.attr as u32;
            page_map.extend_from_slice(&entry.pmdt_page_offset.to_be_bytes());
            page_map.extend_from_slice(&entry.pages_minus_1.to_be_bytes());
            page_map.extend_from_slice(&word2.to_be_bytes());
        }

        let mut seg_ptrs = [[0u8; 128], [0u8; 128], [0u8; 128], [0u8; 128]];
        for ptr in &manifest.seg_pointers {
            let at = ptr.slot * 8;
            if at + 8 <= 128 {
                seg_ptrs[ptr.map_index][at..at + 4].copy_from_slice(&(page_map.len() as u32).to_be_bytes());
                seg_ptrs[ptr.map_index][at + 4..at + 8].copy_from_slice(&ptr.segment_register.to_be_bytes());
            }
        }

        let mut bat_map = Vec::new();
        let mut bat_ptrs = [0u32; 4];
        for ptr in &manifest.bat_pointers {
            let fourbits = (bat_map.len() / 8) as u32;
            let shift = 4 * (7 - ptr.bat_index);
            bat_ptrs[ptr.map_index] |= fourbits << shift;
        }
        for entry in &manifest.bat_map {
            let mut ubat = entry.bepi & 0xFFFE_0000;
            ubat |= entry.bl_128k << 2;
            ubat |= entry.vs << 1;
            ubat |= entry.vp;

            let mut lbat = entry.unk23 << 8;
            lbat |= entry.wim << 4;
            lbat |= entry.ks << 3;
            lbat |= entry.ku << 2;
            lbat |= entry.pp;
            if entry.is_relative {
                lbat |= 0x200;
            }
            lbat = (lbat as i64 + entry.brpn) as u32;

            bat_map.extend_from_slice(&ubat.to_be_bytes());
            bat_map.extend_from_slice(&lbat.to_be_bytes());
        }

        ci.seg_map32_sup_init = seg_ptrs[0];
        ci.seg_map32_usr_init = seg_ptrs[1];
        ci.seg_map32_cpu_init = seg_ptrs[2];
        ci.seg_map32_ovl_init = seg_ptrs[3];
        ci.bat_map32_sup_init = BeU32::new(bat_ptrs[0]);
        ci.bat_map32_usr_init = BeU32::new(bat_ptrs[1]);
        ci.bat_map32_cpu_init = BeU32::new(bat_ptrs[2]);
        ci.bat_map32_ovl_init = BeU32::new(bat_ptrs[3]);
        ci.bat_range_init = fixed128(&bat_map);

        let mut flat = vec![0u8; PAGE_SIZE];
        let mut ptr = PAGE_SIZE;
        ptr -= low_mem.len();
        flat[ptr..ptr + low_mem.len()].copy_from_slice(&low_mem);
        ci.mac_low_mem_init_offset = BeU32::new(ptr as u32);

        if !page_map.is_empty() {
            ptr -= page_map.len();
            flat[ptr..ptr + page_map.len()].copy_from_slice(&page_map);
            ci.page_map_init_offset = BeU32::new(ptr as u32);
            ci.page_map_init_size = BeU32::new(page_map.len() as u32);
        }

        if ptr < FIELDS_OFFSET + std::mem::size_of::<ConfigInfo>() {
            return Err(DispatchError::codec("ConfigInfo page overflow: too much LowMemory/PageMappingInfo data"));
        }

        ci.write_into(&mut flat, 0);

        configinfo_offset = (-base) as usize;
        if configinfo_offset + PAGE_SIZE > rom.len() {
            return Err(DispatchError::Layout {
                offset: configinfo_offset,
                message: "ConfigInfo page runs past end of ROM".to_string(),
            });
        }
        rom[configinfo_offset..configinfo_offset + PAGE_SIZE].copy_from_slice(&flat);

        for (basename, filename_prefix) in [
            ("Mac68KROM", "Mac68KROM"),
            ("ExceptionTable", "ExceptionTable"),
            ("HWInitCode", "HWInit"),
            ("KernelCode", "NanoKernel"),
            ("OpenFWBundle", "OpenFW"),
        ] {
            let field_offset = manifest.fields.get(&format!("{basename}Offset")).copied().unwrap_or(0);
            if field_offset == 0 {
                continue;
            }
            let Some(file) = find_component_file(src, filename_prefix) else {
                continue;
            };
            let blob = recurser.build(&file)?;
            let at = (configinfo_offset as i64 + field_offset) as usize;
            if at + blob.len() > rom.len() {
                return Err(DispatchError::Layout {
                    offset: at,
                    message: format!("{basename} runs past end of ROM"),
                });
            }
            rom[at..at + blob.len()].copy_from_slice(&blob);
        }
    }

    let block = checksum::checksum_block(&rom, configinfo_offset);
    rom[configinfo_offset..configinfo_offset + block.len()].copy_from_slice(&block);

    Ok(rom)
}

fn fixed16(bytes: &[u8]) -> [u8; 16] {
    let mut out = [0u8; 16];
    let n = bytes.len().min(16);
    out[..n].copy_from_slice(&bytes[..n]);
    out
}

fn fixed128(bytes: &[u8]) -> [u8; 128] {
    let mut out = [0u8; 128];
    let n = bytes.len().min(128);
    out[..n].copy_from_slice(&bytes[..n]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_powerpc_for_wrong_size() {
        assert!(!is_powerpc(&vec![0u8; 0x1000]));
    }

    #[test]
    fn component_filename_mapping() {
        assert_eq!(component_filename("HWInitCode"), "HWInit");
        assert_eq!(component_filename("KernelCode"), "NanoKernel");
        assert_eq!(component_filename("OpenFWBundle"), "OpenFW");
        assert_eq!(component_filename("ROMImageBase"), "EverythingElse");
    }

    #[test]
    fn nk_version_v2_header() {
        let mut nk = vec![0u8; 16];
        nk[0..4].copy_from_slice(&[0x48, 0x00, 0x00, 0x0C]);
        nk[4] = 0x01;
        nk[5] = 0x23;
        assert_eq!(get_nk_version(&nk), Some("v01.23".to_string()));
    }
}
