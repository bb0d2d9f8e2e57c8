//! SuperMario: the classic 68k Mac OS ROM container.
//!
//! A flat image made of a main-code blob, a singly-linked chain of
//! resources (each preceded by a fake Memory Manager handle header so
//! Resource Manager code can dereference it like a real handle), and
//! an optional trailer of declaration ('`decl`') ROM data. Identified by
//! a 200-byte `"kc"` padding run that separates the resource area from
//! the trailer, and by its fixed 2MB/3MB image size.

pub mod allocator;
pub mod manifest;
pub mod structs;

use std::path::Path;

use tbxi_common::{DispatchError, Recurser};

use allocator::RomBuilder;
use manifest::{ResourceSpec, Romfile};
use structs::{
    combo_from_name, combo_name, FakeMMHeader, ResEntry, ResHeader, SuperMarioHeader, HEADER_SIZE,
    RES_HEADER_SIZE,
};

/// The 200-byte pad run (`"kc"` repeated 100 times) separating the
/// resource area from the DeclData trailer.
fn pad() -> Vec<u8> {
    b"kc".repeat(100)
}

/// Recompute both ROM checksums in place: four byte-lane sums packed at
/// 0x30..0x40, then a single word folding even/odd byte sums at 0x00.
pub fn checksum(rom: &mut [u8]) {
    rom[0..4].fill(0);
    rom[0x30..0x40].fill(0);

    let mut lanes = [0u32; 4];
    for (i, &b) in rom.iter().enumerate() {
        lanes[i % 4] = lanes[i % 4].wrapping_add(b as u32);
    }
    for (k, lane) in lanes.iter().enumerate() {
        rom[0x30 + k * 4..0x30 + k * 4 + 4].copy_from_slice(&lane.to_be_bytes());
    }

    let even: u32 = rom.iter().step_by(2).map(|&b| b as u32).fold(0, u32::wrapping_add);
    let odd: u32 = rom[1..]
        .iter()
        .step_by(2)
        .map(|&b| b as u32)
        .fold(0, u32::wrapping_add);
    let oneword = even.wrapping_mul(256).wrapping_add(odd);
    rom[0..4].copy_from_slice(&oneword.to_be_bytes());
}

fn is_supermario(binary: &[u8]) -> bool {
    matches!(binary.len(), 0x200000 | 0x300000) && find_pad(binary).is_some()
}

fn find_pad(binary: &[u8]) -> Option<usize> {
    let pad = pad();
    binary.windows(pad.len()).rposition(|w| w == pad.as_slice())
}

fn extract_decldata(binary: &[u8]) -> &[u8] {
    match find_pad(binary) {
        Some(pos) => &binary[pos + pad().len()..],
        None => &[],
    }
}

/// Walk the singly-linked resource chain from `RomRsrc`, returning
/// offsets in declaration order (the chain itself runs newest-first).
fn extract_resource_offsets(binary: &[u8]) -> Result<Vec<usize>, DispatchError> {
    let header = SuperMarioHeader::read_from(binary).ok_or(DispatchError::NotMine)?;
    let reshead_offset = header.rom_rsrc.get() as usize;
    let reshead = ResHeader::read_from(binary, reshead_offset).ok_or(DispatchError::Layout {
        offset: reshead_offset,
        message: "ResHeader truncated".to_string(),
    })?;

    let mut offsets = Vec::new();
    let mut link = reshead.offset_to_first.get() as usize;
    while link != 0 {
        offsets.push(link);
        let entry = ResEntry::read_from(binary, link).ok_or(DispatchError::Layout {
            offset: link,
            message: "ResEntry truncated".to_string(),
        })?;
        link = entry.offset_to_next as usize;
    }
    offsets.reverse();
    Ok(offsets)
}

fn sanitize_macroman(bytes: &[u8]) -> String {
    tbxi_common::macroman::decode(bytes)
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect()
}

fn dedup_underscores(mut s: String) -> String {
    while s.contains("__") {
        s = s.replace("__", "_");
    }
    s.trim_matches('_').to_string()
}

/// Zero the header's checksums and `RomRsrc`/`RomSize` fields so MainCode
/// dumps reproducibly regardless of where resources ended up in the image
/// it came from.
fn clean_maincode(main_code: &[u8]) -> Vec<u8> {
    let mut out = main_code.to_vec();
    let mut header = SuperMarioHeader::read_from(&out).expect("caller sliced at RomRsrc");
    header.check_sum = tbxi_common::BeU32::new(0);
    header.check_sum0 = tbxi_common::BeU32::new(0);
    header.check_sum1 = tbxi_common::BeU32::new(0);
    header.check_sum2 = tbxi_common::BeU32::new(0);
    header.check_sum3 = tbxi_common::BeU32::new(0);
    header.rom_rsrc = tbxi_common::BeU32::new(0);
    header.rom_size = tbxi_common::BeU32::new(1);
    header.write_into(&mut out);
    out
}

pub fn probe(binary: &[u8]) -> bool {
    is_supermario(binary)
}

pub fn dump(binary: &[u8], dest_dir: &Path, recurser: &dyn Recurser) -> Result<(), DispatchError> {
    if !is_supermario(binary) {
        return Err(DispatchError::NotMine);
    }

    std::fs::create_dir_all(dest_dir)?;

    let header = SuperMarioHeader::read_from(binary).ok_or(DispatchError::NotMine)?;
    let rom_rsrc = header.rom_rsrc.get() as usize;
    log::debug!("supermario: RomRsrc at {rom_rsrc:#x}, image is {} bytes", binary.len());

    let main_code = clean_maincode(&binary[..rom_rsrc]);
    recurser.dump(&main_code, &dest_dir.join("MainCode"))?;

    let decldata = extract_decldata(binary);
    if !decldata.is_empty() {
        recurser.dump(decldata, &dest_dir.join("DeclData"))?;
    }

    let rsrc_dir = dest_dir.join("Rsrc");
    let mut used_names = std::collections::HashSet::new();
    used_names.insert(String::new());
    used_names.insert(".pef".to_string());

    let mut resources = Vec::new();

    for offset in extract_resource_offsets(binary)? {
        let entry = ResEntry::read_from(binary, offset).ok_or(DispatchError::Layout {
            offset,
            message: "ResEntry truncated".to_string(),
        })?;
        let fake_mm_offset = entry.offset_to_data as usize - structs::FAKE_MM_HEADER_SIZE;
        let mmhead = FakeMMHeader::read_from(binary, fake_mm_offset).ok_or(DispatchError::Layout {
            offset: fake_mm_offset,
            message: "FakeMMHeader truncated".to_string(),
        })?;
        if &mmhead.magic_kurt != structs::FAKE_MM_MAGIC
            || mmhead.magic_c0a00000.get() != structs::FAKE_MM_MAGIC_WORD
        {
            return Err(DispatchError::Layout {
                offset: fake_mm_offset,
                message: "bad FakeMMHeader magic".to_string(),
            });
        }

        let data_len = mmhead.data_size_plus_12.get() as usize - 12;
        let data_start = entry.offset_to_data as usize;
        let data = binary
            .get(data_start..data_start + data_len)
            .ok_or(DispatchError::Layout {
                offset: data_start,
                message: "resource data runs off the end of the image".to_string(),
            })?;

        let combo_field = combo_name(entry.combo);

        let mut filename = format!("{}_{}", sanitize_macroman(&entry.rsrc_type), entry.rsrc_id);
        if !entry.rsrc_name.is_empty() && entry.rsrc_name != b"Main" {
            filename.push('_');
            filename.push_str(&sanitize_macroman(&entry.rsrc_name));
        }
        if combo_field != "AllCombos" {
            filename.push('_');
            filename.push_str(&combo_field.replace("AppleTalk", "AT"));
        }
        filename = dedup_underscores(filename);
        if data.starts_with(b"Joy!peff") {
            filename.push_str(".pef");
        }
        while used_names.contains(&filename) {
            filename.insert(0, '_');
        }
        used_names.insert(filename.clone());

        std::fs::create_dir_all(&rsrc_dir)?;
        std::fs::write(rsrc_dir.join(&filename), data)?;

        resources.push(ResourceSpec {
            rsrc_type: entry.rsrc_type,
            id: entry.rsrc_id,
            name: entry.rsrc_name.clone(),
            src: format!("Rsrc/{}", filename),
            combo: (combo_field != "AllCombos").then_some(combo_field),
            offset: None,
        });
    }

    log::trace!("supermario: extracted {} resources", resources.len());
    let romfile = Romfile::render(binary.len(), &resources);
    std::fs::write(dest_dir.join("Romfile"), romfile)?;

    Ok(())
}

pub fn build(src: &Path, recurser: &dyn Recurser) -> Result<Vec<u8>, DispatchError> {
    let romfile_path = src.join("Romfile");
    if !romfile_path.exists() {
        return Err(DispatchError::NotMine);
    }

    let text = std::fs::read_to_string(&romfile_path)?;
    let romfile = Romfile::parse(&text)?;

    let mut builder = RomBuilder::new(romfile.rom_size);

    let main_code = recurser.build(&src.join("MainCode"))?;
    builder
        .insert(0, &main_code, b'm')
        .map_err(DispatchError::codec)?;

    let head_ptr = builder.find_free(RES_HEADER_SIZE).map_err(DispatchError::codec)?;
    builder
        .insert(head_ptr, &vec![0u8; RES_HEADER_SIZE], b'H')
        .map_err(DispatchError::codec)?;

    let decldata_path = src.join("DeclData");
    if decldata_path.exists() {
        let decldata = recurser.build(&decldata_path)?;
        let offset = builder.len() - decldata.len();
        builder.insert(offset, &decldata, b'd').map_err(DispatchError::codec)?;
    }

    let mut ent_ptr: u32 = 0;
    let mut bogus_off: u32 = 0x5C;

    for r in &romfile.resources {
        let data = recurser.build(&src.join(&r.src))?;

        let ofs = match r.offset {
            Some(ofs) => ofs as usize,
            None => builder
                .find_free(structs::FAKE_MM_HEADER_SIZE + data.len())
                .map_err(DispatchError::codec)?,
        };
        let mm_ptr = ofs + 4;
        let data_ptr = ofs + 16;

        let mm = FakeMMHeader {
            magic_kurt: *structs::FAKE_MM_MAGIC,
            magic_c0a00000: tbxi_common::BeU32::new(structs::FAKE_MM_MAGIC_WORD),
            data_size_plus_12: tbxi_common::BeU32::new(data.len() as u32 + 12),
            bogus_off: tbxi_common::BeU32::new(bogus_off),
        };
        let mut blob = bytemuck::bytes_of(&mm).to_vec();
        blob.extend_from_slice(&data);
        builder.insert(mm_ptr - 4, &blob, b'r').map_err(DispatchError::codec)?;

        let combo = match &r.combo {
            Some(name) => combo_from_name(name).unwrap_or_else(|| {
                tbxi_common::manifest::parse_uint_literal(name).unwrap_or(0x78) << 56
            }),
            None => combo_from_name("AllCombos").unwrap(),
        };

        let entry = ResEntry {
            combo,
            offset_to_next: ent_ptr,
            offset_to_data: data_ptr as u32,
            rsrc_type: r.rsrc_type,
            rsrc_id: r.id,
            rsrc_attr: 0x58,
            rsrc_name: r.name.clone(),
        };
        let ent_bytes = entry.to_bytes();
        ent_ptr = builder.find_free(ent_bytes.len()).map_err(DispatchError::codec)? as u32;
        builder
            .insert(ent_ptr as usize, &ent_bytes, b'e')
            .map_err(DispatchError::codec)?;

        bogus_off += 8;
    }

    let mut head: ResHeader = bytemuck::Zeroable::zeroed();
    head.offset_to_first = tbxi_common::BeU32::new(ent_ptr);
    head.max_valid_index = 4;
    head.combo_field_size = 8;
    head.combo_version = tbxi_common::BeU16::new(1);
    head.header_size = tbxi_common::BeU16::new(12);
    head.write_into(&mut builder.rom, head_ptr);

    let mut header =
        SuperMarioHeader::read_from(&builder.rom[..HEADER_SIZE]).expect("header region is in bounds");
    header.rom_rsrc = tbxi_common::BeU32::new(head_ptr as u32);
    header.rom_size = tbxi_common::BeU32::new(builder.len() as u32);
    header.write_into(&mut builder.rom);

    let mut rom = builder.into_bytes();
    checksum(&mut rom);
    Ok(rom)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_zeroes_then_recomputes_deterministically() {
        let mut rom = vec![0u8; 0x10000];
        for (i, b) in rom.iter_mut().enumerate() {
            *b = (i % 211) as u8;
        }
        checksum(&mut rom);
        let snapshot = rom.clone();
        checksum(&mut rom);
        assert_eq!(rom, snapshot);
    }

    #[test]
    fn not_supermario_for_wrong_size() {
        assert!(!is_supermario(&vec![0u8; 0x1000]));
    }
}
