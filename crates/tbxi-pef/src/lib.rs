//! Preferred Executable Format (PEF) container inspector.
//!
//! This is read-only scaffolding used to suggest a name/version for
//! display driver (NDRV) code fragments and to locate the raw code
//! section for a PEF, not a full linker. The container and section
//! header layouts are fixed big-endian records straight from Apple's
//! PEF specification.

pub mod cfrg;
pub mod pidata;

use thiserror::Error;

pub const MAGIC: &[u8; 8] = b"Joy!peff";

const CONT_HEAD_LEN: usize = 4 + 4 + 4 + 4 * 5 + 2 * 2 + 4;
const SEC_HEAD_LEN: usize = 4 + 4 * 5 + 4;

#[derive(Debug, Error)]
pub enum PefError {
    #[error("not a PEF container (missing Joy!peff magic)")]
    NotAPef,
    #[error("PEF container truncated at offset {0:#x}")]
    Truncated(usize),
    #[error("pidata stream error: {0}")]
    PiData(#[from] pidata::PiDataError),
}

/// One section of a parsed PEF container.
#[derive(Debug, Clone)]
pub struct PefSection {
    pub data: Vec<u8>,
    pub region_kind: u8,
    pub header_offset: usize,
    pub is_code: bool,
}

/// A parsed PEF container, reassemblable via [`PefContainer::to_bytes`].
#[derive(Debug, Clone)]
pub struct PefContainer {
    header: Vec<u8>,
    sections: Vec<PefSection>,
    pad_multiple: usize,
}

fn read_u32(data: &[u8], offset: usize) -> Option<u32> {
    data.get(offset..offset + 4)
        .map(|b| u32::from_be_bytes(b.try_into().unwrap()))
}

fn write_u32(data: &mut [u8], offset: usize, value: u32) {
    data[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
}

impl PefContainer {
    /// Parse a PEF container from a data-fork byte slice.
    pub fn parse(data: &[u8]) -> Result<Self, PefError> {
        if !data.starts_with(MAGIC) {
            return Err(PefError::NotAPef);
        }
        if data.len() < CONT_HEAD_LEN {
            return Err(PefError::Truncated(data.len()));
        }

        let sec_count = u16::from_be_bytes(data[32..34].try_into().unwrap()) as usize;

        let mut sections = Vec::with_capacity(sec_count);
        let mut sec_earliest = data.len();
        let mut sec_latest = 0usize;

        for i in 0..sec_count {
            let sh_offset = CONT_HEAD_LEN + SEC_HEAD_LEN * i;
            if data.len() < sh_offset + SEC_HEAD_LEN {
                return Err(PefError::Truncated(sh_offset));
            }

            let exec_size = read_u32(data, sh_offset + 8).ok_or(PefError::Truncated(sh_offset))?;
            let init_size =
                read_u32(data, sh_offset + 12).ok_or(PefError::Truncated(sh_offset))?;
            let raw_size = read_u32(data, sh_offset + 16).ok_or(PefError::Truncated(sh_offset))?;
            let container_offset =
                read_u32(data, sh_offset + 20).ok_or(PefError::Truncated(sh_offset))? as usize;
            let region_kind = data[sh_offset + 24];

            let end = container_offset + raw_size as usize;
            let section_bytes = data
                .get(container_offset..end)
                .ok_or(PefError::Truncated(container_offset))?
                .to_vec();

            let is_code =
                region_kind == 0 && exec_size == init_size && init_size == raw_size;

            sec_earliest = sec_earliest.min(container_offset);
            sec_latest = sec_latest.max(end);

            sections.push(PefSection {
                data: section_bytes,
                region_kind,
                header_offset: sh_offset,
                is_code,
            });
        }

        if data[sec_latest..].iter().any(|&b| b != 0) {
            log::warn!(
                "pef: nonzero trailing data from {:#x} to {:#x}, repacking will drop it",
                sec_latest,
                data.len()
            );
        }

        let mut pad_multiple = 1usize;
        while data.len() % (pad_multiple * 2) == 0 {
            pad_multiple *= 2;
        }

        Ok(Self {
            header: data[..sec_earliest].to_vec(),
            sections,
            pad_multiple,
        })
    }

    pub fn sections(&self) -> &[PefSection] {
        &self.sections
    }

    /// The code section, if one was found (`regionKind == 0` and all
    /// three size fields agree).
    pub fn code(&self) -> Option<&[u8]> {
        self.sections
            .iter()
            .find(|s| s.is_code)
            .map(|s| s.data.as_slice())
    }

    /// Repack the container, relocating section contents and patching
    /// each section header's `containerOffset` (and size fields, for
    /// the code section) to match.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut accum = self.header.clone();

        for section in &self.sections {
            while accum.len() % 16 != 0 {
                accum.push(0);
            }

            let new_off = accum.len() as u32;
            let new_len = section.data.len() as u32;
            accum.extend_from_slice(&section.data);

            write_u32(&mut accum, section.header_offset + 20, new_off);

            if section.is_code {
                for field_offset in (8..20).step_by(4) {
                    write_u32(&mut accum, section.header_offset + field_offset, new_len);
                }
            }
        }

        while accum.len() % self.pad_multiple != 0 {
            accum.push(0);
        }

        accum
    }
}

/// Classic Mac OS `DisplayModeID`/driver-version formatting, per Apple's
/// numeric version packing (`major.minor.bugfix stage release`).
pub fn parse_version(num: u32) -> String {
    let bytes = num.to_be_bytes();
    let (maj, minbug, stage, unreleased) = (bytes[0], bytes[1], bytes[2], bytes[3]);

    let minor = minbug >> 4;
    let bugfix = minbug & 0x0f;

    let stage_char = match stage {
        0x80 => 'f',
        0x60 => 'b',
        0x40 => 'a',
        0x20 => 'd',
        _ => '?',
    };

    let mut vers = format!("{:x}.{:x}", maj, minor);
    if bugfix != 0 {
        vers.push_str(&format!(".{:x}", bugfix));
    }
    if !(stage_char == 'f' && unreleased == 0) {
        vers.push(stage_char);
        vers.push_str(&unreleased.to_string());
    }
    vers
}

/// Decode a 32-byte field that's meant to be a Pascal string but might
/// actually be a plain C string (someone forgot the leading length byte).
pub fn pstring_or_cstring(s: &[u8]) -> &[u8] {
    let plen = s[0] as usize;
    let pstr_end = (1 + plen).min(s.len());
    let pstr = &s[1..pstr_end];

    let mut cstr_end = s.len();
    while cstr_end > 0 && s[cstr_end - 1] == 0 {
        cstr_end -= 1;
    }
    let cstr = &s[..cstr_end];

    if pstr.contains(&0) || 1 + plen > s.len() {
        cstr
    } else {
        pstr
    }
}

/// Scan a code fragment's sections for an `mtej` driver-description
/// header and, if found, suggest a `name-version` string for it.
///
/// Returns `None` for anything that isn't a parseable PEF, or that has
/// no `mtej` header in a code/pidata section — this heuristic is
/// advisory only, never authoritative.
pub fn suggest_name(pef_bytes: &[u8]) -> Option<String> {
    if !pef_bytes.starts_with(MAGIC) {
        return None;
    }

    let pef = PefContainer::parse(pef_bytes).ok()?;

    for section in &pef.sections {
        let unpacked;
        let bytes: &[u8] = if section.region_kind == 2 {
            unpacked = pidata::unpack(&section.data).ok()?;
            &unpacked
        } else if section.region_kind == 1 {
            &section.data
        } else {
            continue;
        };

        if let Some(hdr_ofs) = find_subslice(bytes, b"mtej") {
            if bytes.len() < hdr_ofs + 4 + 4 + 32 + 4 {
                continue;
            }
            let strvers_ofs = hdr_ofs + 4;
            let devnam_ofs = strvers_ofs + 4;
            let drvvers_ofs = devnam_ofs + 32;

            let devnam_field = &bytes[devnam_ofs..devnam_ofs + 32];
            let devnam = pstring_or_cstring(devnam_field);
            let drvvers = u32::from_be_bytes(
                bytes[drvvers_ofs..drvvers_ofs + 4].try_into().ok()?,
            );

            let name = tbxi_common::macroman::decode(devnam);
            return Some(format!("{}-{}", name, parse_version(drvvers)));
        }
    }

    None
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_version_formats_released() {
        assert_eq!(parse_version(0x0150_8000), "1.5");
    }

    #[test]
    fn parse_version_formats_beta() {
        assert_eq!(parse_version(0x0120_6003), "1.2b3");
    }

    #[test]
    fn parse_version_includes_bugfix() {
        assert_eq!(parse_version(0x0112_8000), "1.1.2");
    }

    #[test]
    fn pstring_or_cstring_prefers_pascal_form() {
        let mut field = [0u8; 10];
        field[0] = 3;
        field[1..4].copy_from_slice(b"abc");
        assert_eq!(pstring_or_cstring(&field), b"abc");
    }

    #[test]
    fn pstring_or_cstring_falls_back_to_c_string() {
        // length byte claims 9 but a NUL appears inside the claimed span;
        // the C-string fallback keeps the length byte, trimming only
        // trailing NULs (matches the original's `rstrip`).
        let mut field = [0u8; 10];
        field[0] = 9;
        field[1..4].copy_from_slice(b"abc");
        assert_eq!(pstring_or_cstring(&field), &[9, b'a', b'b', b'c']);
    }

    #[test]
    fn not_a_pef_is_rejected() {
        assert!(matches!(PefContainer::parse(b"garbage"), Err(PefError::NotAPef)));
    }
}
