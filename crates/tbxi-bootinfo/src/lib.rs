//! CHRP-boot: the Common Hardware Reference Platform boot script wrapping
//! an ELF trampoline and a parcels tree or LZSS-compressed 68k ROM.
//!
//! The on-disk shape is: Forth source text (`<CHRP-BOOT>`...`</CHRP-BOOT>`
//! plus a trailing CR), an EOT byte, optional zero padding, the ELF, the
//! payload, and an optional Adler-32 trailer comment. The script declares
//! `h# HEX constant NAME` pairs recording where each of those pieces
//! lives; [`script`] finds and rewrites them.

pub mod script;

use std::path::Path;

use tbxi_common::{DispatchError, Recurser};

const OPEN_TAG: &[u8] = b"<CHRP-BOOT>";
const CLOSE_TAG: &[u8] = b"</CHRP-BOOT>";
const EOT: u8 = 0x04;

pub fn probe(binary: &[u8]) -> bool {
    binary.starts_with(OPEN_TAG)
}

fn find_close_tag_end(binary: &[u8]) -> Option<usize> {
    let pos = binary
        .windows(CLOSE_TAG.len())
        .position(|w| w == CLOSE_TAG)?;
    let mut end = pos + CLOSE_TAG.len();
    if binary.get(end) == Some(&b'\r') {
        end += 1;
    }
    Some(end)
}

fn cr_to_lf(bytes: &[u8]) -> Vec<u8> {
    bytes.iter().map(|&b| if b == b'\r' { b'\n' } else { b }).collect()
}

fn lf_to_cr(bytes: &[u8]) -> Vec<u8> {
    bytes.iter().map(|&b| if b == b'\n' { b'\r' } else { b }).collect()
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

fn replace_all(haystack: &[u8], from: &[u8], to: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(haystack.len());
    let mut i = 0;
    while i < haystack.len() {
        if haystack[i..].starts_with(from) {
            out.extend_from_slice(to);
            i += from.len();
        } else {
            out.push(haystack[i]);
            i += 1;
        }
    }
    out
}

/// A Bootscript and its ELF trampoline can be drawn from different
/// toolbox vintages, which disagree on the name of the toolbox-image
/// property. If exactly one side uses the old name and the other the
/// new one, rewrite the script's property name to match the ELF.
fn edit_bootscript_for_elf(script: Vec<u8>, tramp: &[u8]) -> Vec<u8> {
    const OLD_PROP: &[u8] = b"AAPL,toolbox-image,lzss";
    const NEW_PROP: &[u8] = b"AAPL,toolbox-parcels";

    let matrix = (
        contains(&script, OLD_PROP),
        contains(&script, NEW_PROP),
        contains(tramp, OLD_PROP),
        contains(tramp, NEW_PROP),
    );

    match matrix {
        (true, false, false, true) => {
            log::warn!("bootinfo: Bootscript older than MacOS.elf, fixing {OLD_PROP:?} => {NEW_PROP:?}");
            replace_all(&script, OLD_PROP, NEW_PROP)
        }
        (false, true, true, false) => {
            log::warn!("bootinfo: Bootscript newer than MacOS.elf, fixing {NEW_PROP:?} => {OLD_PROP:?}");
            replace_all(&script, NEW_PROP, OLD_PROP)
        }
        _ => script,
    }
}

pub fn dump(binary: &[u8], dest_dir: &Path, recurser: &dyn Recurser) -> Result<(), DispatchError> {
    if !probe(binary) {
        return Err(DispatchError::NotMine);
    }
    std::fs::create_dir_all(dest_dir)?;

    let script_end = find_close_tag_end(binary).ok_or(DispatchError::Layout {
        offset: 0,
        message: "no </CHRP-BOOT> terminator found".to_string(),
    })?;
    let raw_script = &binary[..script_end];
    let decls = script::find_declarations(raw_script);

    let mut readable = cr_to_lf(raw_script);
    for decl in &decls {
        if decl.name != "elf-offset" {
            script::rewrite(&mut readable, decl.span, 0);
        }
    }
    std::fs::write(dest_dir.join("Bootscript"), &readable)?;

    if binary.get(script_end) != Some(&EOT) {
        return Err(DispatchError::Layout {
            offset: script_end,
            message: "expected EOT byte after CHRP-BOOT script".to_string(),
        });
    }

    let elf_offset = script::find_value(&decls, "elf-offset").unwrap_or(0) as usize;
    let elf_size = script::find_value(&decls, "elf-size").unwrap_or(0) as usize;
    let elf_bytes = binary
        .get(elf_offset..elf_offset + elf_size)
        .ok_or(DispatchError::Layout {
            offset: elf_offset,
            message: "ELF region runs off the end of the image".to_string(),
        })?;
    recurser.dump(elf_bytes, &dest_dir.join("MacOS.elf"))?;

    let payload_offset = script::find_value(&decls, "lzss-offset")
        .or_else(|| script::find_value(&decls, "parcels-offset"));
    let payload_size = script::find_value(&decls, "lzss-size")
        .or_else(|| script::find_value(&decls, "parcels-size"));

    if let (Some(offset), Some(size)) = (payload_offset, payload_size) {
        let (offset, size) = (offset as usize, size as usize);
        let payload = binary.get(offset..offset + size).ok_or(DispatchError::Layout {
            offset,
            message: "payload region runs off the end of the image".to_string(),
        })?;
        if payload.starts_with(b"prcl") {
            recurser.dump(payload, &dest_dir.join("Parcels"))?;
        } else {
            let decompressed =
                tbxi_lzss::decompress(payload).map_err(|e| DispatchError::codec(e.to_string()))?;
            recurser.dump(&decompressed, &dest_dir.join("MacROM"))?;
        }
    }

    Ok(())
}

pub fn build(src: &Path, recurser: &dyn Recurser) -> Result<Vec<u8>, DispatchError> {
    let script_path = src.join("Bootscript");
    if !script_path.exists() {
        return Err(DispatchError::NotMine);
    }

    let readable = std::fs::read(&script_path)?;
    let raw_script = lf_to_cr(&readable);
    let elf_bytes = recurser.build(&src.join("MacOS.elf"))?;
    let raw_script = edit_bootscript_for_elf(raw_script, &elf_bytes);
    let decls = script::find_declarations(&raw_script);
    let wants_adler = contains(&raw_script, b"adler32");

    let mut buffer = raw_script;
    buffer.push(EOT);

    let elf_offset_target = script::find_value(&decls, "elf-offset").unwrap_or(0) as usize;
    if elf_offset_target > buffer.len() {
        buffer.resize(elf_offset_target, 0);
    }
    let elf_offset = buffer.len();
    if let Some(span) = script::find_span(&decls, "elf-offset") {
        script::rewrite(&mut buffer, span, elf_offset as u64);
    }
    buffer.extend_from_slice(&elf_bytes);
    if let Some(span) = script::find_span(&decls, "elf-size") {
        script::rewrite(&mut buffer, span, elf_bytes.len() as u64);
    }

    let wants_payload = script::find_span(&decls, "lzss-offset").is_some()
        || script::find_span(&decls, "parcels-offset").is_some();
    if wants_payload {
        let parcels_dir = src.join("Parcels");
        let payload = if parcels_dir.exists() {
            recurser.build(&parcels_dir)?
        } else {
            let raw = recurser.build(&src.join("MacROM"))?;
            if raw.starts_with(b"prcl") {
                raw
            } else {
                tbxi_lzss::compress(&raw)
            }
        };

        let payload_offset = buffer.len();
        buffer.extend_from_slice(&payload);
        for (offset_name, size_name) in [("lzss-offset", "lzss-size"), ("parcels-offset", "parcels-size")] {
            if let Some(span) = script::find_span(&decls, offset_name) {
                script::rewrite(&mut buffer, span, payload_offset as u64);
            }
            if let Some(span) = script::find_span(&decls, size_name) {
                script::rewrite(&mut buffer, span, payload.len() as u64);
            }
        }
    }

    if let Some(span) = script::find_span(&decls, "info-size") {
        script::rewrite(&mut buffer, span, buffer.len() as u64);
    }

    if wants_adler {
        let sum = adler32::adler32(buffer.as_slice()).map_err(DispatchError::Io)?;
        buffer.extend_from_slice(b"\r\\ h# ");
        buffer.extend_from_slice(format!("{sum:08X}").as_bytes());
    }

    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tbxi_common::recurse::NoRecurse;

    fn sample_script(extra: &str) -> String {
        format!(
            "<CHRP-BOOT>\nh# 00000000 constant elf-offset\nh# 00000000 constant elf-size\nh# 00000000 constant info-size\n{extra}</CHRP-BOOT>\n"
        )
    }

    #[test]
    fn probe_requires_open_tag() {
        assert!(probe(b"<CHRP-BOOT>\r\n"));
        assert!(!probe(b"nope"));
    }

    #[test]
    fn build_sets_elf_offset_size_and_info_size() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Bootscript"), sample_script("adler32\n")).unwrap();
        std::fs::write(dir.path().join("MacOS.elf"), vec![0x7Fu8; 1024]).unwrap();

        let bytes = build(dir.path(), &NoRecurse).unwrap();
        let script_end = find_close_tag_end(&bytes).unwrap();
        let decls = script::find_declarations(&bytes[..script_end]);
        let elf_offset = script::find_value(&decls, "elf-offset").unwrap() as usize;
        let elf_size = script::find_value(&decls, "elf-size").unwrap() as usize;
        let info_size = script::find_value(&decls, "info-size").unwrap() as usize;

        assert_eq!(bytes[elf_offset - 1], EOT);
        assert_eq!(elf_size, 1024);
        assert!(info_size <= elf_offset + elf_size);

        let trailer_marker = b"\r\\ h# ";
        let pos = bytes.windows(trailer_marker.len()).rposition(|w| w == trailer_marker).unwrap();
        let hex = std::str::from_utf8(&bytes[pos + trailer_marker.len()..]).unwrap();
        let claimed = u32::from_str_radix(hex, 16).unwrap();
        let actual = adler32::adler32(&bytes[..pos]).unwrap();
        assert_eq!(claimed, actual);
    }

    #[test]
    fn build_fixes_up_toolbox_property_name_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let script = sample_script("AAPL,toolbox-image,lzss\n");
        std::fs::write(dir.path().join("Bootscript"), &script).unwrap();
        std::fs::write(dir.path().join("MacOS.elf"), b"...AAPL,toolbox-parcels...").unwrap();

        let bytes = build(dir.path(), &NoRecurse).unwrap();
        assert!(contains(&bytes, b"AAPL,toolbox-parcels"));
        assert!(!contains(&bytes, b"AAPL,toolbox-image,lzss"));
    }

    #[test]
    fn dump_extracts_elf_and_zeroes_non_elf_offset_constants() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Bootscript"), sample_script("")).unwrap();
        std::fs::write(dir.path().join("MacOS.elf"), vec![0xAAu8; 64]).unwrap();
        let bytes = build(dir.path(), &NoRecurse).unwrap();

        let out_dir = tempfile::tempdir().unwrap();
        dump(&bytes, out_dir.path(), &NoRecurse).unwrap();

        let elf = std::fs::read(out_dir.path().join("MacOS.elf")).unwrap();
        assert_eq!(elf, vec![0xAAu8; 64]);

        let dumped_script = std::fs::read(out_dir.path().join("Bootscript")).unwrap();
        let decls = script::find_declarations(&lf_to_cr(&dumped_script));
        assert_ne!(script::find_value(&decls, "elf-offset").unwrap(), 0);
        assert_eq!(script::find_value(&decls, "elf-size").unwrap(), 0);
        assert_eq!(script::find_value(&decls, "info-size").unwrap(), 0);
    }
}
