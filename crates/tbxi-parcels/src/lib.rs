//! Toolbox Parcels: the `prcl`-tagged linked tree of device-tree
//! properties and driver blobs used by the NewWorld boot process.
//!
//! A parcels file is a chain of [`structs::PrclNodeStruct`] records
//! linked by absolute file offset, each immediately followed by its own
//! array of [`structs::PrclChildStruct`] records describing child blobs
//! elsewhere in the file (optionally LZSS-compressed, optionally CRC-32
//! checksummed, always 4-byte aligned and padded with `0x99`).

pub mod manifest;
pub mod structs;

use std::collections::HashMap;
use std::path::Path;

use crc::{Crc, CRC_32_ISO_HDLC};
use tbxi_common::{macroman, DispatchError, Recurser};

use manifest::{ChildSpec, NodeSpec, Parcelfile};
use structs::{
    PrclChildStruct, PrclNodeStruct, CHILD_STRUCT_SIZE, DATA_PAD, FLAG_CKSUM, HEAD_PTR_OFFSET,
    HEADER_SIZE_CONST, MAGIC, NODE_STRUCT_SIZE, PREAMBLE_SIZE,
};

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

pub fn probe(binary: &[u8]) -> bool {
    binary.starts_with(b"prcl")
}

fn trim_nul(bytes: &[u8]) -> Vec<u8> {
    match bytes.iter().position(|&b| b == 0) {
        Some(i) => bytes[..i].to_vec(),
        None => bytes.to_vec(),
    }
}

fn pad_field(bytes: &[u8], width: usize) -> Result<[u8; 32], DispatchError> {
    if bytes.len() > width {
        return Err(DispatchError::Codec(format!(
            "field of {} bytes does not fit in {width}",
            bytes.len()
        )));
    }
    let mut out = [0u8; 32];
    out[..bytes.len()].copy_from_slice(bytes);
    Ok(out)
}

fn sanitize(text: &str) -> String {
    let cleaned: String = text
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect();
    let mut out = String::new();
    let mut last_underscore = false;
    for c in cleaned.chars() {
        if c == '_' {
            if last_underscore {
                continue;
            }
            last_underscore = true;
        } else {
            last_underscore = false;
        }
        out.push(c);
    }
    out.trim_matches('_').to_string()
}

fn ostype_tag(ostype: &[u8; 4]) -> String {
    let s = sanitize(&macroman::decode(ostype));
    if s.is_empty() {
        "child".to_string()
    } else {
        s
    }
}

pub fn dump(binary: &[u8], dest_dir: &Path, recurser: &dyn Recurser) -> Result<(), DispatchError> {
    if !probe(binary) {
        return Err(DispatchError::NotMine);
    }
    std::fs::create_dir_all(dest_dir)?;

    let head = u32::from_be_bytes(
        binary
            .get(HEAD_PTR_OFFSET..HEAD_PTR_OFFSET + 4)
            .ok_or(DispatchError::NotMine)?
            .try_into()
            .unwrap(),
    );

    // Identity -> rendering already chosen for a payload, so repeats can
    // be marked `deduplicate=1` instead of extracted again.
    let mut seen: HashMap<(u32, u32, bool), (Option<String>, Vec<Vec<u8>>)> = HashMap::new();
    let mut used_names = std::collections::HashSet::new();
    let mut nodes = Vec::new();
    let mut visited = std::collections::HashSet::new();

    let mut link = head;
    let mut node_index = 0usize;
    while link != 0 {
        if !visited.insert(link) {
            return Err(DispatchError::Layout {
                offset: link as usize,
                message: "node chain cycles back on itself".to_string(),
            });
        }

        let node_off = link as usize;
        let node = PrclNodeStruct::read_from(binary, node_off).ok_or(DispatchError::Layout {
            offset: node_off,
            message: "Node header truncated".to_string(),
        })?;

        let children_start = node_off + node.hdr_size.get() as usize;
        let child_size = node.child_size.get() as usize;
        let mut children = Vec::new();

        for i in 0..node.n_children.get() as usize {
            let child_off = children_start + i * child_size;
            let child = PrclChildStruct::read_from(binary, child_off).ok_or(DispatchError::Layout {
                offset: child_off,
                message: "Child record truncated".to_string(),
            })?;

            let ptr = child.ptr.get();
            let packedlen = child.packedlen.get();
            let compress = &child.compress == b"lzss";
            let key = (ptr, packedlen, compress);
            let is_dup = seen.contains_key(&key);

            let (src, strings) = if let Some(rendered) = seen.get(&key) {
                rendered.clone()
            } else {
                let raw = binary
                    .get(ptr as usize..ptr as usize + packedlen as usize)
                    .ok_or(DispatchError::Layout {
                        offset: ptr as usize,
                        message: "child payload runs off the end of the image".to_string(),
                    })?;
                let unpacked = if compress {
                    tbxi_lzss::decompress(raw).map_err(|e| DispatchError::codec(e.to_string()))?
                } else {
                    raw.to_vec()
                };

                if structs::is_string_ostype(&child.ostype) {
                    let strings: Vec<Vec<u8>> = unpacked
                        .split(|&b| b == 0)
                        .filter(|s| !s.is_empty())
                        .map(|s| s.to_vec())
                        .collect();
                    let rendered = (None, strings);
                    seen.insert(key, rendered.clone());
                    rendered
                } else {
                    let mut filename = format!(
                        "{}_{}_{}",
                        ostype_tag(&node.ostype),
                        ostype_tag(&child.ostype),
                        node_index
                    );
                    while used_names.contains(&filename) {
                        filename.push('_');
                    }
                    used_names.insert(filename.clone());
                    recurser.dump(&unpacked, &dest_dir.join(&filename))?;
                    let rendered = (Some(filename), Vec::new());
                    seen.insert(key, rendered.clone());
                    rendered
                }
            };

            children.push(ChildSpec {
                ostype: child.ostype,
                flags: child.flags.get(),
                name: trim_nul(&child.name),
                src,
                compress,
                dedup: is_dup,
                strings,
            });
        }

        nodes.push(NodeSpec {
            ostype: node.ostype,
            flags: node.flags.get(),
            a: trim_nul(&node.a),
            b: trim_nul(&node.b),
            children,
        });

        link = node.link.get();
        node_index += 1;
    }

    let parcelfile = Parcelfile { nodes };
    std::fs::write(dest_dir.join("Parcelfile"), parcelfile.render())?;
    Ok(())
}

/// Identity key used to find a deduplicated child's already-placed payload.
fn dedup_key(child: &ChildSpec) -> String {
    match &child.src {
        Some(src) => format!("src:{}:{}", src, child.compress),
        None => {
            let joined: Vec<String> = child
                .strings
                .iter()
                .map(|s| hex_of(s))
                .collect();
            format!("strings:{}", joined.join(","))
        }
    }
}

fn hex_of(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

pub fn build(src: &Path, recurser: &dyn Recurser) -> Result<Vec<u8>, DispatchError> {
    let manifest_path = src.join("Parcelfile");
    if !manifest_path.exists() {
        return Err(DispatchError::NotMine);
    }

    let text = std::fs::read_to_string(&manifest_path)?;
    let parcelfile = Parcelfile::parse(&text)?;

    let mut cursor = PREAMBLE_SIZE;
    let mut node_offsets = Vec::with_capacity(parcelfile.nodes.len());
    for node in &parcelfile.nodes {
        node_offsets.push(cursor);
        cursor += NODE_STRUCT_SIZE + node.children.len() * CHILD_STRUCT_SIZE;
    }

    let mut header_region = vec![0u8; cursor];
    let mut data: Vec<u8> = Vec::new();
    let mut placed: HashMap<String, (u32, u32, u32, u32)> = HashMap::new();

    for (ni, node) in parcelfile.nodes.iter().enumerate() {
        let node_off = node_offsets[ni];

        for (ci, child) in node.children.iter().enumerate() {
            let child_off = node_off + NODE_STRUCT_SIZE + ci * CHILD_STRUCT_SIZE;
            let key = dedup_key(child);

            let (ptr, packedlen, unpackedlen, crc) = if let Some(&cached) = placed.get(&key) {
                cached
            } else {
                let raw = if let Some(src_rel) = &child.src {
                    recurser.build(&src.join(src_rel))?
                } else {
                    let mut buf = Vec::new();
                    for s in &child.strings {
                        buf.extend_from_slice(s);
                        buf.push(0);
                    }
                    buf
                };

                let unpackedlen = raw.len() as u32;
                let packed = if child.compress {
                    tbxi_lzss::compress(&raw)
                } else {
                    raw
                };
                let packedlen = packed.len() as u32;
                let crc = CRC32.checksum(&packed);

                let ptr = (cursor + data.len()) as u32;
                data.extend_from_slice(&packed);
                while data.len() % 4 != 0 {
                    data.push(DATA_PAD);
                }

                let entry = (ptr, packedlen, unpackedlen, crc);
                placed.insert(key, entry);
                entry
            };

            let cksum = if child.flags & FLAG_CKSUM != 0 { crc } else { 0 };

            let record = PrclChildStruct {
                ostype: child.ostype,
                flags: tbxi_common::BeU32::new(child.flags),
                compress: if child.compress { *b"lzss" } else { [0; 4] },
                unpackedlen: tbxi_common::BeU32::new(unpackedlen),
                cksum: tbxi_common::BeU32::new(cksum),
                packedlen: tbxi_common::BeU32::new(packedlen),
                ptr: tbxi_common::BeU32::new(ptr),
                name: pad_field(&child.name, 32)?,
            };
            record.write_into(&mut header_region, child_off);
        }

        let link = node_offsets.get(ni + 1).copied().unwrap_or(0) as u32;
        let record = PrclNodeStruct {
            link: tbxi_common::BeU32::new(link),
            ostype: node.ostype,
            hdr_size: tbxi_common::BeU32::new(NODE_STRUCT_SIZE as u32),
            flags: tbxi_common::BeU32::new(node.flags),
            n_children: tbxi_common::BeU32::new(node.children.len() as u32),
            child_size: tbxi_common::BeU32::new(CHILD_STRUCT_SIZE as u32),
            a: pad_field(&node.a, 32)?,
            b: pad_field(&node.b, 32)?,
        };
        record.write_into(&mut header_region, node_off);
    }

    let mut out = header_region;
    out.extend_from_slice(&data);

    out[0..8].copy_from_slice(MAGIC);
    out[8..12].copy_from_slice(&HEADER_SIZE_CONST.to_be_bytes());
    let head = node_offsets.first().copied().unwrap_or(0) as u32;
    out[HEAD_PTR_OFFSET..HEAD_PTR_OFFSET + 4].copy_from_slice(&head.to_be_bytes());

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tbxi_common::recurse::NoRecurse;

    #[test]
    fn probe_requires_magic() {
        assert!(probe(b"prcl\x01\x00\x00\x00more"));
        assert!(!probe(b"nope"));
    }

    #[test]
    fn minimal_tree_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("payload"), [0xAAu8; 16]).unwrap();
        let manifest = "rom  flags=0x00000\n\trom  flags=0x00004 src=payload\n";
        std::fs::write(dir.path().join("Parcelfile"), manifest).unwrap();

        let bytes = build(dir.path(), &NoRecurse).unwrap();
        assert!(probe(&bytes));

        let out_dir = tempfile::tempdir().unwrap();
        dump(&bytes, out_dir.path(), &NoRecurse).unwrap();

        let dumped_manifest = std::fs::read_to_string(out_dir.path().join("Parcelfile")).unwrap();
        let reparsed = Parcelfile::parse(&dumped_manifest).unwrap();
        assert_eq!(reparsed.nodes.len(), 1);
        assert_eq!(reparsed.nodes[0].children.len(), 1);
        let src = reparsed.nodes[0].children[0].src.clone().unwrap();
        let payload = std::fs::read(out_dir.path().join(&src)).unwrap();
        assert_eq!(payload, vec![0xAAu8; 16]);
    }

    #[test]
    fn deduplicated_children_share_one_payload() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("payload"), [0x42u8; 8]).unwrap();
        let manifest = "rom  flags=0x00000\n\
            \trom  flags=0x00000 src=payload\n\
            \trom  flags=0x00000 src=payload deduplicate=1\n";
        std::fs::write(dir.path().join("Parcelfile"), manifest).unwrap();

        let bytes = build(dir.path(), &NoRecurse).unwrap();
        let out_dir = tempfile::tempdir().unwrap();
        dump(&bytes, out_dir.path(), &NoRecurse).unwrap();
        let dumped = std::fs::read_to_string(out_dir.path().join("Parcelfile")).unwrap();
        let reparsed = Parcelfile::parse(&dumped).unwrap();
        assert!(reparsed.nodes[0].children[1].dedup);
    }

    #[test]
    fn data_region_is_four_byte_aligned() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a"), [0x01u8; 3]).unwrap();
        std::fs::write(dir.path().join("b"), [0x02u8; 5]).unwrap();
        let manifest = "rom  flags=0x00000\n\trom  flags=0x00000 src=a\n\trom  flags=0x00000 src=b\n";
        std::fs::write(dir.path().join("Parcelfile"), manifest).unwrap();

        let bytes = build(dir.path(), &NoRecurse).unwrap();
        let node = PrclNodeStruct::read_from(&bytes, PREAMBLE_SIZE).unwrap();
        let children_start = PREAMBLE_SIZE + node.hdr_size.get() as usize;
        let first = PrclChildStruct::read_from(&bytes, children_start).unwrap();
        let second =
            PrclChildStruct::read_from(&bytes, children_start + CHILD_STRUCT_SIZE).unwrap();
        assert_eq!(first.ptr.get() % 4, 0);
        assert_eq!(second.ptr.get() % 4, 0);
    }
}
