//! `Romfile`: the text manifest listing every resource in a SuperMario
//! ROM plus the handful of scalar fields (`rom_size`) the image itself
//! needs that aren't resources at all.

use tbxi_common::manifest::{join_words, quote_word, split_key_value, split_line, ManifestError};
use tbxi_common::{macroman, DispatchError};

pub const HEADER_COMMENT: &str = "\
# Automated dump of Macintosh ROM resources

# The (optional) combo mask switches a resource based on the DefaultRSRCs
# field of the box's ProductInfo structure. (The low-memory variable at
# 0xDD8 points to ProductInfo, and the DefaultRSRCs byte is at offset
# 0x16.) The combo field is usually used for the Standard Apple Numeric
# Environment (SANE) PACKs 4 and 5.

# Summary of known combos:
# 0b01111000    AllCombos (DEFAULT)         Universal resource
# 0b01000000    AppleTalk1                  Appletalk 1.0
# 0b00100000    AppleTalk2                  Appletalk 2.0
# 0b00110000    AppleTalk2_NetBoot_FPU      Has FPU and remote booting
# 0b00001000    AppleTalk2_NetBoot_NoFPU    Has remote booting, no FPU
# 0b00010000    NetBoot                     Has remote booting
";

#[derive(Debug, Clone)]
pub struct ResourceSpec {
    pub rsrc_type: [u8; 4],
    pub id: i16,
    pub name: Vec<u8>,
    pub src: String,
    pub combo: Option<String>,
    pub offset: Option<u32>,
}

#[derive(Debug, Default)]
pub struct Romfile {
    pub rom_size: usize,
    pub resources: Vec<ResourceSpec>,
}

impl Romfile {
    pub fn parse(text: &str) -> Result<Self, DispatchError> {
        let mut romfile = Romfile::default();

        for line in text.lines() {
            let words = split_line(line).map_err(manifest_err)?;
            if words.is_empty() {
                continue;
            }

            let mut rsrc_type = None;
            let mut id = None;
            let mut name = Vec::new();
            let mut src = None;
            let mut combo = None;
            let mut offset = None;
            let mut rom_size = None;

            for word in &words {
                let Ok((k, v)) = split_key_value(word) else {
                    continue;
                };
                match k {
                    "rom_size" => rom_size = Some(parse_usize(v)?),
                    "type" => rsrc_type = Some(four_bytes(&macroman::encode(v))?),
                    "id" => id = Some(parse_i16(v)?),
                    "name" => name = macroman::encode(v),
                    "src" => src = Some(v.to_string()),
                    "combo" => combo = Some(v.to_string()),
                    "offset" => offset = Some(parse_usize(v)? as u32),
                    _ => {}
                }
            }

            if let Some(size) = rom_size {
                romfile.rom_size = size;
            } else if let Some(rsrc_type) = rsrc_type {
                let src = src.ok_or_else(|| {
                    DispatchError::Parse {
                        line: 0,
                        message: "resource line missing src=".to_string(),
                    }
                })?;
                romfile.resources.push(ResourceSpec {
                    rsrc_type,
                    id: id.unwrap_or(0),
                    name,
                    src,
                    combo,
                    offset,
                });
            }
        }

        Ok(romfile)
    }

    pub fn render(rom_size: usize, resources: &[ResourceSpec]) -> String {
        let mut out = String::new();
        out.push_str(HEADER_COMMENT);
        out.push('\n');
        out.push_str(&format!("rom_size={:#x}\n\n", rom_size));

        for r in resources {
            let mut words = vec![
                format!("type={}", quote_word(&macroman::decode(&r.rsrc_type))),
                format!("id={}", r.id),
                format!("name={}", quote_word(&macroman::decode(&r.name))),
                format!("src={}", quote_word(&r.src)),
            ];
            if let Some(combo) = &r.combo {
                words.push(format!("combo={}", combo));
            }
            out.push_str(&join_words(words.iter()));
            out.push('\n');
        }

        out
    }
}

fn manifest_err(e: ManifestError) -> DispatchError {
    DispatchError::Parse {
        line: 0,
        message: e.to_string(),
    }
}

fn parse_usize(text: &str) -> Result<usize, DispatchError> {
    tbxi_common::manifest::parse_uint_literal(text)
        .map(|v| v as usize)
        .map_err(manifest_err)
}

fn parse_i16(text: &str) -> Result<i16, DispatchError> {
    tbxi_common::manifest::parse_int_literal(text)
        .map(|v| v as i16)
        .map_err(manifest_err)
}

fn four_bytes(bytes: &[u8]) -> Result<[u8; 4], DispatchError> {
    if bytes.len() != 4 {
        return Err(DispatchError::Parse {
            line: 0,
            message: format!("resource type must be exactly 4 bytes, got {}", bytes.len()),
        });
    }
    let mut out = [0u8; 4];
    out.copy_from_slice(bytes);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rom_size_and_resource_line() {
        let text = "rom_size=0x400000\n\ntype=ndrv id=-1 name=Main src=\"Rsrc/ndrv_-1\"\n";
        let romfile = Romfile::parse(text).unwrap();
        assert_eq!(romfile.rom_size, 0x400000);
        assert_eq!(romfile.resources.len(), 1);
        assert_eq!(&romfile.resources[0].rsrc_type, b"ndrv");
        assert_eq!(romfile.resources[0].id, -1);
    }

    #[test]
    fn render_round_trips_through_parse() {
        let spec = ResourceSpec {
            rsrc_type: *b"ndrv",
            id: 1,
            name: b"Main".to_vec(),
            src: "Rsrc/ndrv_1".to_string(),
            combo: None,
            offset: None,
        };
        let rendered = Romfile::render(0x1000, &[spec]);
        let parsed = Romfile::parse(&rendered).unwrap();
        assert_eq!(parsed.rom_size, 0x1000);
        assert_eq!(parsed.resources[0].src, "Rsrc/ndrv_1");
    }
}
