//! `Parcelfile`: the tab-indented text manifest for a parcels tree.
//!
//! Indentation carries the nesting: unindented lines are Nodes, one-tab
//! lines are their Children, two-tab lines (only emitted under a `cstr`/
//! `csta` child) are the inline strings making up that child's payload.

use tbxi_common::manifest::{join_words, quote_word, split_line, ManifestError};
use tbxi_common::{macroman, DispatchError};

pub const HEADER_COMMENT: &str = "# Automated dump of a Toolbox Parcels tree\n";

#[derive(Debug, Clone, Default)]
pub struct ChildSpec {
    pub ostype: [u8; 4],
    pub flags: u32,
    pub name: Vec<u8>,
    /// `Some(path)` for a file-backed child; `None` for an inline `cstr`/`csta`.
    pub src: Option<String>,
    pub compress: bool,
    pub dedup: bool,
    pub strings: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, Default)]
pub struct NodeSpec {
    pub ostype: [u8; 4],
    pub flags: u32,
    pub a: Vec<u8>,
    pub b: Vec<u8>,
    pub children: Vec<ChildSpec>,
}

#[derive(Debug, Default)]
pub struct Parcelfile {
    pub nodes: Vec<NodeSpec>,
}

fn manifest_err(line: usize, e: ManifestError) -> DispatchError {
    DispatchError::Parse {
        line,
        message: e.to_string(),
    }
}

fn ostype_word(ostype: &[u8; 4]) -> String {
    let decoded = macroman::decode(ostype);
    decoded.trim_end_matches(' ').to_string()
}

fn parse_ostype(word: &str) -> Result<[u8; 4], DispatchError> {
    let mut bytes = macroman::encode(word);
    if bytes.len() > 4 {
        return Err(DispatchError::Codec(format!(
            "ostype {word:?} longer than 4 bytes"
        )));
    }
    bytes.resize(4, b' ');
    let mut out = [0u8; 4];
    out.copy_from_slice(&bytes);
    Ok(out)
}

fn indent_of(line: &str) -> usize {
    line.chars().take_while(|&c| c == '\t').count()
}

impl Parcelfile {
    pub fn parse(text: &str) -> Result<Self, DispatchError> {
        let mut nodes: Vec<NodeSpec> = Vec::new();

        for (lineno, raw) in text.lines().enumerate() {
            let trimmed = raw.trim_start_matches('\t');
            if trimmed.trim().is_empty() || trimmed.trim_start().starts_with('#') {
                continue;
            }
            let depth = indent_of(raw);
            let words = split_line(trimmed).map_err(|e| manifest_err(lineno + 1, e))?;
            if words.is_empty() {
                continue;
            }

            match depth {
                0 => {
                    let mut node = NodeSpec {
                        ostype: parse_ostype(&words[0])?,
                        ..Default::default()
                    };
                    for word in &words[1..] {
                        if let Some((k, v)) = word.split_once('=') {
                            match k {
                                "flags" => {
                                    node.flags = tbxi_common::manifest::parse_uint_literal(v)
                                        .map_err(|e| manifest_err(lineno + 1, e))?
                                        as u32
                                }
                                "a" => node.a = macroman::encode(v),
                                "b" => node.b = macroman::encode(v),
                                _ => {}
                            }
                        }
                    }
                    nodes.push(node);
                }
                1 => {
                    let node = nodes.last_mut().ok_or_else(|| DispatchError::Parse {
                        line: lineno + 1,
                        message: "child line before any node".to_string(),
                    })?;
                    let mut child = ChildSpec {
                        ostype: parse_ostype(&words[0])?,
                        ..Default::default()
                    };
                    for word in &words[1..] {
                        if let Some((k, v)) = word.split_once('=') {
                            match k {
                                "flags" => {
                                    child.flags = tbxi_common::manifest::parse_uint_literal(v)
                                        .map_err(|e| manifest_err(lineno + 1, e))?
                                        as u32
                                }
                                "name" => child.name = macroman::encode(v),
                                "src" => {
                                    let (path, compress) = match v.strip_suffix(".lzss") {
                                        Some(stripped) => (stripped.to_string(), true),
                                        None => (v.to_string(), false),
                                    };
                                    child.src = Some(path);
                                    child.compress = compress;
                                }
                                "deduplicate" => {
                                    child.dedup = tbxi_common::manifest::parse_bool_literal(v)
                                }
                                _ => {}
                            }
                        }
                    }
                    node.children.push(child);
                }
                _ => {
                    let node = nodes.last_mut().ok_or_else(|| DispatchError::Parse {
                        line: lineno + 1,
                        message: "string line before any node".to_string(),
                    })?;
                    let child = node.children.last_mut().ok_or_else(|| DispatchError::Parse {
                        line: lineno + 1,
                        message: "string line before any child".to_string(),
                    })?;
                    for word in &words {
                        child.strings.push(macroman::encode(word));
                    }
                }
            }
        }

        Ok(Parcelfile { nodes })
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(HEADER_COMMENT);
        out.push('\n');

        for node in &self.nodes {
            let mut words = vec![
                ostype_word(&node.ostype),
                format!("flags={:#07x}", node.flags),
            ];
            if !node.a.is_empty() {
                words.push(format!("a={}", quote_word(&macroman::decode(&node.a))));
            }
            if !node.b.is_empty() {
                words.push(format!("b={}", quote_word(&macroman::decode(&node.b))));
            }
            out.push_str(&join_words(words.iter()));
            out.push('\n');

            for child in &node.children {
                let mut words = vec![
                    ostype_word(&child.ostype),
                    format!("flags={:#07x}", child.flags),
                ];
                if !child.name.is_empty() {
                    words.push(format!("name={}", quote_word(&macroman::decode(&child.name))));
                }
                if let Some(src) = &child.src {
                    let rendered = if child.compress {
                        format!("{src}.lzss")
                    } else {
                        src.clone()
                    };
                    words.push(format!("src={}", quote_word(&rendered)));
                }
                if child.dedup {
                    words.push("deduplicate=1".to_string());
                }
                out.push('\t');
                out.push_str(&join_words(words.iter()));
                out.push('\n');

                for s in &child.strings {
                    out.push_str("\t\t");
                    out.push_str(&quote_word(&macroman::decode(s)));
                    out.push('\n');
                }
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_node_and_child_round_trip() {
        let mut pf = Parcelfile::default();
        pf.nodes.push(NodeSpec {
            ostype: *b"rom ",
            flags: 0,
            a: Vec::new(),
            b: Vec::new(),
            children: vec![ChildSpec {
                ostype: *b"rom ",
                flags: 4,
                name: Vec::new(),
                src: Some("payload".to_string()),
                compress: false,
                dedup: false,
                strings: Vec::new(),
            }],
        });

        let rendered = pf.render();
        assert!(rendered.contains("rom  flags=0x00000\n"));
        assert!(rendered.contains("\trom  flags=0x00004 src=payload\n"));

        let reparsed = Parcelfile::parse(&rendered).unwrap();
        assert_eq!(reparsed.nodes.len(), 1);
        assert_eq!(reparsed.nodes[0].children[0].src.as_deref(), Some("payload"));
    }

    #[test]
    fn lzss_suffix_round_trips_through_compress_flag() {
        let mut pf = Parcelfile::default();
        pf.nodes.push(NodeSpec {
            ostype: *b"cstr",
            flags: 0,
            a: Vec::new(),
            b: Vec::new(),
            children: vec![ChildSpec {
                ostype: *b"data",
                flags: 0,
                name: Vec::new(),
                src: Some("blob".to_string()),
                compress: true,
                dedup: false,
                strings: Vec::new(),
            }],
        });
        let rendered = pf.render();
        let parsed = Parcelfile::parse(&rendered).unwrap();
        assert!(parsed.nodes[0].children[0].compress);
        assert_eq!(parsed.nodes[0].children[0].src.as_deref(), Some("blob"));
    }

    #[test]
    fn inline_strings_parse_at_two_tabs() {
        let text = "cstr flags=0x00000\n\tcstr flags=0x00000\n\t\thello\n\t\tworld\n";
        let parsed = Parcelfile::parse(text).unwrap();
        assert_eq!(parsed.nodes[0].children[0].strings.len(), 2);
        assert_eq!(
            macroman::decode(&parsed.nodes[0].children[0].strings[0]),
            "hello"
        );
    }
}
