//! LZSS compressor/decompressor for classic Mac OS ROM images.
//!
//! This is the dictionary scheme Apple's ROM build tools used: a 4096-byte
//! ring buffer seeded with spaces, matches of 3-18 bytes encoded as a
//! 2-byte position/length pair, literals passed through uncoded, and an
//! 8-bit control byte (LSB first) choosing between the two per unit.
//! Ported from Haruhiko Okumura's 1989 reference implementation.

mod tree;

use thiserror::Error;
use tree::Tree;

/// Ring buffer size.
pub(crate) const N: usize = 0x1000;
/// Maximum match length.
pub(crate) const F: usize = 18;
/// Matches shorter than this aren't worth encoding as a pair.
pub(crate) const THRESHOLD: usize = 2;

#[derive(Debug, Error)]
pub enum LzssError {
    #[error("truncated LZSS stream: expected a byte after control byte {control:#04x} at unit {unit}")]
    Truncated { control: u8, unit: usize },
}

/// Decompress an LZSS stream produced by [`compress`].
///
/// A stream whose final control byte describes fewer literal/match units
/// than there are remaining input bytes simply stops early — mirroring
/// the reference decoder's tolerance for a final header with "fewer
/// than 8 real bits".
pub fn decompress(lzss: &[u8]) -> Result<Vec<u8>, LzssError> {
    let mut plain = Vec::new();
    let mut lzdict = vec![b' '; N];
    let mut dict_i: usize = N - F;

    let mut push = |byte: u8, lzdict: &mut [u8], dict_i: &mut usize| {
        lzdict[*dict_i % N] = byte;
        *dict_i += 1;
        plain.push(byte);
    };

    let mut iter = lzss.iter().copied();
    let mut unit = 0usize;

    'outer: while let Some(header) = iter.next() {
        for bitnum in 0..8 {
            if (header >> bitnum) & 1 != 0 {
                let Some(byte) = iter.next() else {
                    break 'outer;
                };
                push(byte, &mut lzdict, &mut dict_i);
            } else {
                let Some(byte1) = iter.next() else {
                    break 'outer;
                };
                let Some(byte2) = iter.next() else {
                    return Err(LzssError::Truncated {
                        control: header,
                        unit,
                    });
                };
                let lookup_i = ((byte2 as usize) << 4) & 0xf00 | byte1 as usize;
                let lookup_len = (byte2 as usize & 0x0f) + 3;
                for i in lookup_i..lookup_i + lookup_len {
                    let b = lzdict[i % N];
                    push(b, &mut lzdict, &mut dict_i);
                }
            }
            unit += 1;
        }
    }

    Ok(plain)
}

/// Compress a plaintext buffer into an LZSS stream.
pub fn compress(plain: &[u8]) -> Vec<u8> {
    log::debug!("lzss: compressing {} bytes", plain.len());

    if plain.is_empty() {
        return Vec::new();
    }

    let mut tree = Tree::new();
    let mut text_buf = vec![0u8; N + F - 1];
    for slot in &mut text_buf[0..N - F] {
        *slot = b' ';
    }

    let plain_len = plain.len();
    let mut plain_i = 0usize;

    let mut code_buf_list: Vec<Vec<u8>> = vec![vec![0u8]];
    let mut mask: u16 = 1;

    let mut s = 0usize;
    let mut r = N - F;

    let mut tblen = 0usize;
    while tblen < F && plain_i < plain_len {
        text_buf[r + tblen] = plain[plain_i];
        tblen += 1;
        plain_i += 1;
    }

    for i in 1..=F {
        tree.insert_node(r - i, &text_buf);
    }

    let (mut match_position, mut match_length) = tree.insert_node(r, &text_buf);

    loop {
        match_length = match_length.min(tblen);

        if match_length <= THRESHOLD {
            match_length = 1;
            let code_buf = code_buf_list.last_mut().unwrap();
            code_buf[0] |= mask as u8;
            code_buf.push(text_buf[r]);
        } else {
            let byte1 = (match_position & 0xFF) as u8;
            let byte2 = ((match_position >> 4) & 0xF0) as u8 | (match_length - THRESHOLD - 1) as u8;
            let code_buf = code_buf_list.last_mut().unwrap();
            code_buf.push(byte1);
            code_buf.push(byte2);
        }

        mask = (mask << 1) & 0xFF;
        if mask == 0 {
            code_buf_list.push(vec![0u8]);
            mask = 1;
        }

        let last_match_length = match_length;
        let mut i = 0;
        while i < last_match_length && plain_i < plain_len {
            tree.delete_node(s);
            let c = plain[plain_i];
            plain_i += 1;
            text_buf[s] = c;

            if s < F - 1 {
                text_buf[s + N] = c;
            }

            s = (s + 1) % N;
            r = (r + 1) % N;

            let (mp, ml) = tree.insert_node(r, &text_buf);
            match_position = mp;
            match_length = ml;

            i += 1;
        }

        while i < last_match_length {
            tree.delete_node(s);

            s = (s + 1) % N;
            r = (r + 1) % N;

            tblen -= 1;
            if tblen != 0 {
                let (mp, ml) = tree.insert_node(r, &text_buf);
                match_position = mp;
                match_length = ml;
            }

            i += 1;
        }

        if tblen == 0 {
            break;
        }
    }

    if code_buf_list.last().map(|b| b.len()) == Some(1) {
        code_buf_list.pop();
    }

    code_buf_list.into_iter().flatten().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_round_trips() {
        assert_eq!(compress(b""), Vec::<u8>::new());
        assert_eq!(decompress(b"").unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn all_spaces_compresses_and_round_trips() {
        let plain = vec![b' '; 8192];
        let packed = compress(&plain);
        assert!(packed.len() < plain.len());
        let unpacked = decompress(&packed).unwrap();
        assert_eq!(unpacked, plain);
    }

    #[test]
    fn short_literal_run_round_trips() {
        let plain = b"Mac OS ROM".to_vec();
        let packed = compress(&plain);
        let unpacked = decompress(&packed).unwrap();
        assert_eq!(unpacked, plain);
    }

    #[test]
    fn repetitive_text_round_trips() {
        let plain = b"the quick brown fox jumps over the lazy dog, the quick brown fox jumps over the lazy dog again and again and again".to_vec();
        let packed = compress(&plain);
        let unpacked = decompress(&packed).unwrap();
        assert_eq!(unpacked, plain);
    }

    #[test]
    fn pseudo_random_round_trips_at_several_lengths() {
        for len in [1usize, 17, 4095, 4096, 4097, 20000] {
            let mut state: u32 = 0x2545F491 ^ len as u32;
            let plain: Vec<u8> = (0..len)
                .map(|_| {
                    state ^= state << 13;
                    state ^= state >> 17;
                    state ^= state << 5;
                    (state & 0xFF) as u8
                })
                .collect();
            let packed = compress(&plain);
            let unpacked = decompress(&packed).unwrap();
            assert_eq!(unpacked, plain, "length {len} failed to round-trip");
        }
    }

    #[test]
    fn truncated_backreference_is_an_error() {
        // control byte 0x00: all eight units are backreferences, but only
        // one byte of the first pair follows.
        let packed = vec![0x00u8, 0x12];
        assert!(matches!(
            decompress(&packed),
            Err(LzssError::Truncated { control: 0x00, unit: 0 })
        ));
    }
}
