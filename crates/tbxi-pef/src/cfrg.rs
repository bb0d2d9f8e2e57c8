//! Adjusts the `cfrg` (Code Fragment) resource's references into a data
//! fork after the code fragments it describes have been relocated.
//!
//! Code fragments referenced via the data fork (rather than embedded in
//! the resource fork) are addressed by a fixed offset recorded in the
//! `cfrg` resource. Whenever the data fork is repacked, those offsets
//! must move with the fragments. Only the old-style `cfrg` layout is
//! handled — that's what every known ROM build uses.
//!
//! Locating a `cfrg` resource's raw bytes is a resource-fork-container
//! concern (out of scope, see `DESIGN.md`), so nothing in this
//! workspace calls these functions outside their own tests yet; they're
//! exposed for a future resource-fork-aware caller.

const K_DATA_FORK_CFRAG_LOCATOR: u8 = 1;

/// Yield the byte offsets of each data-fork-offset field that needs
/// adjusting when fragments referenced by `cfrg` move in the data fork.
pub fn dfrk_offset_field_positions(cfrg: &[u8]) -> Vec<usize> {
    let mut positions = Vec::new();

    let Some(entry_count_bytes) = cfrg.get(28..32) else {
        return positions;
    };
    let entry_count = u32::from_be_bytes(entry_count_bytes.try_into().unwrap());

    let mut ctr = 32usize;

    for _ in 0..entry_count {
        if cfrg.len() < ctr + 43 {
            break;
        }

        if cfrg[ctr + 23] == K_DATA_FORK_CFRAG_LOCATOR {
            positions.push(ctr + 24);
        }

        ctr += 42 + 1 + cfrg[ctr + 42] as usize;
        while ctr % 4 != 0 {
            ctr += 1;
        }
    }

    positions
}

/// Shift every data-fork-offset field in `cfrg` by `delta` bytes.
pub fn adjust_dfrk_offset_fields(cfrg: &[u8], delta: i64) -> Vec<u8> {
    let mut cfrg = cfrg.to_vec();

    for field in dfrk_offset_field_positions(&cfrg) {
        let ofs = u32::from_be_bytes(cfrg[field..field + 4].try_into().unwrap());
        let new_ofs = (ofs as i64 + delta) as u32;
        cfrg[field..field + 4].copy_from_slice(&new_ofs.to_be_bytes());
    }

    cfrg
}

/// The `(start, stop)` byte range in the data fork spanned by every
/// fragment referenced by any `cfrg` resource in `cfrg_list`.
pub fn dfrk_range(cfrg_list: &[&[u8]], dfrk_len: usize) -> (usize, usize) {
    let mut left = dfrk_len;
    let mut right = 0usize;

    for cfrg in cfrg_list {
        for field in dfrk_offset_field_positions(cfrg) {
            let my_left = u32::from_be_bytes(cfrg[field..field + 4].try_into().unwrap()) as usize;
            left = left.min(my_left);

            let my_len = u32::from_be_bytes(cfrg[field + 4..field + 8].try_into().unwrap());
            if my_len == 0 {
                right = dfrk_len;
            } else {
                right = right.max(my_left + my_len as usize);
            }
        }
    }

    (left, right)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_old_style_cfrg(entries: &[(u8, u32, u32, &str)]) -> Vec<u8> {
        let mut buf = vec![0u8; 32];
        buf[28..32].copy_from_slice(&(entries.len() as u32).to_be_bytes());

        for &(locator, offset, length, name) in entries {
            let mut entry = vec![0u8; 42];
            entry[23] = locator;
            entry[24..28].copy_from_slice(&offset.to_be_bytes());
            entry[28..32].copy_from_slice(&length.to_be_bytes());
            entry.push(name.len() as u8);
            entry.extend_from_slice(name.as_bytes());
            while entry.len() % 4 != 0 {
                entry.push(0);
            }
            buf.extend_from_slice(&entry);
        }

        buf
    }

    #[test]
    fn finds_data_fork_locator_fields() {
        let cfrg = make_old_style_cfrg(&[(1, 0x1000, 0x2000, "Main")]);
        let positions = dfrk_offset_field_positions(&cfrg);
        assert_eq!(positions, vec![32 + 24]);
    }

    #[test]
    fn ignores_non_data_fork_locators() {
        let cfrg = make_old_style_cfrg(&[(0, 0x1000, 0x2000, "Main")]);
        assert!(dfrk_offset_field_positions(&cfrg).is_empty());
    }

    #[test]
    fn adjust_shifts_offset_by_delta() {
        let cfrg = make_old_style_cfrg(&[(1, 0x1000, 0x2000, "Main")]);
        let adjusted = adjust_dfrk_offset_fields(&cfrg, 0x100);
        let field = 32 + 24;
        let new_ofs = u32::from_be_bytes(adjusted[field..field + 4].try_into().unwrap());
        assert_eq!(new_ofs, 0x1100);
    }

    #[test]
    fn dfrk_range_spans_all_fragments() {
        let cfrg = make_old_style_cfrg(&[(1, 0x1000, 0x2000, "Main"), (1, 0x4000, 0x1000, "Aux")]);
        let (start, stop) = dfrk_range(&[&cfrg], 0x10000);
        assert_eq!(start, 0x1000);
        assert_eq!(stop, 0x5000);
    }

    #[test]
    fn dfrk_range_zero_length_extends_to_end() {
        let cfrg = make_old_style_cfrg(&[(1, 0x1000, 0, "Main")]);
        let (start, stop) = dfrk_range(&[&cfrg], 0x8000);
        assert_eq!(start, 0x1000);
        assert_eq!(stop, 0x8000);
    }
}
