//! The free-space tracker `build` uses to place resources into a blank
//! ROM image.
//!
//! `free_map` mirrors the ROM one byte per 16-byte slot: `X` marks free
//! space, any other uppercase letter marks a placed-but-movable region
//! (only overwritable by another placement), and lowercase marks a
//! region that has settled into its final spot. This lets a human
//! skimming a hex dump of the map see roughly what landed where.

pub const ALIGN: usize = 16;

pub struct RomBuilder {
    pub rom: Vec<u8>,
    free_map: Vec<u8>,
}

impl RomBuilder {
    pub fn new(rom_size: usize) -> Self {
        let mut rom = Vec::with_capacity(rom_size);
        while rom.len() < rom_size {
            rom.extend_from_slice(b"kc");
        }
        rom.truncate(rom_size);
        RomBuilder {
            rom,
            free_map: vec![b'X'; rom_size / ALIGN],
        }
    }

    pub fn len(&self) -> usize {
        self.rom.len()
    }

    /// Place `data` at `offset`, tagging the slots it covers with `letter`.
    /// Overwriting an existing reservation is only allowed when that
    /// reservation is itself still capital (movable).
    pub fn insert(&mut self, offset: usize, data: &[u8], letter: u8) -> Result<(), String> {
        if offset + data.len() > self.rom.len() {
            return Err(format!(
                "ROM too small to insert {:?} at {:#x}",
                letter as char, offset
            ));
        }
        self.rom[offset..offset + data.len()].copy_from_slice(data);

        let start = offset / ALIGN;
        let stop = (offset + data.len() - 1) / ALIGN + 1;
        for i in start..stop {
            let existing = self.free_map[i];
            if existing != b'X' && !existing.is_ascii_uppercase() {
                return Err(format!(
                    "tried to insert {:?} over {:?} at {:#x}",
                    letter as char, existing as char, offset
                ));
            }
            self.free_map[i] = letter;
        }
        Ok(())
    }

    /// Find the first run of `length` bytes (rounded up to [`ALIGN`])
    /// that is entirely free.
    pub fn find_free(&self, length: usize) -> Result<usize, String> {
        let slots_needed = (length + ALIGN - 1) / ALIGN;
        if slots_needed == 0 {
            return Ok(0);
        }
        let window = self
            .free_map
            .windows(slots_needed)
            .position(|w| w.iter().all(|&b| b == b'X'))
            .ok_or_else(|| format!("no free run of {} slots found", slots_needed))?;
        Ok(window * ALIGN)
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.rom
    }
}
