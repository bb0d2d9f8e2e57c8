//! The recursive dispatcher: probes a blob against the four container
//! codecs in a fixed order, descends into whichever matches, and runs
//! the patch hook on the way out of every `build`.
//!
//! This is the one crate that depends on all four format codecs, so it
//! is also the only implementer of [`tbxi_common::Recurser`] — codecs
//! hand sub-blobs back to it instead of depending on each other.

pub mod patch;

use std::path::{Path, PathBuf};

use tbxi_common::{DispatchError, Recurser};

pub use patch::PatchPolicy;

type ProbeFn = fn(&[u8]) -> bool;
type DumpFn = fn(&[u8], &Path, &dyn Recurser) -> Result<(), DispatchError>;
type BuildFn = fn(&Path, &dyn Recurser) -> Result<Vec<u8>, DispatchError>;

/// Fixed probe order: `[bootinfo, parcels, powerpc, supermario]`.
const CODECS: &[(&str, ProbeFn, DumpFn, BuildFn)] = &[
    ("bootinfo", tbxi_bootinfo::probe, tbxi_bootinfo::dump, tbxi_bootinfo::build),
    ("parcels", tbxi_parcels::probe, tbxi_parcels::dump, tbxi_parcels::build),
    ("powerpc", tbxi_powerpc::probe, tbxi_powerpc::dump, tbxi_powerpc::build),
    ("supermario", tbxi_supermario::probe, tbxi_supermario::dump, tbxi_supermario::build),
];

pub struct Dispatcher {
    patch_policy: PatchPolicy,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(PatchPolicy::default())
    }
}

impl Dispatcher {
    pub fn new(patch_policy: PatchPolicy) -> Self {
        Dispatcher { patch_policy }
    }

    /// Top-level `dump(bytes, dest_path, toplevel=true)`: unlike a
    /// recursive sub-dump, the top-level call never writes `bytes` as a
    /// leaf at `dest_dir` itself — `dest_dir` names the output
    /// directory a matching codec will populate. If nothing matches,
    /// the bytes are written there directly as a single file.
    pub fn dump_toplevel(&self, bytes: &[u8], dest_dir: &Path) -> Result<(), DispatchError> {
        match self.dispatch_dump(bytes, dest_dir) {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_mine() => {
                if let Some(parent) = dest_dir.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(dest_dir, bytes)?;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn dispatch_dump(&self, bytes: &[u8], dest_dir: &Path) -> Result<(), DispatchError> {
        for (name, probe, dump, _) in CODECS {
            if probe(bytes) {
                log::debug!("dispatcher: {name} matched at {}", dest_dir.display());
                return dump(bytes, dest_dir, self);
            }
        }
        Err(DispatchError::NotMine)
    }

    fn build_dir(&self, dir: &Path) -> Result<Vec<u8>, DispatchError> {
        if !dir.is_dir() {
            return Err(DispatchError::NotMine);
        }
        for (name, _, _, build) in CODECS {
            match build(dir, self) {
                Ok(bytes) => {
                    log::debug!("dispatcher: {name} built {}", dir.display());
                    return Ok(bytes);
                }
                Err(e) if e.is_not_mine() => continue,
                Err(e) => return Err(e),
            }
        }
        Err(DispatchError::NotMine)
    }

    fn build_bytes(&self, path: &Path) -> Result<Vec<u8>, DispatchError> {
        let with_src = append_suffix(path, ".src");
        match self.build_dir(&with_src) {
            Ok(bytes) => return Ok(bytes),
            Err(e) if e.is_not_mine() => {}
            Err(e) => return Err(e),
        }
        match self.build_dir(path) {
            Ok(bytes) => return Ok(bytes),
            Err(e) if e.is_not_mine() => {}
            Err(e) => return Err(e),
        }
        log::trace!("dispatcher: reading {} as a raw leaf file", path.display());
        Ok(std::fs::read(path)?)
    }
}

impl Recurser for Dispatcher {
    fn dump(&self, bytes: &[u8], dest: &Path) -> Result<(), DispatchError> {
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(dest, bytes)?;

        let src_dir = append_suffix(dest, ".src");
        match self.dispatch_dump(bytes, &src_dir) {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_mine() => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn build(&self, path: &Path) -> Result<Vec<u8>, DispatchError> {
        let bytes = self.build_bytes(path)?;
        patch::apply(path, bytes, self.patch_policy)
    }
}

fn append_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(suffix);
    PathBuf::from(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unrecognised_toplevel_bytes_become_a_leaf_file() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = Dispatcher::new(PatchPolicy::AlwaysSkip);
        let dest = dir.path().join("out.src");
        dispatcher.dump_toplevel(b"not a known container", &dest).unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"not a known container");
    }

    #[test]
    fn build_falls_back_to_raw_file_when_no_codec_matches() {
        let dir = tempfile::tempdir().unwrap();
        let leaf = dir.path().join("blob");
        std::fs::write(&leaf, b"raw bytes").unwrap();
        let dispatcher = Dispatcher::new(PatchPolicy::AlwaysSkip);
        let bytes = dispatcher.build(&leaf).unwrap();
        assert_eq!(bytes, b"raw bytes");
    }

    #[test]
    fn bootinfo_round_trips_through_the_full_dispatcher() {
        let dispatcher = Dispatcher::new(PatchPolicy::AlwaysSkip);
        let src_dir = tempfile::tempdir().unwrap();
        std::fs::write(
            src_dir.path().join("Bootscript"),
            "<CHRP-BOOT>\nh# 00000000 constant elf-offset\nh# 00000000 constant elf-size\nh# 00000000 constant info-size\n</CHRP-BOOT>\n",
        )
        .unwrap();
        std::fs::write(src_dir.path().join("MacOS.elf"), vec![0x7Fu8; 32]).unwrap();

        let built = dispatcher.build(src_dir.path()).unwrap();
        assert!(tbxi_bootinfo::probe(&built));

        let dump_dir = tempfile::tempdir().unwrap();
        let dest = dump_dir.path().join("rom");
        dispatcher.dump_toplevel(&built, &dest).unwrap();

        let redumped_elf = std::fs::read(dest.join("MacOS.elf")).unwrap();
        assert_eq!(redumped_elf, vec![0x7Fu8; 32]);
    }

    #[test]
    fn patch_hook_rewrites_build_output() {
        let dispatcher = Dispatcher::new(PatchPolicy::AlwaysApply);
        let dir = tempfile::tempdir().unwrap();
        let leaf = dir.path().join("blob");
        std::fs::write(&leaf, b"original").unwrap();

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let script = "#!/bin/sh\ncat > /dev/null\nprintf patched\n";
            let patch_path = dir.path().join("blob.patch");
            std::fs::write(&patch_path, script).unwrap();
            let mut perms = std::fs::metadata(&patch_path).unwrap().permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(&patch_path, perms).unwrap();

            let bytes = dispatcher.build(&leaf).unwrap();
            assert_eq!(bytes, b"patched");
        }
    }
}
