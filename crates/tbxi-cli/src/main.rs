//! `tbxi`: the Mac OS Toolbox Imager CLI. Two subcommands, `dump` and
//! `build`, thin wrappers around [`tbxi_format::Dispatcher`].
//!
//! BinHex and resource-fork decoding are genuinely out of scope (see
//! `SPEC_FULL.md`); `.rdump` sidecar files are copied verbatim rather
//! than parsed, and `.hqx` input/output is rejected with a pointer to
//! that convention instead of silently producing a broken archive.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use tbxi_common::Recurser;
use tbxi_format::{Dispatcher, PatchPolicy};

const CHRP_BOOT_TAG: &[u8] = b"<CHRP-BOOT>";
const IDUMP_MAGIC: &[u8] = b"tbxichrp";

#[derive(Debug, Parser)]
#[command(name = "tbxi", about = "The Mac OS Toolbox Imager")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Print trace-level logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// How to handle sibling `.patch`/`.patch.sh` scripts during build.
    #[arg(long, value_enum, default_value = "ask", global = true)]
    patch: PatchArg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum PatchArg {
    Ask,
    Yes,
    No,
}

impl From<PatchArg> for PatchPolicy {
    fn from(value: PatchArg) -> Self {
        match value {
            PatchArg::Ask => PatchPolicy::Prompt,
            PatchArg::Yes => PatchPolicy::AlwaysApply,
            PatchArg::No => PatchPolicy::AlwaysSkip,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Break a ROM file into rebuildable parts.
    Dump {
        /// Original file.
        file: PathBuf,
        /// Destination directory (default: `<input-file>.src`).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Recreate a dumped ROM file.
    Build {
        /// Source directory.
        dir: PathBuf,
        /// Destination file (default: `Mac OS ROM`).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() {
    let args = Args::parse();
    simple_logger::SimpleLogger::new()
        .with_level(if args.verbose {
            log::LevelFilter::Trace
        } else {
            log::LevelFilter::Warn
        })
        .init()
        .expect("only one logger is ever installed");

    let dispatcher = Dispatcher::new(args.patch.into());
    let result = match args.command {
        Command::Dump { file, output } => dump(&dispatcher, &file, output),
        Command::Build { dir, output } => build(&dispatcher, &dir, output),
    };

    if let Err(err) = result {
        eprintln!("tbxi: {err:#}");
        std::process::exit(1);
    }
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .map(|e| e.eq_ignore_ascii_case(ext))
        .unwrap_or(false)
}

fn dump(dispatcher: &Dispatcher, file: &Path, output: Option<PathBuf>) -> Result<()> {
    if has_extension(file, "hqx") {
        bail!(
            "BinHex input ({}) is out of scope; supply the plain data fork \
             plus a `{}.rdump` sidecar instead",
            file.display(),
            file.display()
        );
    }

    let output = output.unwrap_or_else(|| {
        let mut s = file.as_os_str().to_os_string();
        s.push(".src");
        PathBuf::from(s)
    });

    match std::fs::remove_dir_all(&output) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e).context(format!("removing old {}", output.display())),
    }

    let bytes = std::fs::read(file).with_context(|| format!("reading {}", file.display()))?;
    dispatcher
        .dump_toplevel(&bytes, &output)
        .with_context(|| format!("dumping {}", file.display()))?;

    let rdump_path = append_suffix(file, ".rdump");
    if rdump_path.exists() && output.is_dir() {
        let rsrc = std::fs::read(&rdump_path)?;
        std::fs::write(output.join("SysEnabler.rdump"), rsrc)?;
    }

    Ok(())
}

fn build(dispatcher: &Dispatcher, dir: &Path, output: Option<PathBuf>) -> Result<()> {
    let output = output.unwrap_or_else(|| PathBuf::from("Mac OS ROM"));

    let bytes = dispatcher
        .build(dir)
        .with_context(|| format!("building {}", dir.display()))?;
    let is_bootinfo = bytes.starts_with(CHRP_BOOT_TAG);

    if has_extension(&output, "hqx") {
        if !is_bootinfo {
            bail!("BinHex output only makes sense for a CHRP boot image");
        }
        bail!(
            "BinHex output ({}) is out of scope; write a plain file and a \
             `.idump`/`.rdump` sidecar instead",
            output.display()
        );
    }

    std::fs::write(&output, &bytes).with_context(|| format!("writing {}", output.display()))?;

    if is_bootinfo {
        let rdump_src = dir.join("SysEnabler.rdump");
        let rdump_dest = append_suffix(&output, ".rdump");
        if rdump_src.exists() {
            std::fs::copy(&rdump_src, &rdump_dest)?;
        } else if rdump_dest.exists() {
            std::fs::remove_file(&rdump_dest)?;
        }

        std::fs::write(append_suffix(&output, ".idump"), IDUMP_MAGIC)?;
    }

    Ok(())
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
    fn dump_rejects_hqx_input() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = Dispatcher::new(PatchPolicy::AlwaysSkip);
        let file = dir.path().join("ROM.hqx");
        std::fs::write(&file, b"irrelevant").unwrap();
        assert!(dump(&dispatcher, &file, None).is_err());
    }

    #[test]
    fn dump_copies_rdump_sidecar_into_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = Dispatcher::new(PatchPolicy::AlwaysSkip);
        let file = dir.path().join("ROM");
        let mut rom = b"<CHRP-BOOT>\nh# 00000000 constant elf-offset\n</CHRP-BOOT>\n".to_vec();
        rom.push(0x04);
        std::fs::write(&file, &rom).unwrap();
        std::fs::write(dir.path().join("ROM.rdump"), b"resource bytes").unwrap();

        let output = dir.path().join("ROM.src");
        dump(&dispatcher, &file, Some(output.clone())).unwrap();

        assert_eq!(
            std::fs::read(output.join("SysEnabler.rdump")).unwrap(),
            b"resource bytes"
        );
    }

    #[test]
    fn dump_removes_stale_output_directory_first() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = Dispatcher::new(PatchPolicy::AlwaysSkip);
        let file = dir.path().join("ROM");
        let mut rom = b"<CHRP-BOOT>\nh# 00000000 constant elf-offset\n</CHRP-BOOT>\n".to_vec();
        rom.push(0x04); // EOT
        std::fs::write(&file, &rom).unwrap();

        let output = dir.path().join("ROM.src");
        std::fs::create_dir_all(&output).unwrap();
        std::fs::write(output.join("stale.txt"), b"leftover").unwrap();

        dump(&dispatcher, &file, Some(output.clone())).unwrap();
        assert!(output.is_dir());
        assert!(!output.join("stale.txt").exists());
    }

    #[test]
    fn build_writes_idump_sidecar_for_bootinfo_output() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = Dispatcher::new(PatchPolicy::AlwaysSkip);
        std::fs::write(
            dir.path().join("Bootscript"),
            "<CHRP-BOOT>\nh# 00000000 constant elf-offset\nh# 00000000 constant elf-size\nh# 00000000 constant info-size\n</CHRP-BOOT>\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("MacOS.elf"), vec![0x7Fu8; 16]).unwrap();

        let output = dir.path().join("out").join("Mac OS ROM");
        std::fs::create_dir_all(output.parent().unwrap()).unwrap();
        build(&dispatcher, dir.path(), Some(output.clone())).unwrap();

        assert_eq!(
            std::fs::read(append_suffix(&output, ".idump")).unwrap(),
            IDUMP_MAGIC
        );
    }

    #[test]
    fn build_rejects_hqx_output() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = Dispatcher::new(PatchPolicy::AlwaysSkip);
        let leaf = dir.path().join("blob");
        std::fs::write(&leaf, b"raw bytes").unwrap();
        let output = dir.path().join("out.hqx");
        let err = build(&dispatcher, &leaf, Some(output)).unwrap_err();
        assert!(err.to_string().contains("BinHex"));
    }
}
